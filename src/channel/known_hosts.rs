//! Trust-on-first-use known-hosts file parsing.
//!
//! One line per host: `host:port <algo> <fingerprint>`. Duplicates are
//! tolerated; the first valid match for a given host:port wins; a
//! mismatch against a stored fingerprint fails with a message naming
//! both.

use std::collections::HashMap;

use crate::error::BoltError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownHostEntry {
    pub algorithm: String,
    pub fingerprint: String,
}

/// An in-memory view of a known-hosts file, keyed by `host:port`.
#[derive(Debug, Clone, Default)]
pub struct KnownHostsStore {
    entries: HashMap<String, KnownHostEntry>,
}

impl KnownHostsStore {
    pub fn new() -> Self {
        KnownHostsStore::default()
    }

    /// Parse known-hosts file contents. Malformed lines are skipped
    /// (matching real-world known_hosts tolerance for stray/blank
    /// lines); only the first entry seen for a given host:port is kept.
    pub fn parse(contents: &str) -> Self {
        let mut store = KnownHostsStore::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(host_port), Some(algo), Some(fingerprint)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            store
                .entries
                .entry(host_port.to_owned())
                .or_insert_with(|| KnownHostEntry {
                    algorithm: algo.to_owned(),
                    fingerprint: fingerprint.to_owned(),
                });
        }
        store
    }

    /// Verify an observed certificate fingerprint against the stored
    /// entry for `host:port`. Returns `Ok(true)` when the host is new
    /// (trust-on-first-use: the caller should then record it),
    /// `Ok(false)` is never returned — a mismatch is always an error so
    /// callers cannot silently proceed.
    pub fn verify(
        &self,
        host_port: &str,
        algorithm: &str,
        observed_fingerprint: &str,
    ) -> Result<TofuOutcome, BoltError> {
        match self.entries.get(host_port) {
            None => Ok(TofuOutcome::NewHost),
            Some(entry) if entry.algorithm == algorithm && entry.fingerprint == observed_fingerprint => {
                Ok(TofuOutcome::Matched)
            }
            Some(entry) => Err(BoltError::InvalidKnownHosts(format!(
                "fingerprint mismatch for {host_port}: known_hosts has {alg}:{known} but server presented {observed}",
                alg = entry.algorithm,
                known = entry.fingerprint,
                observed = observed_fingerprint
            ))),
        }
    }

    pub fn record(&mut self, host_port: impl Into<String>, algorithm: impl Into<String>, fingerprint: impl Into<String>) {
        self.entries.entry(host_port.into()).or_insert_with(|| KnownHostEntry {
            algorithm: algorithm.into(),
            fingerprint: fingerprint.into(),
        });
    }

    pub fn serialize(&self) -> String {
        let mut lines: Vec<String> = self
            .entries
            .iter()
            .map(|(host_port, entry)| format!("{host_port} {} {}", entry.algorithm, entry.fingerprint))
            .collect();
        lines.sort();
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TofuOutcome {
    NewHost,
    Matched,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_host_is_trusted_on_first_use() {
        let store = KnownHostsStore::parse("");
        assert_eq!(
            store.verify("h:7687", "sha256", "abc").unwrap(),
            TofuOutcome::NewHost
        );
    }

    #[test]
    fn matching_fingerprint_verifies() {
        let store = KnownHostsStore::parse("h:7687 sha256 abc123\n");
        assert_eq!(
            store.verify("h:7687", "sha256", "abc123").unwrap(),
            TofuOutcome::Matched
        );
    }

    #[test]
    fn mismatched_fingerprint_fails_with_both_values_named() {
        let store = KnownHostsStore::parse("h:7687 sha256 abc123\n");
        let err = store.verify("h:7687", "sha256", "zzz999").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("zzz999"));
    }

    #[test]
    fn duplicate_lines_keep_first_entry() {
        let store = KnownHostsStore::parse("h:7687 sha256 first\nh:7687 sha256 second\n");
        assert_eq!(
            store.verify("h:7687", "sha256", "first").unwrap(),
            TofuOutcome::Matched
        );
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        let store = KnownHostsStore::parse("\n# comment\nh:7687 sha256 abc\n\n");
        assert_eq!(
            store.verify("h:7687", "sha256", "abc").unwrap(),
            TofuOutcome::Matched
        );
    }
}
