//! TLS trust policy as a channel capability interface: the driver core
//! specifies the trait boundary and the known-hosts file format
//! exactly, not full certificate-chain verification mechanics.

use std::sync::{Arc, Mutex};

use super::known_hosts::{KnownHostsStore, TofuOutcome};
use crate::error::BoltError;

/// Selected by the `+s`/`+ssc` connection URL suffix.
#[derive(Clone)]
pub enum TrustStrategy {
    /// `bolt://` / `neo4j://` — no TLS.
    Plain,
    /// `+s` — full certificate chain verification. The actual chain
    /// verification is delegated to the channel's TLS stack
    /// (`tokio-tungstenite`'s `rustls` backend); this variant only
    /// records the policy selection.
    TrustAllCertificates,
    /// `+ssc` — trust-on-first-use against a known-hosts store.
    TrustOnFirstUse(Arc<Mutex<KnownHostsStore>>),
}

impl std::fmt::Debug for TrustStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrustStrategy::Plain => write!(f, "Plain"),
            TrustStrategy::TrustAllCertificates => write!(f, "TrustAllCertificates"),
            TrustStrategy::TrustOnFirstUse(_) => write!(f, "TrustOnFirstUse"),
        }
    }
}

impl TrustStrategy {
    pub fn trust_on_first_use(store: KnownHostsStore) -> Self {
        TrustStrategy::TrustOnFirstUse(Arc::new(Mutex::new(store)))
    }

    /// Verify an observed certificate fingerprint for `host_port`,
    /// recording it if this is a first encounter under TOFU.
    pub fn verify(&self, host_port: &str, algorithm: &str, fingerprint: &str) -> Result<(), BoltError> {
        match self {
            TrustStrategy::Plain | TrustStrategy::TrustAllCertificates => Ok(()),
            TrustStrategy::TrustOnFirstUse(store) => {
                let mut store = store.lock().expect("known_hosts store lock poisoned");
                match store.verify(host_port, algorithm, fingerprint)? {
                    TofuOutcome::NewHost => {
                        store.record(host_port, algorithm, fingerprint);
                        Ok(())
                    }
                    TofuOutcome::Matched => Ok(()),
                }
            }
        }
    }
}
