//! Driver-wide error taxonomy.

use thiserror::Error;

use bolt_packstream::PackstreamError;

/// The error kinds the driver core must distinguish.
///
/// Authentication failures (`Unauthorized`/`TokenExpired`/
/// `CredentialsExpired`/`Forbidden`) are folded into a single variant
/// because every caller in this crate treats them identically: in
/// verification paths they resolve to `false` rather than propagating,
/// and everywhere else they trigger the same global re-auth path as a
/// `ClientError` with `authorization_expired` set.
#[derive(Debug, Error)]
pub enum BoltError {
    /// Malformed bytes, wrong struct size, unknown version, an HTTP
    /// server detected during handshake. Fatal to the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No routers, channel connection failure, or the pool is closed.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The routing table has no server for the required role after a
    /// refresh attempt.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// Retriable by the caller (deadlock, lease loss, and similar
    /// server-reported transient conditions).
    #[error("transient error [{code}]: {message}")]
    Transient { code: String, message: String },

    /// A request-level error surfaced verbatim from the server.
    #[error("client error [{code}]: {message}")]
    Client {
        code: String,
        message: String,
        /// Set when the server's code names an authorization-expired
        /// condition; triggers global re-authentication.
        authorization_expired: bool,
    },

    /// Authentication failed (`Unauthorized` / `TokenExpired` /
    /// `CredentialsExpired` / `Forbidden`).
    #[error("authentication failed [{code}]: {message}")]
    AuthenticationFailed { code: String, message: String },

    /// The pool could not satisfy an acquire within its budget.
    #[error("acquisition timed out after {timeout_ms} ms: {detail}")]
    AcquisitionTimeout { timeout_ms: u64, detail: String },

    /// A feature was requested against a dialect that doesn't support
    /// it; raised before any bytes are sent.
    #[error("unsupported feature on protocol {negotiated_version}: {feature}")]
    UnsupportedFeature {
        negotiated_version: String,
        feature: String,
    },

    #[error(transparent)]
    Packstream(#[from] PackstreamError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid connection URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid known_hosts entry: {0}")]
    InvalidKnownHosts(String),
}

impl BoltError {
    /// In verification paths, authentication failures resolve to
    /// `false` rather than raising. Callers that need that behavior
    /// check this instead of matching the variant directly.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, BoltError::AuthenticationFailed { .. })
    }

    /// Rebuilds an owned, data-equivalent copy of this error.
    ///
    /// `BoltError` isn't `Clone` (the `Io`/`Packstream` variants wrap
    /// non-`Clone` sources), but the result stream needs to buffer a
    /// terminal error and redeliver it verbatim to every subscriber,
    /// including ones that subscribe after it happened. Non-cloneable
    /// sources collapse to their rendered message, which is lossy only
    /// for `source()`-chasing callers — none exist in this crate.
    pub fn snapshot(&self) -> BoltError {
        match self {
            BoltError::Protocol(m) => BoltError::Protocol(m.clone()),
            BoltError::ServiceUnavailable(m) => BoltError::ServiceUnavailable(m.clone()),
            BoltError::SessionExpired(m) => BoltError::SessionExpired(m.clone()),
            BoltError::Transient { code, message } => BoltError::Transient {
                code: code.clone(),
                message: message.clone(),
            },
            BoltError::Client {
                code,
                message,
                authorization_expired,
            } => BoltError::Client {
                code: code.clone(),
                message: message.clone(),
                authorization_expired: *authorization_expired,
            },
            BoltError::AuthenticationFailed { code, message } => BoltError::AuthenticationFailed {
                code: code.clone(),
                message: message.clone(),
            },
            BoltError::AcquisitionTimeout { timeout_ms, detail } => BoltError::AcquisitionTimeout {
                timeout_ms: *timeout_ms,
                detail: detail.clone(),
            },
            BoltError::UnsupportedFeature {
                negotiated_version,
                feature,
            } => BoltError::UnsupportedFeature {
                negotiated_version: negotiated_version.clone(),
                feature: feature.clone(),
            },
            BoltError::InvalidUrl { url, reason } => BoltError::InvalidUrl {
                url: url.clone(),
                reason: reason.clone(),
            },
            BoltError::InvalidKnownHosts(m) => BoltError::InvalidKnownHosts(m.clone()),
            BoltError::Packstream(_) | BoltError::Io(_) => BoltError::ServiceUnavailable(self.to_string()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BoltError::Transient { .. }
                | BoltError::SessionExpired(_)
                | BoltError::Client {
                    authorization_expired: true,
                    ..
                }
        )
    }
}

pub type BoltResult<T> = Result<T, BoltError>;
