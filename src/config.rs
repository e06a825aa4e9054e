//! Driver configuration: pool sizing, connection lifetime, and the
//! recognized driver-level options.
//!
//! Config here is constructed programmatically — loading it from a file
//! or environment is out of scope — but the struct split mirrors a
//! typed-config-plus-builder shape.

use std::time::Duration;

use crate::auth::AuthToken;
use crate::channel::trust::TrustStrategy;

/// Resolves a seed address into one or more addresses to retry against
/// during rediscovery. The default is the identity function.
pub trait Resolver: Send + Sync {
    fn resolve(&self, seed: &str) -> Vec<String>;
}

/// Identity resolver: returns the seed address unchanged.
pub struct IdentityResolver;

impl Resolver for IdentityResolver {
    fn resolve(&self, seed: &str) -> Vec<String> {
        vec![seed.to_owned()]
    }
}

/// Pool sizing and timeout knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Hard cap on `active + pending` per address.
    pub max_pool_size: usize,
    pub acquisition_timeout: Duration,
    /// Evict a connection on release once it's older than this.
    pub max_connection_lifetime: Option<Duration>,
    /// `None` ⇒ never probe liveness. `Some(Duration::ZERO)` ⇒ always
    /// probe. `Some(d)` with `d > 0` ⇒ probe only if the connection has
    /// been idle longer than `d`.
    pub connection_liveness_check_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_pool_size: 100,
            acquisition_timeout: Duration::from_millis(60_000),
            max_connection_lifetime: None,
            connection_liveness_check_timeout: None,
        }
    }
}

/// Top-level driver configuration.
#[derive(Clone)]
pub struct DriverConfig {
    pub pool: PoolConfig,
    pub user_agent: String,
    pub auth_token: AuthToken,
    /// Default `PULL` size; `-1` means unbounded.
    pub fetch_size: i64,
    pub trust: TrustStrategy,
    pub resolver: std::sync::Arc<dyn Resolver>,
}

impl std::fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverConfig")
            .field("pool", &self.pool)
            .field("user_agent", &self.user_agent)
            .field("auth_token", &self.auth_token)
            .field("fetch_size", &self.fetch_size)
            .field("trust", &self.trust)
            .finish()
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            pool: PoolConfig::default(),
            user_agent: format!("bolt-driver/{}", env!("CARGO_PKG_VERSION")),
            auth_token: AuthToken::none(),
            fetch_size: 1000,
            trust: TrustStrategy::TrustAllCertificates,
            resolver: std::sync::Arc::new(IdentityResolver),
        }
    }
}

impl DriverConfig {
    pub fn builder() -> DriverConfigBuilder {
        DriverConfigBuilder::default()
    }
}

/// Builder for [`DriverConfig`], assembling nested config structs
/// without a file-loading layer.
#[derive(Default)]
pub struct DriverConfigBuilder {
    config: DriverConfigPartial,
}

#[derive(Default)]
struct DriverConfigPartial {
    max_pool_size: Option<usize>,
    acquisition_timeout: Option<Duration>,
    max_connection_lifetime: Option<Duration>,
    connection_liveness_check_timeout: Option<Duration>,
    user_agent: Option<String>,
    auth_token: Option<AuthToken>,
    fetch_size: Option<i64>,
    trust: Option<TrustStrategy>,
    resolver: Option<std::sync::Arc<dyn Resolver>>,
}

impl DriverConfigBuilder {
    pub fn max_pool_size(mut self, n: usize) -> Self {
        self.config.max_pool_size = Some(n);
        self
    }

    pub fn acquisition_timeout(mut self, d: Duration) -> Self {
        self.config.acquisition_timeout = Some(d);
        self
    }

    pub fn max_connection_lifetime(mut self, d: Duration) -> Self {
        self.config.max_connection_lifetime = Some(d);
        self
    }

    pub fn connection_liveness_check_timeout(mut self, d: Duration) -> Self {
        self.config.connection_liveness_check_timeout = Some(d);
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = Some(ua.into());
        self
    }

    pub fn auth_token(mut self, token: AuthToken) -> Self {
        self.config.auth_token = Some(token);
        self
    }

    pub fn fetch_size(mut self, n: i64) -> Self {
        self.config.fetch_size = Some(n);
        self
    }

    pub fn trust(mut self, trust: TrustStrategy) -> Self {
        self.config.trust = Some(trust);
        self
    }

    pub fn resolver(mut self, resolver: std::sync::Arc<dyn Resolver>) -> Self {
        self.config.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> DriverConfig {
        let defaults = DriverConfig::default();
        DriverConfig {
            pool: PoolConfig {
                max_pool_size: self.config.max_pool_size.unwrap_or(defaults.pool.max_pool_size),
                acquisition_timeout: self
                    .config
                    .acquisition_timeout
                    .unwrap_or(defaults.pool.acquisition_timeout),
                max_connection_lifetime: self
                    .config
                    .max_connection_lifetime
                    .or(defaults.pool.max_connection_lifetime),
                connection_liveness_check_timeout: self
                    .config
                    .connection_liveness_check_timeout
                    .or(defaults.pool.connection_liveness_check_timeout),
            },
            user_agent: self.config.user_agent.unwrap_or(defaults.user_agent),
            auth_token: self.config.auth_token.unwrap_or(defaults.auth_token),
            fetch_size: self.config.fetch_size.unwrap_or(defaults.fetch_size),
            trust: self.config.trust.unwrap_or(defaults.trust),
            resolver: self.config.resolver.unwrap_or(defaults.resolver),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = DriverConfig::default();
        assert_eq!(config.pool.max_pool_size, 100);
        assert_eq!(config.pool.acquisition_timeout, Duration::from_millis(60_000));
        assert_eq!(config.fetch_size, 1000);
    }

    #[test]
    fn builder_overrides_apply() {
        let config = DriverConfig::builder().max_pool_size(10).fetch_size(-1).build();
        assert_eq!(config.pool.max_pool_size, 10);
        assert_eq!(config.fetch_size, -1);
        // Unset options keep their defaults.
        assert_eq!(config.pool.acquisition_timeout, Duration::from_millis(60_000));
    }
}
