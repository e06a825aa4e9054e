//! Authentication tokens sent in `HELLO`/`LOGON`.

use std::collections::HashMap;

use bolt_packstream::Value;

/// The credential bundle sent during `HELLO`/`LOGON`. Mirrors the
/// `{scheme, principal, credentials, realm, parameters}` map the server
/// expects, without committing to a specific auth scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthToken {
    pub scheme: String,
    pub principal: String,
    pub credentials: String,
    pub realm: Option<String>,
    pub parameters: HashMap<String, Value>,
}

impl AuthToken {
    pub fn basic(principal: impl Into<String>, credentials: impl Into<String>) -> Self {
        AuthToken {
            scheme: "basic".to_owned(),
            principal: principal.into(),
            credentials: credentials.into(),
            realm: None,
            parameters: HashMap::new(),
        }
    }

    pub fn bearer(credentials: impl Into<String>) -> Self {
        AuthToken {
            scheme: "bearer".to_owned(),
            principal: String::new(),
            credentials: credentials.into(),
            realm: None,
            parameters: HashMap::new(),
        }
    }

    pub fn none() -> Self {
        AuthToken {
            scheme: "none".to_owned(),
            principal: String::new(),
            credentials: String::new(),
            realm: None,
            parameters: HashMap::new(),
        }
    }

    /// Render this token as the packstream map the `HELLO`/`LOGON`
    /// message carries. Never logged or `Debug`-printed as-is by callers
    /// — see `Connection`'s redaction of credentials in trace logging.
    pub fn to_value_map(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("scheme".to_owned(), Value::String(self.scheme.clone()));
        if !self.principal.is_empty() {
            map.insert(
                "principal".to_owned(),
                Value::String(self.principal.clone()),
            );
        }
        if !self.credentials.is_empty() {
            map.insert(
                "credentials".to_owned(),
                Value::String(self.credentials.clone()),
            );
        }
        if let Some(realm) = &self.realm {
            map.insert("realm".to_owned(), Value::String(realm.clone()));
        }
        for (k, v) in &self.parameters {
            map.insert(k.clone(), v.clone());
        }
        map
    }

    /// Tokens are compared by identity for pool validation purposes: a
    /// pooled connection is only handed back to a caller whose requested
    /// auth token matches the one the connection is currently using.
    pub fn matches(&self, other: &AuthToken) -> bool {
        self == other
    }
}

impl std::fmt::Display for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthToken(scheme={}, principal={})", self.scheme, self.principal)
    }
}
