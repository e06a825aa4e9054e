//! Per-version message dialect: each Bolt minor version is modeled as
//! a variant implementing a common operation interface, not as a
//! subclass.
//!
//! Rather than one type per version, [`Dialect`] pairs the negotiated
//! [`Version`] with a [`Capabilities`] value computed from it, and
//! every request-building method consults that table instead of
//! matching on the version directly.

use std::collections::HashMap;

use bolt_packstream::{map_of, Structure, Value};

use super::signatures::request as sig;
use super::version::Version;
use crate::auth::AuthToken;
use crate::error::BoltError;

/// Feature flags derived purely from the negotiated version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// v3+: `HELLO` carries the merged auth+metadata map in one
    /// message. Below v3: `INIT` takes `(user_agent, auth_token)` as
    /// two separate fields and there is no separate `LOGON`.
    pub explicit_hello: bool,
    pub tx_metadata: bool,
    pub multi_database: bool,
    pub impersonation: bool,
    /// v4.3 capability flag; v5.0+ always uses the UTC wire
    /// convention so this is implied true from there on.
    pub utc_datetime: bool,
    pub separate_logon: bool,
    pub notification_filters: bool,
    pub telemetry: bool,
    pub enriched_status: bool,
    pub routing_message: bool,
}

impl Capabilities {
    pub fn for_version(v: Version) -> Self {
        Capabilities {
            explicit_hello: v.at_least(3, 0),
            tx_metadata: v.at_least(3, 0),
            multi_database: v.at_least(4, 0),
            impersonation: v.at_least(4, 4),
            utc_datetime: v.at_least(4, 3),
            separate_logon: v.at_least(5, 1),
            notification_filters: v.at_least(5, 2),
            telemetry: v.at_least(5, 4),
            enriched_status: v.at_least(5, 5),
            routing_message: v.at_least(4, 3),
        }
    }
}

/// Extra per-request metadata a caller may want to attach; dialects
/// silently omit fields their version doesn't support unless the
/// field was explicitly requested, in which case unsupported usage is
/// a hard `UnsupportedFeature` error raised before any bytes are sent.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub bookmarks: Vec<String>,
    pub tx_timeout: Option<i64>,
    pub tx_metadata: HashMap<String, Value>,
    pub database: Option<String>,
    pub impersonated_user: Option<String>,
    pub notification_filters: Option<Value>,
}

/// A version-keyed request builder. Holds no connection state; it
/// only knows how to shape the packstream structures for its
/// negotiated version.
#[derive(Debug, Clone, Copy)]
pub struct Dialect {
    pub version: Version,
    pub capabilities: Capabilities,
}

impl Dialect {
    pub fn new(version: Version) -> Self {
        Dialect {
            version,
            capabilities: Capabilities::for_version(version),
        }
    }

    fn require(&self, supported: bool, feature: &str) -> Result<(), BoltError> {
        if supported {
            Ok(())
        } else {
            Err(BoltError::UnsupportedFeature {
                negotiated_version: self.version.to_string(),
                feature: feature.to_owned(),
            })
        }
    }

    /// `HELLO` (v3+) or `INIT` (v1/v2) — both use signature
    /// [`sig::HELLO`], only the field shape differs.
    pub fn hello(
        &self,
        user_agent: &str,
        auth_token: &AuthToken,
        routing_context: &HashMap<String, String>,
    ) -> Result<Structure, BoltError> {
        if self.capabilities.explicit_hello {
            let mut metadata = auth_token.to_value_map();
            metadata.insert("user_agent".to_owned(), Value::String(user_agent.to_owned()));
            if self.capabilities.multi_database && !routing_context.is_empty() {
                let routing = routing_context
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect::<HashMap<_, _>>();
                metadata.insert("routing".to_owned(), Value::Map(routing));
            }
            Ok(Structure::new(sig::HELLO, vec![Value::Map(metadata)]))
        } else {
            Ok(Structure::new(
                sig::HELLO,
                vec![
                    Value::String(user_agent.to_owned()),
                    Value::Map(auth_token.to_value_map()),
                ],
            ))
        }
    }

    /// `LOGON` — only v5.1+ separates re-authentication from `HELLO`.
    pub fn logon(&self, auth_token: &AuthToken) -> Result<Structure, BoltError> {
        self.require(self.capabilities.separate_logon, "LOGON")?;
        Ok(Structure::new(sig::LOGON, vec![Value::Map(auth_token.to_value_map())]))
    }

    pub fn logoff(&self) -> Result<Structure, BoltError> {
        self.require(self.capabilities.separate_logon, "LOGOFF")?;
        Ok(Structure::new(sig::LOGOFF, vec![]))
    }

    pub fn goodbye(&self) -> Structure {
        Structure::new(sig::GOODBYE, vec![])
    }

    pub fn run(
        &self,
        query: &str,
        parameters: HashMap<String, Value>,
        ctx: &RequestContext,
    ) -> Result<Structure, BoltError> {
        let extra = self.build_extra(ctx)?;
        Ok(Structure::new(
            sig::RUN,
            vec![Value::String(query.to_owned()), Value::Map(parameters), Value::Map(extra)],
        ))
    }

    pub fn begin(&self, ctx: &RequestContext) -> Result<Structure, BoltError> {
        let extra = self.build_extra(ctx)?;
        Ok(Structure::new(sig::BEGIN, vec![Value::Map(extra)]))
    }

    fn build_extra(&self, ctx: &RequestContext) -> Result<HashMap<String, Value>, BoltError> {
        let mut extra = HashMap::new();
        if !ctx.bookmarks.is_empty() {
            self.require(self.capabilities.tx_metadata, "bookmarks")?;
            extra.insert(
                "bookmarks".to_owned(),
                Value::List(ctx.bookmarks.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(timeout) = ctx.tx_timeout {
            self.require(self.capabilities.tx_metadata, "tx_timeout")?;
            extra.insert("tx_timeout".to_owned(), Value::Integer(timeout));
        }
        if !ctx.tx_metadata.is_empty() {
            self.require(self.capabilities.tx_metadata, "tx_metadata")?;
            extra.insert("tx_metadata".to_owned(), Value::Map(ctx.tx_metadata.clone()));
        }
        if let Some(db) = &ctx.database {
            self.require(self.capabilities.multi_database, "multi-database routing")?;
            extra.insert("db".to_owned(), Value::String(db.clone()));
        }
        if let Some(user) = &ctx.impersonated_user {
            self.require(self.capabilities.impersonation, "user impersonation")?;
            extra.insert("imp_user".to_owned(), Value::String(user.clone()));
        }
        if let Some(filters) = &ctx.notification_filters {
            self.require(self.capabilities.notification_filters, "notification filtering")?;
            extra.insert("notifications".to_owned(), filters.clone());
        }
        Ok(extra)
    }

    pub fn pull(&self, n: i64) -> Structure {
        Structure::new(sig::PULL, vec![map_of([("n", Value::Integer(n))])])
    }

    pub fn discard(&self, n: i64) -> Structure {
        Structure::new(sig::DISCARD, vec![map_of([("n", Value::Integer(n))])])
    }

    pub fn commit(&self) -> Structure {
        Structure::new(sig::COMMIT, vec![])
    }

    pub fn rollback(&self) -> Structure {
        Structure::new(sig::ROLLBACK, vec![])
    }

    pub fn reset(&self) -> Structure {
        Structure::new(sig::RESET, vec![])
    }

    /// `ROUTE` — v4.3+ native message; older dialects route via an
    /// equivalent Cypher procedure call instead, which the routing
    /// layer builds as a plain `RUN`/`PULL` pair, not through this
    /// method.
    pub fn route(
        &self,
        routing_context: &HashMap<String, String>,
        bookmarks: &[String],
        database: Option<&str>,
    ) -> Result<Structure, BoltError> {
        self.require(self.capabilities.routing_message, "ROUTE message")?;
        let routing = routing_context
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<HashMap<_, _>>();
        let bookmarks = Value::List(bookmarks.iter().cloned().map(Value::String).collect());
        let db = match database {
            Some(db) => Value::String(db.to_owned()),
            None => Value::Null,
        };
        Ok(Structure::new(sig::ROUTE, vec![Value::Map(routing), bookmarks, db]))
    }

    pub fn telemetry(&self, api: i64) -> Result<Structure, BoltError> {
        self.require(self.capabilities.telemetry, "TELEMETRY")?;
        Ok(Structure::new(sig::TELEMETRY, vec![map_of([("api", Value::Integer(api))])]))
    }
}
