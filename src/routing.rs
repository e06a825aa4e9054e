//! Client-side routing table and rediscovery.
//!
//! Follows the same replace-not-mutate discipline used for shared
//! state elsewhere in this crate ([`crate::pool::Pool`]'s per-key
//! `Mutex`): a table is replaced wholesale under a lock, never mutated
//! in place, so a reader never observes a half-updated table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::address::ServerAddress;
use crate::balancer::{LeastConnected, LoadBalancingStrategy};
use crate::config::Resolver;
use crate::connection::{Connection, NullHandler, ResponseHandler};
use crate::error::BoltError;
use crate::pool::{AcquireContext, Pool, PooledConnection};
use crate::protocol::RequestContext;
use crate::channel::Channel;

use bolt_packstream::{map_of, Value};

/// Access modes: only these two exist; an unrecognized mode string
/// fails synchronously rather than silently defaulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    pub fn parse(s: &str) -> Result<AccessMode, BoltError> {
        match s {
            "READ" => Ok(AccessMode::Read),
            "WRITE" => Ok(AccessMode::Write),
            other => Err(BoltError::Protocol(format!("unknown access mode '{other}'"))),
        }
    }
}

/// Per-database cached table.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    pub routers: Vec<ServerAddress>,
    pub readers: Vec<ServerAddress>,
    pub writers: Vec<ServerAddress>,
    expires_at: Instant,
    /// Set when a successful refresh nonetheless returned zero
    /// writers; a write acquire against such a table forces another
    /// refresh instead of silently returning `SessionExpired` forever.
    pub has_writers: bool,
}

impl RoutingTable {
    fn empty_seeded(routers: Vec<ServerAddress>) -> Self {
        RoutingTable {
            routers,
            readers: Vec::new(),
            writers: Vec::new(),
            expires_at: Instant::now(),
            has_writers: false,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn servers_for(&self, mode: AccessMode) -> &[ServerAddress] {
        match mode {
            AccessMode::Read => &self.readers,
            AccessMode::Write => &self.writers,
        }
    }

    fn has_role(&self, mode: AccessMode) -> bool {
        match mode {
            AccessMode::Read => !self.readers.is_empty(),
            AccessMode::Write => self.has_writers && !self.writers.is_empty(),
        }
    }

    /// All addresses this table currently names — routers, readers,
    /// and writers — used to compute the `keepAll` survivor set on a
    /// successful refresh.
    fn all_addresses(&self) -> HashSet<ServerAddress> {
        self.routers
            .iter()
            .chain(self.readers.iter())
            .chain(self.writers.iter())
            .cloned()
            .collect()
    }

    fn all_tables_addresses<'a>(tables: impl Iterator<Item = &'a RoutingTable>) -> Vec<ServerAddress> {
        let mut set = HashSet::new();
        for t in tables {
            set.extend(t.all_addresses());
        }
        set.into_iter().collect()
    }
}

/// Maintains one [`RoutingTable`] per database name (`""` is the
/// server's default database) plus the pool whose keys it keeps in
/// sync via `keepAll`.
pub struct RoutingDriver<C: Channel + 'static> {
    pool: Pool<C>,
    seed: ServerAddress,
    resolver: Arc<dyn Resolver>,
    routing_context: HashMap<String, String>,
    tables: RwLock<HashMap<String, Arc<RoutingTable>>>,
    read_balancer: LeastConnected,
    write_balancer: LeastConnected,
}

impl<C: Channel + 'static> RoutingDriver<C> {
    pub fn new(pool: Pool<C>, seed: ServerAddress, resolver: Arc<dyn Resolver>, routing_context: HashMap<String, String>) -> Self {
        RoutingDriver {
            pool,
            seed,
            resolver,
            routing_context,
            tables: RwLock::new(HashMap::new()),
            read_balancer: LeastConnected::new(),
            write_balancer: LeastConnected::new(),
        }
    }

    fn db_key(database: Option<&str>) -> String {
        database.unwrap_or("").to_owned()
    }

    /// Refreshes the routing table if needed, picks a server, and hands
    /// back a pooled connection to it.
    pub async fn acquire(
        &self,
        database: Option<&str>,
        mode: AccessMode,
        ctx: &AcquireContext,
    ) -> Result<PooledConnection<C>, BoltError> {
        let address = self.server_for(database, mode).await?;
        self.pool.acquire(&address, ctx).await
    }

    async fn server_for(&self, database: Option<&str>, mode: AccessMode) -> Result<ServerAddress, BoltError> {
        let key = Self::db_key(database);
        let needs_refresh = {
            let tables = self.tables.read().await;
            match tables.get(&key) {
                Some(table) => table.is_expired() || !table.has_role(mode),
                None => true,
            }
        };
        if needs_refresh {
            self.refresh(database).await?;
        }

        let table = {
            let tables = self.tables.read().await;
            tables
                .get(&key)
                .cloned()
                .ok_or_else(|| BoltError::ServiceUnavailable(format!("no routing table for database {key:?}")))?
        };
        if !table.has_role(mode) {
            return Err(BoltError::SessionExpired(format!(
                "routing table has no {mode:?} server for database {key:?} after refresh"
            )));
        }

        let balancer: &dyn LoadBalancingStrategy = match mode {
            AccessMode::Read => &self.read_balancer,
            AccessMode::Write => &self.write_balancer,
        };
        balancer
            .select(table.servers_for(mode), &self.pool)
            .await
            .ok_or_else(|| BoltError::SessionExpired(format!("no {mode:?} server available for database {key:?}")))
    }

    /// Walks the currently known routers (falling back to the seed
    /// address's resolved candidates if all known routers fail),
    /// installing the first table a router successfully returns.
    pub async fn refresh(&self, database: Option<&str>) -> Result<(), BoltError> {
        let key = Self::db_key(database);
        let mut routers_to_try: Vec<ServerAddress> = {
            let tables = self.tables.read().await;
            tables.get(&key).map(|t| t.routers.clone()).unwrap_or_default()
        };
        if routers_to_try.is_empty() {
            routers_to_try.push(self.seed.clone());
        }

        let mut tried: HashSet<ServerAddress> = HashSet::new();
        let mut working = routers_to_try.clone();

        loop {
            for router in working.clone() {
                if tried.contains(&router) {
                    continue;
                }
                tried.insert(router.clone());
                match self.try_router(&router, database).await {
                    Ok(table) => {
                        self.install_table(&key, table).await;
                        return Ok(());
                    }
                    Err(e) => {
                        debug!(%router, error = %e, "forgetting unresponsive router during refresh");
                        working.retain(|a| a != &router);
                    }
                }
            }

            // All known routers failed. Resolve the seed address via
            // the configured resolver, deduplicate against already-
            // probed addresses, and retry.
            let resolved: Vec<ServerAddress> = self
                .resolver
                .resolve(&self.seed.key())
                .into_iter()
                .map(|s| parse_resolved(&s, &self.seed))
                .filter(|a| !tried.contains(a))
                .collect();
            if resolved.is_empty() {
                warn!(database = ?database, "routing refresh exhausted all known and resolved routers");
                return Err(BoltError::ServiceUnavailable(
                    "unable to retrieve routing information: no routers reachable".to_owned(),
                ));
            }
            working = resolved;
        }
    }

    async fn try_router(&self, router: &ServerAddress, database: Option<&str>) -> Result<RoutingTable, BoltError> {
        let mut conn = self.pool.acquire(router, &AcquireContext::default()).await?;
        let metadata = if conn.dialect_supports_route_message() {
            conn.route(&self.routing_context, &[], database).await?
        } else {
            call_routing_procedure(&mut *conn, &self.routing_context, database).await?
        };
        parse_routing_table(&metadata)
    }

    async fn install_table(&self, key: &str, table: RoutingTable) {
        let survivors = {
            let mut tables = self.tables.write().await;
            tables.insert(key.to_owned(), Arc::new(table));
            RoutingTable::all_tables_addresses(tables.values().map(|t| t.as_ref()))
        };
        self.pool.keep_all(&survivors).await;
    }

    /// Drops `addr` from routers and readers of every cached table,
    /// and purges its pool entry. Triggered by network errors against
    /// that address.
    pub async fn forget(&self, addr: &ServerAddress) {
        let mut tables = self.tables.write().await;
        for table in tables.values_mut() {
            let mut updated = table.as_ref().clone();
            updated.routers.retain(|a| a != addr);
            updated.readers.retain(|a| a != addr);
            *table = Arc::new(updated);
        }
        drop(tables);
        self.pool.purge(addr).await;
    }

    /// Drops `addr` from writers only. Triggered by write failures
    /// against that address.
    pub async fn forget_writer(&self, addr: &ServerAddress) {
        let mut tables = self.tables.write().await;
        for table in tables.values_mut() {
            if table.writers.contains(addr) {
                let mut updated = table.as_ref().clone();
                updated.writers.retain(|a| a != addr);
                updated.has_writers = !updated.writers.is_empty();
                *table = Arc::new(updated);
            }
        }
    }

    pub async fn has(&self, addr: &ServerAddress) -> bool {
        let tables = self.tables.read().await;
        tables.values().any(|t| t.all_addresses().contains(addr))
    }
}

fn parse_resolved(s: &str, fallback_port_source: &ServerAddress) -> ServerAddress {
    match s.rsplit_once(':') {
        Some((host, port)) => ServerAddress::new(host, port.parse().unwrap_or(fallback_port_source.port())),
        None => ServerAddress::new(s, fallback_port_source.port()),
    }
}

/// Parses the `{"rt": {"ttl": .., "servers": [{"addresses": [..], "role": ".."}, ...]}}`
/// shape shared by the native `ROUTE` message response and the legacy
/// `CALL dbms.cluster.routing.getRoutingTable` procedure's single
/// output record.
fn parse_routing_table(metadata: &HashMap<String, Value>) -> Result<RoutingTable, BoltError> {
    let rt = metadata
        .get("rt")
        .and_then(Value::as_map)
        .ok_or_else(|| BoltError::Protocol("routing response missing 'rt' field".to_owned()))?;

    let ttl = rt.get("ttl").and_then(Value::as_integer).unwrap_or(0);
    let expires_at = Instant::now()
        .checked_add(clamped_duration_from_ms(ttl))
        .unwrap_or_else(|| Instant::now() + Duration::from_secs(315_360_000_000));

    let servers = rt
        .get("servers")
        .and_then(Value::as_list)
        .ok_or_else(|| BoltError::Protocol("routing response missing 'servers' field".to_owned()))?;

    let mut routers = Vec::new();
    let mut readers = Vec::new();
    let mut writers = Vec::new();

    for entry in servers {
        let entry = entry
            .as_map()
            .ok_or_else(|| BoltError::Protocol("routing server entry is not a map".to_owned()))?;
        let role = entry
            .get("role")
            .and_then(Value::as_str)
            .ok_or_else(|| BoltError::Protocol("routing server entry missing 'role'".to_owned()))?;
        let addresses = entry
            .get("addresses")
            .and_then(Value::as_list)
            .ok_or_else(|| BoltError::Protocol("routing server entry missing 'addresses'".to_owned()))?
            .iter()
            .filter_map(Value::as_str)
            .map(|s| parse_resolved(s, &ServerAddress::new("", crate::address::DEFAULT_PORT)))
            .collect::<Vec<_>>();

        let bucket = match role {
            "ROUTE" => &mut routers,
            "READ" => &mut readers,
            "WRITE" => &mut writers,
            other => {
                return Err(BoltError::Protocol(format!("unknown routing server role '{other}'")));
            }
        };
        bucket.extend(addresses);
    }

    if routers.is_empty() {
        return Err(BoltError::Protocol(
            "routing response named zero routers; at least one is required".to_owned(),
        ));
    }

    Ok(RoutingTable {
        routers,
        readers,
        has_writers: !writers.is_empty(),
        writers,
        expires_at,
    })
}

fn clamped_duration_from_ms(ttl_ms: i64) -> Duration {
    if ttl_ms <= 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(ttl_ms as u64)
    }
}

/// Legacy pre-4.3 rediscovery path: run the routing procedure as a
/// plain Cypher call and collect its single output record into the
/// same `{"rt": ...}` shape `parse_routing_table` expects.
async fn call_routing_procedure<C: Channel>(
    conn: &mut Connection<C>,
    routing_context: &HashMap<String, String>,
    database: Option<&str>,
) -> Result<HashMap<String, Value>, BoltError> {
    struct Collector {
        row: Option<Vec<Value>>,
    }
    impl ResponseHandler for Collector {
        fn on_record(&mut self, fields: Vec<Value>) {
            self.row = Some(fields);
        }
    }

    let context = Value::Map(
        routing_context
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    );
    let mut params = HashMap::new();
    params.insert("context".to_owned(), context);
    if let Some(db) = database {
        params.insert("database".to_owned(), Value::String(db.to_owned()));
    }

    conn.run(
        "CALL dbms.cluster.routing.getRoutingTable($context, $database)",
        params,
        &RequestContext::default(),
        Box::new(NullHandler),
    )
    .await?;
    conn.drain_one().await?; // RUN's own SUCCESS

    let collector = Arc::new(tokio::sync::Mutex::new(Collector { row: None }));
    struct Forwarding(Arc<tokio::sync::Mutex<Collector>>);
    impl ResponseHandler for Forwarding {
        fn on_record(&mut self, fields: Vec<Value>) {
            if let Ok(mut c) = self.0.try_lock() {
                c.row = Some(fields);
            }
        }
    }
    conn.pull(-1, Box::new(Forwarding(collector.clone()))).await?;
    conn.drain_until_ready().await?;

    let row = collector
        .lock()
        .await
        .row
        .take()
        .ok_or_else(|| BoltError::Protocol("routing procedure returned no rows".to_owned()))?;
    let mut iter = row.into_iter();
    let ttl = iter.next().unwrap_or(Value::Integer(0));
    let servers = iter.next().unwrap_or(Value::List(Vec::new()));

    let mut rt = HashMap::new();
    rt.insert("ttl".to_owned(), ttl);
    rt.insert("servers".to_owned(), servers);
    let mut outer = HashMap::new();
    outer.insert("rt".to_owned(), Value::Map(rt));
    Ok(outer)
}
