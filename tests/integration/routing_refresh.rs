//! Routing refresh with a failing head router, exercised over real TCP
//! connections via `bolt-test-utils::FakeBoltServer` so the whole path
//! (handshake, HELLO, ROUTE, table swap, `keepAll` purge) runs through
//! the public API rather than a hand-built table.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bolt_driver::channel::TcpChannel;
use bolt_driver::config::IdentityResolver;
use bolt_driver::protocol::{perform_handshake, propose, signatures::response as resp_sig, Version};
use bolt_driver::{AuthToken, BoltError, Connection, ConnectionFactory, Pool, PoolConfig, RoutingDriver, ServerAddress};
use bolt_packstream::{map_of, Structure, Value};
use bolt_test_utils::FakeBoltServer;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

fn success(fields: HashMap<String, Value>) -> Vec<Structure> {
    vec![Structure::new(resp_sig::SUCCESS, vec![Value::Map(fields)])]
}

fn routing_success(ttl_ms: i64, groups: &[(&str, &[&str])]) -> Vec<Structure> {
    let servers: Vec<Value> = groups
        .iter()
        .map(|(role, addrs)| {
            map_of([
                ("role", Value::String((*role).to_owned())),
                (
                    "addresses",
                    Value::List(addrs.iter().map(|a| Value::String((*a).to_owned())).collect()),
                ),
            ])
        })
        .collect();
    let rt = map_of([("ttl", Value::Integer(ttl_ms)), ("servers", Value::List(servers))]);
    let mut fields = HashMap::new();
    fields.insert("rt".to_owned(), rt);
    success(fields)
}

/// Connects over real TCP, performs the handshake and `HELLO`, and
/// hands back a ready `Connection<TcpChannel>` — the glue a real
/// driver's own factory would supply (`pool.rs`'s own doc comment:
/// "the pool itself has no opinion on how a connection comes into
/// being").
struct TcpFactory {
    negotiated: Version,
    auth: AuthToken,
}

impl ConnectionFactory<TcpChannel> for TcpFactory {
    fn create<'a>(&'a self, address: &'a ServerAddress) -> BoxFuture<'a, Result<Connection<TcpChannel>, BoltError>> {
        Box::pin(async move {
            let mut channel = TcpChannel::connect(address).await?;
            let proposed = propose(&[self.negotiated]);
            let negotiated = perform_handshake(&mut channel, proposed).await?;
            let mut conn = Connection::new(address.clone(), channel, negotiated);
            conn.hello("bolt-driver-test/0", &self.auth, &HashMap::new()).await?;
            Ok(conn)
        })
    }
}

fn driver_seeded_at(seed: ServerAddress, negotiated: Version) -> RoutingDriver<TcpChannel> {
    let pool = Pool::new(
        PoolConfig::default(),
        Arc::new(TcpFactory {
            negotiated,
            auth: AuthToken::basic("neo4j", "password"),
        }),
    );
    RoutingDriver::new(pool, seed, Arc::new(IdentityResolver), HashMap::new())
}

/// A port nothing is listening on: bind then immediately drop the
/// listener, so a connect attempt fails fast and deterministically
/// rather than racing a real connection-refused timeout.
fn dead_address() -> ServerAddress {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    ServerAddress::new("127.0.0.1", addr.port())
}

/// Table `{routers:[r1,r2], expired}`; `r1` is dead, `r2` returns
/// `{readers:[a,b], writers:[c,d], routers:[x,y]}`. The refreshed table
/// must name r2's groups, and `r1` must be dropped from the pool
/// entirely once the new table replaces the old one (`keepAll` during
/// `install_table`).
#[tokio::test]
async fn refresh_walks_past_a_dead_router_to_a_live_one() {
    let version = Version::new(5, 4);
    let r1 = dead_address();

    // Learn a free port synchronously so the bootstrap ROUTE response
    // (which must name both r1 and r2 as routers) can be scripted
    // before the server that will serve it is actually started.
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let r2_bind_addr = probe.local_addr().unwrap();
    drop(probe);
    let r2 = ServerAddress::new("127.0.0.1", r2_bind_addr.port());

    let r2_server = FakeBoltServer::start_on(
        r2_bind_addr,
        version,
        vec![
            success(HashMap::new()), // HELLO, bootstrap refresh against r2 (the seed)
            // First ROUTE: installs a table naming both r1 and r2 as
            // routers, TTL zero so the table is already expired.
            routing_success(0, &[("ROUTE", &[r1.key().as_str(), r2.key().as_str()]), ("READ", &["127.0.0.1:1"]), ("WRITE", &["127.0.0.1:2"])]),
            success(HashMap::new()), // HELLO for whichever connection serves the second refresh
            // Second ROUTE: the refreshed server groups.
            routing_success(
                300_000,
                &[
                    ("READ", &["127.0.0.1:10", "127.0.0.1:11"]),
                    ("WRITE", &["127.0.0.1:12", "127.0.0.1:13"]),
                    ("ROUTE", &["127.0.0.1:20", "127.0.0.1:21"]),
                ],
            ),
        ],
    )
    .await
    .unwrap();

    let driver = driver_seeded_at(r2.clone(), version);

    driver.refresh(None).await.unwrap();
    assert!(driver.has(&r1).await);
    assert!(driver.has(&r2).await);

    // The installed table has ttl=0, so the next `refresh` call walks
    // it again: r1 (dead) is tried and forgotten, r2 (live) succeeds.
    driver.refresh(None).await.unwrap();

    assert!(driver.has(&ServerAddress::new("127.0.0.1", 10)).await);
    assert!(driver.has(&ServerAddress::new("127.0.0.1", 12)).await);
    assert!(driver.has(&ServerAddress::new("127.0.0.1", 20)).await);
    // r1 named no role in the second table (only `ROUTE -> [x, y]`), so
    // `keepAll` during `install_table` must have dropped its pool key.
    assert!(!driver.has(&r1).await);
}

/// `forget`/`forgetWriter` remove exactly the addressed role, and
/// `has` reflects the change immediately.
#[tokio::test]
async fn forget_writer_removes_only_from_writers() {
    let version = Version::new(5, 4);
    let r1_server = FakeBoltServer::start(
        version,
        vec![
            success(HashMap::new()),
            routing_success(300_000, &[("ROUTE", &["127.0.0.1:9001"]), ("READ", &["127.0.0.1:9003"]), ("WRITE", &["127.0.0.1:9005"])]),
        ],
    )
    .await
    .unwrap();
    let r1 = ServerAddress::new("127.0.0.1", r1_server.local_addr().port());
    let writer = ServerAddress::new("127.0.0.1", 9005);
    let reader = ServerAddress::new("127.0.0.1", 9003);

    let driver = driver_seeded_at(r1, version);
    driver.refresh(None).await.unwrap();
    assert!(driver.has(&writer).await);

    driver.forget_writer(&writer).await;
    assert!(!driver.has(&writer).await);
    // forgetWriter must not touch readers/routers.
    assert!(driver.has(&reader).await);
}

/// `forget(addr)` drops `addr` from both readers and routers, and
/// purges its pool key.
#[tokio::test]
async fn forget_removes_from_readers_and_routers_and_purges_pool() {
    let version = Version::new(5, 4);
    let r1_server = FakeBoltServer::start(
        version,
        vec![
            success(HashMap::new()),
            routing_success(
                300_000,
                &[("ROUTE", &["127.0.0.1:9001", "127.0.0.1:9002"]), ("READ", &["127.0.0.1:9002"]), ("WRITE", &["127.0.0.1:9005"])],
            ),
        ],
    )
    .await
    .unwrap();
    let r1 = ServerAddress::new("127.0.0.1", r1_server.local_addr().port());
    let shared = ServerAddress::new("127.0.0.1", 9002); // both a router and a reader

    let driver = driver_seeded_at(r1, version);
    driver.refresh(None).await.unwrap();
    assert!(driver.has(&shared).await);

    driver.forget(&shared).await;
    assert!(!driver.has(&shared).await);
}
