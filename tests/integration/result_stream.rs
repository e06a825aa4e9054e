//! Result stream end-to-end, exercised over a real TCP connection via
//! `bolt-test-utils::FakeBoltServer` and a real `Pool` rather than the
//! scripted in-memory channel `src/result_stream.rs`'s own unit tests
//! use — this proves the whole RUN/PULL/connection-release path through
//! the public API, including the pool handing the connection back once
//! the stream's terminal event fires.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bolt_driver::channel::TcpChannel;
use bolt_driver::protocol::{perform_handshake, propose, signatures::response as resp_sig, RequestContext, Version};
use bolt_driver::{
    AcquireContext, AuthToken, BoltError, Connection, ConnectionFactory, ConnectionHolder, Pool, PoolConfig, RecordConsumer, ResultStream, ServerAddress,
};
use bolt_packstream::{map_of, Structure, Value};
use bolt_test_utils::FakeBoltServer;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

fn success(metadata: HashMap<String, Value>) -> Structure {
    Structure::new(resp_sig::SUCCESS, vec![Value::Map(metadata)])
}

fn record(values: Vec<Value>) -> Structure {
    Structure::new(resp_sig::RECORD, vec![Value::List(values)])
}

fn fields(entries: impl IntoIterator<Item = (&'static str, Value)>) -> HashMap<String, Value> {
    entries.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
}

struct TcpFactory {
    negotiated: Version,
}

impl ConnectionFactory<TcpChannel> for TcpFactory {
    fn create<'a>(&'a self, address: &'a ServerAddress) -> BoxFuture<'a, Result<Connection<TcpChannel>, BoltError>> {
        Box::pin(async move {
            let mut channel = TcpChannel::connect(address).await?;
            let proposed = propose(&[self.negotiated]);
            let negotiated = perform_handshake(&mut channel, proposed).await?;
            let mut conn = Connection::new(address.clone(), channel, negotiated);
            conn.hello("bolt-driver-test/0", &AuthToken::basic("neo4j", "password"), &HashMap::new()).await?;
            Ok(conn)
        })
    }
}

struct Captured {
    keys: Option<Vec<String>>,
    records: Vec<Vec<Value>>,
    completed: Option<HashMap<String, Value>>,
    errored: Option<String>,
}

struct Capturing(Arc<StdMutex<Captured>>);
impl RecordConsumer for Capturing {
    fn on_keys(&mut self, keys: &[String]) {
        self.0.lock().unwrap().keys = Some(keys.to_vec());
    }
    fn on_record(&mut self, record: Vec<Value>) {
        self.0.lock().unwrap().records.push(record);
    }
    fn on_completed(&mut self, summary: HashMap<String, Value>) {
        self.0.lock().unwrap().completed = Some(summary);
    }
    fn on_error(&mut self, error: &BoltError) {
        self.0.lock().unwrap().errored = Some(error.to_string());
    }
}

fn fresh_captured() -> Arc<StdMutex<Captured>> {
    Arc::new(StdMutex::new(Captured {
        keys: None,
        records: Vec::new(),
        completed: None,
        errored: None,
    }))
}

#[tokio::test]
async fn run_and_pull_stream_records_then_releases_connection_to_pool() {
    let version = Version::new(5, 4);
    let server = FakeBoltServer::start(
        version,
        vec![
            vec![success(HashMap::new())], // HELLO
            vec![success(fields([("fields", Value::List(vec![Value::String("n".to_owned())]))]))], // RUN header
            vec![
                record(vec![Value::Integer(1)]),
                record(vec![Value::Integer(2)]),
                success(fields([("has_more", Value::Boolean(false))])),
            ], // PULL(-1), unbounded: everything in one round
        ],
    )
    .await
    .unwrap();
    let addr = ServerAddress::new("127.0.0.1", server.local_addr().port());

    let pool = Pool::new(PoolConfig::default(), Arc::new(TcpFactory { negotiated: version }));
    let pooled = pool.acquire(&addr, &AcquireContext::default()).await.unwrap();
    let holder = ConnectionHolder::new(pooled);

    let (header_handler, stream) = ResultStream::new(holder.clone(), -1, || HashMap::new());
    holder
        .run_on_connection(|conn| conn.run("RETURN 1 AS n", HashMap::new(), &RequestContext::default(), header_handler))
        .await
        .unwrap()
        .unwrap();

    let captured = fresh_captured();
    stream.subscribe(Box::new(Capturing(captured.clone())));

    for _ in 0..200 {
        if captured.lock().unwrap().completed.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    {
        let c = captured.lock().unwrap();
        assert_eq!(c.keys.as_deref(), Some(&["n".to_owned()][..]));
        assert_eq!(c.records, vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]);
        assert!(c.completed.is_some());
        assert!(c.errored.is_none());
    }

    // The terminal event releases the connection holder, which drops
    // the `PooledConnection` and hands it back to the pool — spawned
    // asynchronously by `PooledConnection::drop`, so poll briefly.
    for _ in 0..200 {
        if pool.idle_count(&addr).await == 1 && pool.active_resource_count(&addr).await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(pool.idle_count(&addr).await, 1);
    assert_eq!(pool.active_resource_count(&addr).await, 0);
}

/// A `FAILURE` on the `RUN`'s own `PULL` round delivers `on_error`, not
/// `on_completed`, and still releases the connection back to the pool.
#[tokio::test]
async fn server_failure_delivers_on_error_and_still_releases_connection() {
    let version = Version::new(5, 4);
    let failure = Structure::new(
        resp_sig::FAILURE,
        vec![map_of([
            ("code", Value::String("Neo.ClientError.Statement.SyntaxError".to_owned())),
            ("message", Value::String("bad query".to_owned())),
        ])],
    );
    let server = FakeBoltServer::start(
        version,
        vec![
            vec![success(HashMap::new())], // HELLO
            vec![success(HashMap::new())], // RUN header
            vec![failure],                 // PULL fails
        ],
    )
    .await
    .unwrap();
    let addr = ServerAddress::new("127.0.0.1", server.local_addr().port());

    let pool = Pool::new(PoolConfig::default(), Arc::new(TcpFactory { negotiated: version }));
    let pooled = pool.acquire(&addr, &AcquireContext::default()).await.unwrap();
    let holder = ConnectionHolder::new(pooled);

    let (header_handler, stream) = ResultStream::new(holder.clone(), -1, || HashMap::new());
    holder
        .run_on_connection(|conn| conn.run("BAD QUERY", HashMap::new(), &RequestContext::default(), header_handler))
        .await
        .unwrap()
        .unwrap();

    let captured = fresh_captured();
    stream.subscribe(Box::new(Capturing(captured.clone())));

    for _ in 0..200 {
        if captured.lock().unwrap().errored.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    {
        let c = captured.lock().unwrap();
        assert!(c.completed.is_none());
        assert!(c.errored.as_ref().is_some_and(|m| m.contains("bad query")));
    }

    for _ in 0..200 {
        if pool.idle_count(&addr).await + pool.active_resource_count(&addr).await == 0 {
            break;
        }
        if pool.idle_count(&addr).await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(pool.active_resource_count(&addr).await, 0);
}
