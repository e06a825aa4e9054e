//! Pool scenarios built against only `bolt_driver`'s public API (`Pool`,
//! `ConnectionFactory`, `AcquireContext`, `PoolConfig`, `Connection`)
//! rather than the crate-internal test module in `src/pool.rs`, which is
//! `#[cfg(test)]`-private and invisible from here.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bolt_driver::channel::Channel;
use bolt_driver::protocol::Version;
use bolt_driver::{AcquireContext, BoltError, Connection, ConnectionFactory, Pool, PoolConfig, ServerAddress};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

struct DummyChannel;
impl Channel for DummyChannel {
    async fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        std::future::pending().await
    }
    async fn write_all(&mut self, _buf: &[u8]) -> std::io::Result<()> {
        Ok(())
    }
    async fn shutdown(&mut self) {}
}

struct CountingFactory {
    next_id: AtomicU64,
}

impl ConnectionFactory<DummyChannel> for CountingFactory {
    fn create<'a>(&'a self, address: &'a ServerAddress) -> BoxFuture<'a, Result<Connection<DummyChannel>, BoltError>> {
        Box::pin(async move {
            self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(Connection::new(address.clone(), DummyChannel, Version::new(5, 4)))
        })
    }
}

fn test_pool(max_size: usize) -> Pool<DummyChannel> {
    Pool::new(
        PoolConfig {
            max_pool_size: max_size,
            acquisition_timeout: Duration::from_millis(200),
            max_connection_lifetime: None,
            connection_liveness_check_timeout: None,
        },
        Arc::new(CountingFactory { next_id: AtomicU64::new(0) }),
    )
}

#[tokio::test]
async fn basic_allocate_pool_lifo_reuse() {
    let pool = test_pool(usize::MAX);
    let addr = ServerAddress::new("h", 7687);

    let conn = pool.acquire(&addr, &AcquireContext::default()).await.unwrap();
    drop(conn);
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(pool.active_resource_count(&addr).await, 0);
    assert_eq!(pool.idle_count(&addr).await, 1);

    let conn2 = pool.acquire(&addr, &AcquireContext::default()).await.unwrap();
    assert_eq!(pool.active_resource_count(&addr).await, 1);
    assert_eq!(pool.idle_count(&addr).await, 0);
    drop(conn2);
}

#[tokio::test]
async fn multi_key_pools_are_independent() {
    let pool = test_pool(usize::MAX);
    let a = ServerAddress::new("h", 7687);
    let b = ServerAddress::new("h", 7688);

    let ra = pool.acquire(&a, &AcquireContext::default()).await.unwrap();
    let rb = pool.acquire(&b, &AcquireContext::default()).await.unwrap();
    drop(ra);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let ra2 = pool.acquire(&a, &AcquireContext::default()).await.unwrap();
    assert_eq!(ra2.address(), &a);
    assert_eq!(pool.active_resource_count(&b).await, 1);
    drop(rb);
}

// Acquisition timeout with exact message shape. The pending-queue
// draining itself is covered inside `src/pool.rs`'s own unit test,
// where `pool.inner` is reachable; from here only the externally
// observable error is checked.
#[tokio::test]
async fn acquisition_timeout_message() {
    let pool = test_pool(2);
    let addr = ServerAddress::new("h", 7687);
    let r0 = pool.acquire(&addr, &AcquireContext::default()).await.unwrap();
    let r1 = pool.acquire(&addr, &AcquireContext::default()).await.unwrap();

    let err = pool.acquire(&addr, &AcquireContext::default()).await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("acquisition timed out"), "{msg}");
    assert!(msg.contains("Active conn count = 2, Idle conn count = 0"), "{msg}");

    drop(r0);
    drop(r1);
}

#[tokio::test]
async fn pending_acquirer_resolves_on_release() {
    let pool = test_pool(2);
    let addr = ServerAddress::new("h", 7687);
    let r0 = pool.acquire(&addr, &AcquireContext::default()).await.unwrap();
    let r1 = pool.acquire(&addr, &AcquireContext::default()).await.unwrap();

    let pool2 = pool.clone();
    let addr2 = addr.clone();
    let waiter = tokio::spawn(async move { pool2.acquire(&addr2, &AcquireContext::default()).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(r0);

    let resolved = waiter.await.unwrap();
    assert!(resolved.is_ok());
    drop(r1);
}

// Purge during use: the purged resource is destroyed, never
// returned to the idle list, and `has` reports false immediately.
#[tokio::test]
async fn purge_during_use_destroys_on_release() {
    let pool = test_pool(usize::MAX);
    let addr = ServerAddress::new("h", 7687);
    let r0 = pool.acquire(&addr, &AcquireContext::default()).await.unwrap();

    pool.purge(&addr).await;
    assert!(!pool.has(&addr).await);

    drop(r0);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.idle_count(&addr).await, 0);
}

// A purge must not block the key for future acquires — only whole-pool
// `close` does that. An `acquire` issued between `purge` and the
// release of the resource that was live at purge time must succeed
// with a newly created connection, and that new connection must
// survive being parked idle once it's released.
#[tokio::test]
async fn acquire_after_purge_gets_a_fresh_connection() {
    let pool = test_pool(usize::MAX);
    let addr = ServerAddress::new("h", 7687);
    let r0 = pool.acquire(&addr, &AcquireContext::default()).await.unwrap();

    pool.purge(&addr).await;
    assert!(!pool.has(&addr).await);

    let r1 = pool.acquire(&addr, &AcquireContext::default()).await.unwrap();
    assert!(pool.has(&addr).await);

    drop(r0);
    tokio::time::sleep(Duration::from_millis(10)).await;
    // r0 predates the purge and is destroyed, not parked; r1 is still
    // checked out and unaffected by r0's release.
    assert_eq!(pool.idle_count(&addr).await, 0);
    assert_eq!(pool.active_resource_count(&addr).await, 1);

    drop(r1);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.idle_count(&addr).await, 1);
    assert_eq!(pool.active_resource_count(&addr).await, 0);
}

#[tokio::test]
async fn keep_all_purges_keys_not_named() {
    let pool = test_pool(usize::MAX);
    let kept = ServerAddress::new("h", 7687);
    let dropped = ServerAddress::new("h", 7688);

    let k = pool.acquire(&kept, &AcquireContext::default()).await.unwrap();
    let d = pool.acquire(&dropped, &AcquireContext::default()).await.unwrap();
    drop(k);
    drop(d);
    tokio::time::sleep(Duration::from_millis(10)).await;

    pool.keep_all(&[kept.clone()]).await;

    assert!(pool.has(&kept).await);
    assert!(!pool.has(&dropped).await);
}
