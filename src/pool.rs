//! Keyed connection pool.
//!
//! One [`Pool`] instance is fixed to a single [`Channel`] implementation
//! (a driver picks `TcpChannel` or `WsChannel` once, not per-connection),
//! so the generic parameter lives on the pool rather than on every
//! resource passed around. State is partitioned per address key behind
//! a single `tokio::sync::Mutex`: one critical section per key, with
//! per-key LIFO idle lists and a real acquisition timeout queue rather
//! than a fixed worker-task count.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::address::ServerAddress;
use crate::auth::AuthToken;
use crate::balancer::LoadCounter;
use crate::channel::Channel;
use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionState};
use crate::error::BoltError;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Creates fresh connections for a pool key. Implemented by the driver
/// for whichever transport it's configured with; the pool itself has
/// no opinion on how a connection comes into being.
pub trait ConnectionFactory<C: Channel>: Send + Sync {
    fn create<'a>(&'a self, address: &'a ServerAddress) -> BoxFuture<'a, Result<Connection<C>, BoltError>>;
}

/// The context an acquire call validates resources against — today
/// just the requested auth token.
#[derive(Debug, Clone, Default)]
pub struct AcquireContext {
    pub auth_token: Option<AuthToken>,
}

/// One entry in a key's idle list: the connection plus when it was
/// parked, used for `connectionLivenessTimeoutMs`.
struct Idle<C: Channel> {
    conn: Connection<C>,
    parked_at: Instant,
}

/// A queued acquirer, racing against its own acquisition timeout.
struct Pending<C: Channel> {
    /// Shared with the waiting `acquire()` call; whichever of
    /// {release, timeout} wins the compare-exchange completes the
    /// request. The loser is a no-op.
    completed: Arc<AtomicBool>,
    tx: oneshot::Sender<Result<(Connection<C>, u64), BoltError>>,
}

struct KeyState<C: Channel> {
    idle: VecDeque<Idle<C>>,
    active: usize,
    pending_creates: usize,
    pending_acquires: VecDeque<Pending<C>>,
    /// Bumped by `purge`; a connection checked out under an older epoch
    /// is force-destroyed on release instead of being parked or handed
    /// to a new acquirer, but the key itself stays open for new
    /// acquires — only whole-pool `close` blocks those.
    epoch: u64,
    /// Checked-out connections belonging to the current epoch; used by
    /// `has` so a purge is reported immediately even while resources
    /// acquired before it are still outstanding.
    current_epoch_active: usize,
}

impl<C: Channel> Default for KeyState<C> {
    fn default() -> Self {
        KeyState {
            idle: VecDeque::new(),
            active: 0,
            pending_creates: 0,
            pending_acquires: VecDeque::new(),
            epoch: 0,
            current_epoch_active: 0,
        }
    }
}

impl<C: Channel> KeyState<C> {
    fn full(&self, max_size: usize) -> bool {
        self.active + self.pending_creates >= max_size
    }
}

/// What `acquire` decided to do, chosen while holding the key's lock
/// so the choice and its bookkeeping commit atomically.
enum Action<C: Channel> {
    GotIdle(Idle<C>, u64),
    Create,
    Enqueue,
}

struct Inner<C: Channel> {
    keys: Mutex<HashMap<String, KeyState<C>>>,
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory<C>>,
    closed: AtomicBool,
}

/// Per-address pool of [`Connection`]s.
#[derive(Clone)]
pub struct Pool<C: Channel> {
    inner: Arc<Inner<C>>,
}

/// An acquired connection. On `Drop` without an explicit
/// [`Pool::release`] call, the connection is handed back via a
/// best-effort detached task, since a synchronous release isn't
/// available from a synchronous `Drop`.
pub struct PooledConnection<C: Channel + 'static> {
    conn: Option<Connection<C>>,
    pool: Pool<C>,
    /// The key's purge epoch at the moment this connection was handed
    /// out; carried back to `release` so a purge that lands while the
    /// connection is checked out still forces its destruction.
    epoch: u64,
}

impl<C: Channel + 'static> std::ops::Deref for PooledConnection<C> {
    type Target = Connection<C>;
    fn deref(&self) -> &Connection<C> {
        self.conn.as_ref().expect("connection taken before drop")
    }
}

impl<C: Channel + 'static> std::ops::DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Connection<C> {
        self.conn.as_mut().expect("connection taken before drop")
    }
}

impl<C: Channel + 'static> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = self.pool.clone();
            let epoch = self.epoch;
            tokio::spawn(async move {
                pool.release_with_epoch(conn, epoch).await;
            });
        }
    }
}

impl<C: Channel + 'static> Pool<C> {
    pub fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory<C>>) -> Self {
        Pool {
            inner: Arc::new(Inner {
                keys: Mutex::new(HashMap::new()),
                config,
                factory,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub async fn acquire(&self, address: &ServerAddress, ctx: &AcquireContext) -> Result<PooledConnection<C>, BoltError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BoltError::ServiceUnavailable("pool is closed".to_owned()));
        }
        let key = address.key();
        loop {
            // The decision (reuse idle / create / enqueue) is made and
            // acted on (bookkeeping-wise) atomically under one lock
            // acquisition, so a concurrent release can never land
            // between "decide to create" and "commit to creating" and
            // leave `pending_creates` stuck above its true value.
            let action = {
                let mut keys = self.inner.keys.lock().await;
                let state = keys.entry(key.clone()).or_default();
                if let Some(idle) = state.idle.pop_back() {
                    state.active += 1;
                    state.current_epoch_active += 1;
                    Action::GotIdle(idle, state.epoch)
                } else if !state.full(self.inner.config.max_pool_size) {
                    state.pending_creates += 1;
                    Action::Create
                } else {
                    Action::Enqueue
                }
            };

            match action {
                Action::GotIdle(idle, epoch) => match self.validate_and_adopt(address, idle, ctx, epoch).await {
                    Some(conn) => {
                        return Ok(PooledConnection {
                            conn: Some(conn),
                            pool: self.clone(),
                            epoch,
                        })
                    }
                    // Validation failed; the resource is already
                    // destroyed and `active` decremented. Loop back
                    // around and make a fresh decision.
                    None => continue,
                },
                Action::Create => match self.create_one(address).await {
                    Ok((conn, epoch)) => {
                        return Ok(PooledConnection {
                            conn: Some(conn),
                            pool: self.clone(),
                            epoch,
                        })
                    }
                    Err(e) => {
                        warn!(%address, error = %e, "connection creation failed");
                        return Err(e);
                    }
                },
                Action::Enqueue => return self.enqueue_and_wait(address, &key).await,
            }
        }
    }

    async fn validate_and_adopt(&self, address: &ServerAddress, mut idle: Idle<C>, ctx: &AcquireContext, captured_epoch: u64) -> Option<Connection<C>> {
        let liveness_due = match self.inner.config.connection_liveness_check_timeout {
            None => false,
            Some(d) if d.is_zero() => true,
            Some(d) => idle.parked_at.elapsed() >= d,
        };
        let mut ok = idle.conn.state() != ConnectionState::Broken;
        if ok {
            if let Some(wanted) = &ctx.auth_token {
                ok = idle.conn.current_auth_token().is_some_and(|t| t.matches(wanted));
            }
        }
        if ok && liveness_due {
            ok = idle.conn.reset().await.is_ok();
        }
        if ok {
            Some(idle.conn)
        } else {
            debug!(%address, "idle connection failed validation, destroying");
            idle.conn.close_swallowing_errors().await;
            let mut keys = self.inner.keys.lock().await;
            if let Some(state) = keys.get_mut(&address.key()) {
                // Only `active` is corrected here; whether a
                // replacement gets created is decided fresh on the
                // caller's next loop iteration, same as any other
                // acquirer racing for a slot.
                state.active -= 1;
                // A purge may have landed while validation was in
                // flight, already zeroing `current_epoch_active` for
                // the new epoch; only decrement it back if it's still
                // tracking this connection's (unchanged) epoch.
                if state.epoch == captured_epoch {
                    state.current_epoch_active -= 1;
                }
            }
            None
        }
    }

    async fn create_one(&self, address: &ServerAddress) -> Result<(Connection<C>, u64), BoltError> {
        let result = self.inner.factory.create(address).await;
        let mut keys = self.inner.keys.lock().await;
        let state = keys.entry(address.key()).or_default();
        state.pending_creates -= 1;
        match result {
            Ok(conn) => {
                state.active += 1;
                state.current_epoch_active += 1;
                Ok((conn, state.epoch))
            }
            Err(e) => Err(e),
        }
    }

    async fn enqueue_and_wait(&self, address: &ServerAddress, key: &str) -> Result<PooledConnection<C>, BoltError> {
        let completed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();
        {
            let mut keys = self.inner.keys.lock().await;
            let state = keys.entry(key.to_owned()).or_default();
            state.pending_acquires.push_back(Pending {
                completed: completed.clone(),
                tx,
            });
        }

        // `rx` is kept alive across the race instead of being consumed
        // by `tokio::time::timeout`, so a `release` that wins the
        // compare-exchange just after the sleep fires can still
        // deliver its value: the timeout path and the release path race
        // and are coordinated by the completion bit.
        let sleep = tokio::time::sleep(self.inner.config.acquisition_timeout);
        tokio::pin!(sleep);
        tokio::pin!(rx);
        tokio::select! {
            res = &mut rx => {
                match res {
                    Ok(Ok((conn, epoch))) => Ok(PooledConnection { conn: Some(conn), pool: self.clone(), epoch }),
                    Ok(Err(e)) => Err(e),
                    Err(_recv_dropped) => Err(BoltError::ServiceUnavailable(format!(
                        "pool for {address} was closed while an acquire was pending"
                    ))),
                }
            }
            () = &mut sleep => {
                if completed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
                    // `release` already won the race; its value is on
                    // the way (or already buffered) so wait for it
                    // rather than reporting a timeout.
                    return match rx.await {
                        Ok(Ok((conn, epoch))) => Ok(PooledConnection { conn: Some(conn), pool: self.clone(), epoch }),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(self.timeout_error(address).await),
                    };
                }
                let mut keys = self.inner.keys.lock().await;
                if let Some(state) = keys.get_mut(key) {
                    state.pending_acquires.retain(|p| !Arc::ptr_eq(&p.completed, &completed));
                }
                drop(keys);
                Err(self.timeout_error(address).await)
            }
        }
    }

    async fn timeout_error(&self, address: &ServerAddress) -> BoltError {
        let (active, idle) = {
            let keys = self.inner.keys.lock().await;
            keys.get(&address.key()).map(|s| (s.active, s.idle.len())).unwrap_or((0, 0))
        };
        BoltError::AcquisitionTimeout {
            timeout_ms: self.inner.config.acquisition_timeout.as_millis() as u64,
            detail: format!(
                "acquisition timed out waiting for a connection to {address}. \
                 Active conn count = {active}, Idle conn count = {idle}"
            ),
        }
    }

    /// Exposed directly for callers that want the synchronous-on-last-
    /// release semantics instead of relying on `PooledConnection`'s
    /// `Drop` fallback. A connection released this way carries no
    /// record of which purge epoch it was acquired under, so it's
    /// always treated as belonging to the key's current epoch.
    pub async fn release(&self, conn: Connection<C>) {
        let epoch = {
            let keys = self.inner.keys.lock().await;
            keys.get(&conn.address().key()).map_or(0, |s| s.epoch)
        };
        self.release_with_epoch(conn, epoch).await;
    }

    /// `epoch` is the key's purge epoch at the moment this connection
    /// was handed out. A purge bumps the key's epoch without blocking
    /// new acquires against it (only whole-pool `close` does that), so
    /// a release whose epoch no longer matches the key's current one
    /// is force-destroyed instead of being parked or handed to a new
    /// acquirer waiting on the current epoch.
    async fn release_with_epoch(&self, mut conn: Connection<C>, epoch: u64) {
        let address = conn.address().clone();
        let key = address.key();

        let should_destroy = conn.is_broken() || self.inner.closed.load(Ordering::SeqCst);
        if !should_destroy && !conn.sticky && matches!(conn.state(), ConnectionState::Failed) {
            should_destroy_or_reset(&mut conn).await;
        }
        let destroy = should_destroy || conn.is_broken();

        if destroy {
            conn.close_swallowing_errors().await;
            let mut keys = self.inner.keys.lock().await;
            if let Some(state) = keys.get_mut(&key) {
                state.active -= 1;
                if state.epoch == epoch {
                    state.current_epoch_active -= 1;
                }
            }
            return;
        }

        // Hand off to a waiting acquirer if one exists, else park idle.
        loop {
            let mut maybe_pending = None;
            let mut stale = false;
            {
                let mut keys = self.inner.keys.lock().await;
                let Some(state) = keys.get_mut(&key) else {
                    break;
                };
                if state.epoch != epoch {
                    state.active -= 1;
                    stale = true;
                } else {
                    while let Some(p) = state.pending_acquires.pop_front() {
                        if p.completed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                            maybe_pending = Some(p);
                            break;
                        }
                        // Already timed out locally; drop it and try the
                        // next one in the queue.
                    }
                    if maybe_pending.is_none() {
                        state.active -= 1;
                        state.current_epoch_active -= 1;
                        state.idle.push_back(Idle {
                            conn,
                            parked_at: Instant::now(),
                        });
                        return;
                    }
                }
            }
            if stale {
                conn.close_swallowing_errors().await;
                return;
            }
            if let Some(pending) = maybe_pending {
                match pending.tx.send(Ok((conn, epoch))) {
                    Ok(()) => return,
                    Err(Ok((returned, _))) => {
                        // The waiter's receiver was dropped between our
                        // CAS and the send — vanishingly rare. Recover
                        // the resource and try the next pending
                        // request, or park it idle.
                        conn = returned;
                        continue;
                    }
                    Err(Err(_)) => unreachable!("release never sends an Err variant"),
                }
            }
        }
    }

    pub async fn purge(&self, address: &ServerAddress) {
        let mut to_destroy = Vec::new();
        {
            let mut keys = self.inner.keys.lock().await;
            if let Some(state) = keys.get_mut(&address.key()) {
                state.epoch += 1;
                state.current_epoch_active = 0;
                to_destroy.extend(state.idle.drain(..).map(|i| i.conn));
                for pending in state.pending_acquires.drain(..) {
                    if pending.completed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                        let _ = pending.tx.send(Err(BoltError::ServiceUnavailable(format!(
                            "pool for {address} was purged"
                        ))));
                    }
                }
            }
        }
        for mut conn in to_destroy {
            conn.close_swallowing_errors().await;
        }
    }

    /// Purges every key not in `addresses`.
    pub async fn keep_all(&self, addresses: &[ServerAddress]) {
        let wanted: std::collections::HashSet<String> = addresses.iter().map(ServerAddress::key).collect();
        let stale: Vec<String> = {
            let keys = self.inner.keys.lock().await;
            keys.keys().filter(|k| !wanted.contains(*k)).cloned().collect()
        };
        for key in stale {
            self.purge(&ServerAddress::from_key(&key)).await;
        }
    }

    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let all_keys: Vec<String> = {
            let keys = self.inner.keys.lock().await;
            keys.keys().cloned().collect()
        };
        for key in all_keys {
            self.purge(&ServerAddress::from_key(&key)).await;
        }
    }

    pub async fn has(&self, address: &ServerAddress) -> bool {
        let keys = self.inner.keys.lock().await;
        // Checked against the current epoch, not total `active`, so a
        // purge is reported immediately even while resources acquired
        // before it are still outstanding (they'll be destroyed on
        // release rather than returned to this key).
        keys.get(&address.key()).is_some_and(|s| s.current_epoch_active > 0 || !s.idle.is_empty())
    }

    pub async fn active_resource_count(&self, address: &ServerAddress) -> usize {
        let keys = self.inner.keys.lock().await;
        keys.get(&address.key()).map(|s| s.active).unwrap_or(0)
    }

    pub async fn idle_count(&self, address: &ServerAddress) -> usize {
        let keys = self.inner.keys.lock().await;
        keys.get(&address.key()).map(|s| s.idle.len()).unwrap_or(0)
    }
}

/// Lets the load balancer query the pool directly for "least connected"
/// selection without either module depending on the other's concrete
/// type.
impl<C: Channel + 'static> LoadCounter for Pool<C> {
    fn active_count<'a>(&'a self, address: &'a ServerAddress) -> BoxFuture<'a, usize> {
        Box::pin(async move { self.active_resource_count(address).await })
    }
}

async fn should_destroy_or_reset<C: Channel>(conn: &mut Connection<C>) {
    // A `FAILED` connection requires `RESET` before it can be pooled
    // again. `release` is the synchronous-on-last-release path, so
    // this runs inline rather than being deferred.
    if conn.reset().await.is_err() {
        warn!(address = %conn.address(), "reset-on-release failed, connection will be destroyed");
    }
}
