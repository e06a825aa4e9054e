//! Result stream / observer.
//!
//! Built on the same FIFO-observer dispatch `connection.rs` already
//! implements for control messages (`ResponseHandler`): a result stream
//! is just two more `ResponseHandler` instances — one for `RUN`'s field
//! headers, one shared across every `PULL`/`DISCARD` round — wired to a
//! buffer that either replays into a later `subscribe(consumer)` call or
//! forwards straight through to an already-subscribed one. The chunked
//! `PULL` loop and its watermark bookkeeping live in a background task
//! spawned alongside the stream, since nothing else in this crate drives
//! a connection's I/O except the code physically calling its methods.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use bolt_packstream::Value;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::warn;

use crate::channel::Channel;
use crate::connection::{Connection, ResponseHandler};
use crate::error::BoltError;
use crate::pool::PooledConnection;

/// Field headers, records, and the terminal outcome delivered to a
/// [`ResultStream`] subscriber. Missing callbacks are no-ops, matching
/// `ResponseHandler`'s same convention one layer down.
pub trait RecordConsumer: Send {
    fn on_keys(&mut self, _keys: &[String]) {}
    fn on_record(&mut self, _record: Vec<Value>) {}
    fn on_completed(&mut self, _summary: HashMap<String, Value>) {}
    fn on_error(&mut self, _error: &BoltError) {}
}

/// Reference-counted reservation on the connection a result stream is
/// reading from. Multiple clones may call
/// [`ConnectionHolder::release`]; only the first has any effect, and the
/// actual hand-back to the pool happens via [`PooledConnection`]'s own
/// `Drop` once the held value is dropped.
#[derive(Clone)]
pub struct ConnectionHolder<C: Channel + 'static> {
    inner: Arc<AsyncMutex<Option<PooledConnection<C>>>>,
}

impl<C: Channel + 'static> ConnectionHolder<C> {
    pub fn new(conn: PooledConnection<C>) -> Self {
        ConnectionHolder {
            inner: Arc::new(AsyncMutex::new(Some(conn))),
        }
    }

    /// Runs `f` against the held connection, or does nothing and
    /// returns `None` if the holder has already released it.
    pub async fn run_on_connection<F, Fut, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut Connection<C>) -> Fut,
        Fut: Future<Output = R>,
    {
        let mut guard = self.inner.lock().await;
        match guard.as_mut() {
            Some(pooled) => Some(f(&mut **pooled).await),
            None => None,
        }
    }

    /// Idempotent: drops the held `PooledConnection`, which puts it
    /// back through the pool's own release path.
    pub async fn release(&self) {
        self.inner.lock().await.take();
    }
}

enum Terminal {
    Completed(HashMap<String, Value>),
    Errored(BoltError),
}

struct Shared {
    keys: Option<Vec<String>>,
    records: VecDeque<Vec<Value>>,
    terminal: Option<Terminal>,
    consumer: Option<Box<dyn RecordConsumer>>,
    /// Flips once the current `PULL`/`DISCARD` round's own terminal
    /// `SUCCESS`/`FAILURE` has been dispatched, so the drive loop knows
    /// to stop calling `drain_one` for this round.
    round_done: bool,
    has_more: bool,
}

impl Default for Shared {
    fn default() -> Self {
        Shared {
            keys: None,
            records: VecDeque::new(),
            terminal: None,
            consumer: None,
            round_done: false,
            has_more: false,
        }
    }
}

fn deliver_terminal(terminal: &Terminal, consumer: &mut dyn RecordConsumer, extra: &(dyn Fn() -> HashMap<String, Value> + Send + Sync)) {
    match terminal {
        Terminal::Completed(metadata) => {
            let mut summary = metadata.clone();
            summary.extend(extra());
            consumer.on_completed(summary);
        }
        Terminal::Errored(err) => consumer.on_error(&err.snapshot()),
    }
}

enum HandlerRole {
    Header,
    Stream,
}

struct StreamHandler {
    shared: Arc<StdMutex<Shared>>,
    notify: Arc<Notify>,
    role: HandlerRole,
}

impl ResponseHandler for StreamHandler {
    fn on_record(&mut self, fields: Vec<Value>) {
        let mut shared = self.shared.lock().unwrap();
        match shared.consumer.as_mut() {
            Some(consumer) => consumer.on_record(fields),
            None => shared.records.push_back(fields),
        }
    }

    fn on_success(&mut self, metadata: HashMap<String, Value>) {
        match self.role {
            HandlerRole::Header => {
                let keys: Vec<String> = metadata
                    .get("fields")
                    .and_then(Value::as_list)
                    .map(|l| l.iter().filter_map(Value::as_str).map(str::to_owned).collect())
                    .unwrap_or_default();
                let mut shared = self.shared.lock().unwrap();
                match shared.consumer.as_mut() {
                    Some(consumer) => consumer.on_keys(&keys),
                    None => shared.keys = Some(keys),
                }
            }
            HandlerRole::Stream => {
                let has_more = matches!(metadata.get("has_more"), Some(Value::Boolean(true)));
                let mut shared = self.shared.lock().unwrap();
                shared.has_more = has_more;
                shared.round_done = true;
                if !has_more {
                    // Just records the outcome; delivery to a subscribed
                    // consumer is `drive`'s job, after it releases the
                    // connection holder.
                    shared.terminal = Some(Terminal::Completed(metadata));
                }
                self.notify.notify_one();
            }
        }
    }

    fn on_failure(&mut self, error: &BoltError) {
        let mut shared = self.shared.lock().unwrap();
        shared.round_done = true;
        shared.has_more = false;
        if shared.terminal.is_none() {
            shared.terminal = Some(Terminal::Errored(error.snapshot()));
        }
        self.notify.notify_one();
    }
}

/// Constructed with a protocol observer, a metadata supplier, and a
/// connection holder. The observer half is the pair of
/// [`StreamHandler`]s handed back by [`ResultStream::new`]; this struct
/// is the consumer-facing half.
pub struct ResultStream<C: Channel + 'static> {
    shared: Arc<StdMutex<Shared>>,
}

impl<C: Channel + 'static> ResultStream<C> {
    /// Builds a result stream bound to `holder` and returns the header
    /// handler that must be passed to the triggering `RUN`. The first
    /// `PULL` is issued immediately by a background task — pipelining
    /// with `RUN` is safe because responses are matched to observers in
    /// FIFO order regardless of when each request was queued.
    ///
    /// `fetch_size` <= 0 means unbounded: a single `PULL(-1)` round,
    /// no watermark bookkeeping. `summary_extra` supplies the "caller's
    /// additional context" merged into the terminal summary (e.g. a
    /// session's bookmark tracker).
    pub fn new(
        holder: ConnectionHolder<C>,
        fetch_size: i64,
        summary_extra: impl Fn() -> HashMap<String, Value> + Send + Sync + 'static,
    ) -> (Box<dyn ResponseHandler>, ResultStream<C>) {
        let shared = Arc::new(StdMutex::new(Shared::default()));
        let notify = Arc::new(Notify::new());
        let extra: Arc<dyn Fn() -> HashMap<String, Value> + Send + Sync> = Arc::new(summary_extra);

        let header_handler = Box::new(StreamHandler {
            shared: shared.clone(),
            notify: notify.clone(),
            role: HandlerRole::Header,
        });

        tokio::spawn(drive(holder, shared.clone(), notify, extra, fetch_size));

        (header_handler, ResultStream { shared })
    }

    /// Replays any buffered keys and records, then the terminal event
    /// if one already happened, then forwards everything live from
    /// here on.
    pub fn subscribe(&self, mut consumer: Box<dyn RecordConsumer>) {
        let mut shared = self.shared.lock().unwrap();
        if let Some(keys) = shared.keys.clone() {
            consumer.on_keys(&keys);
        }
        while let Some(record) = shared.records.pop_front() {
            consumer.on_record(record);
        }
        if let Some(terminal) = shared.terminal.take() {
            drop(shared);
            // Single-consumer model: callers only ever subscribe once,
            // and `take()` above is the guarantee of at-most-one
            // terminal delivery.
            match &terminal {
                Terminal::Completed(metadata) => consumer.on_completed(metadata.clone()),
                Terminal::Errored(err) => consumer.on_error(err),
            }
            return;
        }
        shared.consumer = Some(consumer);
    }
}

async fn drive<C: Channel + 'static>(
    holder: ConnectionHolder<C>,
    shared: Arc<StdMutex<Shared>>,
    notify: Arc<Notify>,
    extra: Arc<dyn Fn() -> HashMap<String, Value> + Send + Sync>,
    fetch_size: i64,
) {
    let bounded = fetch_size > 0;
    let n = if bounded { fetch_size } else { -1 };
    let high_watermark = if bounded { fetch_size as usize } else { usize::MAX };
    let low_watermark = high_watermark / 2;

    loop {
        if shared.lock().unwrap().terminal.is_some() {
            break;
        }

        {
            let mut s = shared.lock().unwrap();
            s.round_done = false;
        }
        let handler = Box::new(StreamHandler {
            shared: shared.clone(),
            notify: notify.clone(),
            role: HandlerRole::Stream,
        });
        let sent = holder.run_on_connection(|conn| conn.pull(n, handler)).await;
        match sent {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                fail_if_not_terminal(&shared, e);
                break;
            }
            None => {
                warn!("result stream's connection was released before the stream completed");
                fail_if_not_terminal(&shared, BoltError::ServiceUnavailable("connection released mid-stream".to_owned()));
                break;
            }
        }

        loop {
            let round_done = shared.lock().unwrap().round_done;
            if round_done {
                break;
            }
            let drained = holder.run_on_connection(|conn| conn.drain_one()).await;
            match drained {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    fail_if_not_terminal(&shared, e);
                    break;
                }
                None => break,
            }
        }

        let (has_more, is_terminal) = {
            let s = shared.lock().unwrap();
            (s.has_more, s.terminal.is_some())
        };
        if is_terminal || !has_more {
            break;
        }

        if bounded {
            loop {
                let proceed = {
                    let s = shared.lock().unwrap();
                    s.consumer.is_some() || s.records.len() <= low_watermark
                };
                if proceed {
                    break;
                }
                notify.notified().await;
            }
        }
    }

    // Release the connection back to the pool before the consumer's
    // terminal callback fires, so a consumer that immediately reuses
    // the session on completion never contends with this stream's own
    // not-yet-released resource.
    holder.release().await;

    let delivery = {
        let mut s = shared.lock().unwrap();
        match (s.terminal.take(), s.consumer.take()) {
            (Some(terminal), Some(consumer)) => Some((terminal, consumer)),
            (terminal, consumer) => {
                s.terminal = terminal;
                s.consumer = consumer;
                None
            }
        }
    };
    if let Some((terminal, mut consumer)) = delivery {
        deliver_terminal(&terminal, consumer.as_mut(), &*extra);
    }
}

fn fail_if_not_terminal(shared: &Arc<StdMutex<Shared>>, err: BoltError) {
    let mut s = shared.lock().unwrap();
    if s.terminal.is_none() {
        s.terminal = Some(Terminal::Errored(err));
    }
}
