//! Per-connection state machine and observer FIFO.
//!
//! ```text
//! READY → STREAMING(run)
//! READY → TX_READY(begin) → TX_STREAMING(run) → TX_READY(success) → READY(commit/rollback)
//! any → FAILED(failure) → READY(reset success)
//! any → BROKEN(io error) — terminal
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bolt_packstream::{Structure, Value};
use tracing::{error, warn};

use crate::address::ServerAddress;
use crate::auth::AuthToken;
use crate::channel::Channel;
use crate::error::BoltError;
use crate::protocol::signatures::response as resp_sig;
use crate::protocol::{Dialect, MessageEngine, RequestContext, Version};

/// Receives the responses to exactly one outgoing request message.
/// Missing callbacks are no-ops, not errors.
pub trait ResponseHandler: Send {
    fn on_record(&mut self, _fields: Vec<Value>) {}
    fn on_success(&mut self, _metadata: HashMap<String, Value>) {}
    fn on_failure(&mut self, _error: &BoltError) {}
    fn on_ignored(&mut self) {}
}

/// A handler that ignores everything; used for control messages
/// nobody is watching (e.g. `GOODBYE`).
pub struct NullHandler;
impl ResponseHandler for NullHandler {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Ready,
    Streaming,
    TxReady,
    TxStreaming,
    /// Requires a successful `RESET` to recover.
    Failed,
    /// Terminal: the channel is presumed dead. Cannot be pooled.
    Broken,
}

/// What should happen to [`ConnectionState`] once this queued
/// request's terminal response arrives.
enum Effect {
    NoChange,
    ToReady,
    ToStreaming,
    ToTxReady,
    ToTxStreaming,
    /// `PULL`/`DISCARD`: only transitions to the boxed effect once the
    /// response's `has_more` metadata is absent or `false`; otherwise
    /// the stream keeps going and state doesn't change.
    StreamStep(Box<Effect>),
}

struct Queued {
    handler: Box<dyn ResponseHandler>,
    effect: Effect,
}

/// Exclusive resource owned by the pool.
pub struct Connection<C: Channel> {
    address: ServerAddress,
    engine: MessageEngine<C>,
    dialect: Dialect,
    state: ConnectionState,
    queue: VecDeque<Queued>,
    created_at: Instant,
    auth_token: Option<AuthToken>,
    /// Bypasses the validate-on-release path; used when re-auth is
    /// unsupported yet multi-tenant auth is requested.
    pub sticky: bool,
    server_metadata: HashMap<String, Value>,
}

impl<C: Channel> Connection<C> {
    pub fn new(address: ServerAddress, channel: C, version: Version) -> Self {
        Connection {
            address,
            engine: MessageEngine::new(channel),
            dialect: Dialect::new(version),
            state: ConnectionState::Ready,
            queue: VecDeque::new(),
            created_at: Instant::now(),
            auth_token: None,
            sticky: false,
            server_metadata: HashMap::new(),
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_broken(&self) -> bool {
        self.state == ConnectionState::Broken
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn current_auth_token(&self) -> Option<&AuthToken> {
        self.auth_token.as_ref()
    }

    pub fn server_metadata(&self) -> &HashMap<String, Value> {
        &self.server_metadata
    }

    /// Whether the negotiated dialect has a native `ROUTE` message, or
    /// needs the legacy `CALL dbms.cluster.routing.getRoutingTable`
    /// procedure fallback.
    pub fn dialect_supports_route_message(&self) -> bool {
        self.dialect.capabilities.routing_message
    }

    /// `HELLO` (or `INIT` below v3) — authenticates the connection.
    pub async fn hello(
        &mut self,
        user_agent: &str,
        auth_token: &AuthToken,
        routing_context: &HashMap<String, String>,
    ) -> Result<HashMap<String, Value>, BoltError> {
        let structure = self.dialect.hello(user_agent, auth_token, routing_context)?;
        self.auth_token = Some(auth_token.clone());
        let metadata = self.send_and_await(structure, Effect::NoChange).await?;
        self.server_metadata = metadata.clone();
        Ok(metadata)
    }

    pub async fn logon(&mut self, auth_token: &AuthToken) -> Result<(), BoltError> {
        let structure = self.dialect.logon(auth_token)?;
        self.auth_token = Some(auth_token.clone());
        self.send_and_await(structure, Effect::NoChange).await?;
        Ok(())
    }

    pub async fn logoff(&mut self) -> Result<(), BoltError> {
        let structure = self.dialect.logoff()?;
        self.send_and_await(structure, Effect::NoChange).await?;
        Ok(())
    }

    /// Queues and writes `RUN` but does not wait for its response —
    /// callers may immediately pipeline a `PULL` behind it and drain
    /// both later with [`Connection::drain_one`].
    pub async fn run(
        &mut self,
        query: &str,
        parameters: HashMap<String, Value>,
        ctx: &RequestContext,
        handler: Box<dyn ResponseHandler>,
    ) -> Result<(), BoltError> {
        self.require_runnable()?;
        let structure = self.dialect.run(query, parameters, ctx)?;
        let effect = match self.state {
            ConnectionState::TxReady => Effect::ToTxStreaming,
            _ => Effect::ToStreaming,
        };
        self.send(structure, handler, effect).await
    }

    pub async fn begin(&mut self, ctx: &RequestContext, handler: Box<dyn ResponseHandler>) -> Result<(), BoltError> {
        self.require_runnable()?;
        let structure = self.dialect.begin(ctx)?;
        self.send(structure, handler, Effect::ToTxReady).await
    }

    pub async fn pull(&mut self, n: i64, handler: Box<dyn ResponseHandler>) -> Result<(), BoltError> {
        let ready_effect = match self.state {
            ConnectionState::TxStreaming => Effect::ToTxReady,
            _ => Effect::ToReady,
        };
        let structure = self.dialect.pull(n);
        self.send(structure, handler, Effect::StreamStep(Box::new(ready_effect)))
            .await
    }

    pub async fn discard(&mut self, n: i64, handler: Box<dyn ResponseHandler>) -> Result<(), BoltError> {
        let ready_effect = match self.state {
            ConnectionState::TxStreaming => Effect::ToTxReady,
            _ => Effect::ToReady,
        };
        let structure = self.dialect.discard(n);
        self.send(structure, handler, Effect::StreamStep(Box::new(ready_effect)))
            .await
    }

    pub async fn commit(&mut self) -> Result<HashMap<String, Value>, BoltError> {
        self.send_and_await(self.dialect.commit(), Effect::ToReady).await
    }

    pub async fn rollback(&mut self) -> Result<HashMap<String, Value>, BoltError> {
        self.send_and_await(self.dialect.rollback(), Effect::ToReady).await
    }

    /// Recovers a `FAILED` connection. Synchronous: the caller awaits
    /// the `RESET` outcome directly, there is no mute/ack path.
    pub async fn reset(&mut self) -> Result<(), BoltError> {
        // RESET is legal from any state, including mid-stream, so it
        // bypasses `require_runnable`.
        self.send_and_await(self.dialect.reset(), Effect::ToReady).await?;
        Ok(())
    }

    pub async fn route(
        &mut self,
        routing_context: &HashMap<String, String>,
        bookmarks: &[String],
        database: Option<&str>,
    ) -> Result<HashMap<String, Value>, BoltError> {
        let structure = self.dialect.route(routing_context, bookmarks, database)?;
        self.send_and_await(structure, Effect::NoChange).await
    }

    pub async fn telemetry(&mut self, api: i64) -> Result<(), BoltError> {
        let structure = self.dialect.telemetry(api)?;
        self.send_and_await(structure, Effect::NoChange).await?;
        Ok(())
    }

    /// `GOODBYE` then shut the transport down. No response is expected.
    pub async fn goodbye(&mut self) {
        let structure = self.dialect.goodbye();
        if let Err(e) = self.engine.send(structure).await {
            warn!(address = %self.address, error = %e, "goodbye send failed, closing anyway");
        }
        self.engine.shutdown().await;
    }

    /// Asynchronous close used by concurrent teardown paths (e.g. pool
    /// purge): best-effort `RESET`, errors swallowed.
    pub async fn close_swallowing_errors(&mut self) {
        let structure = self.dialect.reset();
        if self.engine.send(structure).await.is_ok() {
            let _ = self.drain_one().await;
        }
        self.engine.shutdown().await;
    }

    fn require_runnable(&self) -> Result<(), BoltError> {
        match self.state {
            ConnectionState::Ready | ConnectionState::TxReady => Ok(()),
            ConnectionState::Streaming | ConnectionState::TxStreaming => Err(BoltError::Protocol(
                "at most one active stream per connection".to_owned(),
            )),
            ConnectionState::Failed => Err(BoltError::Protocol(
                "connection is in a failed state; RESET is required before further requests".to_owned(),
            )),
            ConnectionState::Broken => Err(BoltError::Protocol("connection is broken".to_owned())),
        }
    }

    async fn send(&mut self, structure: Structure, handler: Box<dyn ResponseHandler>, effect: Effect) -> Result<(), BoltError> {
        self.queue.push_back(Queued { handler, effect });
        match self.engine.send(structure).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail_all_broken(&e);
                Err(e)
            }
        }
    }

    /// Sends one control message and drains exactly its own response,
    /// returning the `SUCCESS` metadata (empty map on non-`SUCCESS`
    /// outcomes other than an error).
    async fn send_and_await(&mut self, structure: Structure, effect: Effect) -> Result<HashMap<String, Value>, BoltError> {
        let captured: Arc<Mutex<Option<HashMap<String, Value>>>> = Arc::new(Mutex::new(None));
        struct Capture(Arc<Mutex<Option<HashMap<String, Value>>>>);
        impl ResponseHandler for Capture {
            fn on_success(&mut self, metadata: HashMap<String, Value>) {
                *self.0.lock().unwrap() = Some(metadata);
            }
        }
        self.send(structure, Box::new(Capture(captured.clone())), effect).await?;
        self.drain_one().await?;
        Ok(captured.lock().unwrap().take().unwrap_or_default())
    }

    /// Processes exactly one wire response and routes it to the front
    /// of the queue: an inbound SUCCESS/FAILURE/IGNORED always pops the
    /// oldest still-pending request.
    pub async fn drain_one(&mut self) -> Result<(), BoltError> {
        let structure = match self.engine.receive().await {
            Ok(s) => s,
            Err(e) => {
                self.fail_all_broken(&e);
                return Err(e);
            }
        };
        self.dispatch(structure)
    }

    /// Keeps draining responses until the connection reaches `Ready`
    /// or `TxReady` (or fails). Useful after pipelining a `RUN`+`PULL`
    /// pair when the caller just wants the final state, not each
    /// intermediate record.
    pub async fn drain_until_ready(&mut self) -> Result<(), BoltError> {
        while !matches!(self.state, ConnectionState::Ready | ConnectionState::TxReady) {
            self.drain_one().await?;
        }
        Ok(())
    }

    fn dispatch(&mut self, structure: Structure) -> Result<(), BoltError> {
        match structure.signature {
            resp_sig::RECORD => {
                let fields = structure
                    .fields
                    .into_iter()
                    .next()
                    .and_then(|v| match v {
                        Value::List(l) => Some(l),
                        _ => None,
                    })
                    .unwrap_or_default();
                if let Some(front) = self.queue.front_mut() {
                    front.handler.on_record(fields);
                }
                Ok(())
            }
            resp_sig::SUCCESS => {
                let metadata = structure
                    .fields
                    .into_iter()
                    .next()
                    .and_then(|v| match v {
                        Value::Map(m) => Some(m),
                        _ => None,
                    })
                    .unwrap_or_default();
                let Some(mut queued) = self.queue.pop_front() else {
                    return Ok(());
                };
                self.apply_effect(queued.effect, &metadata);
                queued.handler.on_success(metadata);
                Ok(())
            }
            resp_sig::FAILURE => {
                let metadata = structure
                    .fields
                    .into_iter()
                    .next()
                    .and_then(|v| match v {
                        Value::Map(m) => Some(m),
                        _ => None,
                    })
                    .unwrap_or_default();
                let err = error_from_failure_metadata(&metadata);
                self.state = ConnectionState::Failed;
                if let Some(mut queued) = self.queue.pop_front() {
                    queued.handler.on_failure(&err);
                }
                Err(err)
            }
            resp_sig::IGNORED => {
                if let Some(mut queued) = self.queue.pop_front() {
                    queued.handler.on_ignored();
                }
                Ok(())
            }
            other => {
                let err = BoltError::Protocol(format!("unexpected response signature {other:#04x}"));
                self.state = ConnectionState::Broken;
                Err(err)
            }
        }
    }

    fn apply_effect(&mut self, effect: Effect, metadata: &HashMap<String, Value>) {
        match effect {
            Effect::NoChange => {}
            Effect::ToReady => self.state = ConnectionState::Ready,
            Effect::ToStreaming => self.state = ConnectionState::Streaming,
            Effect::ToTxReady => self.state = ConnectionState::TxReady,
            Effect::ToTxStreaming => self.state = ConnectionState::TxStreaming,
            Effect::StreamStep(ready_effect) => {
                let has_more = matches!(metadata.get("has_more"), Some(Value::Boolean(true)));
                if !has_more {
                    self.apply_effect(*ready_effect, metadata);
                }
            }
        }
    }

    fn fail_all_broken(&mut self, err: &BoltError) {
        self.state = ConnectionState::Broken;
        while let Some(mut queued) = self.queue.pop_front() {
            queued.handler.on_failure(err);
        }
        error!(address = %self.address, error = %err, "connection broken");
    }
}

fn error_from_failure_metadata(metadata: &HashMap<String, Value>) -> BoltError {
    let code = metadata
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or("Neo.DatabaseError.General.UnknownError")
        .to_owned();
    let message = metadata
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("no message provided")
        .to_owned();

    if code.contains(".ClientError.Security.") {
        if code.contains("AuthorizationExpired") {
            return BoltError::Client {
                code,
                message,
                authorization_expired: true,
            };
        }
        return BoltError::AuthenticationFailed { code, message };
    }
    if code.contains(".TransientError.") {
        return BoltError::Transient { code, message };
    }
    BoltError::Client {
        code,
        message,
        authorization_expired: false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque as StdVecDeque;
    use std::io;

    use bolt_packstream::{pack, Chunker};
    use bytes::BytesMut;

    use super::*;

    /// A channel pre-loaded with server responses and a sink for what
    /// the connection writes.
    struct ScriptedChannel {
        inbound: StdVecDeque<u8>,
        outbound: Vec<u8>,
    }

    impl Channel for ScriptedChannel {
        async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.inbound.is_empty() {
                return Ok(0);
            }
            let mut n = 0;
            while n < buf.len() {
                match self.inbound.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }

        async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.outbound.extend_from_slice(buf);
            Ok(())
        }

        async fn shutdown(&mut self) {}
    }

    fn scripted_response(structure: Structure) -> Vec<u8> {
        let mut packed = BytesMut::new();
        pack(&mut packed, &Value::Structure(structure)).unwrap();
        Chunker::new().chunk(&packed).to_vec()
    }

    fn channel_with_responses(messages: Vec<Structure>) -> ScriptedChannel {
        let mut inbound = StdVecDeque::new();
        for message in messages {
            inbound.extend(scripted_response(message));
        }
        ScriptedChannel {
            inbound,
            outbound: Vec::new(),
        }
    }

    fn success(fields: HashMap<String, Value>) -> Structure {
        Structure::new(resp_sig::SUCCESS, vec![Value::Map(fields)])
    }

    #[tokio::test]
    async fn run_without_transaction_moves_to_streaming_then_ready_after_pull() {
        let channel = channel_with_responses(vec![
            success(HashMap::new()),
            success(HashMap::from([("has_more".to_owned(), Value::Boolean(false))])),
        ]);
        let mut conn = Connection::new(ServerAddress::new("h", 7687), channel, Version::new(5, 4));

        conn.run("RETURN 1", HashMap::new(), &RequestContext::default(), Box::new(NullHandler))
            .await
            .unwrap();
        conn.drain_one().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Streaming);

        conn.pull(1000, Box::new(NullHandler)).await.unwrap();
        conn.drain_one().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn pull_with_has_more_stays_streaming() {
        let channel = channel_with_responses(vec![
            success(HashMap::new()),
            success(HashMap::from([("has_more".to_owned(), Value::Boolean(true))])),
        ]);
        let mut conn = Connection::new(ServerAddress::new("h", 7687), channel, Version::new(5, 4));
        conn.run("RETURN 1", HashMap::new(), &RequestContext::default(), Box::new(NullHandler))
            .await
            .unwrap();
        conn.drain_one().await.unwrap();
        conn.pull(100, Box::new(NullHandler)).await.unwrap();
        conn.drain_one().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Streaming);
    }

    #[tokio::test]
    async fn failure_moves_to_failed_and_reset_recovers() {
        let failure = Structure::new(
            resp_sig::FAILURE,
            vec![Value::Map(HashMap::from([
                ("code".to_owned(), Value::String("Neo.ClientError.Statement.SyntaxError".to_owned())),
                ("message".to_owned(), Value::String("bad query".to_owned())),
            ]))],
        );
        let channel = channel_with_responses(vec![failure, success(HashMap::new())]);
        let mut conn = Connection::new(ServerAddress::new("h", 7687), channel, Version::new(5, 4));

        conn.run("NOT CYPHER", HashMap::new(), &RequestContext::default(), Box::new(NullHandler))
            .await
            .unwrap();
        assert!(conn.drain_one().await.is_err());
        assert_eq!(conn.state(), ConnectionState::Failed);

        conn.reset().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn record_is_forwarded_to_front_handler_without_popping_it() {
        struct Counter(usize);
        impl ResponseHandler for Counter {
            fn on_record(&mut self, _fields: Vec<Value>) {
                self.0 += 1;
            }
        }

        let record = Structure::new(resp_sig::RECORD, vec![Value::List(vec![Value::Integer(1)])]);
        let channel = channel_with_responses(vec![
            success(HashMap::new()),
            record.clone(),
            record,
            success(HashMap::from([("has_more".to_owned(), Value::Boolean(false))])),
        ]);
        let mut conn = Connection::new(ServerAddress::new("h", 7687), channel, Version::new(5, 4));
        conn.run("RETURN 1", HashMap::new(), &RequestContext::default(), Box::new(NullHandler))
            .await
            .unwrap();
        conn.drain_one().await.unwrap();

        conn.pull(1000, Box::new(Counter(0))).await.unwrap();
        conn.drain_one().await.unwrap(); // record
        conn.drain_one().await.unwrap(); // record
        conn.drain_one().await.unwrap(); // terminal success
        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn eof_marks_connection_broken_and_fails_queued_handlers() {
        let channel = ScriptedChannel {
            inbound: StdVecDeque::new(),
            outbound: Vec::new(),
        };
        let mut conn = Connection::new(ServerAddress::new("h", 7687), channel, Version::new(5, 4));
        conn.run("RETURN 1", HashMap::new(), &RequestContext::default(), Box::new(NullHandler))
            .await
            .unwrap();
        assert!(conn.drain_one().await.is_err());
        assert!(conn.is_broken());
    }
}
