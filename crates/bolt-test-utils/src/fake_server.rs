//! A scriptable TCP Bolt server for integration tests.
//!
//! Grounded on `rt-test-utils::mock_ws_server::MockWsServer`: bind to
//! `127.0.0.1:0`, spawn an accept loop, one task per connection, swallow
//! connection errors since a test client dropping mid-exchange is
//! expected rather than exceptional.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bolt_driver::protocol::{Version, MAGIC_PREAMBLE};
use bolt_packstream::{pack, Chunker, Dechunker, Structure, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One batch of structures (e.g. `[SUCCESS]`, or `[RECORD, RECORD,
/// SUCCESS]`) written back in response to one incoming chunked request.
pub type ScriptedReply = Vec<Structure>;

/// A fake Bolt server. Negotiates a fixed version on handshake, then
/// replies to each incoming chunked message with the next queued
/// [`ScriptedReply`] — the request's own bytes are read and discarded,
/// not interpreted, since tests script behavior by request order, not
/// by content.
pub struct FakeBoltServer {
    addr: SocketAddr,
    _task: JoinHandle<()>,
}

impl FakeBoltServer {
    /// Starts the server, binding to a random port. `negotiated`
    /// becomes the version byte this server always hands back,
    /// regardless of what the client proposed — tests that need to
    /// exercise proposal mismatches build the handshake bytes by hand
    /// instead of going through this helper.
    pub async fn start(negotiated: Version, replies: Vec<ScriptedReply>) -> io::Result<Self> {
        Self::start_on("127.0.0.1:0", negotiated, replies).await
    }

    /// Like [`FakeBoltServer::start`], but binds `addr` instead of an
    /// arbitrary port — for tests whose scripted replies need to name
    /// this server's own address (e.g. a routing table entry) before
    /// it's running. Callers typically learn a free port with a
    /// throwaway `std::net::TcpListener` first.
    pub async fn start_on(addr: impl tokio::net::ToSocketAddrs, negotiated: Version, replies: Vec<ScriptedReply>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let replies = Arc::new(Mutex::new(replies.into_iter().collect::<VecDeque<_>>()));

        let task = tokio::spawn(async move {
            Self::accept_loop(listener, negotiated, replies).await;
        });

        Ok(FakeBoltServer { addr, _task: task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn accept_loop(listener: TcpListener, negotiated: Version, replies: Arc<Mutex<VecDeque<ScriptedReply>>>) {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    let replies = replies.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, negotiated, replies).await {
                            // Expected once a test client is done with the connection.
                            let _ = e;
                        }
                    });
                }
                Err(_) => break,
            }
        }
    }

    async fn handle_connection(
        mut stream: tokio::net::TcpStream,
        negotiated: Version,
        replies: Arc<Mutex<VecDeque<ScriptedReply>>>,
    ) -> io::Result<()> {
        let mut handshake_request = [0u8; 4 + 4 * 4];
        stream.read_exact(&mut handshake_request).await?;
        debug_assert_eq!(&handshake_request[..4], &MAGIC_PREAMBLE.to_be_bytes());

        stream.write_all(&negotiated.encode().to_be_bytes()).await?;

        let mut dechunker = Dechunker::new();
        let mut inbound = [0u8; 4096];
        loop {
            let n = stream.read(&mut inbound).await?;
            if n == 0 {
                return Ok(());
            }
            let Ok(messages) = dechunker.feed(&inbound[..n]) else {
                return Ok(());
            };
            for _request in messages {
                let next = replies.lock().unwrap().pop_front();
                let Some(reply) = next else { return Ok(()) };
                for structure in reply {
                    let mut packed = bytes::BytesMut::new();
                    pack(&mut packed, &Value::Structure(structure)).expect("scripted reply packs cleanly");
                    let chunked = Chunker::new().chunk(&packed);
                    stream.write_all(&chunked).await?;
                }
            }
        }
    }
}
