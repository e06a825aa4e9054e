//! WebSocket transport: Bolt-over-WebSocket as an alternate channel,
//! carrying raw Bolt chunks as binary frames instead of text.

use std::io;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::Channel;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A WebSocket connection carrying Bolt chunks as binary frames, one
/// frame per `write_all` call on the writing side. `read` drains
/// frames into an internal buffer so it can serve `buf`-sized reads
/// the same way a raw socket would.
pub struct WsChannel {
    ws: WsStream,
    pending: Vec<u8>,
}

impl WsChannel {
    /// Connect to `url` (`ws://` or `wss://`), exactly mirroring
    /// `build_ws_request`'s use of `IntoClientRequest` but without the
    /// bearer-auth header (Bolt carries auth in its own `HELLO`/`LOGON`
    /// messages, not in the WS handshake).
    pub async fn connect(url: &str) -> io::Result<Self> {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;

        let request = url
            .into_client_request()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e.to_string()))?;
        debug!(url, "ws channel connected");
        Ok(WsChannel {
            ws,
            pending: Vec::new(),
        })
    }

    async fn fill_pending(&mut self) -> io::Result<usize> {
        loop {
            match self.ws.next().await {
                None => return Ok(0),
                Some(Err(e)) => return Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
                Some(Ok(Message::Binary(data))) => {
                    self.pending.extend_from_slice(&data);
                    return Ok(self.pending.len());
                }
                Some(Ok(Message::Close(_))) => return Ok(0),
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                    continue;
                }
                Some(Ok(_)) => {
                    warn!("ignoring non-binary ws frame on a bolt channel");
                    continue;
                }
            }
        }
    }
}

impl Channel for WsChannel {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            let n = self.fill_pending().await?;
            if n == 0 {
                return Ok(0);
            }
        }
        let take = buf.len().min(self.pending.len());
        buf[..take].copy_from_slice(&self.pending[..take]);
        self.pending.drain(..take);
        Ok(take)
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.ws
            .send(Message::Binary(buf.to_vec().into()))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }

    async fn shutdown(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
