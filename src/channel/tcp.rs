//! Plain TCP transport: connect, then hand the stream to the protocol
//! engine as a [`Channel`].

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::Channel;
use crate::address::ServerAddress;

/// A raw TCP socket carrying Bolt chunks directly, no framing of its
/// own beyond what `Chunker`/`Dechunker` impose above this layer.
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    pub async fn connect(address: &ServerAddress) -> io::Result<Self> {
        let stream = TcpStream::connect((address.host(), address.port())).await?;
        stream.set_nodelay(true)?;
        debug!(address = %address, "tcp channel connected");
        Ok(TcpChannel { stream })
    }
}

impl Channel for TcpChannel {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await
    }

    async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
