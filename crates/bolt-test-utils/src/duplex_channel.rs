//! An in-process [`Channel`] over a pair of connected pipes, for tests
//! that want a real `AsyncRead`/`AsyncWrite` transport (unlike a
//! scripted byte queue) without opening a socket.

use std::io;

use bolt_driver::channel::Channel;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub struct DuplexChannel {
    stream: DuplexStream,
}

impl Channel for DuplexChannel {
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

/// Builds two ends of the same pipe, each usable as a [`Channel`] — one
/// side for the driver under test, one for a hand-scripted peer.
pub fn duplex_pair(max_buf_size: usize) -> (DuplexChannel, DuplexChannel) {
    let (a, b) = tokio::io::duplex(max_buf_size);
    (DuplexChannel { stream: a }, DuplexChannel { stream: b })
}
