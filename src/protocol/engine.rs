//! The wire-level half of the protocol engine: turns a [`Structure`]
//! into chunked bytes on the way out, and chunked bytes back into a
//! [`Structure`] on the way in.
//!
//! Observer dispatch (matching responses to the FIFO queue of pending
//! requests) lives one layer up, in [`crate::connection`] — this type
//! only knows how to move one message across the wire at a time.

use bytes::{Bytes, BytesMut};
use tracing::trace;

use bolt_packstream::{pack, unpack, Chunker, Dechunker, Structure, Value};

use crate::channel::Channel;
use crate::error::BoltError;

/// Read buffer size for one `channel.read()` call.
const READ_BUF_SIZE: usize = 8192;

pub struct MessageEngine<C: Channel> {
    channel: C,
    chunker: Chunker,
    dechunker: Dechunker,
    read_buf: [u8; READ_BUF_SIZE],
    /// Messages the dechunker completed but the caller hasn't consumed
    /// yet, in case a single `read()` surfaced more than one.
    pending: std::collections::VecDeque<Bytes>,
}

impl<C: Channel> MessageEngine<C> {
    pub fn new(channel: C) -> Self {
        MessageEngine {
            channel,
            chunker: Chunker::new(),
            dechunker: Dechunker::new(),
            read_buf: [0u8; READ_BUF_SIZE],
            pending: std::collections::VecDeque::new(),
        }
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub async fn send(&mut self, structure: Structure) -> Result<(), BoltError> {
        let mut packed = BytesMut::new();
        pack(&mut packed, &Value::Structure(structure))?;
        let wire = self.chunker.chunk(&packed);
        self.channel
            .write_all(&wire)
            .await
            .map_err(|e| BoltError::ServiceUnavailable(format!("write failed: {e}")))?;
        trace!(bytes = wire.len(), "sent bolt message");
        Ok(())
    }

    /// Receive the next complete message, blocking on channel reads
    /// until the dechunker has one ready.
    pub async fn receive(&mut self) -> Result<Structure, BoltError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                let mut cursor = message;
                let value = unpack(&mut cursor)?;
                return match value {
                    Value::Structure(s) => Ok(s),
                    other => Err(BoltError::Protocol(format!(
                        "expected a response structure, got {other:?}"
                    ))),
                };
            }

            let n = self
                .channel
                .read(&mut self.read_buf)
                .await
                .map_err(|e| BoltError::ServiceUnavailable(format!("read failed: {e}")))?;
            if n == 0 {
                return Err(BoltError::ServiceUnavailable(
                    "peer closed the connection".to_owned(),
                ));
            }
            let completed = self.dechunker.feed(&self.read_buf[..n])?;
            self.pending.extend(completed);
        }
    }

    pub async fn shutdown(&mut self) {
        self.channel.shutdown().await;
    }
}
