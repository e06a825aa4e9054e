//! Transport abstraction.
//!
//! The protocol engine and connection state machine only need to read
//! and write bytes and to shut the transport down; they don't care
//! whether those bytes cross a raw TCP socket or a WebSocket frame.
//! Object-safety isn't required since every user of `Channel` is
//! generic over `C: Channel`, so this stays a plain trait rather than
//! a boxed `dyn` one.

pub mod known_hosts;
pub mod tcp;
pub mod trust;
pub mod ws;

use std::io;

pub use tcp::TcpChannel;
pub use ws::WsChannel;

/// A byte-oriented transport carrying framed Bolt chunks.
pub trait Channel: Send {
    /// Read at least one byte into `buf`, returning the number read.
    /// `Ok(0)` signals the peer closed the transport cleanly.
    fn read(&mut self, buf: &mut [u8]) -> impl std::future::Future<Output = io::Result<usize>> + Send;

    /// Write all of `buf`, returning once it's been handed to the
    /// transport (not necessarily acknowledged by the peer).
    fn write_all(&mut self, buf: &[u8]) -> impl std::future::Future<Output = io::Result<()>> + Send;

    /// Best-effort shutdown. Errors are not actionable once a
    /// connection is being torn down, so this does not return one.
    fn shutdown(&mut self) -> impl std::future::Future<Output = ()> + Send;
}
