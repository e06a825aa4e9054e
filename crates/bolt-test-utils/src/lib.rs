//! Test doubles for exercising `bolt-driver` without a real server:
//! an in-memory duplex [`Channel`](bolt_driver::channel::Channel) for
//! unit tests that want to drive a [`Connection`](bolt_driver::Connection)
//! directly, and a scriptable TCP [`FakeBoltServer`] for integration
//! tests that exercise the real handshake and channel code paths.
//!
//! Split one module per side of the wire, each binding a real
//! `TcpListener` to port 0 with one task per connection.

pub mod duplex_channel;
pub mod fake_server;

pub use duplex_channel::{duplex_pair, DuplexChannel};
pub use fake_server::{FakeBoltServer, ScriptedReply};
