//! bolt-packstream: packstream value codec and chunked message framing
//! for the Bolt wire protocol.
//!
//! This crate has no knowledge of protocol *versions* or *dialects* —
//! that belongs to the protocol engine in the `bolt-driver` crate, which
//! builds request structures out of [`Value`] and interprets response
//! structures via [`structures::Structure::into_typed`].

pub mod chunking;
pub mod error;
pub mod markers;
pub mod pack;
pub mod structures;
pub mod unpack;
pub mod value;

pub use chunking::{Chunker, Dechunker};
pub use error::PackstreamError;
pub use pack::pack;
pub use structures::{GraphValue, Structure};
pub use unpack::unpack;
pub use value::{map_of, Value};
