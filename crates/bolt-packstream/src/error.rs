use thiserror::Error;

/// Errors raised while packing or unpacking packstream values, or while
/// reassembling chunked messages.
#[derive(Debug, Error)]
pub enum PackstreamError {
    #[error("value too large to encode: {len} bytes exceeds the 32-bit size limit")]
    TooLarge { len: usize },

    #[error("graph value types are not valid as request parameters")]
    NotPackable,

    #[error("unexpected end of buffer while unpacking")]
    UnexpectedEof,

    #[error("unknown packstream marker byte 0x{marker:02X}")]
    UnknownMarker { marker: u8 },

    #[error("structure signature 0x{signature:02X} expects {expected} fields, got {actual}")]
    WrongFieldCount {
        signature: u8,
        expected: usize,
        actual: usize,
    },

    #[error("unknown structure signature 0x{signature:02X}")]
    UnknownSignature { signature: u8 },

    #[error("invalid UTF-8 in packed string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("path sequence entry {index} is 0, which is not a valid 1-based relationship reference")]
    InvalidPathSequence { index: usize },
}
