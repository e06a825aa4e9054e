//! Bolt message structure signatures.

pub mod request {
    /// Shared by `INIT` (v1/v2 shape) and `HELLO` (v3+ shape).
    pub const HELLO: u8 = 0x01;
    pub const LOGON: u8 = 0x6A;
    pub const LOGOFF: u8 = 0x6B;
    pub const GOODBYE: u8 = 0x02;
    pub const RUN: u8 = 0x10;
    pub const BEGIN: u8 = 0x11;
    pub const COMMIT: u8 = 0x12;
    pub const ROLLBACK: u8 = 0x13;
    pub const RESET: u8 = 0x0F;
    pub const DISCARD: u8 = 0x2F;
    pub const PULL: u8 = 0x3F;
    pub const ROUTE: u8 = 0x66;
    pub const TELEMETRY: u8 = 0x54;
    /// Deprecated mute path; the engine never sends this.
    #[allow(dead_code)]
    pub const ACK_FAILURE: u8 = 0x0E;
}

pub mod response {
    pub const SUCCESS: u8 = 0x70;
    pub const RECORD: u8 = 0x71;
    pub const IGNORED: u8 = 0x7E;
    pub const FAILURE: u8 = 0x7F;
}
