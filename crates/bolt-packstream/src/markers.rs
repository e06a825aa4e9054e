//! Packstream marker byte constants, per the Bolt wire format.
//!
//! Tiny containers encode their size in the low nibble of the marker
//! byte, so the constants below are the high-nibble base; callers OR in
//! the size (0-15).

pub const NULL: u8 = 0xC0;
pub const FLOAT: u8 = 0xC1;
pub const FALSE: u8 = 0xC2;
pub const TRUE: u8 = 0xC3;

pub const INT_8: u8 = 0xC8;
pub const INT_16: u8 = 0xC9;
pub const INT_32: u8 = 0xCA;
pub const INT_64: u8 = 0xCB;

pub const BYTES_8: u8 = 0xCC;
pub const BYTES_16: u8 = 0xCD;
pub const BYTES_32: u8 = 0xCE;

pub const TINY_STRING: u8 = 0x80;
pub const STRING_8: u8 = 0xD0;
pub const STRING_16: u8 = 0xD1;
pub const STRING_32: u8 = 0xD2;

pub const TINY_LIST: u8 = 0x90;
pub const LIST_8: u8 = 0xD4;
pub const LIST_16: u8 = 0xD5;
pub const LIST_32: u8 = 0xD6;

pub const TINY_MAP: u8 = 0xA0;
pub const MAP_8: u8 = 0xD8;
pub const MAP_16: u8 = 0xD9;
pub const MAP_32: u8 = 0xDA;

pub const TINY_STRUCT: u8 = 0xB0;
pub const STRUCT_8: u8 = 0xDC;
pub const STRUCT_16: u8 = 0xDD;

/// The smallest tiny-int marker; bytes `0xF0..=0xFF` pack -16..=-1,
/// bytes `0x00..=0x7F` pack 0..=127. There is no dedicated "positive
/// tiny int" marker: the byte value *is* the marker and the value.
pub const TINY_NEG_INT_BASE: i8 = -16;

/// Structure signatures of interest.
pub mod signature {
    pub const NODE: u8 = 0x4E; // 'N'
    pub const RELATIONSHIP: u8 = 0x52; // 'R'
    pub const UNBOUND_RELATIONSHIP: u8 = 0x72; // 'r'
    pub const PATH: u8 = 0x50; // 'P'
    pub const POINT_2D: u8 = 0x58;
    pub const POINT_3D: u8 = 0x59;
    pub const DATE: u8 = 0x44;
    pub const LOCAL_TIME: u8 = 0x74;
    pub const TIME: u8 = 0x54;
    pub const LOCAL_DATE_TIME: u8 = 0x64;
    pub const DURATION: u8 = 0x45;
    /// Pre-v5-UTC-patch DateTime-by-offset signature.
    pub const DATE_TIME_OFFSET_LEGACY: u8 = 0x46;
    /// v5-UTC-patch DateTime-by-offset signature.
    pub const DATE_TIME_OFFSET_UTC: u8 = 0x49;
    /// Pre-v5-UTC-patch DateTime-by-zone-id signature.
    pub const DATE_TIME_ZONE_ID_LEGACY: u8 = 0x66;
    /// v5-UTC-patch DateTime-by-zone-id signature.
    pub const DATE_TIME_ZONE_ID_UTC: u8 = 0x69;
}
