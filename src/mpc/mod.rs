//! MPC Wire-Format Codec
//!
//! Decoding and encoding of the control-plane records exchanged over the
//! read/write devices: Transport Header (TH), Request/Response Header (RRH),
//! Protocol Header (PH), PUK/PUS records, IP Assist (IPA) headers and IDX
//! activation records.
//!
//! All integers are big-endian and byte-packed. Navigation is pure and never
//! performs I/O; every offset and length taken from the wire is checked
//! through [`cursor::ByteView`] before it is used.

pub mod cursor;
pub mod idx;
pub mod ipa;
pub mod puk;
pub mod th;

pub use cursor::{ByteView, ByteWriter};
pub use idx::{IdxRequest, IdxResponse};
pub use ipa::IpaHeader;
pub use puk::{Puk, PukHeader, PusBody, PusRecord};
pub use th::{MpcMessage, ProtocolHeader, Request, RequestHeader, TransportHeader};

/// First word of every TH-framed message
pub const TH_MARKER: u32 = 0x00E0_0000;
/// First word of an IDX ACTIVATE record
pub const IDX_MARKER: u32 = 0x0000_8000;

pub const TH_LEN: usize = 20;
pub const RRH_LEN: usize = 36;
pub const RRH_SHORT_LEN: usize = 28;
pub const PH_LEN: usize = 8;
pub const PUK_LEN: usize = 12;
pub const PUS_HDR_LEN: usize = 4;
pub const IPA_HDR_LEN: usize = 20;

/// Block size advertised in adapter-built THs
pub const TH_BLOCK_SIZE: u16 = 0x1000;

/// RRH types
pub mod rrh_type {
    pub const CM: u8 = 0x81;
    pub const ULP: u8 = 0x41;
    pub const IPA: u8 = 0xC1;
}

/// RRH protocol byte
pub mod proto {
    pub const L2: u8 = 0x08;
    pub const L3: u8 = 0x03;
    pub const UNSPECIFIED: u8 = 0x7E;
}

/// Token type used in RRHs and PUS bodies
pub const TOKEN_TYPE: u8 = 0x05;

/// PH location class
pub const PH_LOC_CLASS: u8 = 0x01;

/// PUK category and type
pub mod puk_type {
    pub const CAT_CONTROL: u8 = 0x41;
    pub const CAT_ACTIVATION: u8 = 0x43;

    pub const ENABLE: u8 = 0x02;
    pub const DISABLE: u8 = 0x03;
    pub const SETUP: u8 = 0x04;
    pub const TAKEDOWN: u8 = 0x05;
    pub const CONFIRM: u8 = 0x06;
    pub const ACTIVE: u8 = 0x60;
}

/// PUS category and type
pub mod pus_type {
    pub const CATEGORY: u8 = 0x04;

    pub const FILTER: u8 = 0x01;
    pub const USER_DATA: u8 = 0x02;
    pub const CONNECTION: u8 = 0x04;
    pub const PARTNER: u8 = 0x06;
    pub const LINK_LEVEL: u8 = 0x0A;
    pub const DEVICE_ADDR: u8 = 0x0B;
}

/// Link type carried in the link-level PUS
pub const LINK_TYPE_ETHERNET: u8 = 0x10;

/// Wire navigation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("read of {len} bytes at offset {offset:#x} is out of bounds")]
    OutOfBounds { offset: usize, len: usize },

    #[error("bad transport header marker {0:#010x}")]
    BadMarker(u32),

    #[error("transport header length {declared} exceeds buffer of {actual} bytes")]
    TruncatedMessage { declared: usize, actual: usize },

    #[error("request header has no protocol headers")]
    NoProtocolHeader,

    #[error("PUS record at offset {offset:#x} has invalid length {len}")]
    BadPusLength { offset: usize, len: usize },

    #[error("PUK declares {declared} bytes of PUS data, {actual} available")]
    BadPukLength { declared: usize, actual: usize },

    #[error("IDX record does not start with the activation marker")]
    BadIdxRecord,
}

/// Kind of data written to a read/write device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Mpc,
    Idx,
    Unknown,
}

/// Route a WRITE by its first 4 bytes
pub fn classify_write(data: &[u8]) -> WriteKind {
    match ByteView::new(data).u32_at(0) {
        Ok(TH_MARKER) => WriteKind::Mpc,
        Ok(IDX_MARKER) => WriteKind::Idx,
        _ => WriteKind::Unknown,
    }
}

/// Hex dump for trace logging
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3 + data.len() / 16 * 8);
    for (i, chunk) in data.chunks(16).enumerate() {
        out.push_str(&format!("\n  {:04x}:", i * 16));
        for b in chunk {
            out.push_str(&format!(" {:02x}", b));
        }
    }
    out
}
