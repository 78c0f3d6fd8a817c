//! IDX ACTIVATE records
//!
//! Each of the read and write devices is activated once with an IDX record
//! before any TH-framed traffic. The adapter answers with a fixed 0x20-byte
//! acknowledgement.

use super::cursor::{ByteView, ByteWriter};
use super::CodecError;

/// Fixed 8-byte prefix of request and response
pub const IDX_RECORD: [u8; 8] = [0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00];

pub const IDX_REQUEST_MIN_LEN: usize = 0x16;
pub const IDX_RESPONSE_LEN: usize = 0x20;

/// Activation type byte
pub const IDX_ACT_TYPE_READ: u8 = 0x19;
pub const IDX_ACT_TYPE_WRITE: u8 = 0x15;

/// Port byte carries the port number under this flag
pub const IDX_PORT_FLAG: u8 = 0x80;

/// Response codes
pub const IDX_RESP_POSITIVE: u8 = 0x02;
pub const IDX_RESP_NEGATIVE: u8 = 0x01;

/// Negative-response causes
pub const IDX_CAUSE_NONE: u8 = 0x00;
pub const IDX_CAUSE_WRONG_DEVICE: u8 = 0x15;
pub const IDX_CAUSE_UNSUPPORTED_PORT: u8 = 0x22;

pub const IDX_FUNC_LEVEL: u16 = 0x0201;
pub const IDX_MICROCODE_LEVEL: u32 = 0x0000_0D12;

/// Decoded IDX ACTIVATE request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdxRequest {
    pub act_type: u8,
    pub port: u8,
    pub issuer_token: u32,
    pub func_level: u16,
}

impl IdxRequest {
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let v = ByteView::new(data);
        v.slice(0, IDX_REQUEST_MIN_LEN)?;
        if v.slice(0, IDX_RECORD.len())? != IDX_RECORD {
            return Err(CodecError::BadIdxRecord);
        }
        Ok(Self {
            act_type: v.u8_at(0x08)?,
            port: v.u8_at(0x0B)? & !IDX_PORT_FLAG,
            issuer_token: v.u32_at(0x0C)?,
            func_level: v.u16_at(0x10)?,
        })
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.put_bytes(&IDX_RECORD)
            .put_u8(self.act_type)
            .put_zeros(2)
            .put_u8(IDX_PORT_FLAG | self.port)
            .put_u32(self.issuer_token)
            .put_u16(self.func_level)
            .put_zeros(IDX_REQUEST_MIN_LEN - 0x12);
    }
}

/// IDX ACTIVATE acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdxResponse {
    pub code: u8,
    pub cause: u8,
    pub port: u8,
    pub token: u32,
    pub func_level: u16,
    pub microcode_level: u32,
}

impl IdxResponse {
    pub fn positive(port: u8, token: u32) -> Self {
        Self {
            code: IDX_RESP_POSITIVE,
            cause: IDX_CAUSE_NONE,
            port,
            token,
            func_level: IDX_FUNC_LEVEL,
            microcode_level: IDX_MICROCODE_LEVEL,
        }
    }

    pub fn negative(port: u8, cause: u8) -> Self {
        Self { code: IDX_RESP_NEGATIVE, cause, ..Self::positive(port, 0) }
    }

    pub fn is_positive(&self) -> bool {
        self.code == IDX_RESP_POSITIVE
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let v = ByteView::new(data);
        v.slice(0, IDX_RESPONSE_LEN)?;
        if v.slice(0, IDX_RECORD.len())? != IDX_RECORD {
            return Err(CodecError::BadIdxRecord);
        }
        Ok(Self {
            code: v.u8_at(0x08)?,
            cause: v.u8_at(0x09)?,
            port: v.u8_at(0x0B)? & !IDX_PORT_FLAG,
            token: v.u32_at(0x0C)?,
            func_level: v.u16_at(0x10)?,
            microcode_level: v.u32_at(0x12)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(IDX_RESPONSE_LEN);
        w.put_bytes(&IDX_RECORD)
            .put_u8(self.code)
            .put_u8(self.cause)
            .put_u8(0)
            .put_u8(IDX_PORT_FLAG | self.port)
            .put_u32(self.token)
            .put_u16(self.func_level)
            .put_u32(self.microcode_level)
            .put_zeros(IDX_RESPONSE_LEN - 0x16);
        w.into_vec()
    }
}
