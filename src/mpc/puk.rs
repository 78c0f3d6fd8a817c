//! PUK header and PUS sub-records
//!
//! A PUK carries a chain of self-sized PUS records. The scan in
//! [`Puk::find`] is the only place PUS lengths are trusted: it refuses a
//! record whose header does not fit, whose length is zero, or whose length
//! runs past the PUS area.

use super::cursor::{ByteView, ByteWriter};
use super::{pus_type, CodecError, PUK_LEN, PUS_HDR_LEN};

/// PUK header (12 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PukHeader {
    pub length: u16,
    pub category: u8,
    pub puk_type: u8,
    /// Total length of the PUS records that follow
    pub pus_len: u16,
}

impl PukHeader {
    pub fn decode(view: &ByteView<'_>) -> Result<Self, CodecError> {
        view.slice(0, PUK_LEN)?;
        Ok(Self {
            length: view.u16_at(0x00)?,
            category: view.u8_at(0x02)?,
            puk_type: view.u8_at(0x03)?,
            pus_len: view.u16_at(0x04)?,
        })
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.put_u16(self.length)
            .put_u8(self.category)
            .put_u8(self.puk_type)
            .put_u16(self.pus_len)
            .put_zeros(6);
    }
}

/// Decoded PUS body, keyed by the PUS type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PusBody<'a> {
    Filter { proto: u8, token_type: u8, token: u32 },
    UserData(&'a [u8]),
    Connection { token_type: u8, token: u32 },
    Partner { token_type: u8, token: u32 },
    LinkLevel { link_type: u8, lan_number: u8, proto: u8, mtu: u32 },
    DeviceAddr(&'a [u8]),
    Other { pus_type: u8, body: &'a [u8] },
}

impl<'a> PusBody<'a> {
    pub fn pus_type(&self) -> u8 {
        match self {
            Self::Filter { .. } => pus_type::FILTER,
            Self::UserData(_) => pus_type::USER_DATA,
            Self::Connection { .. } => pus_type::CONNECTION,
            Self::Partner { .. } => pus_type::PARTNER,
            Self::LinkLevel { .. } => pus_type::LINK_LEVEL,
            Self::DeviceAddr(_) => pus_type::DEVICE_ADDR,
            Self::Other { pus_type, .. } => *pus_type,
        }
    }

    /// Token carried by filter, connection and partner records
    pub fn token(&self) -> Option<u32> {
        match self {
            Self::Filter { token, .. } | Self::Connection { token, .. } | Self::Partner { token, .. } => {
                Some(*token)
            }
            _ => None,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Self::Filter { .. } | Self::Connection { .. } | Self::Partner { .. } | Self::LinkLevel { .. } => 8,
            Self::UserData(b) | Self::DeviceAddr(b) | Self::Other { body: b, .. } => b.len(),
        }
    }

    /// Encoded length including the 4-byte PUS header
    pub fn encoded_len(&self) -> usize {
        PUS_HDR_LEN + self.body_len()
    }

    /// Write header and body
    pub fn encode(&self, w: &mut ByteWriter) {
        w.put_u16(self.encoded_len() as u16)
            .put_u8(pus_type::CATEGORY)
            .put_u8(self.pus_type());
        match *self {
            Self::Filter { proto, token_type, token } => {
                w.put_u8(proto).put_u8(0).put_u8(token_type).put_u32(token).put_u8(0);
            }
            Self::Connection { token_type, token } | Self::Partner { token_type, token } => {
                w.put_u8(token_type).put_u32(token).put_zeros(3);
            }
            Self::LinkLevel { link_type, lan_number, proto, mtu } => {
                w.put_u8(link_type).put_u8(lan_number).put_u8(proto).put_u8(0).put_u32(mtu);
            }
            Self::UserData(b) | Self::DeviceAddr(b) | Self::Other { body: b, .. } => {
                w.put_bytes(b);
            }
        }
    }
}

/// One PUS record as found in the PUS area
#[derive(Debug, Clone, Copy)]
pub struct PusRecord<'a> {
    /// Offset within the PUS area
    pub offset: usize,
    pub pus_type: u8,
    /// Whole record, header included
    pub raw: &'a [u8],
}

impl<'a> PusRecord<'a> {
    pub fn body_bytes(&self) -> &'a [u8] {
        &self.raw[PUS_HDR_LEN..]
    }

    /// Decode the body on demand
    pub fn body(&self) -> Result<PusBody<'a>, CodecError> {
        let v = ByteView::new(self.body_bytes());
        let body = match self.pus_type {
            pus_type::FILTER => PusBody::Filter {
                proto: v.u8_at(0)?,
                token_type: v.u8_at(2)?,
                token: v.u32_at(3)?,
            },
            pus_type::USER_DATA => PusBody::UserData(v.bytes()),
            pus_type::CONNECTION => PusBody::Connection { token_type: v.u8_at(0)?, token: v.u32_at(1)? },
            pus_type::PARTNER => PusBody::Partner { token_type: v.u8_at(0)?, token: v.u32_at(1)? },
            pus_type::LINK_LEVEL => PusBody::LinkLevel {
                link_type: v.u8_at(0)?,
                lan_number: v.u8_at(1)?,
                proto: v.u8_at(2)?,
                mtu: v.u32_at(4)?,
            },
            pus_type::DEVICE_ADDR => PusBody::DeviceAddr(v.bytes()),
            other => PusBody::Other { pus_type: other, body: v.bytes() },
        };
        Ok(body)
    }
}

/// A PUK with its PUS area
#[derive(Debug, Clone, Copy)]
pub struct Puk<'a> {
    pub header: PukHeader,
    pus: ByteView<'a>,
}

impl<'a> Puk<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, CodecError> {
        let view = ByteView::new(data);
        let header = PukHeader::decode(&view)?;
        let declared = header.pus_len as usize;
        let pus = view
            .slice(PUK_LEN, declared)
            .map_err(|_| CodecError::BadPukLength { declared, actual: data.len().saturating_sub(PUK_LEN) })?;
        Ok(Self { header, pus: ByteView::new(pus) })
    }

    /// Walk the PUS chain; stops after the first malformed record
    pub fn records(&self) -> PusIter<'a> {
        PusIter { area: self.pus, pos: 0, failed: false }
    }

    /// First PUS of type `pus_type`
    ///
    /// A malformed record before the match fails the whole lookup.
    pub fn find(&self, pus_type: u8) -> Result<Option<PusRecord<'a>>, CodecError> {
        for rec in self.records() {
            let rec = rec?;
            if rec.pus_type == pus_type {
                return Ok(Some(rec));
            }
        }
        Ok(None)
    }
}

pub struct PusIter<'a> {
    area: ByteView<'a>,
    pos: usize,
    failed: bool,
}

impl<'a> Iterator for PusIter<'a> {
    type Item = Result<PusRecord<'a>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.area.len() {
            return None;
        }
        let remaining = self.area.len() - self.pos;
        let len = if remaining < PUS_HDR_LEN {
            0
        } else {
            self.area.u16_at(self.pos).map(|l| l as usize).unwrap_or(0)
        };
        if len < PUS_HDR_LEN || len > remaining {
            self.failed = true;
            return Some(Err(CodecError::BadPusLength { offset: self.pos, len }));
        }
        let rec = self.area.slice(self.pos, len).and_then(|raw| {
            Ok(PusRecord { offset: self.pos, pus_type: self.area.u8_at(self.pos + 3)?, raw })
        });
        self.pos += len;
        Some(rec)
    }
}

/// Builds a PUK followed by its PUS records
#[derive(Debug)]
pub struct PukBuilder {
    category: u8,
    puk_type: u8,
    records: ByteWriter,
}

impl PukBuilder {
    pub fn new(category: u8, puk_type: u8) -> Self {
        Self { category, puk_type, records: ByteWriter::new() }
    }

    pub fn push(&mut self, body: &PusBody<'_>) -> &mut Self {
        body.encode(&mut self.records);
        self
    }

    /// Append an already-encoded PUS record verbatim
    pub fn push_raw(&mut self, record: &PusRecord<'_>) -> &mut Self {
        self.records.put_bytes(record.raw);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(PUK_LEN + self.records.len());
        PukHeader {
            length: PUK_LEN as u16,
            category: self.category,
            puk_type: self.puk_type,
            pus_len: self.records.len() as u16,
        }
        .encode(&mut w);
        w.put_bytes(&self.records.into_vec());
        w.into_vec()
    }
}
