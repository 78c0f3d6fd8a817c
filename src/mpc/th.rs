//! Transport, Request/Response and Protocol headers
//!
//! An MPC message is one TH followed by a chain of RRHs. Each RRH owns a
//! contiguous run of PHs, and each PH points (relative to the TH) at the
//! bytes it describes.

use super::cursor::{ByteView, ByteWriter};
use super::{
    CodecError, PH_LEN, PH_LOC_CLASS, RRH_LEN, RRH_SHORT_LEN, TH_BLOCK_SIZE, TH_LEN, TH_MARKER,
    TOKEN_TYPE,
};

/// Transport Header (20 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportHeader {
    pub seq: u32,
    pub rrh_offset: u32,
    pub total_len: u32,
    pub block_size: u16,
    pub rrh_count: u16,
}

impl TransportHeader {
    pub fn decode(view: &ByteView<'_>) -> Result<Self, CodecError> {
        let marker = view.u32_at(0x00)?;
        if marker != TH_MARKER {
            return Err(CodecError::BadMarker(marker));
        }
        Ok(Self {
            seq: view.u32_at(0x04)?,
            rrh_offset: view.u32_at(0x08)?,
            total_len: view.u32_at(0x0C)?,
            block_size: view.u16_at(0x10)?,
            rrh_count: view.u16_at(0x12)?,
        })
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.put_u32(TH_MARKER)
            .put_u32(self.seq)
            .put_u32(self.rrh_offset)
            .put_u32(self.total_len)
            .put_u16(self.block_size)
            .put_u16(self.rrh_count);
    }
}

/// Request/Response Header (36 bytes, or 28 in short form)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestHeader {
    /// Offset of the next RRH from the TH, 0 for the last one
    pub next_offset: u32,
    pub rrh_type: u8,
    pub proto: u8,
    pub ph_count: u16,
    pub seq: u32,
    pub ack: u32,
    /// Offset of the first PH from this RRH
    pub ph_offset: u16,
    pub data_len: u16,
    pub alda: u32,
    pub token_type: u8,
    pub token: u32,
}

impl RequestHeader {
    /// Whether this header uses the 36-byte layout
    pub fn is_long(&self) -> bool {
        self.ph_offset as usize >= RRH_LEN
    }

    pub fn encoded_len(&self) -> usize {
        if self.is_long() {
            RRH_LEN
        } else {
            RRH_SHORT_LEN
        }
    }

    /// Decode the RRH starting at `off`
    pub fn decode(view: &ByteView<'_>, off: usize) -> Result<Self, CodecError> {
        let hdr = Self {
            next_offset: view.u32_at(off)?,
            rrh_type: view.u8_at(off + 0x04)?,
            proto: view.u8_at(off + 0x05)?,
            ph_count: view.u16_at(off + 0x06)?,
            seq: view.u32_at(off + 0x08)?,
            ack: view.u32_at(off + 0x0C)?,
            ph_offset: view.u16_at(off + 0x10)?,
            data_len: view.u16_at(off + 0x12)?,
            alda: view.u24_at(off + 0x14)?,
            token_type: view.u8_at(off + 0x17)?,
            token: view.u32_at(off + 0x18)?,
        };
        // Make sure the whole header is present, reserved tail included
        view.slice(off, hdr.encoded_len())?;
        Ok(hdr)
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.put_u32(self.next_offset)
            .put_u8(self.rrh_type)
            .put_u8(self.proto)
            .put_u16(self.ph_count)
            .put_u32(self.seq)
            .put_u32(self.ack)
            .put_u16(self.ph_offset)
            .put_u16(self.data_len)
            .put_u24(self.alda)
            .put_u8(self.token_type)
            .put_u32(self.token);
        if self.is_long() {
            w.put_zeros(RRH_LEN - RRH_SHORT_LEN);
        }
    }
}

/// Protocol Header (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtocolHeader {
    pub loc_class: u8,
    pub length: u32,
    /// Offset of the described data from the TH
    pub data_offset: u32,
}

impl ProtocolHeader {
    pub fn decode(view: &ByteView<'_>, off: usize) -> Result<Self, CodecError> {
        Ok(Self {
            loc_class: view.u8_at(off)?,
            length: view.u24_at(off + 0x01)?,
            data_offset: view.u32_at(off + 0x04)?,
        })
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.put_u8(self.loc_class).put_u24(self.length).put_u32(self.data_offset);
    }
}

/// A validated TH-framed message
#[derive(Debug, Clone, Copy)]
pub struct MpcMessage<'a> {
    view: ByteView<'a>,
    pub th: TransportHeader,
}

impl<'a> MpcMessage<'a> {
    /// Check the TH and restrict navigation to its declared length
    pub fn parse(data: &'a [u8]) -> Result<Self, CodecError> {
        let full = ByteView::new(data);
        let th = TransportHeader::decode(&full)?;
        let total = th.total_len as usize;
        if total < TH_LEN || total > data.len() {
            return Err(CodecError::TruncatedMessage { declared: total, actual: data.len() });
        }
        Ok(Self { view: ByteView::new(full.slice(0, total)?), th })
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.view.bytes()
    }

    /// Iterate the RRH chain
    pub fn requests(&self) -> RequestIter<'a> {
        RequestIter {
            view: self.view,
            next: Some(self.th.rrh_offset as usize),
            remaining: self.th.rrh_count,
        }
    }

    /// First RRH of the message
    pub fn first_request(&self) -> Result<Request<'a>, CodecError> {
        Request::at(self.view, self.th.rrh_offset as usize)
    }
}

/// One RRH together with the message it lives in
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    view: ByteView<'a>,
    offset: usize,
    pub header: RequestHeader,
}

impl<'a> Request<'a> {
    fn at(view: ByteView<'a>, offset: usize) -> Result<Self, CodecError> {
        let header = RequestHeader::decode(&view, offset)?;
        Ok(Self { view, offset, header })
    }

    /// Offset of this RRH from the TH
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The `index`th PH of this RRH
    pub fn protocol_header(&self, index: u16) -> Result<ProtocolHeader, CodecError> {
        if index >= self.header.ph_count {
            return Err(CodecError::NoProtocolHeader);
        }
        let off = self.offset + self.header.ph_offset as usize + index as usize * PH_LEN;
        ProtocolHeader::decode(&self.view, off)
    }

    pub fn protocol_headers(&self) -> impl Iterator<Item = Result<ProtocolHeader, CodecError>> + '_ {
        (0..self.header.ph_count).map(move |i| self.protocol_header(i))
    }

    /// Bytes described by the `index`th PH
    pub fn data(&self, index: u16) -> Result<&'a [u8], CodecError> {
        let ph = self.protocol_header(index)?;
        self.view.slice(ph.data_offset as usize, ph.length as usize)
    }

    /// Bytes described by the first PH
    pub fn first_data(&self) -> Result<&'a [u8], CodecError> {
        self.data(0)
    }
}

/// Iterator over the RRH chain, bounded by the TH's RRH count
pub struct RequestIter<'a> {
    view: ByteView<'a>,
    next: Option<usize>,
    remaining: u16,
}

impl<'a> Iterator for RequestIter<'a> {
    type Item = Result<Request<'a>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let off = self.next?;
        self.remaining -= 1;
        match Request::at(self.view, off) {
            Ok(req) => {
                self.next = match req.header.next_offset {
                    0 => None,
                    n => Some(n as usize),
                };
                Some(Ok(req))
            }
            Err(e) => {
                self.next = None;
                Some(Err(e))
            }
        }
    }
}

/// Build a single-RRH, single-PH message around `payload`
///
/// `header` supplies type, protocol, sequence, ack and token. Offsets and
/// lengths are computed here and the long RRH form is always used.
pub fn build_message(th_seq: u32, header: &RequestHeader, payload: &[u8]) -> Vec<u8> {
    let data_offset = TH_LEN + RRH_LEN + PH_LEN;
    let total = data_offset + payload.len();

    let th = TransportHeader {
        seq: th_seq,
        rrh_offset: TH_LEN as u32,
        total_len: total as u32,
        block_size: TH_BLOCK_SIZE,
        rrh_count: 1,
    };
    let rrh = RequestHeader {
        next_offset: 0,
        ph_count: 1,
        ph_offset: RRH_LEN as u16,
        data_len: payload.len() as u16,
        alda: payload.len() as u32,
        token_type: TOKEN_TYPE,
        ..*header
    };
    let ph = ProtocolHeader {
        loc_class: PH_LOC_CLASS,
        length: payload.len() as u32,
        data_offset: data_offset as u32,
    };

    let mut w = ByteWriter::with_capacity(total);
    th.encode(&mut w);
    rrh.encode(&mut w);
    ph.encode(&mut w);
    w.put_bytes(payload);
    w.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::rrh_type;

    fn sample_rrh() -> RequestHeader {
        RequestHeader {
            rrh_type: rrh_type::ULP,
            proto: 0x08,
            seq: 7,
            ack: 3,
            token: 0x0100_0004,
            ..Default::default()
        }
    }

    #[test]
    fn test_th_roundtrip() {
        let th = TransportHeader { seq: 9, rrh_offset: 20, total_len: 100, block_size: 0x1000, rrh_count: 2 };
        let mut w = ByteWriter::new();
        th.encode(&mut w);
        let bytes = w.into_vec();
        assert_eq!(bytes.len(), TH_LEN);
        assert_eq!(TransportHeader::decode(&ByteView::new(&bytes)).unwrap(), th);
    }

    #[test]
    fn test_th_bad_marker() {
        let bytes = [0u8; TH_LEN];
        assert_eq!(
            TransportHeader::decode(&ByteView::new(&bytes)),
            Err(CodecError::BadMarker(0))
        );
    }

    #[test]
    fn test_rrh_short_and_long_forms() {
        let mut short = sample_rrh();
        short.ph_offset = RRH_SHORT_LEN as u16;
        let mut w = ByteWriter::new();
        short.encode(&mut w);
        assert_eq!(w.len(), RRH_SHORT_LEN);
        let bytes = w.into_vec();
        assert_eq!(RequestHeader::decode(&ByteView::new(&bytes), 0).unwrap(), short);

        let mut long = sample_rrh();
        long.ph_offset = RRH_LEN as u16;
        let mut w = ByteWriter::new();
        long.encode(&mut w);
        assert_eq!(w.len(), RRH_LEN);
        let bytes = w.into_vec();
        assert_eq!(RequestHeader::decode(&ByteView::new(&bytes), 0).unwrap(), long);

        // Long form needs its reserved tail
        assert!(RequestHeader::decode(&ByteView::new(&bytes[..RRH_SHORT_LEN]), 0).is_err());
    }

    #[test]
    fn test_build_and_navigate() {
        let payload = [0x11, 0x22, 0x33, 0x44, 0x55];
        let msg = build_message(42, &sample_rrh(), &payload);

        let parsed = MpcMessage::parse(&msg).unwrap();
        assert_eq!(parsed.th.seq, 42);
        assert_eq!(parsed.th.total_len as usize, msg.len());

        let reqs: Vec<_> = parsed.requests().collect::<Result<_, _>>().unwrap();
        assert_eq!(reqs.len(), 1);
        let req = &reqs[0];
        assert_eq!(req.header.seq, 7);
        assert_eq!(req.header.ack, 3);
        assert_eq!(req.header.data_len, 5);
        assert_eq!(req.first_data().unwrap(), &payload);
        assert!(req.data(1).is_err());
    }

    #[test]
    fn test_chained_requests() {
        // Two short-form RRHs sharing one TH, each with one PH
        let mut w = ByteWriter::new();
        let first = TH_LEN;
        let second = first + RRH_SHORT_LEN + PH_LEN;
        let data = second + RRH_SHORT_LEN + PH_LEN;
        let total = data + 4;
        TransportHeader { seq: 1, rrh_offset: first as u32, total_len: total as u32, block_size: 0, rrh_count: 2 }
            .encode(&mut w);
        for (next, byte_off) in [(second as u32, 0u32), (0, 2)] {
            RequestHeader { next_offset: next, ph_count: 1, ph_offset: RRH_SHORT_LEN as u16, ..sample_rrh() }
                .encode(&mut w);
            ProtocolHeader { loc_class: 1, length: 2, data_offset: data as u32 + byte_off }.encode(&mut w);
        }
        w.put_bytes(&[0xA, 0xB, 0xC, 0xD]);
        let bytes = w.into_vec();

        let msg = MpcMessage::parse(&bytes).unwrap();
        let datas: Vec<_> = msg.requests().map(|r| r.unwrap().first_data().unwrap().to_vec()).collect();
        assert_eq!(datas, vec![vec![0xA, 0xB], vec![0xC, 0xD]]);
    }

    #[test]
    fn test_out_of_bounds_ph_rejected() {
        let mut msg = build_message(1, &sample_rrh(), &[1, 2, 3]);
        // Point the PH past the end of the message
        let ph_off = TH_LEN + RRH_LEN + 4;
        msg[ph_off..ph_off + 4].copy_from_slice(&0x1000u32.to_be_bytes());
        let parsed = MpcMessage::parse(&msg).unwrap();
        let req = parsed.first_request().unwrap();
        assert!(matches!(req.first_data(), Err(CodecError::OutOfBounds { .. })));
    }

    #[test]
    fn test_truncated_message_rejected() {
        let msg = build_message(1, &sample_rrh(), &[1, 2, 3]);
        assert!(matches!(
            MpcMessage::parse(&msg[..msg.len() - 1]),
            Err(CodecError::TruncatedMessage { .. })
        ));
    }
}
