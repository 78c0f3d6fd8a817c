//! QDIO queue layout in guest storage
//!
//! ESTABLISH QUEUES hands the adapter a QDR describing the input and output
//! queues. Each queue has a storage list (128 SBAL addresses) and a 128-byte
//! SLSB whose entries say who owns each slot. Every access goes through
//! [`GuestStorage`] with the key the QDR assigned to that structure.

use crate::memory::{GuestAddr, GuestStorage, StorageError};
use crate::mpc::cursor::ByteView;
use crate::mpc::CodecError;

/// Slots per queue
pub const QDIO_SLOTS: usize = 128;
/// Queues per direction
pub const QDIO_MAX_QUEUES: usize = 32;
/// Elements per SBAL
pub const SBALE_COUNT: usize = 16;
pub const SBALE_LEN: usize = 16;
pub const SBAL_LEN: usize = SBALE_COUNT * SBALE_LEN;

const QDR_LEN: usize = 0x40;
const QDES_MIN_LEN: usize = 32;

/// SLSB state codes
pub mod slsb {
    pub const INPUT_EMPTY: u8 = 0x41;
    pub const INPUT_COMPLETED: u8 = 0x82;
    pub const INPUT_ERROR: u8 = 0x8F;
    pub const OUTPUT_PRIMED: u8 = 0x62;
    pub const OUTPUT_COMPLETED: u8 = 0xA1;
    pub const OUTPUT_ERROR: u8 = 0xAF;
}

/// SBALE flag bytes
pub mod sbale {
    pub const LAST_ENTRY: u8 = 0x40;
    pub const FRAG_MASK: u8 = 0x0C;
    pub const FRAG_WHOLE: u8 = 0x00;
    pub const FRAG_FIRST: u8 = 0x04;
    pub const FRAG_MIDDLE: u8 = 0x08;
    pub const FRAG_LAST: u8 = 0x0C;

    /// sflags: PCI request, meaningful on entry 0
    pub const SFLAG_PCI_REQ: u8 = 0x40;
}

/// Bit for queue `n` in an MSB-first queue mask
pub fn queue_bit(n: usize) -> u32 {
    0x8000_0000 >> n
}

/// Mask with one bit per established queue
pub fn all_queues(count: usize) -> u32 {
    match count {
        0 => 0,
        n if n >= QDIO_MAX_QUEUES => u32::MAX,
        n => !(u32::MAX >> n),
    }
}

/// Storage keys assigned to one queue's structures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueKeys {
    pub slib: u8,
    pub sl: u8,
    pub sbal: u8,
    pub slsb: u8,
}

/// One queue as described by the QDR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDescriptor {
    pub slib: GuestAddr,
    pub sl: GuestAddr,
    pub slsb: GuestAddr,
    pub keys: QueueKeys,
}

impl QueueDescriptor {
    fn decode(v: &ByteView<'_>, off: usize) -> Result<Self, CodecError> {
        let k0 = v.u8_at(off + 0x1C)?;
        let k1 = v.u8_at(off + 0x1D)?;
        Ok(Self {
            slib: v.u64_at(off)?,
            sl: v.u64_at(off + 0x08)?,
            slsb: v.u64_at(off + 0x10)?,
            keys: QueueKeys { slib: k0 >> 4, sl: k0 & 0x0F, sbal: k1 >> 4, slsb: k1 & 0x0F },
        })
    }

    pub fn encode(&self) -> [u8; QDES_MIN_LEN] {
        let mut b = [0u8; QDES_MIN_LEN];
        b[0x00..0x08].copy_from_slice(&self.slib.to_be_bytes());
        b[0x08..0x10].copy_from_slice(&self.sl.to_be_bytes());
        b[0x10..0x18].copy_from_slice(&self.slsb.to_be_bytes());
        b[0x1C] = (self.keys.slib << 4) | (self.keys.sl & 0x0F);
        b[0x1D] = (self.keys.sbal << 4) | (self.keys.slsb & 0x0F);
        b
    }

    /// State byte of every slot
    pub fn fetch_slsb(&self, mem: &dyn GuestStorage) -> Result<[u8; QDIO_SLOTS], StorageError> {
        let mut states = [0u8; QDIO_SLOTS];
        mem.fetch(self.slsb, self.keys.slsb, &mut states)?;
        Ok(states)
    }

    pub fn slot_state(&self, mem: &dyn GuestStorage, slot: usize) -> Result<u8, StorageError> {
        mem.fetch_u8(self.slsb + slot as u64, self.keys.slsb)
    }

    pub fn set_slot_state(&self, mem: &dyn GuestStorage, slot: usize, state: u8) -> Result<(), StorageError> {
        mem.store_u8(self.slsb + slot as u64, self.keys.slsb, state)
    }

    /// Address of the SBAL behind `slot`
    pub fn sbal_addr(&self, mem: &dyn GuestStorage, slot: usize) -> Result<GuestAddr, StorageError> {
        mem.fetch_u64(self.sl + (slot * 8) as u64, self.keys.sl)
    }

    pub fn fetch_sbal(&self, mem: &dyn GuestStorage, sbal: GuestAddr) -> Result<[Sbale; SBALE_COUNT], StorageError> {
        let mut raw = [0u8; SBAL_LEN];
        mem.fetch(sbal, self.keys.sbal, &mut raw)?;
        let mut out = [Sbale::default(); SBALE_COUNT];
        for (e, chunk) in out.iter_mut().zip(raw.chunks_exact(SBALE_LEN)) {
            *e = Sbale::decode(chunk);
        }
        Ok(out)
    }

    /// Write back the first `count` elements of an SBAL
    pub fn store_sbales(
        &self,
        mem: &dyn GuestStorage,
        sbal: GuestAddr,
        entries: &[Sbale],
    ) -> Result<(), StorageError> {
        let mut raw = Vec::with_capacity(entries.len() * SBALE_LEN);
        for e in entries {
            raw.extend_from_slice(&e.encode());
        }
        mem.store(sbal, self.keys.sbal, &raw)
    }
}

/// One storage block address list entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sbale {
    pub flags: u8,
    pub sflags: u8,
    pub length: u32,
    pub addr: GuestAddr,
}

impl Sbale {
    pub fn decode(b: &[u8]) -> Self {
        let mut len = [0u8; 4];
        let mut addr = [0u8; 8];
        len.copy_from_slice(&b[4..8]);
        addr.copy_from_slice(&b[8..16]);
        Self { flags: b[0], sflags: b[2], length: u32::from_be_bytes(len), addr: u64::from_be_bytes(addr) }
    }

    pub fn encode(&self) -> [u8; SBALE_LEN] {
        let mut b = [0u8; SBALE_LEN];
        b[0] = self.flags;
        b[2] = self.sflags;
        b[4..8].copy_from_slice(&self.length.to_be_bytes());
        b[8..16].copy_from_slice(&self.addr.to_be_bytes());
        b
    }

    pub fn fragment(&self) -> u8 {
        self.flags & sbale::FRAG_MASK
    }

    pub fn is_last_entry(&self) -> bool {
        self.flags & sbale::LAST_ENTRY != 0
    }
}

/// Queue Description Record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qdr {
    pub qib: GuestAddr,
    pub input: Vec<QueueDescriptor>,
    pub output: Vec<QueueDescriptor>,
}

impl Qdr {
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let v = ByteView::new(data);
        v.slice(0, QDR_LEN)?;
        let iqdcnt = v.u8_at(0x07)? as usize;
        let iqdsz = Self::stride(v.u8_at(0x09)?);
        let oqdcnt = v.u8_at(0x0B)? as usize;
        let oqdsz = Self::stride(v.u8_at(0x0D)?);
        if iqdcnt > QDIO_MAX_QUEUES || oqdcnt > QDIO_MAX_QUEUES {
            return Err(CodecError::OutOfBounds { offset: 0x07, len: iqdcnt.max(oqdcnt) });
        }

        let mut off = QDR_LEN;
        let mut input = Vec::with_capacity(iqdcnt);
        for _ in 0..iqdcnt {
            input.push(QueueDescriptor::decode(&v, off)?);
            off += iqdsz;
        }
        let mut output = Vec::with_capacity(oqdcnt);
        for _ in 0..oqdcnt {
            output.push(QueueDescriptor::decode(&v, off)?);
            off += oqdsz;
        }
        Ok(Self { qib: v.u64_at(0x20)?, input, output })
    }

    /// Descriptor size is given in words
    fn stride(words: u8) -> usize {
        ((words as usize) << 2).max(QDES_MIN_LEN)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut b = vec![0u8; QDR_LEN];
        b[0x07] = self.input.len() as u8;
        b[0x09] = (QDES_MIN_LEN / 4) as u8;
        b[0x0B] = self.output.len() as u8;
        b[0x0D] = (QDES_MIN_LEN / 4) as u8;
        b[0x20..0x28].copy_from_slice(&self.qib.to_be_bytes());
        for q in self.input.iter().chain(self.output.iter()) {
            b.extend_from_slice(&q.encode());
        }
        b
    }
}
