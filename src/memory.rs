//! Guest Storage Access
//!
//! The adapter reaches guest memory only through [`GuestStorage`], which
//! performs the storage-protection check before any byte is moved:
//! - the access key is compared against the 4K frame's storage key
//! - fetches are refused only when the frame is fetch-protected
//! - reference (and for stores, change) bits are updated on success
//!
//! The channel subsystem owns the real implementation. [`MainStorage`] is a
//! self-contained one used by tests and standalone setups.

use parking_lot::{Mutex, RwLock};

/// Guest absolute address
pub type GuestAddr = u64;

/// Storage key granularity
pub const FRAME_SIZE: usize = 4096;
pub const FRAME_SHIFT: usize = 12;

/// Storage key byte layout
pub mod skey {
    /// Access-control bits (high nibble)
    pub const ACC: u8 = 0xF0;
    /// Fetch protection
    pub const FETCH: u8 = 0x08;
    /// Reference bit
    pub const REF: u8 = 0x04;
    /// Change bit
    pub const CHANGE: u8 = 0x02;
}

/// Storage access failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("addressing exception at {0:#x}")]
    Addressing(GuestAddr),

    #[error("protection exception at {addr:#x} (access key {key})")]
    Protection { addr: GuestAddr, key: u8 },
}

/// Keyed access to guest storage
///
/// `key` is the 4-bit access key (0 matches every frame).
pub trait GuestStorage: Send + Sync {
    /// Copy `buf.len()` bytes out of guest storage
    fn fetch(&self, addr: GuestAddr, key: u8, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Copy `data` into guest storage
    fn store(&self, addr: GuestAddr, key: u8, data: &[u8]) -> Result<(), StorageError>;

    fn fetch_u8(&self, addr: GuestAddr, key: u8) -> Result<u8, StorageError> {
        let mut b = [0u8; 1];
        self.fetch(addr, key, &mut b)?;
        Ok(b[0])
    }

    fn store_u8(&self, addr: GuestAddr, key: u8, value: u8) -> Result<(), StorageError> {
        self.store(addr, key, &[value])
    }

    fn fetch_u64(&self, addr: GuestAddr, key: u8) -> Result<u64, StorageError> {
        let mut b = [0u8; 8];
        self.fetch(addr, key, &mut b)?;
        Ok(u64::from_be_bytes(b))
    }
}

#[derive(Debug, Default, Clone)]
pub struct StorageStats {
    pub fetches: u64,
    pub stores: u64,
    pub protection_exceptions: u64,
}

/// Byte-addressed main storage with per-frame storage keys
pub struct MainStorage {
    /// Storage bytes
    bytes: RwLock<Vec<u8>>,
    /// One key byte per 4K frame
    keys: Mutex<Vec<u8>>,
    /// Statistics
    stats: Mutex<StorageStats>,
}

impl MainStorage {
    /// Create zeroed storage of `size` bytes (rounded up to whole frames)
    pub fn new(size: usize) -> Self {
        let frames = (size + FRAME_SIZE - 1) >> FRAME_SHIFT;
        Self {
            bytes: RwLock::new(vec![0u8; frames << FRAME_SHIFT]),
            keys: Mutex::new(vec![0u8; frames]),
            stats: Mutex::new(StorageStats::default()),
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.read().len()
    }

    pub fn stats(&self) -> StorageStats {
        self.stats.lock().clone()
    }

    /// Set the full key byte of the frame containing `addr`
    pub fn set_key(&self, addr: GuestAddr, key_byte: u8) -> Result<(), StorageError> {
        let mut keys = self.keys.lock();
        let frame = (addr as usize) >> FRAME_SHIFT;
        let slot = keys.get_mut(frame).ok_or(StorageError::Addressing(addr))?;
        *slot = key_byte;
        Ok(())
    }

    /// Full key byte of the frame containing `addr`
    pub fn key(&self, addr: GuestAddr) -> Result<u8, StorageError> {
        let keys = self.keys.lock();
        keys.get((addr as usize) >> FRAME_SHIFT)
            .copied()
            .ok_or(StorageError::Addressing(addr))
    }

    fn check_range(&self, addr: GuestAddr, len: usize) -> Result<(), StorageError> {
        let size = self.bytes.read().len() as u64;
        match addr.checked_add(len as u64) {
            Some(end) if end <= size => Ok(()),
            _ => Err(StorageError::Addressing(addr)),
        }
    }

    /// Key-check every frame in the range and update reference/change bits.
    /// Nothing is marked unless the whole range passes.
    fn check_keys(&self, addr: GuestAddr, len: usize, key: u8, store: bool) -> Result<(), StorageError> {
        if len == 0 {
            return Ok(());
        }
        let first = (addr as usize) >> FRAME_SHIFT;
        let last = (addr as usize + len - 1) >> FRAME_SHIFT;
        let mut keys = self.keys.lock();

        for frame in first..=last {
            let k = keys[frame];
            let matches = key == 0 || (k & skey::ACC) >> 4 == key;
            let denied = if store {
                !matches
            } else {
                !matches && (k & skey::FETCH) != 0
            };
            if denied {
                drop(keys);
                self.stats.lock().protection_exceptions += 1;
                let at = if frame == first { addr } else { (frame << FRAME_SHIFT) as u64 };
                return Err(StorageError::Protection { addr: at, key });
            }
        }

        let bits = if store { skey::REF | skey::CHANGE } else { skey::REF };
        for k in &mut keys[first..=last] {
            *k |= bits;
        }
        Ok(())
    }
}

impl GuestStorage for MainStorage {
    fn fetch(&self, addr: GuestAddr, key: u8, buf: &mut [u8]) -> Result<(), StorageError> {
        self.check_range(addr, buf.len())?;
        self.check_keys(addr, buf.len(), key, false)?;
        let bytes = self.bytes.read();
        let start = addr as usize;
        buf.copy_from_slice(&bytes[start..start + buf.len()]);
        self.stats.lock().fetches += 1;
        Ok(())
    }

    fn store(&self, addr: GuestAddr, key: u8, data: &[u8]) -> Result<(), StorageError> {
        self.check_range(addr, data.len())?;
        self.check_keys(addr, data.len(), key, true)?;
        let mut bytes = self.bytes.write();
        let start = addr as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        self.stats.lock().stores += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_store_roundtrip() {
        let mem = MainStorage::new(64 * 1024);
        mem.store(0x2000, 0, b"hello").unwrap();
        let mut buf = [0u8; 5];
        mem.fetch(0x2000, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_addressing_exception() {
        let mem = MainStorage::new(FRAME_SIZE);
        let mut buf = [0u8; 8];
        assert_eq!(
            mem.fetch(FRAME_SIZE as u64 - 4, 0, &mut buf),
            Err(StorageError::Addressing(FRAME_SIZE as u64 - 4))
        );
        assert!(mem.store(u64::MAX - 1, 0, &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_store_protection() {
        let mem = MainStorage::new(4 * FRAME_SIZE);
        mem.set_key(0x1000, 0x30).unwrap();

        assert!(mem.store(0x1000, 3, &[1]).is_ok());
        assert_eq!(
            mem.store(0x1000, 5, &[1]),
            Err(StorageError::Protection { addr: 0x1000, key: 5 })
        );
        // Key 0 is the master key
        assert!(mem.store(0x1000, 0, &[1]).is_ok());
        assert_eq!(mem.stats().protection_exceptions, 1);
    }

    #[test]
    fn test_fetch_protection_only_when_flagged() {
        let mem = MainStorage::new(4 * FRAME_SIZE);
        mem.set_key(0x1000, 0x30).unwrap();
        let mut buf = [0u8; 4];
        assert!(mem.fetch(0x1000, 5, &mut buf).is_ok());

        mem.set_key(0x1000, 0x30 | skey::FETCH).unwrap();
        assert!(mem.fetch(0x1000, 5, &mut buf).is_err());
        assert!(mem.fetch(0x1000, 3, &mut buf).is_ok());
    }

    #[test]
    fn test_reference_and_change_bits() {
        let mem = MainStorage::new(4 * FRAME_SIZE);
        let mut buf = [0u8; 4];
        mem.fetch(0x0, 0, &mut buf).unwrap();
        assert_eq!(mem.key(0x0).unwrap() & (skey::REF | skey::CHANGE), skey::REF);

        // A store straddling two frames marks both
        mem.store(0x1FFE, 0, &[1, 2, 3, 4]).unwrap();
        assert_ne!(mem.key(0x1000).unwrap() & skey::CHANGE, 0);
        assert_ne!(mem.key(0x2000).unwrap() & skey::CHANGE, 0);
    }

    #[test]
    fn test_failed_check_leaves_bits_untouched() {
        let mem = MainStorage::new(4 * FRAME_SIZE);
        mem.set_key(0x2000, 0x70).unwrap();
        assert!(mem.store(0x1FFE, 1, &[0; 4]).is_err());
        assert_eq!(mem.key(0x1000).unwrap() & skey::CHANGE, 0);
    }
}
