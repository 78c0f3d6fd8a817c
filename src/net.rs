//! Link-level address handling
//!
//! MAC address type shared by the IPA tables, the inbound frame filter and
//! the host interface backends.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ethernet MAC address (6 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);
    pub const ZERO: MacAddr = MacAddr([0x00; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Read from the first 6 bytes of `bytes`
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 6] = bytes.get(..6)?.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// 8-byte interface identifier derived from this address (EUI-64 style)
    pub fn interface_id(&self) -> [u8; 8] {
        let m = &self.0;
        [m[0] ^ 0x02, m[1], m[2], 0xFF, 0xFE, m[3], m[4], m[5]]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 6];
        let mut parts = s.split(|c| c == ':' || c == '-');
        for byte in out.iter_mut() {
            let part = parts.next().ok_or_else(|| format!("MAC address too short: {}", s))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| format!("invalid MAC address octet '{}' in {}", part, s))?;
        }
        if parts.next().is_some() {
            return Err(format!("MAC address too long: {}", s));
        }
        Ok(Self(out))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Frame format exchanged with the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    /// Ethernet frames (host side is a TAP)
    Layer2,
    /// Bare IP packets (host side is a TUN)
    Layer3,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Layer::Layer2 => write!(f, "L2"),
            Layer::Layer3 => write!(f, "L3"),
        }
    }
}

/// EtherType values seen by the adapter
pub mod ethertype {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
    pub const IPV6: u16 = 0x86DD;
}

/// Ethernet II header length
pub const ETH_HLEN: usize = 14;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "02:00:5e:AA:0b:01".parse().unwrap();
        assert_eq!(mac.0, [0x02, 0x00, 0x5E, 0xAA, 0x0B, 0x01]);
        assert_eq!(mac.to_string(), "02:00:5e:aa:0b:01");
        assert_eq!("02-00-5e-aa-0b-01".parse::<MacAddr>().unwrap(), mac);
    }

    #[test]
    fn test_mac_parse_rejects_bad_input() {
        assert!("02:00:5e".parse::<MacAddr>().is_err());
        assert!("02:00:5e:aa:0b:01:ff".parse::<MacAddr>().is_err());
        assert!("zz:00:5e:aa:0b:01".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_mac_cast_classes() {
        assert!(MacAddr::BROADCAST.is_broadcast());
        assert!(MacAddr::BROADCAST.is_multicast());
        assert!(MacAddr::new([0x01, 0x00, 0x5E, 0, 0, 1]).is_multicast());
        assert!(MacAddr::new([0x52, 0x54, 0, 0x12, 0x34, 0x56]).is_unicast());
    }

    #[test]
    fn test_interface_id() {
        let mac = MacAddr::new([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(mac.interface_id(), [0x00, 0x11, 0x22, 0xFF, 0xFE, 0x33, 0x44, 0x55]);
    }
}
