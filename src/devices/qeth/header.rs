//! Adapter headers in front of every packet on the data queues
//!
//! Both formats are 32 bytes. Layer 3 headers carry the cast type and the
//! destination address; layer 2 headers only the cast type and length.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::QueueError;
use crate::net::Layer;

pub const HDR_LEN: usize = 32;

/// Header id byte
pub mod hdr_id {
    pub const LAYER3: u8 = 0x01;
    pub const LAYER2: u8 = 0x02;
    pub const TSO: u8 = 0x03;
    pub const OSN: u8 = 0x04;
}

/// Layer 3 flag byte
pub mod l3_flags {
    pub const CAST_NONE: u8 = 0x00;
    pub const CAST_MULTICAST: u8 = 0x04;
    pub const CAST_BROADCAST: u8 = 0x05;
    pub const CAST_UNICAST: u8 = 0x06;
    pub const CAST_MASK: u8 = 0x07;
    pub const IPV6: u8 = 0x80;
}

/// Layer 2 cast byte
pub mod l2_cast {
    pub const MULTICAST: u8 = 0x01;
    pub const BROADCAST: u8 = 0x02;
    pub const UNICAST: u8 = 0x04;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L3Cast {
    None,
    Unicast,
    Multicast,
    Broadcast,
}

impl L3Cast {
    fn flag(self) -> u8 {
        match self {
            L3Cast::None => l3_flags::CAST_NONE,
            L3Cast::Unicast => l3_flags::CAST_UNICAST,
            L3Cast::Multicast => l3_flags::CAST_MULTICAST,
            L3Cast::Broadcast => l3_flags::CAST_BROADCAST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2Cast {
    Unicast,
    Multicast,
    Broadcast,
}

impl L2Cast {
    fn byte(self) -> u8 {
        match self {
            L2Cast::Unicast => l2_cast::UNICAST,
            L2Cast::Multicast => l2_cast::MULTICAST,
            L2Cast::Broadcast => l2_cast::BROADCAST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterHeader {
    Layer3 { flags: u8, length: u16, dest: [u8; 16] },
    Layer2 { cast: u8, length: u16 },
}

impl AdapterHeader {
    /// Inbound layer 3 header for a packet of `length` bytes
    pub fn layer3(cast: L3Cast, dest: IpAddr, length: u16) -> Self {
        let mut d = [0u8; 16];
        let mut flags = cast.flag();
        match dest {
            IpAddr::V4(a) => d[12..].copy_from_slice(&a.octets()),
            IpAddr::V6(a) => {
                d.copy_from_slice(&a.octets());
                flags |= l3_flags::IPV6;
            }
        }
        AdapterHeader::Layer3 { flags, length, dest: d }
    }

    pub fn layer2(cast: L2Cast, length: u16) -> Self {
        AdapterHeader::Layer2 { cast: cast.byte(), length }
    }

    /// Parse an outbound header, accepting only the format of `layer`
    pub fn parse(bytes: &[u8], layer: Layer) -> Result<Self, QueueError> {
        if bytes.len() < HDR_LEN {
            return Err(QueueError::LengthMismatch);
        }
        let id = bytes[0];
        match (id, layer) {
            (hdr_id::LAYER3, Layer::Layer3) => {
                let mut dest = [0u8; 16];
                dest.copy_from_slice(&bytes[0x10..0x20]);
                Ok(AdapterHeader::Layer3 {
                    flags: bytes[0x01],
                    length: u16::from_be_bytes([bytes[0x08], bytes[0x09]]),
                    dest,
                })
            }
            (hdr_id::LAYER2, Layer::Layer2) => Ok(AdapterHeader::Layer2 {
                cast: bytes[0x03],
                length: u16::from_be_bytes([bytes[0x06], bytes[0x07]]),
            }),
            _ => Err(QueueError::UnsupportedHeader(id)),
        }
    }

    pub fn encode(&self) -> [u8; HDR_LEN] {
        let mut b = [0u8; HDR_LEN];
        match *self {
            AdapterHeader::Layer3 { flags, length, dest } => {
                b[0] = hdr_id::LAYER3;
                b[0x01] = flags;
                b[0x08..0x0A].copy_from_slice(&length.to_be_bytes());
                b[0x10..0x20].copy_from_slice(&dest);
            }
            AdapterHeader::Layer2 { cast, length } => {
                b[0] = hdr_id::LAYER2;
                b[0x03] = cast;
                b[0x06..0x08].copy_from_slice(&length.to_be_bytes());
            }
        }
        b
    }

    /// Payload length following the header
    pub fn length(&self) -> usize {
        match self {
            AdapterHeader::Layer3 { length, .. } | AdapterHeader::Layer2 { length, .. } => *length as usize,
        }
    }

    /// Destination carried by a layer 3 header
    pub fn dest(&self) -> Option<IpAddr> {
        match self {
            AdapterHeader::Layer3 { flags, dest, .. } => Some(if flags & l3_flags::IPV6 != 0 {
                IpAddr::V6(Ipv6Addr::from(*dest))
            } else {
                IpAddr::V4(Ipv4Addr::new(dest[12], dest[13], dest[14], dest[15]))
            }),
            AdapterHeader::Layer2 { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer3_v4_layout() {
        let hdr = AdapterHeader::layer3(L3Cast::Unicast, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 84);
        let b = hdr.encode();
        assert_eq!(b[0], hdr_id::LAYER3);
        assert_eq!(b[1], l3_flags::CAST_UNICAST);
        assert_eq!(&b[8..10], &[0, 84]);
        assert_eq!(&b[28..32], &[10, 0, 0, 2]);
        let back = AdapterHeader::parse(&b, Layer::Layer3).unwrap();
        assert_eq!(back, hdr);
        assert_eq!(back.dest(), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));
    }

    #[test]
    fn test_layer3_v6_flag() {
        let dst: Ipv6Addr = "ff02::1".parse().unwrap();
        let hdr = AdapterHeader::layer3(L3Cast::Multicast, IpAddr::V6(dst), 100);
        let b = hdr.encode();
        assert_eq!(b[1], l3_flags::IPV6 | l3_flags::CAST_MULTICAST);
        assert_eq!(AdapterHeader::parse(&b, Layer::Layer3).unwrap().dest(), Some(IpAddr::V6(dst)));
    }

    #[test]
    fn test_layer2_layout() {
        let b = AdapterHeader::layer2(L2Cast::Broadcast, 60).encode();
        assert_eq!(b[0], hdr_id::LAYER2);
        assert_eq!(b[3], l2_cast::BROADCAST);
        assert_eq!(&b[6..8], &[0, 60]);
        assert_eq!(AdapterHeader::parse(&b, Layer::Layer2).unwrap().length(), 60);
    }

    #[test]
    fn test_wrong_or_unknown_header() {
        let l2 = AdapterHeader::layer2(L2Cast::Unicast, 60).encode();
        assert_eq!(AdapterHeader::parse(&l2, Layer::Layer3), Err(QueueError::UnsupportedHeader(hdr_id::LAYER2)));
        let mut tso = [0u8; HDR_LEN];
        tso[0] = hdr_id::TSO;
        assert_eq!(AdapterHeader::parse(&tso, Layer::Layer2), Err(QueueError::UnsupportedHeader(hdr_id::TSO)));
        assert_eq!(AdapterHeader::parse(&tso[..10], Layer::Layer2), Err(QueueError::LengthMismatch));
    }
}
