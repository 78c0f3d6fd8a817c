//! Adapter Configuration
//!
//! One [`QethConfig`] describes one 3-device QETH group. It is normally read
//! from a TOML file:
//!
//! ```toml
//! devnum = 0x0A00
//! ifname = "tap0"
//! mac = "02:00:00:00:0a:00"
//! mtu = 1500
//! ipv4 = "192.168.200.1"
//! ipv4_prefix = 24
//! ```

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QethError, QethResult};
use crate::net::MacAddr;

/// Smallest MTU the adapter accepts
pub const MIN_MTU: u32 = 576;
/// Largest MTU the adapter accepts
pub const MAX_MTU: u32 = 65535;

/// QETH group configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QethConfig {
    /// Read device number; write is +1, data is +2
    pub devnum: u16,
    /// Host interface name (kernel picks one when unset)
    pub ifname: Option<String>,
    pub mac: Option<MacAddr>,
    pub mtu: Option<u32>,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv4_prefix: u8,
    pub ipv6: Option<Ipv6Addr>,
    pub ipv6_prefix: u8,
    /// The single port this adapter answers IDX activation for
    pub port: u8,
    pub poll_timeout_ms: u64,
    pub halt_timeout_ms: u64,
    pub input_packing: bool,
    pub output_packing: bool,
    /// Largest single packet the queue engine moves
    pub max_packet: usize,
    /// Verbose per-group logging
    pub debug: bool,
}

impl Default for QethConfig {
    fn default() -> Self {
        Self {
            devnum: 0x0A00,
            ifname: None,
            mac: None,
            mtu: None,
            ipv4: None,
            ipv4_prefix: 24,
            ipv6: None,
            ipv6_prefix: 64,
            port: 0,
            poll_timeout_ms: 10,
            halt_timeout_ms: 2000,
            input_packing: false,
            output_packing: false,
            max_packet: 65535,
            debug: false,
        }
    }
}

impl QethConfig {
    pub fn from_toml_str(s: &str) -> QethResult<Self> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> QethResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> QethResult<String> {
        toml::to_string(self).map_err(|e| QethError::Config(e.to_string()))
    }

    pub fn validate(&self) -> QethResult<()> {
        if self.devnum > 0xFFFD {
            return Err(QethError::Config(format!(
                "device number {:04X} leaves no room for the write and data devices",
                self.devnum
            )));
        }
        if let Some(mtu) = self.mtu {
            if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
                return Err(QethError::Config(format!("MTU {} outside {}..={}", mtu, MIN_MTU, MAX_MTU)));
            }
        }
        if let Some(mac) = self.mac {
            if mac.is_multicast() || mac.is_zero() {
                return Err(QethError::Config(format!("MAC {} is not a unicast address", mac)));
            }
        }
        if self.ipv4_prefix > 32 {
            return Err(QethError::Config(format!("IPv4 prefix /{} too long", self.ipv4_prefix)));
        }
        if self.ipv6_prefix > 128 {
            return Err(QethError::Config(format!("IPv6 prefix /{} too long", self.ipv6_prefix)));
        }
        if self.port > 0x0F {
            return Err(QethError::Config(format!("port {} out of range", self.port)));
        }
        if self.poll_timeout_ms == 0 {
            return Err(QethError::Config("poll_timeout_ms must be non-zero".into()));
        }
        if self.max_packet < 64 || self.max_packet > 65535 {
            return Err(QethError::Config(format!("max_packet {} outside 64..=65535", self.max_packet)));
        }
        if let Some(name) = &self.ifname {
            // IFNAMSIZ includes the terminating NUL
            if name.is_empty() || name.len() >= 16 {
                return Err(QethError::Config(format!("interface name '{}' invalid", name)));
            }
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn halt_timeout(&self) -> Duration {
        Duration::from_millis(self.halt_timeout_ms)
    }

    pub fn write_devnum(&self) -> u16 {
        self.devnum.wrapping_add(1)
    }

    pub fn data_devnum(&self) -> u16 {
        self.devnum.wrapping_add(2)
    }
}
