//! Host Network Endpoints
//!
//! The adapter talks to the host network through one [`HostInterface`] per
//! group: a TUN device in layer 3 mode, a TAP device in layer 2 mode. The
//! interface is created lazily by a [`HostFactory`] on the first ULP_ENABLE.

pub mod memory;
#[cfg(feature = "tuntap")]
pub mod tuntap;

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::net::{Layer, MacAddr};

pub use memory::{MemoryFactory, MemoryInterface};
#[cfg(feature = "tuntap")]
pub use tuntap::{TunTap, TunTapFactory};

/// One host-side datagram endpoint
///
/// All methods take `&self`: the worker thread reads and writes while the
/// CCW path toggles link state.
pub trait HostInterface: Send + Sync {
    fn name(&self) -> &str;

    /// Descriptor to poll for readability, if there is one
    fn raw_fd(&self) -> Option<RawFd>;

    /// Read one datagram. Returns `WouldBlock` when nothing is queued.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write one fully formed datagram
    fn send(&self, data: &[u8]) -> io::Result<usize>;

    fn set_enabled(&self, up: bool) -> io::Result<()>;
    fn is_enabled(&self) -> bool;

    fn mtu(&self) -> io::Result<u32>;
    fn set_mtu(&self, mtu: u32) -> io::Result<()>;

    fn hw_addr(&self) -> io::Result<MacAddr>;
    fn set_hw_addr(&self, mac: MacAddr) -> io::Result<()>;

    fn add_ipv4(&self, addr: Ipv4Addr, prefix: u8) -> io::Result<()>;
    fn add_ipv6(&self, addr: Ipv6Addr, prefix: u8) -> io::Result<()>;
}

/// What to create and what to push into it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSettings {
    pub ifname: Option<String>,
    pub layer: Layer,
    pub mtu: Option<u32>,
    pub mac: Option<MacAddr>,
    pub ipv4: Option<(Ipv4Addr, u8)>,
    pub ipv6: Option<(Ipv6Addr, u8)>,
}

/// Creates host interfaces on demand
pub trait HostFactory: Send + Sync {
    fn create(&self, settings: &HostSettings) -> io::Result<Arc<dyn HostInterface>>;
}

/// Create an interface and push the configured parameters into it
pub fn open(factory: &dyn HostFactory, settings: &HostSettings) -> io::Result<Arc<dyn HostInterface>> {
    let host = factory.create(settings)?;
    if let Some(mtu) = settings.mtu {
        host.set_mtu(mtu)?;
    }
    if let (Layer::Layer2, Some(mac)) = (settings.layer, settings.mac) {
        host.set_hw_addr(mac)?;
    }
    if let Some((addr, prefix)) = settings.ipv4 {
        host.add_ipv4(addr, prefix)?;
    }
    if let Some((addr, prefix)) = settings.ipv6 {
        host.add_ipv6(addr, prefix)?;
    }
    log::info!("host interface {} created ({})", host.name(), settings.layer);
    Ok(host)
}
