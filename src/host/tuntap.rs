//! Linux TUN/TAP backend
//!
//! Layer 3 groups get a TUN device (bare IP packets), layer 2 groups a TAP
//! device (Ethernet frames). Both are opened non-blocking without packet
//! information headers, so one read yields exactly one datagram.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{HostFactory, HostInterface, HostSettings};
use crate::net::{Layer, MacAddr};

const TUN_DEVICE: &str = "/dev/net/tun";

const TUNSETIFF: libc::c_ulong = 0x4004_54CA;
const IFF_TUN: libc::c_short = 0x0001;
const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;

const ARPHRD_ETHER: libc::sa_family_t = 1;

#[repr(C)]
#[derive(Clone, Copy)]
union IfrData {
    flags: libc::c_short,
    mtu: libc::c_int,
    ifindex: libc::c_int,
    addr: libc::sockaddr,
    _pad: [u8; 24],
}

/// `struct ifreq`
#[repr(C)]
struct IfReq {
    name: [libc::c_char; libc::IFNAMSIZ],
    data: IfrData,
}

impl IfReq {
    fn new(name: &str) -> io::Result<Self> {
        if name.len() >= libc::IFNAMSIZ {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "interface name too long"));
        }
        let mut req = Self { name: [0; libc::IFNAMSIZ], data: IfrData { _pad: [0; 24] } };
        for (dst, src) in req.name.iter_mut().zip(name.bytes()) {
            *dst = src as libc::c_char;
        }
        Ok(req)
    }

    fn name(&self) -> String {
        let bytes: Vec<u8> = self.name.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// `struct in6_ifreq`
#[repr(C)]
struct In6IfReq {
    addr: libc::in6_addr,
    prefixlen: u32,
    ifindex: libc::c_int,
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn socket(family: libc::c_int) -> io::Result<OwnedFd> {
    // SAFETY: plain socket(2); the descriptor is owned from here on
    let fd = cvt(unsafe { libc::socket(family, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) })?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn ioctl<T>(fd: RawFd, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
    // SAFETY: `arg` is a live, correctly laid out request structure
    cvt(unsafe { libc::ioctl(fd, request as _, arg as *mut T) }).map(|_| ())
}

fn sockaddr_v4(addr: Ipv4Addr) -> libc::sockaddr {
    let sin = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: 0,
        sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(addr.octets()) },
        sin_zero: [0; 8],
    };
    // SAFETY: sockaddr_in and sockaddr have the same size on Linux
    unsafe { mem::transmute::<libc::sockaddr_in, libc::sockaddr>(sin) }
}

fn prefix_mask_v4(prefix: u8) -> Ipv4Addr {
    let bits = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix.min(32) as u32) };
    Ipv4Addr::from(bits)
}

/// An open TUN or TAP device
pub struct TunTap {
    file: File,
    name: String,
    layer: Layer,
    /// AF_INET socket used for interface ioctls
    ctl: OwnedFd,
    enabled: AtomicBool,
}

impl TunTap {
    pub fn open(settings: &HostSettings) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(TUN_DEVICE)?;

        let mut req = IfReq::new(settings.ifname.as_deref().unwrap_or(""))?;
        req.data.flags = IFF_NO_PI
            | match settings.layer {
                Layer::Layer2 => IFF_TAP,
                Layer::Layer3 => IFF_TUN,
            };
        ioctl(file.as_raw_fd(), TUNSETIFF, &mut req)?;

        let tt = Self {
            file,
            name: req.name(),
            layer: settings.layer,
            ctl: socket(libc::AF_INET)?,
            enabled: AtomicBool::new(false),
        };
        log::debug!("opened {} as {} device", tt.name, if tt.layer == Layer::Layer2 { "TAP" } else { "TUN" });
        Ok(tt)
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    fn ifreq(&self) -> io::Result<IfReq> {
        IfReq::new(&self.name)
    }

    fn ifindex(&self) -> io::Result<libc::c_int> {
        let mut req = self.ifreq()?;
        ioctl(self.ctl.as_raw_fd(), libc::SIOCGIFINDEX as libc::c_ulong, &mut req)?;
        // SAFETY: SIOCGIFINDEX fills the ifindex member
        Ok(unsafe { req.data.ifindex })
    }
}

impl HostInterface for TunTap {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }

    fn send(&self, data: &[u8]) -> io::Result<usize> {
        (&self.file).write(data)
    }

    fn set_enabled(&self, up: bool) -> io::Result<()> {
        let fd = self.ctl.as_raw_fd();
        let mut req = self.ifreq()?;
        ioctl(fd, libc::SIOCGIFFLAGS as libc::c_ulong, &mut req)?;
        let updown = (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
        // SAFETY: SIOCGIFFLAGS filled the flags member
        unsafe {
            if up {
                req.data.flags |= updown;
            } else {
                req.data.flags &= !updown;
            }
        }
        ioctl(fd, libc::SIOCSIFFLAGS as libc::c_ulong, &mut req)?;
        self.enabled.store(up, Ordering::SeqCst);
        log::info!("host interface {} {}", self.name, if up { "up" } else { "down" });
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn mtu(&self) -> io::Result<u32> {
        let mut req = self.ifreq()?;
        ioctl(self.ctl.as_raw_fd(), libc::SIOCGIFMTU as libc::c_ulong, &mut req)?;
        // SAFETY: SIOCGIFMTU fills the mtu member
        Ok(unsafe { req.data.mtu } as u32)
    }

    fn set_mtu(&self, mtu: u32) -> io::Result<()> {
        let mut req = self.ifreq()?;
        req.data.mtu = mtu as libc::c_int;
        ioctl(self.ctl.as_raw_fd(), libc::SIOCSIFMTU as libc::c_ulong, &mut req)
    }

    fn hw_addr(&self) -> io::Result<MacAddr> {
        let mut req = self.ifreq()?;
        ioctl(self.ctl.as_raw_fd(), libc::SIOCGIFHWADDR as libc::c_ulong, &mut req)?;
        // SAFETY: SIOCGIFHWADDR fills the addr member
        let data = unsafe { req.data.addr.sa_data };
        let mut mac = [0u8; 6];
        for (dst, src) in mac.iter_mut().zip(data.iter()) {
            *dst = *src as u8;
        }
        Ok(MacAddr(mac))
    }

    fn set_hw_addr(&self, mac: MacAddr) -> io::Result<()> {
        let mut req = self.ifreq()?;
        // SAFETY: writing plain-old-data into the addr member
        unsafe {
            req.data.addr.sa_family = ARPHRD_ETHER;
            for (dst, src) in req.data.addr.sa_data.iter_mut().zip(mac.as_bytes()) {
                *dst = *src as libc::c_char;
            }
        }
        ioctl(self.ctl.as_raw_fd(), libc::SIOCSIFHWADDR as libc::c_ulong, &mut req)
    }

    fn add_ipv4(&self, addr: Ipv4Addr, prefix: u8) -> io::Result<()> {
        let fd = self.ctl.as_raw_fd();
        let mut req = self.ifreq()?;
        req.data.addr = sockaddr_v4(addr);
        ioctl(fd, libc::SIOCSIFADDR as libc::c_ulong, &mut req)?;

        let mut req = self.ifreq()?;
        req.data.addr = sockaddr_v4(prefix_mask_v4(prefix));
        ioctl(fd, libc::SIOCSIFNETMASK as libc::c_ulong, &mut req)
    }

    fn add_ipv6(&self, addr: Ipv6Addr, prefix: u8) -> io::Result<()> {
        let sock = socket(libc::AF_INET6)?;
        let mut req = In6IfReq {
            addr: libc::in6_addr { s6_addr: addr.octets() },
            prefixlen: prefix as u32,
            ifindex: self.ifindex()?,
        };
        ioctl(sock.as_raw_fd(), libc::SIOCSIFADDR as libc::c_ulong, &mut req)
    }
}

/// Opens a fresh TUN/TAP device per request
#[derive(Debug, Default)]
pub struct TunTapFactory;

impl HostFactory for TunTapFactory {
    fn create(&self, settings: &HostSettings) -> io::Result<Arc<dyn HostInterface>> {
        Ok(Arc::new(TunTap::open(settings)?))
    }
}
