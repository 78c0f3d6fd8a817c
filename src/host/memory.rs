//! In-memory host interface
//!
//! Stands in for a TUN/TAP device: datagrams injected with
//! [`MemoryInterface::inject`] are what the adapter receives, and everything
//! the adapter sends is captured for inspection.

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{HostFactory, HostInterface, HostSettings};
use crate::net::MacAddr;

pub struct MemoryInterface {
    name: String,
    inbound: Mutex<VecDeque<Vec<u8>>>,
    outbound: Mutex<Vec<Vec<u8>>>,
    enabled: AtomicBool,
    mtu: AtomicU32,
    mac: Mutex<MacAddr>,
    ipv4: Mutex<Vec<(Ipv4Addr, u8)>>,
    ipv6: Mutex<Vec<(Ipv6Addr, u8)>>,
    /// Make every send fail with an I/O error
    fail_sends: AtomicBool,
    /// Make every receive fail with an I/O error
    fail_recvs: AtomicBool,
}

impl MemoryInterface {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inbound: Mutex::new(VecDeque::new()),
            outbound: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(false),
            mtu: AtomicU32::new(1500),
            mac: Mutex::new(MacAddr::new([0x02, 0x00, 0x5E, 0x10, 0x00, 0x01])),
            ipv4: Mutex::new(Vec::new()),
            ipv6: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            fail_recvs: AtomicBool::new(false),
        }
    }

    /// Queue a datagram for the adapter to receive
    pub fn inject(&self, datagram: &[u8]) {
        self.inbound.lock().push_back(datagram.to_vec());
    }

    /// Queue several datagrams at once, so the adapter never sees a partial batch
    pub fn inject_all(&self, datagrams: &[&[u8]]) {
        self.inbound.lock().extend(datagrams.iter().map(|d| d.to_vec()));
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbound.lock().len()
    }

    /// Drain everything the adapter has sent so far
    pub fn take_outbound(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.outbound.lock())
    }

    pub fn outbound_count(&self) -> usize {
        self.outbound.lock().len()
    }

    /// Poll until at least `n` datagrams were sent or `timeout` passes
    pub fn wait_outbound(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.outbound_count() >= n {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Poll until the inbound queue is empty or `timeout` passes
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending_inbound() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        true
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_recvs(&self, fail: bool) {
        self.fail_recvs.store(fail, Ordering::SeqCst);
    }

    pub fn ipv4_addrs(&self) -> Vec<(Ipv4Addr, u8)> {
        self.ipv4.lock().clone()
    }

    pub fn ipv6_addrs(&self) -> Vec<(Ipv6Addr, u8)> {
        self.ipv6.lock().clone()
    }
}

impl HostInterface for MemoryInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw_fd(&self) -> Option<RawFd> {
        None
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail_recvs.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "receive failure injected"));
        }
        let datagram = self
            .inbound
            .lock()
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
        // Datagram semantics: the tail of an oversized datagram is lost
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(n)
    }

    fn send(&self, data: &[u8]) -> io::Result<usize> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "send failure injected"));
        }
        self.outbound.lock().push(data.to_vec());
        Ok(data.len())
    }

    fn set_enabled(&self, up: bool) -> io::Result<()> {
        self.enabled.store(up, Ordering::SeqCst);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn mtu(&self) -> io::Result<u32> {
        Ok(self.mtu.load(Ordering::SeqCst))
    }

    fn set_mtu(&self, mtu: u32) -> io::Result<()> {
        self.mtu.store(mtu, Ordering::SeqCst);
        Ok(())
    }

    fn hw_addr(&self) -> io::Result<MacAddr> {
        Ok(*self.mac.lock())
    }

    fn set_hw_addr(&self, mac: MacAddr) -> io::Result<()> {
        *self.mac.lock() = mac;
        Ok(())
    }

    fn add_ipv4(&self, addr: Ipv4Addr, prefix: u8) -> io::Result<()> {
        self.ipv4.lock().push((addr, prefix));
        Ok(())
    }

    fn add_ipv6(&self, addr: Ipv6Addr, prefix: u8) -> io::Result<()> {
        self.ipv6.lock().push((addr, prefix));
        Ok(())
    }
}

/// Hands out one shared [`MemoryInterface`]
pub struct MemoryFactory {
    iface: Arc<MemoryInterface>,
    created: AtomicUsize,
    last_settings: Mutex<Option<HostSettings>>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self::with_interface(Arc::new(MemoryInterface::new("mem0")))
    }

    pub fn with_interface(iface: Arc<MemoryInterface>) -> Self {
        Self { iface, created: AtomicUsize::new(0), last_settings: Mutex::new(None) }
    }

    pub fn interface(&self) -> Arc<MemoryInterface> {
        self.iface.clone()
    }

    /// Number of `create` calls so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn last_settings(&self) -> Option<HostSettings> {
        self.last_settings.lock().clone()
    }
}

impl Default for MemoryFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl HostFactory for MemoryFactory {
    fn create(&self, settings: &HostSettings) -> io::Result<Arc<dyn HostInterface>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        *self.last_settings.lock() = Some(settings.clone());
        Ok(self.iface.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recv_would_block_when_empty() {
        let iface = MemoryInterface::new("mem0");
        let mut buf = [0u8; 64];
        let err = iface.recv(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_inject_and_capture() {
        let iface = MemoryInterface::new("mem0");
        iface.inject(&[1, 2, 3, 4]);
        let mut buf = [0u8; 2];
        assert_eq!(iface.recv(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(iface.pending_inbound(), 0);

        iface.send(&[9, 9]).unwrap();
        assert_eq!(iface.take_outbound(), vec![vec![9, 9]]);
        assert_eq!(iface.outbound_count(), 0);

        iface.set_fail_sends(true);
        assert!(iface.send(&[1]).is_err());
    }
}
