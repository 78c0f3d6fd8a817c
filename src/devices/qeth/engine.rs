//! QDIO queue engine
//!
//! Moves packets between guest queues and the host interface. Runs only on
//! the group's worker thread, which is the only place the adapter side of
//! the SLSB transitions happens:
//! - output: PRIMED -> COMPLETED (or ERROR)
//! - input: EMPTY -> COMPLETED (or ERROR)
//!
//! Queues are visited round-robin starting after the last one served, and
//! slots within a queue starting at the queue's remembered position.

use std::io;
use std::sync::Arc;

use crate::error::QueueError;
use crate::host::HostInterface;
use crate::memory::GuestStorage;
use crate::net::Layer;

use super::filter::{InboundFilter, Verdict};
use super::header::{AdapterHeader, HDR_LEN};
use super::qdio::{
    all_queues, queue_bit, sbale, slsb, QueueDescriptor, Sbale, QDIO_MAX_QUEUES, QDIO_SLOTS, SBALE_COUNT,
};
use super::stats::QethStats;

/// Direction of a queue or a packing switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Per-direction ring state
#[derive(Debug, Clone)]
struct Ring {
    queues: Vec<QueueDescriptor>,
    mask: u32,
    /// Next queue to visit
    qpos: usize,
    /// Next slot to look at, per queue
    bpos: [usize; QDIO_MAX_QUEUES],
    packing: bool,
}

impl Ring {
    fn new(queues: Vec<QueueDescriptor>, packing: bool) -> Self {
        Self { mask: 0, qpos: 0, bpos: [0; QDIO_MAX_QUEUES], queues, packing }
    }

    /// Replace the active mask, restarting queues that were inactive
    fn set_mask(&mut self, mask: u32) {
        let mask = mask & all_queues(self.queues.len());
        if mask == self.mask {
            return;
        }
        for n in 0..self.queues.len() {
            if self.mask & queue_bit(n) == 0 {
                self.bpos[n] = 0;
            }
        }
        if self.mask == 0 {
            self.qpos = 0;
        }
        self.mask = mask;
    }

    /// Active queues in visiting order
    fn visit_order(&self) -> Vec<usize> {
        let count = self.queues.len();
        (0..count)
            .map(|i| (self.qpos + i) % count)
            .filter(|&q| self.mask & queue_bit(q) != 0)
            .collect()
    }
}

pub struct QueueEngine {
    tag: String,
    storage: Arc<dyn GuestStorage>,
    layer: Layer,
    max_packet: usize,
    input: Ring,
    output: Ring,
    /// Inbound unit (header + packet) that did not fit the previous slot
    carry: Option<Vec<u8>>,
    rxbuf: Vec<u8>,
    stats: Arc<QethStats>,
}

impl QueueEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tag: String,
        storage: Arc<dyn GuestStorage>,
        layer: Layer,
        input: Vec<QueueDescriptor>,
        output: Vec<QueueDescriptor>,
        max_packet: usize,
        packing: (bool, bool),
        stats: Arc<QethStats>,
    ) -> Self {
        let mut engine = Self {
            tag,
            storage,
            layer,
            max_packet,
            input: Ring::new(input, packing.0),
            output: Ring::new(output, packing.1),
            carry: None,
            rxbuf: vec![0u8; max_packet],
            stats,
        };
        // Every established queue starts out active
        engine.input.mask = all_queues(engine.input.queues.len());
        engine.output.mask = all_queues(engine.output.queues.len());
        engine
    }

    pub fn set_mask(&mut self, dir: Direction, mask: u32) {
        let ring = self.ring_mut(dir);
        ring.set_mask(mask);
        log::debug!("{} {:?} queue mask now {:08X}", self.tag, dir, self.ring(dir).mask);
    }

    pub fn mask(&self, dir: Direction) -> u32 {
        self.ring(dir).mask
    }

    pub fn set_packing(&mut self, dir: Direction, on: bool) {
        self.ring_mut(dir).packing = on;
        log::debug!("{} {:?} packing {}", self.tag, dir, if on { "on" } else { "off" });
    }

    pub fn packing(&self, dir: Direction) -> bool {
        self.ring(dir).packing
    }

    fn ring(&self, dir: Direction) -> &Ring {
        match dir {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    fn ring_mut(&mut self, dir: Direction) -> &mut Ring {
        match dir {
            Direction::Input => &mut self.input,
            Direction::Output => &mut self.output,
        }
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// Transmit every PRIMED slot of every active output queue.
    /// Returns whether the guest should be interrupted.
    pub fn process_output(&mut self, host: &dyn HostInterface) -> bool {
        let mut interrupt = false;
        for q in self.output.visit_order() {
            interrupt |= self.drain_output_queue(q, host);
        }
        if !self.output.queues.is_empty() {
            self.output.qpos = (self.output.qpos + 1) % self.output.queues.len();
        }
        interrupt
    }

    fn drain_output_queue(&mut self, q: usize, host: &dyn HostInterface) -> bool {
        let desc = self.output.queues[q];
        let states = match desc.fetch_slsb(self.storage.as_ref()) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("{} output queue {} SLSB unreadable: {}", self.tag, q, e);
                return false;
            }
        };

        let mut interrupt = false;
        let start = self.output.bpos[q];
        for i in 0..QDIO_SLOTS {
            let slot = (start + i) % QDIO_SLOTS;
            if states[slot] != slsb::OUTPUT_PRIMED {
                continue;
            }
            let mut pci = false;
            let state = match self.transmit_slot(&desc, slot, host, &mut pci) {
                Ok(sent) => {
                    log::trace!("{} output q{} slot {}: {} packet(s)", self.tag, q, slot, sent);
                    slsb::OUTPUT_COMPLETED
                }
                Err(e) => {
                    log::warn!("{} output q{} slot {} error {}: {}", self.tag, q, slot, e.code(), e);
                    self.stats.record_slot_error();
                    interrupt = true;
                    slsb::OUTPUT_ERROR
                }
            };
            interrupt |= pci;
            if let Err(e) = desc.set_slot_state(self.storage.as_ref(), slot, state) {
                log::warn!("{} output q{} slot {} SLSB update failed: {}", self.tag, q, slot, e);
            }
            self.output.bpos[q] = (slot + 1) % QDIO_SLOTS;
        }
        interrupt
    }

    /// Walk one SBAL and send what it holds
    fn transmit_slot(
        &mut self,
        desc: &QueueDescriptor,
        slot: usize,
        host: &dyn HostInterface,
        pci: &mut bool,
    ) -> Result<usize, QueueError> {
        let mem = self.storage.as_ref();
        let sbal = desc.sbal_addr(mem, slot)?;
        let entries = desc.fetch_sbal(mem, sbal)?;
        *pci = entries[0].sflags & sbale::SFLAG_PCI_REQ != 0;

        let budget = self.max_packet + HDR_LEN;
        // A packed element may hold a whole SBAL worth of units
        let element_limit = if self.output.packing { budget * SBALE_COUNT } else { budget };
        let mut chain: Option<Vec<u8>> = None;
        let mut sent = 0;

        for e in entries.iter() {
            let len = e.length as usize;
            if len == 0 {
                return Err(QueueError::ZeroLengthBlock);
            }
            if len > element_limit {
                return Err(QueueError::Oversized(len));
            }
            let mut data = vec![0u8; len];
            mem.fetch(e.addr, desc.keys.sbal, &mut data)?;

            match e.fragment() {
                sbale::FRAG_WHOLE => {
                    if chain.is_some() {
                        return Err(QueueError::FragmentMismatch);
                    }
                    sent += self.send_units(&data, host, self.output.packing)?;
                }
                sbale::FRAG_FIRST => {
                    if chain.is_some() {
                        return Err(QueueError::FragmentMismatch);
                    }
                    chain = Some(data);
                }
                sbale::FRAG_MIDDLE => {
                    let c = chain.as_mut().ok_or(QueueError::FragmentMismatch)?;
                    c.extend_from_slice(&data);
                    if c.len() > budget {
                        return Err(QueueError::Oversized(c.len()));
                    }
                }
                _ => {
                    let mut c = chain.take().ok_or(QueueError::FragmentMismatch)?;
                    c.extend_from_slice(&data);
                    if c.len() > budget {
                        return Err(QueueError::Oversized(c.len()));
                    }
                    sent += self.send_units(&c, host, false)?;
                }
            }

            if e.is_last_entry() {
                if chain.is_some() {
                    return Err(QueueError::PrematureEof);
                }
                return Ok(sent);
            }
        }
        Err(QueueError::MissingLastEntry)
    }

    /// Send the header units in `buf`. Without packing `buf` holds exactly one.
    fn send_units(&self, buf: &[u8], host: &dyn HostInterface, packed: bool) -> Result<usize, QueueError> {
        let mut off = 0;
        let mut sent = 0;
        loop {
            let hdr = AdapterHeader::parse(&buf[off..], self.layer)?;
            let len = hdr.length();
            if len == 0 {
                return Err(QueueError::LengthMismatch);
            }
            if len > self.max_packet {
                return Err(QueueError::Oversized(len));
            }
            let end = off + HDR_LEN + len;
            if end > buf.len() || (!packed && end != buf.len()) {
                return Err(QueueError::LengthMismatch);
            }

            let pkt = &buf[off + HDR_LEN..end];
            host.send(pkt).map_err(|e| {
                log::warn!("{} host write of {} bytes failed: {}", self.tag, pkt.len(), e);
                QueueError::HostIo
            })?;
            self.stats.record_out(pkt.len());
            sent += 1;

            off = end;
            if off == buf.len() {
                return Ok(sent);
            }
        }
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Fill EMPTY slots while the host has traffic for us.
    /// Returns whether the guest should be interrupted.
    pub fn process_input(&mut self, host: &dyn HostInterface, filter: &InboundFilter) -> bool {
        let mut interrupt = false;
        loop {
            let Some((q, slot)) = self.find_empty_slot() else {
                // Ring full: consume one datagram so the host side does not stay readable
                let discarded = match self.carry.take() {
                    Some(_) => true,
                    None => matches!(self.read_raw(host), Ok(Some(_))),
                };
                if discarded {
                    self.stats.record_drop();
                    log::debug!("{} no empty input slot, datagram discarded", self.tag);
                }
                break;
            };
            let desc = self.input.queues[q];
            let result = match self.next_unit(host, filter) {
                Ok(Some(first)) => self.fill_slot(&desc, slot, first, host, filter),
                Ok(None) => break,
                Err(e) => Err(e),
            };

            let state = match result {
                Ok(n) => {
                    log::trace!("{} input q{} slot {}: {} packet(s)", self.tag, q, slot, n);
                    slsb::INPUT_COMPLETED
                }
                Err(e) => {
                    log::warn!("{} input q{} slot {} error {}: {}", self.tag, q, slot, e.code(), e);
                    self.stats.record_slot_error();
                    slsb::INPUT_ERROR
                }
            };
            if let Err(e) = desc.set_slot_state(self.storage.as_ref(), slot, state) {
                log::warn!("{} input q{} slot {} SLSB update failed: {}", self.tag, q, slot, e);
            }
            self.input.bpos[q] = (slot + 1) % QDIO_SLOTS;
            self.input.qpos = (q + 1) % self.input.queues.len();
            interrupt = true;
            if state == slsb::INPUT_ERROR {
                // At most one ERROR slot per pass
                break;
            }
        }
        interrupt
    }

    /// First EMPTY slot in round-robin order
    fn find_empty_slot(&self) -> Option<(usize, usize)> {
        for q in self.input.visit_order() {
            let desc = &self.input.queues[q];
            let states = match desc.fetch_slsb(self.storage.as_ref()) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("{} input queue {} SLSB unreadable: {}", self.tag, q, e);
                    continue;
                }
            };
            let start = self.input.bpos[q];
            if let Some(slot) = (0..QDIO_SLOTS)
                .map(|i| (start + i) % QDIO_SLOTS)
                .find(|&s| states[s] == slsb::INPUT_EMPTY)
            {
                return Some((q, slot));
            }
        }
        None
    }

    fn read_raw(&mut self, host: &dyn HostInterface) -> Result<Option<usize>, QueueError> {
        match host.recv(&mut self.rxbuf) {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => {
                log::warn!("{} host read failed: {}", self.tag, e);
                Err(QueueError::HostIo)
            }
        }
    }

    /// Next inbound unit (adapter header + packet) destined for the guest
    fn next_unit(&mut self, host: &dyn HostInterface, filter: &InboundFilter) -> Result<Option<Vec<u8>>, QueueError> {
        if let Some(unit) = self.carry.take() {
            return Ok(Some(unit));
        }
        loop {
            let Some(n) = self.read_raw(host)? else {
                return Ok(None);
            };
            let pkt = &self.rxbuf[..n];
            let hdr = match filter.classify(pkt) {
                Verdict::Drop(why) => {
                    self.stats.record_drop();
                    log::trace!("{} inbound {} bytes dropped: {}", self.tag, n, why);
                    continue;
                }
                Verdict::Layer2(cast) => AdapterHeader::layer2(cast, n as u16),
                Verdict::Layer3 { cast, dest } => AdapterHeader::layer3(cast, dest, n as u16),
            };
            let mut unit = Vec::with_capacity(HDR_LEN + n);
            unit.extend_from_slice(&hdr.encode());
            unit.extend_from_slice(pkt);
            return Ok(Some(unit));
        }
    }

    fn fill_slot(
        &mut self,
        desc: &QueueDescriptor,
        slot: usize,
        first: Vec<u8>,
        host: &dyn HostInterface,
        filter: &InboundFilter,
    ) -> Result<usize, QueueError> {
        let sbal = desc.sbal_addr(self.storage.as_ref(), slot)?;
        let mut entries = desc.fetch_sbal(self.storage.as_ref(), sbal)?;
        let offered = offered_elements(&entries);
        if offered == 0 {
            return Err(QueueError::ZeroLengthBlock);
        }
        let mut next = 0;
        let mut placed = 0;
        let mut unit = Some(first);

        while let Some(bytes) = unit.take() {
            match self.place(desc, &mut entries[..offered], next, &bytes)? {
                Some(end) => {
                    self.stats.record_in(bytes.len() - HDR_LEN);
                    next = end;
                    placed += 1;
                }
                None if placed == 0 => return Err(QueueError::NoSpace),
                None => {
                    self.carry = Some(bytes);
                    break;
                }
            }
            if !self.input.packing || next >= offered {
                break;
            }
            unit = match self.next_unit(host, filter) {
                Ok(u) => u,
                Err(e) => {
                    // The slot completes with what it holds
                    log::debug!("{} packing stopped early: {}", self.tag, e);
                    None
                }
            };
        }

        entries[next - 1].flags |= sbale::LAST_ENTRY;
        desc.store_sbales(self.storage.as_ref(), sbal, &entries[..next])?;
        Ok(placed)
    }

    /// Copy one unit into the elements starting at `start`.
    /// Returns the index after the last element used, or `None` when the
    /// remaining elements cannot hold it (nothing is written then).
    fn place(
        &self,
        desc: &QueueDescriptor,
        entries: &mut [Sbale],
        start: usize,
        bytes: &[u8],
    ) -> Result<Option<usize>, QueueError> {
        let mut capacity = 0;
        let mut end = start;
        while end < entries.len() && capacity < bytes.len() {
            capacity += entries[end].length as usize;
            end += 1;
        }
        if capacity < bytes.len() {
            return Ok(None);
        }

        let span = end - start;
        let mut off = 0;
        for (i, e) in entries[start..end].iter_mut().enumerate() {
            let n = (e.length as usize).min(bytes.len() - off);
            self.storage.store(e.addr, desc.keys.sbal, &bytes[off..off + n])?;
            e.length = n as u32;
            e.flags = match (span, i) {
                (1, _) => sbale::FRAG_WHOLE,
                (_, 0) => sbale::FRAG_FIRST,
                (_, i) if i == span - 1 => sbale::FRAG_LAST,
                _ => sbale::FRAG_MIDDLE,
            };
            off += n;
        }
        Ok(Some(end))
    }
}

/// Number of leading elements the guest offers in an input SBAL: up to and
/// including the first one flagged LAST_ENTRY, stopping before the first
/// zero-length element.
fn offered_elements(entries: &[Sbale; SBALE_COUNT]) -> usize {
    let mut count = 0;
    for e in entries.iter() {
        if e.length == 0 {
            break;
        }
        count += 1;
        if e.is_last_entry() {
            break;
        }
    }
    count
}
