//! Channel Device Framework
//!
//! Devices are driven one CCW at a time by the channel subsystem, which is
//! not part of this crate. Everything a device needs from it is captured by
//! the [`ChannelDevice`] and [`InterruptSink`] traits.

pub mod qeth;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Device number (subchannel device address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceNumber(pub u16);

impl fmt::Display for DeviceNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// CCW command codes understood by the adapter
pub mod ccw_op {
    pub const WRITE: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const NOP: u8 = 0x03;
    pub const SENSE: u8 = 0x04;
    pub const ESTABLISH_QUEUES: u8 = 0x1B;
    pub const ACTIVATE_QUEUES: u8 = 0x1F;
    pub const SET_INTERFACE_ID: u8 = 0x81;
    pub const READ_NODE_ID: u8 = 0x84;
    pub const SENSE_ID: u8 = 0xE4;
    pub const READ_CONFIG_DATA: u8 = 0xFA;
}

/// Unit status bits
pub mod unit_status {
    pub const ATTENTION: u8 = 0x80;
    pub const STATUS_MODIFIER: u8 = 0x40;
    pub const CU_END: u8 = 0x20;
    pub const BUSY: u8 = 0x10;
    pub const CHANNEL_END: u8 = 0x08;
    pub const DEVICE_END: u8 = 0x04;
    pub const UNIT_CHECK: u8 = 0x02;
    pub const UNIT_EXCEPTION: u8 = 0x01;

    /// Normal completion
    pub const CE_DE: u8 = CHANNEL_END | DEVICE_END;
}

/// Sense byte 0
pub mod sense {
    pub const COMMAND_REJECT: u8 = 0x80;
    pub const INTERVENTION_REQUIRED: u8 = 0x40;
    pub const EQUIPMENT_CHECK: u8 = 0x10;

    pub const SENSE_LEN: usize = 32;
}

/// Outcome of one CCW
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcwStatus {
    pub unit_status: u8,
    /// Bytes of the CCW count not transferred
    pub residual: u16,
}

impl CcwStatus {
    pub fn ok(residual: u16) -> Self {
        Self { unit_status: unit_status::CE_DE, residual }
    }

    pub fn unit_check(residual: u16) -> Self {
        Self { unit_status: unit_status::CE_DE | unit_status::UNIT_CHECK, residual }
    }

    /// Copy `data` into a read-type CCW's buffer and compute the residual
    pub fn read_into(iobuf: &mut [u8], data: &[u8]) -> Self {
        let n = data.len().min(iobuf.len());
        iobuf[..n].copy_from_slice(&data[..n]);
        Self::ok((iobuf.len() - n) as u16)
    }

    pub fn is_unit_check(&self) -> bool {
        self.unit_status & unit_status::UNIT_CHECK != 0
    }
}

/// A device the channel subsystem can run CCWs against
pub trait ChannelDevice: Send + Sync {
    fn devnum(&self) -> DeviceNumber;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Execute one CCW. `iobuf` is the CCW's data area: input for
    /// write-type commands, output for read-type ones.
    fn execute(&self, opcode: u8, iobuf: &mut [u8]) -> CcwStatus;

    /// HALT / CLEAR SUBCHANNEL
    fn halt(&self);
}

/// Interrupt delivery into the channel subsystem
pub trait InterruptSink: Send + Sync {
    /// Program-controlled (QDIO) interrupt for `devnum`
    fn raise_pci(&self, devnum: DeviceNumber);
}

/// Sink that only counts what it is given
#[derive(Debug, Default)]
pub struct CountingSink {
    total: AtomicU64,
    last: Mutex<Option<DeviceNumber>>,
}

impl CountingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn last_device(&self) -> Option<DeviceNumber> {
        *self.last.lock()
    }
}

impl InterruptSink for CountingSink {
    fn raise_pci(&self, devnum: DeviceNumber) {
        *self.last.lock() = Some(devnum);
        self.total.fetch_add(1, Ordering::SeqCst);
    }
}
