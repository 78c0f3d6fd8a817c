//! zqeth - Emulated OSA-Express (QETH) Network Adapter
//!
//! Device emulation for the QDIO-based OSA-Express adapter as driven by a
//! guest's `qeth` driver. A configured adapter is a group of three channel
//! devices; the guest activates it over the read/write pair with the MPC
//! control protocol and then exchanges packets through shared-memory QDIO
//! queues. Packets leave and enter the host through a TUN (layer 3) or TAP
//! (layer 2) interface.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         Channel subsystem (CCWs)                      │
//! └───────┬──────────────────────┬──────────────────────────┬────────────┘
//!         │ READ                 │ WRITE                    │ EQ / AQ / SIGA
//! ┌───────▼───────┐      ┌───────▼───────┐         ┌────────▼────────┐
//! │  read device  │◄─────│ write device  │         │   data device   │
//! │ response chain│      │ IDX, CM, ULP, │         │  worker thread  │
//! └───────────────┘      │     IPA       │         │ input / output  │
//!                        └───────┬───────┘         │     queues      │
//!                                │ filter          └───┬─────────┬───┘
//!                                └────────────────────►│         │
//!                                                guest storage  host TUN/TAP
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use zqeth::{ChannelDevice, CountingSink, DeviceRole, MainStorage, QethConfig, QethGroup};
//! use zqeth::host::TunTapFactory;
//!
//! let config = QethConfig::load("/etc/zqeth/osa0.toml")?;
//! let group = QethGroup::new(
//!     config,
//!     Arc::new(MainStorage::new(64 << 20)),
//!     Arc::new(CountingSink::new()),
//!     Arc::new(TunTapFactory),
//! )?;
//!
//! let write = group.device(DeviceRole::Write);
//! let status = write.execute(zqeth::devices::ccw_op::WRITE, &mut idx_activate);
//! ```

// Core modules
pub mod config;
pub mod error;
pub mod memory;
pub mod net;

// Wire protocol
pub mod mpc;

// Devices and host endpoints
pub mod devices;
pub mod host;

pub use config::QethConfig;
pub use devices::qeth::{DeviceRole, Direction, QethDevice, QethGroup, StatsSnapshot};
pub use devices::{CcwStatus, ChannelDevice, CountingSink, DeviceNumber, InterruptSink};
pub use error::{QethError, QethResult, QueueError};
pub use host::{HostFactory, HostInterface, HostSettings, MemoryFactory, MemoryInterface};
pub use memory::{GuestAddr, GuestStorage, MainStorage, StorageError};
pub use net::{Layer, MacAddr};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
