//! Error types
//!
//! Guest-visible protocol failures are not errors here: they travel back to
//! the guest as IPA return codes (see [`crate::mpc::ipa::ipa_rc`]) or as
//! queue ERROR states. The types below cover local faults and the internal
//! queue-engine codes.

use crate::memory::StorageError;
use crate::mpc::CodecError;

/// Crate result type
pub type QethResult<T> = Result<T, QethError>;

/// Adapter-level errors
#[derive(Debug, thiserror::Error)]
pub enum QethError {
    #[error("malformed MPC data: {0}")]
    Codec(#[from] CodecError),

    #[error("storage access failed: {0}")]
    Storage(#[from] StorageError),

    #[error("host interface error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("queues not established")]
    QueuesNotEstablished,

    #[error("data path already active")]
    AlreadyActive,

    #[error("data path not active")]
    NotActive,

    #[error("worker thread did not acknowledge halt")]
    HaltTimeout,
}

/// Queue-engine failure for a single slot
///
/// None of these stop the worker: the slot is marked ERROR and the guest
/// sees a hardware-style error indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("host interface I/O error")]
    HostIo,

    #[error("storage check")]
    StorageCheck,

    #[error("no space left in storage block")]
    NoSpace,

    #[error("packet ends before fragment chain is closed")]
    PrematureEof,

    #[error("unsupported adapter header type {0:#04x}")]
    UnsupportedHeader(u8),

    #[error("packet of {0} bytes exceeds buffer budget")]
    Oversized(usize),

    #[error("zero-length storage block element")]
    ZeroLengthBlock,

    #[error("header length does not match data")]
    LengthMismatch,

    #[error("fragment flags out of sequence")]
    FragmentMismatch,

    #[error("no last-entry flag in storage block")]
    MissingLastEntry,
}

impl QueueError {
    /// Stable numeric code used in logs and statistics
    pub fn code(&self) -> i32 {
        match self {
            Self::HostIo => -1,
            Self::StorageCheck => -2,
            Self::NoSpace => -3,
            Self::PrematureEof => -4,
            Self::UnsupportedHeader(_) => -5,
            Self::Oversized(_) => -6,
            Self::ZeroLengthBlock => -7,
            Self::LengthMismatch => -8,
            Self::FragmentMismatch => -9,
            Self::MissingLastEntry => -10,
        }
    }
}

impl From<StorageError> for QueueError {
    fn from(_: StorageError) -> Self {
        QueueError::StorageCheck
    }
}
