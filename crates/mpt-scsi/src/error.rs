use thiserror::Error;

use crate::init::InitStep;
use crate::packet::DataDirection;

pub type Result<T> = std::result::Result<T, MptError>;

/// Failure of the bus below the engine: a register access or a DMA buffer
/// access that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("register read at offset {offset:#04x} failed")]
    RegisterRead { offset: u32 },

    #[error("register write of {value:#010x} at offset {offset:#04x} failed")]
    RegisterWrite { offset: u32, value: u32 },

    #[error("dma access out of bounds: offset={offset} len={len} capacity={capacity}")]
    DmaOutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("dma buffer allocation of {len} bytes failed")]
    DmaAllocation { len: usize },

    #[error("pci configuration access failed: {0}")]
    Pci(&'static str),
}

/// Protocol violations that leave the adapter in an undefined state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceFault {
    #[error("request submission failed: {0}")]
    SubmissionFailed(#[source] TransportError),

    /// The reply queue held more than the one reply a request may produce.
    #[error("reply queue desynchronized: token {token:#010x} followed by {next:#010x}")]
    QueueDesync { token: u32, next: u32 },

    #[error("unexpected reply token {token:#010x}")]
    UnexpectedReply { token: u32 },
}

/// Errors surfaced by the pass-through engine and its binding layer.
#[derive(Debug, Error)]
pub enum MptError {
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// The requested transfer does not fit the adapter's data buffer. The
    /// packet's transfer length has been clamped to `capacity`; re-issue the
    /// request with the corrected length.
    #[error("{direction:?} transfer of {requested} bytes exceeds the {capacity}-byte data buffer")]
    BufferTooSmall {
        direction: DataDirection,
        requested: u32,
        capacity: u32,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("device error: {0}")]
    Device(#[from] DeviceFault),

    #[error("no reply after {elapsed_us} us of polling")]
    Timeout { elapsed_us: u64 },

    #[error("not found")]
    NotFound,

    #[error("controller initialization failed at {step:?}")]
    Init {
        step: InitStep,
        #[source]
        source: TransportError,
    },
}
