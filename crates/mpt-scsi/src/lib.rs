//! SCSI pass-through engine for LSI Fusion-MPT host adapters (53C1030,
//! SAS1068, SAS1068E).
//!
//! The engine drives the adapter through its 32-bit register window and one
//! DMA region it owns. It is synchronous and polled: every request is built in
//! the DMA region, posted on the request queue, and waited for by polling the
//! interrupt-status register. Only one request is in flight per controller.
//!
//! The crate has two external inputs, both traits so the adapter can be real
//! hardware or a simulation:
//! - [`RegisterWindow`]: BAR0 register access
//! - [`DmaBuffer`]: device-visible memory for frames and data
//!
//! [`MptScsiController`] is the per-adapter entry point. [`DriverBinding`]
//! adds PCI identity matching, attribute negotiation and a registry of bound
//! controllers on top of a platform's [`PciFunction`].
//!
//! Limitations:
//! - One target (id 0) with one LUN (0).
//! - Transfers up to 8 KiB; bidirectional transfers and CDBs longer than 16
//!   bytes are rejected.
//! - No interrupts, no task management (channel/target resets report
//!   [`MptError::Unsupported`]).

pub mod binding;
pub mod config;
pub mod controller;
pub mod device_path;
pub mod dma;
pub mod doorbell;
mod error;
pub mod init;
pub mod mpi;
pub mod packet;
pub mod queue;
pub mod registry;
pub mod regs;
pub mod reply;
pub mod request;

pub use binding::{
    driver_name, DriverBinding, PciAttributes, PciFunction, PciIdentity, DRIVER_NAME,
};
pub use config::{MptScsiConfig, Stall, ThreadStall};
pub use controller::MptScsiController;
pub use device_path::ScsiDevicePath;
pub use dma::{DmaBuffer, DmaRegion, DmaSlot, HeapDmaBuffer, DMA_REGION_LEN};
pub use error::{DeviceFault, MptError, Result, TransportError};
pub use init::InitStep;
pub use packet::{
    DataDirection, HostAdapterStatus, ScsiRequestPacket, TargetId, TargetStatus,
    TARGET_MAX_BYTES, TARGET_UNINITIALIZED,
};
pub use registry::{ControllerHandle, ControllerRegistry};
pub use regs::RegisterWindow;
