//! BAR0 register access.
//!
//! All registers are 32 bits wide and 32-bit aligned. The engine never caches
//! register values; every access goes straight to the window.

use bitflags::bitflags;

use crate::error::TransportError;

pub const REG_DOORBELL: u32 = 0x00;
pub const REG_WRITE_SEQ: u32 = 0x04;
pub const REG_HOST_DIAG: u32 = 0x08;
pub const REG_INTERRUPT_STATUS: u32 = 0x30;
pub const REG_INTERRUPT_MASK: u32 = 0x34;
pub const REG_REQUEST_QUEUE: u32 = 0x40;
pub const REG_REPLY_QUEUE: u32 = 0x44;

/// Value read from the reply queue when no reply is pending.
pub const REPLY_QUEUE_EMPTY: u32 = 0xFFFF_FFFF;

bitflags! {
    /// Bits shared by the interrupt-status and interrupt-mask registers.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct InterruptStatus: u32 {
        const DOORBELL = 1 << 0;
        const REPLY = 1 << 3;
    }
}

/// A 32-bit memory or I/O mapped register window (BAR0 of the adapter).
///
/// Reads take `&mut self` since reading the reply queue pops it.
pub trait RegisterWindow {
    fn read32(&mut self, offset: u32) -> Result<u32, TransportError>;
    fn write32(&mut self, offset: u32, value: u32) -> Result<(), TransportError>;

    /// Writes `values` back to back to the same register (FIFO semantics).
    fn write_fifo32(&mut self, offset: u32, values: &[u32]) -> Result<(), TransportError> {
        for &value in values {
            self.write32(offset, value)?;
        }
        Ok(())
    }
}

impl<T: RegisterWindow + ?Sized> RegisterWindow for &mut T {
    fn read32(&mut self, offset: u32) -> Result<u32, TransportError> {
        (**self).read32(offset)
    }

    fn write32(&mut self, offset: u32, value: u32) -> Result<(), TransportError> {
        (**self).write32(offset, value)
    }

    fn write_fifo32(&mut self, offset: u32, values: &[u32]) -> Result<(), TransportError> {
        (**self).write_fifo32(offset, values)
    }
}

impl<T: RegisterWindow + ?Sized> RegisterWindow for Box<T> {
    fn read32(&mut self, offset: u32) -> Result<u32, TransportError> {
        (**self).read32(offset)
    }

    fn write32(&mut self, offset: u32, value: u32) -> Result<(), TransportError> {
        (**self).write32(offset, value)
    }

    fn write_fifo32(&mut self, offset: u32, values: &[u32]) -> Result<(), TransportError> {
        (**self).write_fifo32(offset, values)
    }
}

pub(crate) fn read_interrupt_status<R: RegisterWindow>(
    regs: &mut R,
) -> Result<InterruptStatus, TransportError> {
    let raw = regs.read32(REG_INTERRUPT_STATUS)?;
    tracing::trace!(raw, "interrupt status");
    Ok(InterruptStatus::from_bits_truncate(raw))
}

/// Acknowledges every pending interrupt source.
pub(crate) fn clear_interrupt_status<R: RegisterWindow>(
    regs: &mut R,
) -> Result<(), TransportError> {
    regs.write32(REG_INTERRUPT_STATUS, 0)
}
