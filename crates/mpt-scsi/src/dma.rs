//! The DMA region shared with the adapter.
//!
//! One physically contiguous buffer is carved into four fixed slots. Only one
//! request is ever in flight, so a single request frame and a single error
//! reply frame cover the whole lifetime of a controller.

use crate::error::{MptError, TransportError};
use crate::mpi::{ScsiIoErrorReply, ScsiIoRequest};

/// Device-visible memory handed to the adapter.
///
/// Offsets are relative to the start of the buffer; `device_address` is the
/// bus address the adapter uses for offset 0.
pub trait DmaBuffer {
    fn device_address(&self) -> u64;
    fn len(&self) -> usize;
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), TransportError>;
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), TransportError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Host-memory buffer with a caller-supplied device address. Useful when the
/// bus maps host memory 1:1 or when the adapter is emulated in-process.
#[derive(Debug, Clone)]
pub struct HeapDmaBuffer {
    device_address: u64,
    bytes: Vec<u8>,
}

impl HeapDmaBuffer {
    pub fn new(device_address: u64, len: usize) -> Self {
        Self {
            device_address,
            bytes: vec![0u8; len],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn range(&self, offset: usize, len: usize) -> Result<std::ops::Range<usize>, TransportError> {
        let capacity = self.bytes.len();
        offset
            .checked_add(len)
            .filter(|&end| end <= capacity)
            .map(|end| offset..end)
            .ok_or(TransportError::DmaOutOfBounds {
                offset,
                len,
                capacity,
            })
    }
}

impl DmaBuffer for HeapDmaBuffer {
    fn device_address(&self) -> u64 {
        self.device_address
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), TransportError> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), TransportError> {
        let range = self.range(offset, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }
}

/// The role-indexed slots of the DMA region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmaSlot {
    ErrorReply,
    Request,
    Sense,
    Data,
}

impl DmaSlot {
    pub const ALL: [DmaSlot; 4] = [
        DmaSlot::ErrorReply,
        DmaSlot::Request,
        DmaSlot::Sense,
        DmaSlot::Data,
    ];

    pub const fn offset(self) -> usize {
        match self {
            DmaSlot::ErrorReply => 0,
            DmaSlot::Request => ERROR_REPLY_SLOT_LEN,
            DmaSlot::Sense => ERROR_REPLY_SLOT_LEN + REQUEST_SLOT_LEN,
            DmaSlot::Data => ERROR_REPLY_SLOT_LEN + REQUEST_SLOT_LEN + SENSE_SLOT_LEN,
        }
    }

    pub const fn len(self) -> usize {
        match self {
            DmaSlot::ErrorReply => ERROR_REPLY_SLOT_LEN,
            DmaSlot::Request => REQUEST_SLOT_LEN,
            DmaSlot::Sense => SENSE_SLOT_LEN,
            DmaSlot::Data => DATA_SLOT_LEN,
        }
    }
}

// Frames are 8-byte aligned for the adapter.
const ERROR_REPLY_SLOT_LEN: usize = align8(ScsiIoErrorReply::SIZE);
const REQUEST_SLOT_LEN: usize = align8(ScsiIoRequest::SIZE);
pub const SENSE_SLOT_LEN: usize = u8::MAX as usize;
pub const DATA_SLOT_LEN: usize = 0x2000;

pub const DMA_REGION_LEN: usize = DmaSlot::Data.offset() + DATA_SLOT_LEN;

const fn align8(len: usize) -> usize {
    (len + 7) & !7
}

/// Typed view over the DMA buffer owned by a controller.
#[derive(Debug)]
pub struct DmaRegion<D> {
    buffer: D,
    base: u64,
}

impl<D: DmaBuffer> DmaRegion<D> {
    /// Wraps `buffer`, checking that the slot layout fits and that every slot
    /// shares the upper 32 address bits the adapter is programmed with.
    pub fn new(buffer: D) -> Result<Self, MptError> {
        if buffer.len() < DMA_REGION_LEN {
            return Err(MptError::InvalidParameter(
                "dma buffer is smaller than the controller's dma region",
            ));
        }
        let base = buffer.device_address();
        let last = base
            .checked_add(DMA_REGION_LEN as u64 - 1)
            .ok_or(MptError::InvalidParameter("dma region wraps the address space"))?;
        if base >> 32 != last >> 32 {
            return Err(MptError::InvalidParameter(
                "dma region crosses a 4 GiB boundary",
            ));
        }
        Ok(Self { buffer, base })
    }

    pub fn base_address(&self) -> u64 {
        self.base
    }

    /// Upper 32 bits shared by every slot address.
    pub fn high_address(&self) -> u32 {
        (self.base >> 32) as u32
    }

    pub fn address_of(&self, slot: DmaSlot) -> u64 {
        self.base + slot.offset() as u64
    }

    /// Low 32 bits of a slot address, as written to 32-bit queue registers.
    pub fn low_address_of(&self, slot: DmaSlot) -> u32 {
        self.address_of(slot) as u32
    }

    pub fn read(&self, slot: DmaSlot, offset: usize, buf: &mut [u8]) -> Result<(), TransportError> {
        check_slot(slot, offset, buf.len())?;
        self.buffer.read(slot.offset() + offset, buf)
    }

    pub fn write(&mut self, slot: DmaSlot, offset: usize, data: &[u8]) -> Result<(), TransportError> {
        check_slot(slot, offset, data.len())?;
        self.buffer.write(slot.offset() + offset, data)
    }

    pub fn zero(&mut self, slot: DmaSlot) -> Result<(), TransportError> {
        let zeroes = vec![0u8; slot.len()];
        self.buffer.write(slot.offset(), &zeroes)
    }

    pub fn buffer(&self) -> &D {
        &self.buffer
    }

    pub fn into_inner(self) -> D {
        self.buffer
    }
}

fn check_slot(slot: DmaSlot, offset: usize, len: usize) -> Result<(), TransportError> {
    match offset.checked_add(len) {
        Some(end) if end <= slot.len() => Ok(()),
        _ => Err(TransportError::DmaOutOfBounds {
            offset: slot.offset() + offset,
            len,
            capacity: slot.offset() + slot.len(),
        }),
    }
}
