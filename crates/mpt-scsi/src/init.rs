//! Controller bring-up.
//!
//! The sequence is linear and never retries: any failed step leaves the
//! controller unusable and aborts the start.

use crate::dma::{DmaBuffer, DmaRegion, DmaSlot};
use crate::doorbell;
use crate::error::{MptError, TransportError};
use crate::mpi::{self, IocInitReply, IocInitRequest, ScsiIoErrorReply};
use crate::regs::{self, InterruptStatus, RegisterWindow, REG_INTERRUPT_MASK, REG_REPLY_QUEUE};

/// The steps of the initialization sequence, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitStep {
    Reset,
    MaskInterrupts,
    ClearInterruptStatus,
    SendInitRequest,
    DrainInitReply,
    AcknowledgeInitReply,
    ArmErrorReplySlot,
}

trait AtStep<T> {
    fn at(self, step: InitStep) -> Result<T, MptError>;
}

impl<T> AtStep<T> for Result<T, TransportError> {
    fn at(self, step: InitStep) -> Result<T, MptError> {
        self.map_err(|source| {
            tracing::error!(?step, error = %source, "controller initialization failed");
            MptError::Init { step, source }
        })
    }
}

/// Resets the adapter and leaves it with every interrupt source masked and
/// acknowledged. Also used to quiesce the adapter on shutdown.
pub fn reset<R: RegisterWindow>(regs: &mut R) -> Result<(), MptError> {
    doorbell::reset(regs).at(InitStep::Reset)?;
    let mask = InterruptStatus::DOORBELL | InterruptStatus::REPLY;
    regs.write32(REG_INTERRUPT_MASK, mask.bits())
        .at(InitStep::MaskInterrupts)?;
    regs::clear_interrupt_status(regs).at(InitStep::ClearInterruptStatus)?;
    Ok(())
}

pub(crate) fn init_request<D: DmaBuffer>(dma: &DmaRegion<D>) -> IocInitRequest {
    IocInitRequest {
        who_init: mpi::IOC_WHOINIT_ROM_BIOS,
        function: mpi::FUNCTION_IOC_INIT,
        max_devices: 1,
        max_buses: 1,
        reply_frame_size: ScsiIoErrorReply::SIZE as u16,
        host_mfa_high_addr: dma.high_address(),
        sense_buffer_high_addr: dma.high_address(),
        ..IocInitRequest::default()
    }
}

/// Runs the full bring-up sequence and returns the adapter's init reply.
pub fn initialize<R: RegisterWindow, D: DmaBuffer>(
    regs: &mut R,
    dma: &DmaRegion<D>,
) -> Result<IocInitReply, MptError> {
    reset(regs)?;
    tracing::debug!("controller reset");

    let request = init_request(dma);
    doorbell::handshake(regs, &request.to_dwords()).at(InitStep::SendInitRequest)?;

    // The reply carries nothing the driver acts on, but it has to be read to
    // complete the handshake.
    let bytes = doorbell::drain_reply(regs, IocInitReply::WORDS).at(InitStep::DrainInitReply)?;
    let mut raw = [0u8; IocInitReply::SIZE];
    raw.copy_from_slice(&bytes);
    let reply = IocInitReply::parse(&raw);
    if reply.ioc_status & mpi::IOCSTATUS_MASK != mpi::IOCSTATUS_SUCCESS {
        tracing::warn!(
            ioc_status = reply.ioc_status,
            ioc_log_info = reply.ioc_log_info,
            "IOC_INIT reply reports a non-success status"
        );
    }
    regs::clear_interrupt_status(regs).at(InitStep::AcknowledgeInitReply)?;

    arm_error_reply(regs, dma).at(InitStep::ArmErrorReplySlot)?;
    tracing::debug!(
        dma_base = dma.base_address(),
        "controller initialized, error reply slot armed"
    );
    Ok(reply)
}

/// Hands the error reply frame to the adapter so it can report a failed
/// request.
pub(crate) fn arm_error_reply<R: RegisterWindow, D: DmaBuffer>(
    regs: &mut R,
    dma: &DmaRegion<D>,
) -> Result<(), TransportError> {
    regs.write32(REG_REPLY_QUEUE, dma.low_address_of(DmaSlot::ErrorReply))
}
