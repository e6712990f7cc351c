//! Classification of a reply token and copy-back of the request's results.

use crate::dma::{DmaBuffer, DmaRegion, DmaSlot};
use crate::error::{DeviceFault, MptError};
use crate::init;
use crate::mpi::{self, ScsiIoErrorReply};
use crate::packet::{DataDirection, HostAdapterStatus, ScsiRequestPacket, TargetStatus};
use crate::regs::RegisterWindow;

/// Maps the IOC status of an error reply to a host adapter status.
pub fn host_adapter_status(ioc_status: u16) -> HostAdapterStatus {
    match ioc_status & mpi::IOCSTATUS_MASK {
        mpi::IOCSTATUS_DEVICE_NOT_THERE => HostAdapterStatus::SELECTION_TIMEOUT,
        _ => HostAdapterStatus::OTHER,
    }
}

fn copy_back<D: DmaBuffer>(
    dma: &DmaRegion<D>,
    packet: &mut ScsiRequestPacket,
) -> Result<(), MptError> {
    let sense_len = usize::from(packet.sense_data_length);
    let sense = packet
        .sense_data
        .get_mut(..sense_len)
        .ok_or(MptError::InvalidParameter("sense length exceeds the sense buffer"))?;
    dma.read(DmaSlot::Sense, 0, sense)?;

    if packet.direction == DataDirection::Read && packet.in_transfer_length > 0 {
        let len = packet.in_transfer_length as usize;
        let data = packet
            .in_data
            .get_mut(..len)
            .ok_or(MptError::InvalidParameter("in transfer length exceeds the input buffer"))?;
        dma.read(DmaSlot::Data, 0, data)?;
    }
    Ok(())
}

/// Interprets `token`, the reply to the request built from `packet`.
///
/// An error reply consumes the armed error frame; it is handed back to the
/// adapter before returning.
pub fn interpret<R: RegisterWindow, D: DmaBuffer>(
    regs: &mut R,
    dma: &DmaRegion<D>,
    token: u32,
    packet: &mut ScsiRequestPacket,
) -> Result<(), MptError> {
    copy_back(dma, packet)?;

    if token == mpi::REQUEST_MESSAGE_CONTEXT {
        packet.host_adapter_status = HostAdapterStatus::OK;
        packet.target_status = TargetStatus::GOOD;
        return Ok(());
    }

    if token & mpi::REPLY_ADDRESS_FLAG == 0 {
        tracing::error!(token, "reply token is neither a context nor an error frame");
        return Err(DeviceFault::UnexpectedReply { token }.into());
    }

    let mut raw = [0u8; ScsiIoErrorReply::SIZE];
    dma.read(DmaSlot::ErrorReply, 0, &mut raw)?;
    let reply = ScsiIoErrorReply::parse(&raw);
    packet.host_adapter_status = host_adapter_status(reply.ioc_status);
    tracing::debug!(
        ioc_status = reply.ioc_status,
        ioc_log_info = reply.ioc_log_info,
        scsi_status = reply.scsi_status,
        transfer_count = reply.transfer_count,
        host_adapter_status = packet.host_adapter_status.0,
        "error reply"
    );

    init::arm_error_reply(regs, dma)?;
    Ok(())
}
