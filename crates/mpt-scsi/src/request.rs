//! Translation of a [`ScsiRequestPacket`] into a SCSI_IO_REQUEST frame in the
//! DMA region.

use crate::dma::{DmaBuffer, DmaRegion, DmaSlot, DATA_SLOT_LEN};
use crate::error::MptError;
use crate::mpi::{
    self, ScsiIoRequest, SgEntrySimple, SgFlags, LUN_BYTE_INDEX, LUN_FIELD_LEN, MAX_CDB_LEN,
};
use crate::packet::{DataDirection, ScsiRequestPacket, TargetId, TARGET_MAX_BYTES};

const DATA_CAPACITY: u32 = DATA_SLOT_LEN as u32;

/// Rejects anything other than the single target/LUN the adapter exposes.
pub fn check_address(target: &TargetId, lun: u64) -> Result<(), MptError> {
    if *target != [0u8; TARGET_MAX_BYTES] {
        return Err(MptError::InvalidParameter("target does not exist"));
    }
    if lun != 0 {
        return Err(MptError::InvalidParameter("lun does not exist"));
    }
    Ok(())
}

fn validate(target: &TargetId, lun: u64, packet: &mut ScsiRequestPacket) -> Result<(), MptError> {
    if packet.direction == DataDirection::Bidirectional {
        return Err(MptError::Unsupported("bidirectional transfers"));
    }
    if packet.cdb.len() > MAX_CDB_LEN {
        return Err(MptError::Unsupported("cdb longer than 16 bytes"));
    }
    check_address(target, lun)?;

    let in_requested = packet.in_transfer_length;
    let out_requested = packet.out_transfer_length;
    if in_requested > DATA_CAPACITY || out_requested > DATA_CAPACITY {
        packet.in_transfer_length = in_requested.min(DATA_CAPACITY);
        packet.out_transfer_length = out_requested.min(DATA_CAPACITY);
        packet.report_overrun_underrun();
        let (direction, requested) = if in_requested > DATA_CAPACITY {
            (DataDirection::Read, in_requested)
        } else {
            (DataDirection::Write, out_requested)
        };
        return Err(MptError::BufferTooSmall {
            direction,
            requested,
            capacity: DATA_CAPACITY,
        });
    }

    match packet.direction {
        DataDirection::Read if packet.in_transfer_length as usize > packet.in_data.len() => {
            return Err(MptError::InvalidParameter(
                "in transfer length exceeds the input buffer",
            ));
        }
        DataDirection::Write if packet.out_transfer_length as usize > packet.out_data.len() => {
            return Err(MptError::InvalidParameter(
                "out transfer length exceeds the output buffer",
            ));
        }
        _ => {}
    }
    if usize::from(packet.sense_data_length) > packet.sense_data.len() {
        return Err(MptError::InvalidParameter(
            "sense length exceeds the sense buffer",
        ));
    }
    Ok(())
}

/// Validates `packet` and writes its request frame (and, for writes, its
/// payload) into the DMA region.
///
/// On [`MptError::BufferTooSmall`] the packet's transfer lengths have been
/// clamped to the data buffer and nothing was written to the region.
pub fn build<D: DmaBuffer>(
    dma: &mut DmaRegion<D>,
    target: &TargetId,
    lun: u64,
    packet: &mut ScsiRequestPacket,
) -> Result<ScsiIoRequest, MptError> {
    validate(target, lun, packet)?;

    let mut lun_field = [0u8; LUN_FIELD_LEN];
    lun_field[LUN_BYTE_INDEX] = lun as u8;
    let mut cdb = [0u8; MAX_CDB_LEN];
    cdb[..packet.cdb.len()].copy_from_slice(&packet.cdb);

    let mut request = ScsiIoRequest {
        target_id: target[0],
        bus: 0,
        chain_offset: 0,
        function: mpi::FUNCTION_SCSI_IO_REQUEST,
        cdb_length: packet.cdb.len() as u8,
        sense_buffer_length: packet.sense_data_length,
        message_flags: 0,
        message_context: mpi::REQUEST_MESSAGE_CONTEXT,
        lun: lun_field,
        control: mpi::SCSIIO_CONTROL_TXDIR_NONE,
        cdb,
        data_length: 0,
        sense_buffer_low_address: dma.low_address_of(DmaSlot::Sense),
        sg: SgEntrySimple {
            length: 0,
            flags: SgFlags::END_OF_LIST
                | SgFlags::ADDRESS_64
                | SgFlags::ELEMENT_TYPE_SIMPLE
                | SgFlags::END_OF_BUFFER
                | SgFlags::LAST_ELEMENT,
            address: dma.address_of(DmaSlot::Data),
        },
    };

    match packet.direction {
        DataDirection::Read if packet.in_transfer_length > 0 => {
            request.control = mpi::SCSIIO_CONTROL_TXDIR_READ;
            request.data_length = packet.in_transfer_length;
            request.sg.length = packet.in_transfer_length;
        }
        DataDirection::Write if packet.out_transfer_length > 0 => {
            let len = packet.out_transfer_length as usize;
            dma.write(DmaSlot::Data, 0, &packet.out_data[..len])?;
            request.control = mpi::SCSIIO_CONTROL_TXDIR_WRITE;
            request.data_length = packet.out_transfer_length;
            request.sg.length = packet.out_transfer_length;
            request.sg.flags |= SgFlags::BUFFER_CONTAINS_DATA;
        }
        _ => {}
    }

    dma.zero(DmaSlot::Request)?;
    dma.write(DmaSlot::Request, 0, &request.to_bytes())?;
    tracing::trace!(
        opcode = packet.cdb.first().copied(),
        control = request.control,
        data_length = request.data_length,
        "request frame built"
    );
    Ok(request)
}
