//! Fusion-MPT message passing interface: function codes and the byte layout
//! of the frames exchanged with the adapter.
//!
//! Every multi-byte field is little-endian. Frames are encoded into plain byte
//! arrays so they can be copied into the DMA region or pushed through the
//! doorbell without any unsafe casting.

use bitflags::bitflags;

pub const DOORBELL_FUNCTION_RESET: u8 = 0x40;
pub const DOORBELL_FUNCTION_HANDSHAKE: u8 = 0x42;

pub const FUNCTION_SCSI_IO_REQUEST: u8 = 0x00;
pub const FUNCTION_IOC_INIT: u8 = 0x02;

pub const IOC_WHOINIT_ROM_BIOS: u8 = 0x02;

pub const SCSIIO_CONTROL_TXDIR_NONE: u32 = 0x00 << 24;
pub const SCSIIO_CONTROL_TXDIR_WRITE: u32 = 0x01 << 24;
pub const SCSIIO_CONTROL_TXDIR_READ: u32 = 0x02 << 24;

pub const IOCSTATUS_SUCCESS: u16 = 0x0000;
pub const IOCSTATUS_DEVICE_NOT_THERE: u16 = 0x0043;
/// The top bit of IOCStatus only flags that IOCLogInfo is valid.
pub const IOCSTATUS_MASK: u16 = 0x7FFF;

/// Message context of every SCSI I/O request. Only one request is ever in
/// flight, so a constant tag is enough to recognize its reply.
pub const REQUEST_MESSAGE_CONTEXT: u32 = 1;

/// Reply tokens with this bit set point at an error reply frame.
pub const REPLY_ADDRESS_FLAG: u32 = 1 << 31;

pub const MAX_CDB_LEN: usize = 16;
pub const LUN_FIELD_LEN: usize = 8;
/// The adapter reads the LUN from the second byte of the LUN field.
pub const LUN_BYTE_INDEX: usize = 1;

pub const SG_MAX_LENGTH: u32 = 0x00FF_FFFF;

bitflags! {
    /// Flag bits of a simple scatter/gather element (above the 24-bit length).
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct SgFlags: u32 {
        const END_OF_LIST = 1 << 24;
        const ADDRESS_64 = 1 << 25;
        /// Set when the buffer holds data for the device (host to device).
        const BUFFER_CONTAINS_DATA = 1 << 26;
        const LOCAL_ADDRESS = 1 << 27;
        const ELEMENT_TYPE_SIMPLE = 1 << 28;
        const END_OF_BUFFER = 1 << 30;
        const LAST_ELEMENT = 1 << 31;
    }
}

/// IOC_INIT request, sent through the doorbell handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IocInitRequest {
    pub who_init: u8,
    pub function: u8,
    pub flags: u8,
    pub max_devices: u8,
    pub max_buses: u8,
    pub message_flags: u8,
    pub message_context: u32,
    pub reply_frame_size: u16,
    pub host_mfa_high_addr: u32,
    pub sense_buffer_high_addr: u32,
}

impl IocInitRequest {
    pub const SIZE: usize = 24;
    pub const DWORDS: usize = Self::SIZE / 4;

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.who_init;
        out[3] = self.function;
        out[4] = self.flags;
        out[5] = self.max_devices;
        out[6] = self.max_buses;
        out[7] = self.message_flags;
        out[8..12].copy_from_slice(&self.message_context.to_le_bytes());
        out[12..14].copy_from_slice(&self.reply_frame_size.to_le_bytes());
        out[16..20].copy_from_slice(&self.host_mfa_high_addr.to_le_bytes());
        out[20..24].copy_from_slice(&self.sense_buffer_high_addr.to_le_bytes());
        out
    }

    /// The request as the dword burst written to the doorbell.
    pub fn to_dwords(self) -> [u32; Self::DWORDS] {
        let bytes = self.to_bytes();
        let mut out = [0u32; Self::DWORDS];
        for (dword, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
            *dword = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        out
    }

    pub fn parse(bytes: &[u8; Self::SIZE]) -> Self {
        IocInitRequest {
            who_init: bytes[0],
            function: bytes[3],
            flags: bytes[4],
            max_devices: bytes[5],
            max_buses: bytes[6],
            message_flags: bytes[7],
            message_context: read_u32(bytes, 8),
            reply_frame_size: read_u16(bytes, 12),
            host_mfa_high_addr: read_u32(bytes, 16),
            sense_buffer_high_addr: read_u32(bytes, 20),
        }
    }
}

/// IOC_INIT reply, drained 16 bits at a time from the doorbell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IocInitReply {
    pub who_init: u8,
    pub message_length: u8,
    pub function: u8,
    pub flags: u8,
    pub max_devices: u8,
    pub max_buses: u8,
    pub message_flags: u8,
    pub message_context: u32,
    pub ioc_status: u16,
    pub ioc_log_info: u32,
}

impl IocInitReply {
    pub const SIZE: usize = 20;
    pub const WORDS: usize = Self::SIZE / 2;

    pub fn parse(bytes: &[u8; Self::SIZE]) -> Self {
        IocInitReply {
            who_init: bytes[0],
            message_length: bytes[2],
            function: bytes[3],
            flags: bytes[4],
            max_devices: bytes[5],
            max_buses: bytes[6],
            message_flags: bytes[7],
            message_context: read_u32(bytes, 8),
            ioc_status: read_u16(bytes, 14),
            ioc_log_info: read_u32(bytes, 16),
        }
    }

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.who_init;
        out[2] = self.message_length;
        out[3] = self.function;
        out[4] = self.flags;
        out[5] = self.max_devices;
        out[6] = self.max_buses;
        out[7] = self.message_flags;
        out[8..12].copy_from_slice(&self.message_context.to_le_bytes());
        out[14..16].copy_from_slice(&self.ioc_status.to_le_bytes());
        out[16..20].copy_from_slice(&self.ioc_log_info.to_le_bytes());
        out
    }
}

/// One simple scatter/gather element with a 64-bit address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgEntrySimple {
    pub length: u32,
    pub flags: SgFlags,
    pub address: u64,
}

impl SgEntrySimple {
    pub const SIZE: usize = 12;

    fn encode(self, out: &mut [u8]) {
        let word = (self.length & SG_MAX_LENGTH) | self.flags.bits();
        out[0..4].copy_from_slice(&word.to_le_bytes());
        out[4..12].copy_from_slice(&self.address.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        let word = read_u32(bytes, 0);
        SgEntrySimple {
            length: word & SG_MAX_LENGTH,
            flags: SgFlags::from_bits_truncate(word),
            address: read_u64(bytes, 4),
        }
    }
}

/// SCSI_IO_REQUEST header followed by its single SG element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScsiIoRequest {
    pub target_id: u8,
    pub bus: u8,
    pub chain_offset: u8,
    pub function: u8,
    pub cdb_length: u8,
    pub sense_buffer_length: u8,
    pub message_flags: u8,
    pub message_context: u32,
    pub lun: [u8; LUN_FIELD_LEN],
    pub control: u32,
    pub cdb: [u8; MAX_CDB_LEN],
    pub data_length: u32,
    pub sense_buffer_low_address: u32,
    pub sg: SgEntrySimple,
}

impl ScsiIoRequest {
    pub const HEADER_SIZE: usize = 48;
    pub const SIZE: usize = Self::HEADER_SIZE + SgEntrySimple::SIZE;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.target_id;
        out[1] = self.bus;
        out[2] = self.chain_offset;
        out[3] = self.function;
        out[4] = self.cdb_length;
        out[5] = self.sense_buffer_length;
        out[7] = self.message_flags;
        out[8..12].copy_from_slice(&self.message_context.to_le_bytes());
        out[12..20].copy_from_slice(&self.lun);
        out[20..24].copy_from_slice(&self.control.to_le_bytes());
        out[24..40].copy_from_slice(&self.cdb);
        out[40..44].copy_from_slice(&self.data_length.to_le_bytes());
        out[44..48].copy_from_slice(&self.sense_buffer_low_address.to_le_bytes());
        self.sg.encode(&mut out[Self::HEADER_SIZE..]);
        out
    }

    pub fn parse(bytes: &[u8; Self::SIZE]) -> Self {
        let mut lun = [0u8; LUN_FIELD_LEN];
        lun.copy_from_slice(&bytes[12..20]);
        let mut cdb = [0u8; MAX_CDB_LEN];
        cdb.copy_from_slice(&bytes[24..40]);
        ScsiIoRequest {
            target_id: bytes[0],
            bus: bytes[1],
            chain_offset: bytes[2],
            function: bytes[3],
            cdb_length: bytes[4],
            sense_buffer_length: bytes[5],
            message_flags: bytes[7],
            message_context: read_u32(bytes, 8),
            lun,
            control: read_u32(bytes, 20),
            cdb,
            data_length: read_u32(bytes, 40),
            sense_buffer_low_address: read_u32(bytes, 44),
            sg: SgEntrySimple::decode(&bytes[Self::HEADER_SIZE..]),
        }
    }

    /// The CDB bytes actually in use.
    pub fn cdb(&self) -> &[u8] {
        let len = usize::from(self.cdb_length).min(MAX_CDB_LEN);
        &self.cdb[..len]
    }
}

/// Error reply the adapter writes into the pre-armed reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScsiIoErrorReply {
    pub target_id: u8,
    pub bus: u8,
    pub message_length: u8,
    pub function: u8,
    pub cdb_length: u8,
    pub sense_buffer_length: u8,
    pub message_flags: u8,
    pub message_context: u32,
    pub scsi_status: u8,
    pub scsi_state: u8,
    pub ioc_status: u16,
    pub ioc_log_info: u32,
    pub transfer_count: u32,
    pub sense_count: u32,
    pub response_info: u32,
}

impl ScsiIoErrorReply {
    pub const SIZE: usize = 32;

    pub fn parse(bytes: &[u8; Self::SIZE]) -> Self {
        ScsiIoErrorReply {
            target_id: bytes[0],
            bus: bytes[1],
            message_length: bytes[2],
            function: bytes[3],
            cdb_length: bytes[4],
            sense_buffer_length: bytes[5],
            message_flags: bytes[7],
            message_context: read_u32(bytes, 8),
            scsi_status: bytes[12],
            scsi_state: bytes[13],
            ioc_status: read_u16(bytes, 14),
            ioc_log_info: read_u32(bytes, 16),
            transfer_count: read_u32(bytes, 20),
            sense_count: read_u32(bytes, 24),
            response_info: read_u32(bytes, 28),
        }
    }

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.target_id;
        out[1] = self.bus;
        out[2] = self.message_length;
        out[3] = self.function;
        out[4] = self.cdb_length;
        out[5] = self.sense_buffer_length;
        out[7] = self.message_flags;
        out[8..12].copy_from_slice(&self.message_context.to_le_bytes());
        out[12] = self.scsi_status;
        out[13] = self.scsi_state;
        out[14..16].copy_from_slice(&self.ioc_status.to_le_bytes());
        out[16..20].copy_from_slice(&self.ioc_log_info.to_le_bytes());
        out[20..24].copy_from_slice(&self.transfer_count.to_le_bytes());
        out[24..28].copy_from_slice(&self.sense_count.to_le_bytes());
        out[28..32].copy_from_slice(&self.response_info.to_le_bytes());
        out
    }

    pub fn status(&self) -> u16 {
        self.ioc_status & IOCSTATUS_MASK
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}
