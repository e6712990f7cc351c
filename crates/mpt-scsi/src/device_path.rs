//! SCSI messaging device-path node naming a target/LUN on the adapter.

use crate::error::MptError;

pub const MESSAGING_DEVICE_PATH: u8 = 0x03;
pub const MSG_SCSI_DP: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScsiDevicePath {
    /// Physical unit number (target id).
    pub pun: u16,
    pub lun: u16,
}

impl ScsiDevicePath {
    pub const SIZE: usize = 8;

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = MESSAGING_DEVICE_PATH;
        out[1] = MSG_SCSI_DP;
        out[2..4].copy_from_slice(&(Self::SIZE as u16).to_le_bytes());
        out[4..6].copy_from_slice(&self.pun.to_le_bytes());
        out[6..8].copy_from_slice(&self.lun.to_le_bytes());
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, MptError> {
        if bytes.len() < 4 {
            return Err(MptError::InvalidParameter("truncated device path node"));
        }
        if bytes[0] != MESSAGING_DEVICE_PATH || bytes[1] != MSG_SCSI_DP {
            return Err(MptError::Unsupported("device path node is not a SCSI node"));
        }
        let len = usize::from(u16::from_le_bytes([bytes[2], bytes[3]]));
        if len < Self::SIZE || bytes.len() < Self::SIZE {
            return Err(MptError::InvalidParameter("truncated device path node"));
        }
        Ok(Self {
            pun: u16::from_le_bytes([bytes[4], bytes[5]]),
            lun: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }
}
