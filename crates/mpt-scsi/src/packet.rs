//! Caller-facing SCSI request packet and the status codes the engine reports.

/// Size of a target address. This adapter only ever uses the first byte.
pub const TARGET_MAX_BYTES: usize = 16;

pub type TargetId = [u8; TARGET_MAX_BYTES];

/// Target address that asks enumeration to start from the first target.
pub const TARGET_UNINITIALIZED: TargetId = [0xFF; TARGET_MAX_BYTES];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataDirection {
    #[default]
    None,
    /// Device to host.
    Read,
    /// Host to device.
    Write,
    Bidirectional,
}

/// Outcome of the transport itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostAdapterStatus(pub u8);

impl HostAdapterStatus {
    pub const OK: Self = Self(0x00);
    pub const TIMEOUT_COMMAND: Self = Self(0x09);
    pub const TIMEOUT: Self = Self(0x0b);
    pub const MESSAGE_REJECT: Self = Self(0x0d);
    pub const BUS_RESET: Self = Self(0x0e);
    pub const PARITY_ERROR: Self = Self(0x0f);
    pub const REQUEST_SENSE_FAILED: Self = Self(0x10);
    pub const SELECTION_TIMEOUT: Self = Self(0x11);
    pub const DATA_OVERRUN_UNDERRUN: Self = Self(0x12);
    pub const BUS_FREE: Self = Self(0x13);
    pub const PHASE_ERROR: Self = Self(0x14);
    pub const OTHER: Self = Self(0x7f);
}

impl Default for HostAdapterStatus {
    fn default() -> Self {
        Self::OK
    }
}

/// SCSI status byte returned by the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetStatus(pub u8);

impl TargetStatus {
    pub const GOOD: Self = Self(0x00);
    pub const CHECK_CONDITION: Self = Self(0x02);
    pub const CONDITION_MET: Self = Self(0x04);
    pub const BUSY: Self = Self(0x08);
    pub const INTERMEDIATE: Self = Self(0x10);
    pub const INTERMEDIATE_CONDITION_MET: Self = Self(0x14);
    pub const RESERVATION_CONFLICT: Self = Self(0x18);
    pub const COMMAND_TERMINATED: Self = Self(0x22);
    pub const QUEUE_FULL: Self = Self(0x28);
    pub const TASK_ABORTED: Self = Self(0x40);
}

impl Default for TargetStatus {
    fn default() -> Self {
        Self::GOOD
    }
}

/// A SCSI request and the results the engine writes back into it.
///
/// Transfer lengths are separate from the buffers: on input they say how much
/// to move, on output they reflect what the engine accepted (they are clamped
/// or zeroed on failure). Buffers must be at least as long as their lengths.
#[derive(Debug, Clone, Default)]
pub struct ScsiRequestPacket {
    pub direction: DataDirection,
    pub cdb: Vec<u8>,
    pub in_data: Vec<u8>,
    pub in_transfer_length: u32,
    pub out_data: Vec<u8>,
    pub out_transfer_length: u32,
    pub sense_data: Vec<u8>,
    pub sense_data_length: u8,
    pub host_adapter_status: HostAdapterStatus,
    pub target_status: TargetStatus,
}

impl ScsiRequestPacket {
    /// A request with no data phase.
    pub fn no_data(cdb: &[u8]) -> Self {
        Self {
            direction: DataDirection::None,
            cdb: cdb.to_vec(),
            ..Self::default()
        }
    }

    /// A device-to-host request reading `len` bytes.
    pub fn read(cdb: &[u8], len: u32) -> Self {
        Self {
            direction: DataDirection::Read,
            cdb: cdb.to_vec(),
            in_data: vec![0u8; len as usize],
            in_transfer_length: len,
            ..Self::default()
        }
    }

    /// A host-to-device request writing all of `data`.
    pub fn write(cdb: &[u8], data: &[u8]) -> Self {
        Self {
            direction: DataDirection::Write,
            cdb: cdb.to_vec(),
            out_data: data.to_vec(),
            out_transfer_length: data.len() as u32,
            ..Self::default()
        }
    }

    /// Adds a sense buffer of `len` bytes.
    pub fn with_sense(mut self, len: u8) -> Self {
        self.sense_data = vec![0u8; usize::from(len)];
        self.sense_data_length = len;
        self
    }

    /// The bytes the device returned, limited to the in-transfer length.
    pub fn data_in(&self) -> &[u8] {
        let len = (self.in_transfer_length as usize).min(self.in_data.len());
        &self.in_data[..len]
    }

    /// The sense bytes returned, limited to the sense length.
    pub fn sense(&self) -> &[u8] {
        let len = usize::from(self.sense_data_length).min(self.sense_data.len());
        &self.sense_data[..len]
    }

    /// The request never reached the device.
    pub(crate) fn report_host_adapter_error(&mut self) {
        self.in_transfer_length = 0;
        self.out_transfer_length = 0;
        self.sense_data_length = 0;
        self.host_adapter_status = HostAdapterStatus::OTHER;
        self.target_status = TargetStatus::GOOD;
    }

    pub(crate) fn report_overrun_underrun(&mut self) {
        self.sense_data_length = 0;
        self.host_adapter_status = HostAdapterStatus::DATA_OVERRUN_UNDERRUN;
        self.target_status = TargetStatus::GOOD;
    }

    /// The request failed mid-flight; nothing about its outcome is known.
    pub(crate) fn report_aborted(&mut self) {
        self.in_transfer_length = 0;
        self.out_transfer_length = 0;
        self.sense_data_length = 0;
        if self.host_adapter_status == HostAdapterStatus::OK {
            self.host_adapter_status = HostAdapterStatus::OTHER;
        }
        self.target_status = TargetStatus::TASK_ABORTED;
    }
}
