#![allow(dead_code)]

//! In-process Fusion-MPT adapter: a register file, guest memory shared with
//! the driver's DMA buffer, and a single-LUN SCSI disk behind it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use mpt_scsi::mpi::{
    self, IocInitReply, IocInitRequest, ScsiIoErrorReply, ScsiIoRequest, SgFlags,
};
use mpt_scsi::regs::{
    InterruptStatus, REG_DOORBELL, REG_INTERRUPT_MASK, REG_INTERRUPT_STATUS, REG_REPLY_QUEUE,
    REG_REQUEST_QUEUE, REPLY_QUEUE_EMPTY,
};
use mpt_scsi::{
    DmaBuffer, MptScsiConfig, MptScsiController, PciAttributes, PciFunction, PciIdentity,
    RegisterWindow, Stall, TransportError, DMA_REGION_LEN, TARGET_MAX_BYTES,
};

pub const DISK_BLOCK_SIZE: usize = 512;
pub const DISK_BLOCKS: usize = 64;

pub const ADDR0: [u8; TARGET_MAX_BYTES] = [0; TARGET_MAX_BYTES];

pub const INQUIRY_96: [u8; 6] = [0x12, 0, 0, 0, 0x60, 0];
pub const TEST_UNIT_READY: [u8; 6] = [0; 6];

// Upper doorbell bits the adapter reports alongside handshake data (IOC
// state "operational"); the driver must only look at the low 16 bits.
const DOORBELL_STATE_BITS: u32 = 0x2000_0000;

pub fn read10(lba: u32, blocks: u16) -> [u8; 10] {
    let lba = lba.to_be_bytes();
    let blocks = blocks.to_be_bytes();
    [0x28, 0, lba[0], lba[1], lba[2], lba[3], 0, blocks[0], blocks[1], 0]
}

pub fn write10(lba: u32, blocks: u16) -> [u8; 10] {
    let mut cdb = read10(lba, blocks);
    cdb[0] = 0x2A;
    cdb
}

/// Standard INQUIRY data followed by a recognizable filler.
pub fn inquiry_data(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len.max(36)];
    data[0] = 0x00; // direct-access block device
    data[2] = 0x05;
    data[3] = 0x02;
    data[4] = (data.len() - 5).min(0xFF) as u8;
    data[8..16].copy_from_slice(b"LSILOGIC");
    data[16..32].copy_from_slice(b"SIM DISK        ");
    data[32..36].copy_from_slice(b"1.00");
    for (i, byte) in data.iter_mut().enumerate().skip(36) {
        *byte = i as u8;
    }
    data.truncate(len);
    data
}

/// Fixed-format sense data the simulated target reports with every command.
pub const SIM_SENSE: [u8; 18] = [0x70, 0, 0, 0, 0, 0, 0, 10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

/// Guest memory visible to the adapter at `base`.
#[derive(Debug)]
pub struct GuestMemory {
    base: u64,
    bytes: Vec<u8>,
}

impl GuestMemory {
    fn offset(&self, addr: u64, len: usize) -> Option<usize> {
        let offset = usize::try_from(addr.checked_sub(self.base)?).ok()?;
        (offset.checked_add(len)? <= self.bytes.len()).then_some(offset)
    }

    pub fn read(&self, addr: u64, len: usize) -> Vec<u8> {
        let offset = self
            .offset(addr, len)
            .unwrap_or_else(|| panic!("adapter read outside guest memory: {addr:#x}+{len}"));
        self.bytes[offset..offset + len].to_vec()
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) {
        let offset = self
            .offset(addr, data.len())
            .unwrap_or_else(|| panic!("adapter write outside guest memory: {addr:#x}"));
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}

/// The driver's view of the shared guest memory.
#[derive(Debug, Clone)]
pub struct SharedDma {
    mem: Rc<RefCell<GuestMemory>>,
}

impl DmaBuffer for SharedDma {
    fn device_address(&self) -> u64 {
        self.mem.borrow().base
    }

    fn len(&self) -> usize {
        self.mem.borrow().bytes.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), TransportError> {
        let mem = self.mem.borrow();
        let capacity = mem.bytes.len();
        let src = offset
            .checked_add(buf.len())
            .and_then(|end| mem.bytes.get(offset..end))
            .ok_or(TransportError::DmaOutOfBounds {
                offset,
                len: buf.len(),
                capacity,
            })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), TransportError> {
        let mut mem = self.mem.borrow_mut();
        let capacity = mem.bytes.len();
        let dst = offset
            .checked_add(data.len())
            .and_then(|end| mem.bytes.get_mut(offset..end))
            .ok_or(TransportError::DmaOutOfBounds {
                offset,
                len: data.len(),
                capacity,
            })?;
        dst.copy_from_slice(data);
        Ok(())
    }
}

/// Misbehaviour the simulated adapter can be told to exhibit.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Post every reply token twice.
    pub duplicate_reply: bool,
    /// Answer SCSI requests with an error reply carrying this IOC status.
    pub error_ioc_status: Option<u16>,
    /// Post this token instead of the request's message context.
    pub bogus_token: Option<u32>,
    /// Writes to this register offset fail.
    pub fail_writes_to: Option<u32>,
    /// Interrupt-status polls that report nothing before a reply shows up.
    pub reply_delay_polls: usize,
    /// Accept requests but never answer them.
    pub never_reply: bool,
    /// IOC status reported in the IOC_INIT reply.
    pub init_ioc_status: u16,
}

#[derive(Debug, Default)]
enum Handshake {
    #[default]
    Idle,
    Receiving {
        remaining: usize,
        dwords: Vec<u32>,
    },
}

#[derive(Debug)]
pub struct SimState {
    pub mem: Rc<RefCell<GuestMemory>>,
    pub faults: Faults,
    pub disk: Vec<u8>,

    /// Every successful register write, in order.
    pub writes: Vec<(u32, u32)>,
    pub resets: usize,
    pub interrupt_mask: u32,
    pub init_request: Option<IocInitRequest>,
    pub requests: Vec<ScsiIoRequest>,
    /// Addresses written to the reply queue (reply frames handed to the
    /// adapter), in order.
    pub armed_frames: Vec<u32>,

    interrupt_status: u32,
    handshake: Handshake,
    handshake_reply: VecDeque<u16>,
    free_frames: VecDeque<u32>,
    reply_fifo: VecDeque<u32>,
    delay: usize,
}

/// A simulated adapter. Clones share state, so a test can keep a handle after
/// the controller takes ownership of its register window.
#[derive(Debug, Clone)]
pub struct MptSim {
    state: Rc<RefCell<SimState>>,
}

impl MptSim {
    pub fn new(dma_base: u64) -> Self {
        Self::with_memory(dma_base, DMA_REGION_LEN)
    }

    pub fn with_memory(dma_base: u64, len: usize) -> Self {
        let mem = Rc::new(RefCell::new(GuestMemory {
            base: dma_base,
            bytes: vec![0u8; len],
        }));
        let state = SimState {
            mem,
            faults: Faults::default(),
            disk: vec![0u8; DISK_BLOCK_SIZE * DISK_BLOCKS],
            writes: Vec::new(),
            resets: 0,
            interrupt_mask: 0,
            init_request: None,
            requests: Vec::new(),
            armed_frames: Vec::new(),
            interrupt_status: 0,
            handshake: Handshake::Idle,
            handshake_reply: VecDeque::new(),
            free_frames: VecDeque::new(),
            reply_fifo: VecDeque::new(),
            delay: 0,
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn dma(&self) -> SharedDma {
        SharedDma {
            mem: self.state.borrow().mem.clone(),
        }
    }

    pub fn state(&self) -> std::cell::Ref<'_, SimState> {
        self.state.borrow()
    }

    pub fn state_mut(&self) -> std::cell::RefMut<'_, SimState> {
        self.state.borrow_mut()
    }

    pub fn set_faults(&self, faults: Faults) {
        self.state.borrow_mut().faults = faults;
    }

    /// Number of register writes to `offset` so far.
    pub fn writes_to(&self, offset: u32) -> usize {
        self.state
            .borrow()
            .writes
            .iter()
            .filter(|(off, _)| *off == offset)
            .count()
    }

    pub fn pending_replies(&self) -> usize {
        self.state.borrow().reply_fifo.len()
    }

    pub fn last_request(&self) -> Option<ScsiIoRequest> {
        self.state.borrow().requests.last().copied()
    }
}

impl SimState {
    fn high_address(&self) -> u64 {
        let high = match self.init_request {
            Some(req) => req.host_mfa_high_addr,
            None => (self.mem.borrow().base >> 32) as u32,
        };
        u64::from(high) << 32
    }

    fn doorbell_write(&mut self, value: u32) {
        if let Handshake::Receiving { remaining, dwords } = &mut self.handshake {
            dwords.push(value);
            *remaining -= 1;
            if *remaining == 0 {
                let dwords = std::mem::take(dwords);
                self.handshake = Handshake::Idle;
                self.complete_handshake(&dwords);
            }
            return;
        }

        match (value >> 24) as u8 {
            mpi::DOORBELL_FUNCTION_RESET => {
                self.resets += 1;
                self.handshake_reply.clear();
                self.free_frames.clear();
                self.reply_fifo.clear();
                self.interrupt_status = 0;
            }
            mpi::DOORBELL_FUNCTION_HANDSHAKE => {
                let count = ((value >> 16) & 0xFF) as usize;
                self.handshake = Handshake::Receiving {
                    remaining: count,
                    dwords: Vec::with_capacity(count),
                };
            }
            function => panic!("unexpected doorbell function {function:#x}"),
        }
    }

    fn complete_handshake(&mut self, dwords: &[u32]) {
        let mut raw = [0u8; IocInitRequest::SIZE];
        for (chunk, dword) in raw.chunks_exact_mut(4).zip(dwords) {
            chunk.copy_from_slice(&dword.to_le_bytes());
        }
        let request = IocInitRequest::parse(&raw);
        assert_eq!(request.function, mpi::FUNCTION_IOC_INIT);
        self.init_request = Some(request);

        let reply = IocInitReply {
            who_init: request.who_init,
            message_length: (IocInitReply::SIZE / 4) as u8,
            function: mpi::FUNCTION_IOC_INIT,
            max_devices: request.max_devices,
            max_buses: request.max_buses,
            message_context: request.message_context,
            ioc_status: self.faults.init_ioc_status,
            ..IocInitReply::default()
        };
        let bytes = reply.to_bytes();
        self.handshake_reply = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        self.interrupt_status |= InterruptStatus::DOORBELL.bits();
    }

    fn request_posted(&mut self, low_address: u32) {
        let address = self.high_address() | u64::from(low_address);
        let bytes = self.mem.borrow().read(address, ScsiIoRequest::SIZE);
        let mut raw = [0u8; ScsiIoRequest::SIZE];
        raw.copy_from_slice(&bytes);
        let request = ScsiIoRequest::parse(&raw);
        assert_eq!(request.function, mpi::FUNCTION_SCSI_IO_REQUEST);
        self.requests.push(request);

        self.execute(&request);

        if self.faults.never_reply {
            return;
        }
        let token = match (self.faults.error_ioc_status, self.faults.bogus_token) {
            (_, Some(token)) => token,
            (Some(status), None) => match self.post_error_reply(&request, status) {
                Some(token) => token,
                None => return,
            },
            (None, None) => request.message_context,
        };
        self.reply_fifo.push_back(token);
        if self.faults.duplicate_reply {
            self.reply_fifo.push_back(token);
        }
        self.delay = self.faults.reply_delay_polls;
    }

    fn post_error_reply(&mut self, request: &ScsiIoRequest, ioc_status: u16) -> Option<u32> {
        // Without a free reply frame the adapter cannot report the error.
        let frame = self.free_frames.pop_front()?;
        let reply = ScsiIoErrorReply {
            target_id: request.target_id,
            message_length: (ScsiIoErrorReply::SIZE / 4) as u8,
            function: mpi::FUNCTION_SCSI_IO_REQUEST,
            cdb_length: request.cdb_length,
            sense_buffer_length: request.sense_buffer_length,
            message_context: request.message_context,
            ioc_status,
            ..ScsiIoErrorReply::default()
        };
        let address = self.high_address() | u64::from(frame);
        self.mem.borrow_mut().write(address, &reply.to_bytes());
        Some(mpi::REPLY_ADDRESS_FLAG | (frame >> 1))
    }

    fn execute(&mut self, request: &ScsiIoRequest) {
        if request.sense_buffer_length > 0 {
            let len = usize::from(request.sense_buffer_length).min(SIM_SENSE.len());
            let address = self.high_address() | u64::from(request.sense_buffer_low_address);
            self.mem.borrow_mut().write(address, &SIM_SENSE[..len]);
        }

        let len = request.data_length as usize;
        let cdb = request.cdb();
        match cdb.first().copied() {
            Some(0x12) if len > 0 => {
                self.mem
                    .borrow_mut()
                    .write(request.sg.address, &inquiry_data(len));
            }
            Some(0x28) if len > 0 => {
                let start = lba(cdb) * DISK_BLOCK_SIZE;
                let data = self.disk[start..start + len].to_vec();
                self.mem.borrow_mut().write(request.sg.address, &data);
            }
            Some(0x2A) if len > 0 => {
                assert!(request.sg.flags.contains(SgFlags::BUFFER_CONTAINS_DATA));
                let start = lba(cdb) * DISK_BLOCK_SIZE;
                let data = self.mem.borrow().read(request.sg.address, len);
                self.disk[start..start + len].copy_from_slice(&data);
            }
            _ => {}
        }
    }
}

fn lba(cdb: &[u8]) -> usize {
    u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]) as usize
}

impl RegisterWindow for MptSim {
    fn read32(&mut self, offset: u32) -> Result<u32, TransportError> {
        let mut state = self.state.borrow_mut();
        match offset {
            REG_DOORBELL => Ok(state
                .handshake_reply
                .pop_front()
                .map_or(0, |word| DOORBELL_STATE_BITS | u32::from(word))),
            REG_INTERRUPT_STATUS => {
                let mut status = state.interrupt_status;
                if !state.reply_fifo.is_empty() {
                    if state.delay > 0 {
                        state.delay -= 1;
                    } else {
                        status |= InterruptStatus::REPLY.bits();
                    }
                }
                Ok(status)
            }
            REG_INTERRUPT_MASK => Ok(state.interrupt_mask),
            REG_REPLY_QUEUE => Ok(state.reply_fifo.pop_front().unwrap_or(REPLY_QUEUE_EMPTY)),
            _ => Ok(0),
        }
    }

    fn write32(&mut self, offset: u32, value: u32) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if state.faults.fail_writes_to == Some(offset) {
            return Err(TransportError::RegisterWrite { offset, value });
        }
        state.writes.push((offset, value));
        match offset {
            REG_DOORBELL => state.doorbell_write(value),
            REG_INTERRUPT_STATUS => state.interrupt_status = 0,
            REG_INTERRUPT_MASK => state.interrupt_mask = value,
            REG_REQUEST_QUEUE => state.request_posted(value),
            REG_REPLY_QUEUE => {
                state.armed_frames.push(value);
                state.free_frames.push_back(value);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Returns immediately; the simulated adapter answers synchronously.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStall;

impl Stall for NoStall {
    fn stall(&mut self, _duration: Duration) {}
}

pub fn no_stall() -> Box<dyn Stall + Send> {
    Box::new(NoStall)
}

pub type SimController = MptScsiController<MptSim, SharedDma>;

pub fn start_controller(sim: &MptSim) -> SimController {
    start_controller_with(sim, MptScsiConfig::default())
}

pub fn start_controller_with(sim: &MptSim, config: MptScsiConfig) -> SimController {
    MptScsiController::start_with_stall(sim.clone(), sim.dma(), config, no_stall())
        .expect("controller start")
}

/// A PCI function hosting a simulated adapter.
#[derive(Debug)]
pub struct SimPci {
    pub identity: PciIdentity,
    pub attributes: PciAttributes,
    pub sim: MptSim,
    pub dual_address_cycle_fails: bool,
    pub enable_fails: bool,
    pub dma_allocation_fails: bool,
    /// Every attribute set passed to `set_attributes`. Shared so it survives
    /// the function being dropped by a failed start.
    pub restored: Rc<RefCell<Vec<PciAttributes>>>,
}

impl SimPci {
    pub fn new(device_id: u16, dma_base: u64) -> Self {
        Self {
            identity: PciIdentity {
                vendor_id: 0x1000,
                device_id,
            },
            attributes: PciAttributes::MEMORY,
            sim: MptSim::new(dma_base),
            dual_address_cycle_fails: false,
            enable_fails: false,
            dma_allocation_fails: false,
            restored: Rc::default(),
        }
    }
}

impl PciFunction for SimPci {
    type Registers = MptSim;
    type Dma = SharedDma;

    fn identity(&mut self) -> Result<PciIdentity, TransportError> {
        Ok(self.identity)
    }

    fn attributes(&mut self) -> Result<PciAttributes, TransportError> {
        Ok(self.attributes)
    }

    fn enable_attributes(&mut self, attributes: PciAttributes) -> Result<(), TransportError> {
        if self.enable_fails {
            return Err(TransportError::Pci("enable attributes"));
        }
        if self.dual_address_cycle_fails && attributes.contains(PciAttributes::DUAL_ADDRESS_CYCLE)
        {
            return Err(TransportError::Pci("dual address cycle unsupported"));
        }
        self.attributes |= attributes;
        Ok(())
    }

    fn set_attributes(&mut self, attributes: PciAttributes) -> Result<(), TransportError> {
        self.restored.borrow_mut().push(attributes);
        self.attributes = attributes;
        Ok(())
    }

    fn map_bar0(&mut self) -> Result<MptSim, TransportError> {
        Ok(self.sim.clone())
    }

    fn allocate_dma(&mut self, len: usize) -> Result<SharedDma, TransportError> {
        let dma = self.sim.dma();
        if self.dma_allocation_fails || dma.len() < len {
            return Err(TransportError::DmaAllocation { len });
        }
        Ok(dma)
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::TRACE)
        .try_init();
}
