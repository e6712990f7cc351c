//! The per-controller device context and the pass-through entry point.

use crate::config::{MptScsiConfig, Stall, ThreadStall};
use crate::device_path::ScsiDevicePath;
use crate::dma::{DmaBuffer, DmaRegion, DmaSlot};
use crate::error::{DeviceFault, MptError, Result};
use crate::init;
use crate::mpi::IocInitReply;
use crate::packet::{ScsiRequestPacket, TargetId, TARGET_MAX_BYTES, TARGET_UNINITIALIZED};
use crate::queue;
use crate::regs::RegisterWindow;
use crate::reply;
use crate::request;

/// The adapter models exactly one target.
pub const MAX_TARGET: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    /// A request failed mid-flight; the adapter may still reference the
    /// request or error frames.
    Faulted,
}

/// One initialized Fusion-MPT controller.
///
/// `pass_thru` takes `&mut self`: at most one request is in flight per
/// controller, and callers sharing a controller serialize through whatever
/// owns it.
pub struct MptScsiController<R, D> {
    regs: R,
    dma: DmaRegion<D>,
    config: MptScsiConfig,
    stall: Box<dyn Stall + Send>,
    state: State,
    init_reply: IocInitReply,
}

impl<R, D> std::fmt::Debug for MptScsiController<R, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MptScsiController")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<R: RegisterWindow, D: DmaBuffer> MptScsiController<R, D> {
    /// Takes ownership of the register window and DMA buffer and brings the
    /// adapter up.
    pub fn start(regs: R, dma: D, config: MptScsiConfig) -> Result<Self> {
        Self::start_with_stall(regs, dma, config, Box::new(ThreadStall))
    }

    pub fn start_with_stall(
        mut regs: R,
        dma: D,
        config: MptScsiConfig,
        stall: Box<dyn Stall + Send>,
    ) -> Result<Self> {
        config.validate()?;
        let dma = DmaRegion::new(dma)?;
        let init_reply = init::initialize(&mut regs, &dma)?;
        Ok(Self {
            regs,
            dma,
            config,
            stall,
            state: State::Ready,
            init_reply,
        })
    }

    pub fn config(&self) -> &MptScsiConfig {
        &self.config
    }

    pub fn init_reply(&self) -> &IocInitReply {
        &self.init_reply
    }

    pub fn dma(&self) -> &DmaRegion<D> {
        &self.dma
    }

    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    /// Whether a request failed in a way that leaves the adapter's state
    /// unknown. The engine keeps accepting requests; recovering is up to the
    /// owner (see [`Self::reinitialize`]).
    pub fn is_faulted(&self) -> bool {
        self.state == State::Faulted
    }

    /// Runs the bring-up sequence again, clearing a fault on success.
    pub fn reinitialize(&mut self) -> Result<()> {
        self.init_reply = init::initialize(&mut self.regs, &self.dma)?;
        self.state = State::Ready;
        Ok(())
    }

    /// Sends `packet` to `target`/`lun` and blocks until the adapter replies.
    ///
    /// The packet's status and length fields are updated on success and on
    /// every failure that got past validation.
    pub fn pass_thru(
        &mut self,
        target: &TargetId,
        lun: u64,
        packet: &mut ScsiRequestPacket,
    ) -> Result<()> {
        let span = tracing::debug_span!(
            "pass_thru",
            target = target[0],
            lun,
            opcode = packet.cdb.first().copied()
        );
        let _enter = span.enter();

        request::build(&mut self.dma, target, lun, packet)?;

        let request_address = self.dma.low_address_of(DmaSlot::Request);
        if let Err(source) = queue::submit(&mut self.regs, request_address) {
            tracing::error!(error = %source, "request submission failed");
            packet.report_host_adapter_error();
            return Err(DeviceFault::SubmissionFailed(source).into());
        }

        let result = queue::await_reply(&mut self.regs, &self.config, self.stall.as_mut())
            .and_then(|token| reply::interpret(&mut self.regs, &self.dma, token, packet));
        if let Err(err) = result {
            tracing::error!(error = %err, "request aborted, controller state is unknown");
            packet.report_aborted();
            self.state = State::Faulted;
            return Err(err);
        }

        tracing::debug!(
            host_adapter_status = packet.host_adapter_status.0,
            target_status = packet.target_status.0,
            "request complete"
        );
        Ok(())
    }

    /// Advances `target`/`lun` to the next address. An all-0xFF target
    /// restarts enumeration.
    pub fn get_next_target_lun(&self, target: &mut TargetId, lun: &mut u64) -> Result<()> {
        if *target == TARGET_UNINITIALIZED {
            *target = [0; TARGET_MAX_BYTES];
            *lun = 0;
        } else if target[0] > MAX_TARGET || *lun > 0 {
            return Err(MptError::InvalidParameter("target or lun out of range"));
        } else if target[0] < MAX_TARGET {
            target[0] += 1;
        } else {
            return Err(MptError::NotFound);
        }
        Ok(())
    }

    pub fn get_next_target(&self, target: &mut TargetId) -> Result<()> {
        if *target == TARGET_UNINITIALIZED {
            *target = [0; TARGET_MAX_BYTES];
        } else if target[0] > MAX_TARGET {
            return Err(MptError::InvalidParameter("target out of range"));
        } else if target[0] < MAX_TARGET {
            target[0] += 1;
        } else {
            return Err(MptError::NotFound);
        }
        Ok(())
    }

    pub fn build_device_path(&self, target: &TargetId, lun: u64) -> Result<ScsiDevicePath> {
        if target[0] > MAX_TARGET || lun > 0 {
            return Err(MptError::NotFound);
        }
        Ok(ScsiDevicePath {
            pun: u16::from(target[0]),
            lun: lun as u16,
        })
    }

    /// Resolves an encoded SCSI device path node back to a target and LUN.
    pub fn get_target_lun(&self, device_path: &[u8]) -> Result<(TargetId, u64)> {
        let path = ScsiDevicePath::parse(device_path)?;
        if path.pun > u16::from(MAX_TARGET) || path.lun > 0 {
            return Err(MptError::NotFound);
        }
        let mut target = [0u8; TARGET_MAX_BYTES];
        target[0] = path.pun as u8;
        Ok((target, u64::from(path.lun)))
    }

    pub fn reset_channel(&mut self) -> Result<()> {
        Err(MptError::Unsupported("channel reset"))
    }

    pub fn reset_target_lun(&mut self, _target: &TargetId, _lun: u64) -> Result<()> {
        Err(MptError::Unsupported("target reset"))
    }

    /// Quiesces the adapter and hands back the register window and DMA
    /// buffer. The buffer is only returned once the adapter has been reset
    /// and can no longer touch it.
    pub fn shutdown(mut self) -> std::result::Result<(R, D), (Self, MptError)> {
        match init::reset(&mut self.regs) {
            Ok(()) => {
                tracing::debug!("controller quiesced");
                Ok((self.regs, self.dma.into_inner()))
            }
            Err(err) => Err((self, err)),
        }
    }
}
