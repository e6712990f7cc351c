//! Request queue submission and reply queue polling.

use std::sync::atomic::{fence, Ordering};
use std::time::Duration;

use crate::config::{MptScsiConfig, Stall};
use crate::error::{DeviceFault, MptError, TransportError};
use crate::regs::{
    self, InterruptStatus, RegisterWindow, REG_REPLY_QUEUE, REG_REQUEST_QUEUE, REPLY_QUEUE_EMPTY,
};

/// Posts the request frame at `request_address` to the adapter.
pub fn submit<R: RegisterWindow>(regs: &mut R, request_address: u32) -> Result<(), TransportError> {
    // The frame must be fully visible in memory before the adapter learns
    // its address.
    fence(Ordering::SeqCst);
    tracing::trace!(request_address, "submit");
    regs.write32(REG_REQUEST_QUEUE, request_address)
}

/// Polls until the adapter posts a reply, then pops and returns its token.
///
/// Exactly one reply may be pending: the reply queue has to read back empty
/// after the token.
pub fn await_reply<R: RegisterWindow>(
    regs: &mut R,
    config: &MptScsiConfig,
    stall: &mut dyn Stall,
) -> Result<u32, MptError> {
    let mut waited = Duration::ZERO;
    loop {
        let status = regs::read_interrupt_status(regs)?;
        if status.contains(InterruptStatus::REPLY) {
            break;
        }
        if let Some(timeout) = config.poll_timeout {
            if waited >= timeout {
                tracing::error!(waited_us = waited.as_micros() as u64, "no reply from adapter");
                return Err(MptError::Timeout {
                    elapsed_us: waited.as_micros() as u64,
                });
            }
        }
        stall.stall(config.stall_per_poll);
        waited += config.stall_per_poll;
    }

    let token = regs.read32(REG_REPLY_QUEUE)?;
    let next = regs.read32(REG_REPLY_QUEUE)?;
    if next != REPLY_QUEUE_EMPTY {
        // Later replies can no longer be matched with their requests.
        tracing::error!(token, next, "reply queue holds more than one reply");
        return Err(DeviceFault::QueueDesync { token, next }.into());
    }
    regs::clear_interrupt_status(regs)?;
    tracing::trace!(token, waited_us = waited.as_micros() as u64, "reply");
    Ok(token)
}
