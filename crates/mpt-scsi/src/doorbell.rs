//! Doorbell handshake channel.
//!
//! The doorbell register carries out-of-band commands (reset, handshake).
//! Handshake payload goes out as a burst of dword writes; the reply comes back
//! as a burst of dword reads that each carry 16 bits of payload.

use crate::error::TransportError;
use crate::mpi::{DOORBELL_FUNCTION_HANDSHAKE, DOORBELL_FUNCTION_RESET};
use crate::regs::{RegisterWindow, REG_DOORBELL};

/// Encodes a doorbell command word: function in the top byte, argument below.
pub fn doorbell_word(function: u8, arg: u8) -> u32 {
    (u32::from(function) << 24) | (u32::from(arg) << 16)
}

pub fn ring<R: RegisterWindow>(regs: &mut R, function: u8, arg: u8) -> Result<(), TransportError> {
    tracing::trace!(function, arg, "doorbell");
    regs.write32(REG_DOORBELL, doorbell_word(function, arg))
}

pub fn reset<R: RegisterWindow>(regs: &mut R) -> Result<(), TransportError> {
    ring(regs, DOORBELL_FUNCTION_RESET, 0)
}

struct PayloadFits<const N: usize>;

impl<const N: usize> PayloadFits<N> {
    const OK: () = assert!(N <= u8::MAX as usize, "handshake payload exceeds 255 dwords");
}

/// Starts a handshake announcing `N` dwords and sends them.
pub fn handshake<R: RegisterWindow, const N: usize>(
    regs: &mut R,
    payload: &[u32; N],
) -> Result<(), TransportError> {
    let () = PayloadFits::<N>::OK;
    ring(regs, DOORBELL_FUNCTION_HANDSHAKE, N as u8)?;
    regs.write_fifo32(REG_DOORBELL, payload)
}

/// Reads a `words`-long handshake reply (16 bits per doorbell read).
pub fn drain_reply<R: RegisterWindow>(regs: &mut R, words: usize) -> Result<Vec<u8>, TransportError> {
    let mut out = Vec::with_capacity(words * 2);
    for _ in 0..words {
        let value = regs.read32(REG_DOORBELL)?;
        out.extend_from_slice(&(value as u16).to_le_bytes());
    }
    Ok(out)
}
