use std::time::Duration;

use crate::error::MptError;

/// Tunables of a controller instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MptScsiConfig {
    /// Delay between two reads of the interrupt-status register while
    /// waiting for a reply.
    pub stall_per_poll: Duration,
    /// Give up waiting for a reply after this much polling. `None` polls
    /// until the adapter answers.
    pub poll_timeout: Option<Duration>,
}

impl Default for MptScsiConfig {
    fn default() -> Self {
        Self {
            stall_per_poll: Duration::from_micros(5),
            poll_timeout: None,
        }
    }
}

impl MptScsiConfig {
    pub fn with_stall_per_poll(mut self, stall: Duration) -> Self {
        self.stall_per_poll = stall;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), MptError> {
        // The deadline is measured in accumulated stall time.
        if self.poll_timeout.is_some() && self.stall_per_poll.is_zero() {
            return Err(MptError::InvalidParameter(
                "poll timeout requires a non-zero stall per poll",
            ));
        }
        Ok(())
    }
}

/// Busy-wait provider used between polls.
///
/// The engine runs without a scheduler to yield to; the only notion of time it
/// has is the delays it asks for.
pub trait Stall {
    fn stall(&mut self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadStall;

impl Stall for ThreadStall {
    fn stall(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
