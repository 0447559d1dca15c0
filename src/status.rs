//! Polling the control status register

use embedded_hal_async::{delay, i2c};

#[cfg(feature = "defmt")]
use crate::fmt::*;
use crate::registers::ControlStatus;
use crate::{Bq35100, ChipError};

/// How many times the status register is read before giving up
pub const STATUS_POLL_ATTEMPTS: u8 = 5;

/// Bounded attempt counter shared by everything that retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryBudget {
    attempt: u8,
    attempts: u8,
}

impl RetryBudget {
    pub(crate) const fn new(attempts: u8) -> Self {
        Self {
            attempt: 0,
            attempts,
        }
    }

    /// Starts the next attempt. Returns false once the budget is spent
    pub(crate) fn next_attempt(&mut self) -> bool {
        if self.attempt >= self.attempts {
            return false;
        }

        self.attempt += 1;
        true
    }

    /// No attempts left after the current one
    pub(crate) fn is_spent(&self) -> bool {
        self.attempt >= self.attempts
    }

    pub(crate) fn attempt(&self) -> u8 {
        self.attempt
    }
}

impl<I, D, E> Bq35100<I, D>
where
    D: delay::DelayNs,
    I: i2c::I2c<Error = E>,
{
    /// Waits until `status & mask == expected`, sleeping `interval_ms` between reads
    pub async fn wait_for_status(
        &mut self,
        expected: ControlStatus,
        mask: ControlStatus,
        interval_ms: u32,
    ) -> Result<(), ChipError<E>> {
        let mut budget = RetryBudget::new(STATUS_POLL_ATTEMPTS);

        while budget.next_attempt() {
            let status = self.status().await?;

            if status & mask == expected {
                return Ok(());
            }

            debug!(
                "status not there yet: {:#x}, expected {:#x} (attempt {})",
                status.bits(),
                expected.bits(),
                budget.attempt()
            );

            if !budget.is_spent() {
                self.delay.delay_ms(interval_ms).await;
            }
        }

        warn!("status poll timed out");
        Err(ChipError::PollTimeout)
    }
}
