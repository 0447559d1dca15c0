//! The gauge enable (GE) pin cuts power to the whole chip. Gauging has to be
//! stopped before that, or the chip loses what it accumulated since the last save

use embedded_hal::digital::OutputPin;
use embedded_hal_async::{delay, i2c};

#[cfg(feature = "defmt")]
use crate::fmt::*;
use crate::{Bq35100, ChipError, SecurityMode};

const POWER_UP_SETTLE_MS: u32 = 200;

impl<I, D, E> Bq35100<I, D>
where
    D: delay::DelayNs,
    I: i2c::I2c<Error = E>,
{
    /// Powers the chip up and starts gauging. Returns whether gauging was confirmed
    pub async fn power_on<P: OutputPin>(&mut self, enable: &mut P) -> Result<bool, ChipError<E>> {
        enable.set_high().map_err(|_| ChipError::Pin)?;
        self.delay.delay_ms(POWER_UP_SETTLE_MS).await;

        info!("gauge powered up");

        // Fresh boot, whatever was cached is stale
        self.state.gauge_enabled = false;
        self.state.security_mode = SecurityMode::Unknown;

        self.start().await
    }

    /// Stops gauging and powers the chip down. The pin is released even if
    /// stopping failed, the error is reported afterwards
    pub async fn power_off<P: OutputPin>(&mut self, enable: &mut P) -> Result<(), ChipError<E>> {
        let stopped = self.stop().await;

        enable.set_low().map_err(|_| ChipError::Pin)?;
        info!("gauge powered down");

        self.state.gauge_enabled = false;
        self.state.security_mode = SecurityMode::Unknown;

        stopped.map(|_| ())
    }
}
