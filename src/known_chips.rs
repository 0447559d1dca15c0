//! Chip identification. The subcommand set is shared with a few other
//! TI gauges, so make sure we are really talking to a BQ35100

use embedded_hal_async::{delay, i2c};

#[cfg(feature = "defmt")]
use crate::fmt::*;
use crate::registers::*;
use crate::{Bq35100, ChipError};

const PROBE_SETTLE_MS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChipType {
    BQ35100,
    Unknown(u16),
}

impl From<u16> for ChipType {
    fn from(code: u16) -> Self {
        match code {
            DEVICE_TYPE_ID => Self::BQ35100,
            other => Self::Unknown(other),
        }
    }
}

impl<I, D, E> Bq35100<I, D>
where
    D: delay::DelayNs,
    I: i2c::I2c<Error = E>,
{
    /// Tries to communicate with the chip and checks the device type
    pub async fn probe(&mut self) -> Result<ChipType, ChipError<E>> {
        self.write_subcommand(control_subcommands::DEVICE_TYPE)
            .await?;
        self.delay.delay_ms(PROBE_SETTLE_MS).await;

        let response = self.read_subcommand_result().await?;

        match ChipType::from(response) {
            ChipType::BQ35100 => {
                info!("found BQ35100");
                Ok(ChipType::BQ35100)
            }
            ChipType::Unknown(id) => {
                error!("wrong device type {:#x}, expected {:#x}", id, DEVICE_TYPE_ID);
                Err(ChipError::WrongDevice(id))
            }
        }
    }
}
