#![no_std]

//! A small driver for the Texas Instruments BQ35100 primary battery gauge

#[cfg(test)]
extern crate std;

pub(crate) mod fmt;

#[cfg(feature = "calibration")]
pub mod calibration;
pub mod config;
#[cfg(feature = "calibration")]
pub mod float;
pub mod gauge;
pub mod known_chips;
pub mod memory;
pub mod power;
pub mod registers;
pub mod security;
pub mod sensor;
pub mod status;

#[cfg(test)]
mod mock;

use byteorder::{ByteOrder, LittleEndian};
use embedded_hal_async::{delay, i2c};
#[cfg(feature = "defmt")]
use fmt::*;
use registers::*;

pub use config::{Config, TemperatureSource};
pub use gauge::GaugeMode;
pub use security::SecurityMode;
pub use sensor::{Channel, GaugeState, Reading, SensorValue};

/// Time the chip needs to digest a subcommand
const SUBCOMMAND_SETTLE_MS: u32 = 10;

/// Frame-level failures reported by the chip or detected in its replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// The chip echoed back a different extended data address
    AddressMismatch,
    ChecksumMismatch,
    /// Declared frame length can't describe a valid frame
    BadFrameLength(u8),
    /// The chip flagged FLASHF after a write
    FlashWriteFailed,
}

/// Chip error type
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChipError<E> {
    I2CError(E),
    Protocol(ProtocolError),
    /// Security mode could not be confirmed. Carries the last mode the chip reported
    Security(SecurityMode),
    /// Address, length or value outside of what the hardware accepts
    Range,
    UnsupportedWidth,
    PollTimeout,
    WrongDevice(u16),
    /// Current is only measured while gauging
    GaugeDisabled,
    /// Gauge enable pin could not be driven
    Pin,
}

impl<E> From<E> for ChipError<E> {
    fn from(e: E) -> Self {
        Self::I2CError(e)
    }
}

/// Chip handle
pub struct Bq35100<I, D> {
    i2c: I,
    delay: D,
    addr: u8,
    config: Config,
    ready: bool,
    pub(crate) state: GaugeState,
}

impl<I, D, E> Bq35100<I, D>
where
    D: delay::DelayNs,
    I: i2c::I2c<Error = E>,
{
    /// Reads a little-endian register, 1, 2 or 4 bytes wide
    pub async fn read_register(&mut self, register: u8, width: usize) -> Result<u32, ChipError<E>> {
        let mut buffer = [0u8; 4];

        if !matches!(width, 1 | 2 | 4) {
            return Err(ChipError::UnsupportedWidth);
        }

        self.i2c
            .write_read(self.addr, &[register], &mut buffer[..width])
            .await?;

        Ok(LittleEndian::read_u32(&buffer))
    }

    /// Writes a 16-bit little-endian register. Nothing else is supported by the chip
    pub async fn write_register(&mut self, register: u8, value: u16) -> Result<(), ChipError<E>> {
        let mut request = [register, 0, 0];
        LittleEndian::write_u16(&mut request[1..], value);

        debug!("[{:#x}] = {:#x}", register, value);

        self.i2c.write(self.addr, &request).await?;
        Ok(())
    }

    async fn read_u8(&mut self, register: u8) -> Result<u8, ChipError<E>> {
        Ok(self.read_register(register, 1).await? as u8)
    }

    async fn read_u16(&mut self, register: u8) -> Result<u16, ChipError<E>> {
        Ok(self.read_register(register, 2).await? as u16)
    }

    /*
     * Subcommands go to ManufacturerAccessControl. The chip needs some time to
     * process them, so every write is followed by a short nap. Never issue two
     * of them back-to-back without it.
     */
    pub async fn write_subcommand(&mut self, subcommand: u16) -> Result<(), ChipError<E>> {
        self.write_register(commands::MAC_CONTROL, subcommand)
            .await?;
        self.delay.delay_ms(SUBCOMMAND_SETTLE_MS).await;
        Ok(())
    }

    /// Reads the response of the previous subcommand
    pub async fn read_subcommand_result(&mut self) -> Result<u16, ChipError<E>> {
        self.read_u16(commands::MAC_DATA).await
    }

    async fn read_control(&mut self, subcommand: u16) -> Result<u16, ChipError<E>> {
        self.write_subcommand(subcommand).await?;
        self.read_subcommand_result().await
    }

    /// Reads the contents of the control status register
    pub async fn status(&mut self) -> Result<ControlStatus, ChipError<E>> {
        let raw = self.read_u16(commands::CONTROL).await?;
        Ok(ControlStatus::from(raw))
    }

    /// Gets the firmware version
    pub async fn fw_version(&mut self) -> Result<u16, ChipError<E>> {
        self.read_control(control_subcommands::FW_VERSION).await
    }

    /// Gets the hardware version
    pub async fn hw_version(&mut self) -> Result<u16, ChipError<E>> {
        self.read_control(control_subcommands::HW_VERSION).await
    }

    /// Resets the chip. The security mode has to be read again afterwards
    pub async fn reset(&mut self) -> Result<(), ChipError<E>> {
        info!("performing reset...");

        self.write_subcommand(control_subcommands::RESET).await?;
        self.state.security_mode = SecurityMode::Unknown;
        self.state.gauge_enabled = false;

        Ok(())
    }

    /// Brings the chip up according to the configuration given to [`Bq35100::new`].
    /// Stops at the first step that fails, the device is not ready in that case
    pub async fn init(&mut self) -> Result<(), ChipError<E>> {
        let config = self.config;

        self.ready = false;
        self.state.gauge_enabled = false;

        self.probe().await?;
        self.read_security_mode().await?;
        self.set_gauge_mode(config.gauge_mode).await?;
        self.use_internal_temperature_source(config.temperature_source == TemperatureSource::Internal)
            .await?;
        self.set_design_capacity(config.design_capacity).await?;
        self.set_security_mode(SecurityMode::Sealed).await?;
        self.start().await?;

        info!("gauge is ready");
        self.ready = true;

        Ok(())
    }

    /// Whether [`Bq35100::init`] went through
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Creates the driver instance
    pub fn new(i2c: I, delay: D, config: Config) -> Self {
        Self {
            i2c,
            delay,
            addr: config.address,
            config,
            ready: false,
            state: GaugeState::default(),
        }
    }

    /// Gives the bus and the delay back
    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }
}
