//! Gauging lifecycle and the settings that drive it

use byteorder::{BigEndian, ByteOrder};
use embedded_hal_async::{delay, i2c};

#[cfg(feature = "defmt")]
use crate::fmt::*;
use crate::registers::*;
use crate::{Bq35100, ChipError};

const GAUGE_START_POLL_MS: u32 = 100;
// Stopping makes the chip update its flash, which takes a while
const GAUGE_STOP_POLL_MS: u32 = 500;
const CONFIG_SETTLE_MS: u32 = 100;
const TEMPERATURE_SOURCE_SETTLE_MS: u32 = 50;

const GAUGE_MODE_MASK: u8 = OperationConfigA::GMSEL1.bits() | OperationConfigA::GMSEL0.bits();

/// Algorithm the gauge uses to track the battery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GaugeMode {
    Accumulator = 0,
    StateOfHealth = 1,
    EndOfService = 2,
    #[default]
    Unknown = 3,
}

impl From<u8> for GaugeMode {
    fn from(config: u8) -> Self {
        match config & GAUGE_MODE_MASK {
            0 => Self::Accumulator,
            1 => Self::StateOfHealth,
            2 => Self::EndOfService,
            _ => Self::Unknown,
        }
    }
}

impl<I, D, E> Bq35100<I, D>
where
    D: delay::DelayNs,
    I: i2c::I2c<Error = E>,
{
    async fn read_operation_config(&mut self) -> Result<u8, ChipError<E>> {
        let mut config = [0u8];
        self.read_extended(flash::OPERATION_CONFIG_A, &mut config)
            .await?;
        Ok(config[0])
    }

    /// Gauge mode as last read or written
    pub fn gauge_mode(&self) -> GaugeMode {
        self.state.gauge_mode
    }

    /// Reads the gauge mode from data flash
    pub async fn read_gauge_mode(&mut self) -> Result<GaugeMode, ChipError<E>> {
        let mode = GaugeMode::from(self.read_operation_config().await?);

        debug!("gauge mode is {}", mode);
        self.state.gauge_mode = mode;

        Ok(mode)
    }

    /// Selects the gauging algorithm. Flash is left alone if it already matches
    pub async fn set_gauge_mode(&mut self, mode: GaugeMode) -> Result<(), ChipError<E>> {
        if mode == GaugeMode::Unknown {
            error!("cannot set unknown gauge mode");
            return Err(ChipError::Range);
        }

        let mut config = self.read_operation_config().await?;

        if GaugeMode::from(config) != mode {
            config = (config & !GAUGE_MODE_MASK) | mode as u8;

            self.delay.delay_ms(CONFIG_SETTLE_MS).await;
            self.write_extended(flash::OPERATION_CONFIG_A, &[config])
                .await?;

            info!("gauge mode set to {}", mode);
        } else {
            debug!("already in {} gauge mode", mode);
        }

        self.state.gauge_mode = mode;

        Ok(())
    }

    /// Whether gauging was confirmed running
    pub fn gauge_enabled(&self) -> bool {
        self.state.gauge_enabled
    }

    /// Starts gauging. Returns whether the chip confirmed it; an unconfirmed
    /// start is not an error, but the gauge is considered off afterwards
    pub async fn start(&mut self) -> Result<bool, ChipError<E>> {
        if self.state.gauge_enabled {
            warn!("gauge already enabled");
            return Ok(true);
        }

        self.write_subcommand(control_subcommands::GAUGE_START)
            .await?;

        match self
            .wait_for_status(ControlStatus::GA, ControlStatus::GA, GAUGE_START_POLL_MS)
            .await
        {
            Ok(()) => {
                info!("gauge enabled");
                self.state.gauge_enabled = true;
            }
            Err(ChipError::PollTimeout) => {
                error!("gauge not enabled");
                self.state.gauge_enabled = false;
            }
            Err(e) => return Err(e),
        }

        Ok(self.state.gauge_enabled)
    }

    /// Stops gauging, letting the chip finish its bookkeeping. Returns whether
    /// the chip confirmed it; an unconfirmed stop leaves the gauge considered on
    pub async fn stop(&mut self) -> Result<bool, ChipError<E>> {
        if !self.state.gauge_enabled {
            warn!("gauge already disabled");
            return Ok(true);
        }

        self.write_subcommand(control_subcommands::GAUGE_STOP)
            .await?;

        match self
            .wait_for_status(ControlStatus::empty(), ControlStatus::GA, GAUGE_STOP_POLL_MS)
            .await
        {
            Ok(()) => {
                info!("gauge stopped");
                self.state.gauge_enabled = false;
            }
            Err(ChipError::PollTimeout) => {
                error!("gauge not stopped");
                self.state.gauge_enabled = true;
            }
            Err(e) => return Err(e),
        }

        Ok(!self.state.gauge_enabled)
    }

    /// Tells the gauge a fresh battery was inserted. A non-zero capacity (mAh)
    /// is programmed as the new design capacity first
    pub async fn new_battery(&mut self, capacity: u16) -> Result<(), ChipError<E>> {
        if capacity != 0 {
            self.set_design_capacity(capacity).await?;
        }

        self.write_subcommand(control_subcommands::NEW_BATTERY)
            .await?;
        info!("new battery registered");

        Ok(())
    }

    /// Programs the cell design capacity, mAh
    pub async fn set_design_capacity(&mut self, capacity: u16) -> Result<(), ChipError<E>> {
        let mut raw = [0u8; 2];
        BigEndian::write_u16(&mut raw, capacity);

        debug!("setting design capacity to {} mAh", capacity);

        self.write_extended(flash::CELL_DESIGN_CAPACITY, &raw)
            .await?;
        self.state.design_capacity = capacity;

        Ok(())
    }

    /// Reads the design capacity, mAh
    pub async fn design_capacity(&mut self) -> Result<u16, ChipError<E>> {
        let capacity = self.read_u16(commands::DESIGN_CAPACITY).await?;
        self.state.design_capacity = capacity;
        Ok(capacity)
    }

    /// Selects the internal (true) or the external (false) temperature sensor
    pub async fn use_internal_temperature_source(&mut self, internal: bool) -> Result<(), ChipError<E>> {
        let mut config = self.read_operation_config().await?;
        let external = config & OperationConfigA::TEMPS.bits() != 0;

        if external != internal {
            debug!("temperature source already set");
            return Ok(());
        }

        if internal {
            config &= !OperationConfigA::TEMPS.bits();
        } else {
            config |= OperationConfigA::TEMPS.bits();
        }

        self.delay.delay_ms(TEMPERATURE_SOURCE_SETTLE_MS).await;
        self.write_extended(flash::OPERATION_CONFIG_A, &[config])
            .await?;

        info!(
            "temperature source set to {}",
            if internal { "internal" } else { "external" }
        );

        Ok(())
    }

    /// Reads the BatteryStatus() register
    pub async fn battery_status(&mut self) -> Result<BatteryStatus, ChipError<E>> {
        let status = BatteryStatus::from_bits_truncate(self.read_u8(commands::BATTERY_STATUS).await?);

        if status.contains(BatteryStatus::ALERT) {
            debug!("ALERT is active");
        }

        if status.contains(BatteryStatus::DSG) {
            debug!("discharge current detected");
        }

        self.state.battery_status = status;
        Ok(status)
    }

    /// Reads the BatteryAlert() register, i.e which conditions raised ALERT
    pub async fn battery_alert(&mut self) -> Result<BatteryAlert, ChipError<E>> {
        let alert = BatteryAlert::from_bits_truncate(self.read_u8(commands::BATTERY_ALERT).await?);

        debug!("battery alert: {:#x}", alert.bits());

        self.state.battery_alert = alert;
        Ok(alert)
    }

    /// Selects the conditions that raise ALERT
    pub async fn set_battery_alert(&mut self, alert: BatteryAlert) -> Result<(), ChipError<E>> {
        self.write_extended(flash::ALERT_CONFIG, &[alert.bits()])
            .await?;

        debug!("battery alert set to {:#x}", alert.bits());

        Ok(())
    }
}
