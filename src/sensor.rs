//! Readings exposed to the application, both raw and in natural units

use embedded_hal_async::{delay, i2c};

#[cfg(feature = "defmt")]
use crate::fmt::*;
use crate::gauge::GaugeMode;
use crate::registers::*;
use crate::security::SecurityMode;
use crate::{Bq35100, ChipError};

/// 0 °C in tenths of a kelvin
const ZERO_CELSIUS_DECIKELVIN: i32 = 2731;

/// Last values fetched from the chip, plus what the driver knows about its state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GaugeState {
    /// 0.1 K
    pub temperature: u16,
    /// 0.1 K
    pub internal_temperature: u16,
    /// mV
    pub voltage: u16,
    /// mA
    pub average_current: i16,
    /// %
    pub state_of_health: u8,
    /// µAh, counts down while discharging
    pub accumulated_capacity: u32,
    /// mAh
    pub design_capacity: u16,
    pub battery_status: BatteryStatus,
    pub battery_alert: BatteryAlert,
    pub security_mode: SecurityMode,
    pub gauge_mode: GaugeMode,
    pub gauge_enabled: bool,
}

impl Default for GaugeState {
    fn default() -> Self {
        Self {
            temperature: 0,
            internal_temperature: 0,
            voltage: 0,
            average_current: 0,
            state_of_health: 0,
            accumulated_capacity: 0,
            design_capacity: 0,
            battery_status: BatteryStatus::empty(),
            battery_alert: BatteryAlert::empty(),
            security_mode: SecurityMode::Unknown,
            gauge_mode: GaugeMode::Unknown,
            gauge_enabled: false,
        }
    }
}

/// Fixed point value: whole units plus millionths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorValue {
    pub whole: i32,
    pub micro: i32,
}

impl SensorValue {
    fn from_tenths(tenths: i32) -> Self {
        Self {
            whole: tenths / 10,
            micro: tenths % 10 * 100_000,
        }
    }

    fn from_thousandths(thousandths: u32) -> Self {
        Self {
            whole: (thousandths / 1000) as i32,
            micro: (thousandths % 1000 * 1000) as i32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    Temperature,
    InternalTemperature,
    Voltage,
    AverageCurrent,
    StateOfHealth,
    AccumulatedCapacity,
    DesignCapacity,
}

/// A channel value in its natural unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reading {
    /// °C
    Temperature(SensorValue),
    /// °C
    InternalTemperature(SensorValue),
    /// V
    Voltage(SensorValue),
    /// mA
    AverageCurrent(i16),
    /// %
    StateOfHealth(u8),
    /// mAh drawn from the battery
    AccumulatedCapacity(SensorValue),
    /// mAh
    DesignCapacity(u16),
}

fn celsius(decikelvin: u16) -> SensorValue {
    SensorValue::from_tenths(decikelvin as i32 - ZERO_CELSIUS_DECIKELVIN)
}

impl GaugeState {
    pub fn reading(&self, channel: Channel) -> Reading {
        match channel {
            Channel::Temperature => Reading::Temperature(celsius(self.temperature)),
            Channel::InternalTemperature => {
                Reading::InternalTemperature(celsius(self.internal_temperature))
            }
            Channel::Voltage => Reading::Voltage(SensorValue::from_thousandths(self.voltage as u32)),
            Channel::AverageCurrent => Reading::AverageCurrent(self.average_current),
            Channel::StateOfHealth => Reading::StateOfHealth(self.state_of_health),
            Channel::AccumulatedCapacity => Reading::AccumulatedCapacity(
                SensorValue::from_thousandths(self.accumulated_capacity.wrapping_neg()),
            ),
            Channel::DesignCapacity => Reading::DesignCapacity(self.design_capacity),
        }
    }
}

impl<I, D, E> Bq35100<I, D>
where
    D: delay::DelayNs,
    I: i2c::I2c<Error = E>,
{
    /// Reads the temperature sensor, either internal or external, depending on the configuration. 0.1 K
    pub async fn temperature(&mut self) -> Result<u16, ChipError<E>> {
        let raw = self.read_u16(commands::TEMPERATURE).await?;
        self.state.temperature = raw;
        Ok(raw)
    }

    /// Reads the die temperature, 0.1 K
    pub async fn internal_temperature(&mut self) -> Result<u16, ChipError<E>> {
        let raw = self.read_u16(commands::INTERNAL_TEMPERATURE).await?;
        self.state.internal_temperature = raw;
        Ok(raw)
    }

    /// Reads the battery voltage in millivolts
    pub async fn voltage(&mut self) -> Result<u16, ChipError<E>> {
        let raw = self.read_u16(commands::VOLTAGE).await?;
        self.state.voltage = raw;
        Ok(raw)
    }

    pub async fn average_current(&mut self) -> Result<i16, ChipError<E>> {
        if !self.state.gauge_enabled {
            error!("to measure current first enable the gauge");
            return Err(ChipError::GaugeDisabled);
        }

        let raw = self.read_u16(commands::CURRENT).await? as i16;
        self.state.average_current = raw;
        Ok(raw)
    }

    pub async fn state_of_health(&mut self) -> Result<u8, ChipError<E>> {
        let raw = self.read_u8(commands::STATE_OF_HEALTH).await?;
        self.state.state_of_health = raw;
        Ok(raw)
    }

    pub async fn accumulated_capacity(&mut self) -> Result<u32, ChipError<E>> {
        let raw = self.read_register(commands::ACCUMULATED_CAPACITY, 4).await?;
        self.state.accumulated_capacity = raw;
        Ok(raw)
    }

    /// Reads every channel in one go. Current is skipped while gauging is off
    pub async fn sample_fetch(&mut self) -> Result<GaugeState, ChipError<E>> {
        self.temperature().await?;
        self.internal_temperature().await?;
        self.voltage().await?;

        if self.state.gauge_enabled {
            self.average_current().await?;
        } else {
            debug!("gauge is off, current not sampled");
        }

        self.state_of_health().await?;
        self.accumulated_capacity().await?;
        self.design_capacity().await?;

        Ok(self.state)
    }

    /// Everything fetched so far
    pub fn state(&self) -> &GaugeState {
        &self.state
    }

    /// A channel from the last fetch
    pub fn reading(&self, channel: Channel) -> Reading {
        self.state.reading(channel)
    }
}
