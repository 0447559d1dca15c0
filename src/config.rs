//! Settings applied once during bring-up

use crate::gauge::GaugeMode;

/// Which sensor the gauge uses for its temperature readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TemperatureSource {
    Internal,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// 7-bit bus address
    pub address: u8,
    /// Cell design capacity, mAh
    pub design_capacity: u16,
    pub gauge_mode: GaugeMode,
    pub temperature_source: TemperatureSource,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: 0x55,
            design_capacity: 2200,
            gauge_mode: GaugeMode::Accumulator,
            temperature_source: TemperatureSource::Internal,
        }
    }
}
