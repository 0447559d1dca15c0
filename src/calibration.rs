//! Calibration of voltage, current and temperature against known references.
//! The chip is put into calibration mode, raw ADC conversions are averaged
//! and the resulting offsets/gains are written to data flash.

use byteorder::{BigEndian, ByteOrder};
use embedded_hal_async::{delay, i2c};

use crate::float::float_to_device_format;
#[cfg(feature = "defmt")]
use crate::fmt::*;
use crate::registers::*;
use crate::status::RetryBudget;
use crate::{Bq35100, ChipError};

const CAL_SETTLE_MS: u32 = 1000;
const CAL_SAMPLE_INTERVAL_MS: u32 = 200;
const CAL_DELTA_SETTLE_MS: u32 = 50;
const CAL_SAMPLES: i32 = 4;
/// Counter reads allowed while waiting for fresh conversions
const CAL_MAX_POLLS: u8 = 50;

/// Ratio between CC Delta and CC Gain
const CC_DELTA_FACTOR: f32 = 1_193_046.0;

fn offset_from<E>(reference: i32, average: i16) -> Result<i8, ChipError<E>> {
    let offset = reference - average as i32;

    debug!("calibration difference: {}", offset);

    i8::try_from(offset).map_err(|_| {
        error!("calibration offset {} out of range", offset);
        ChipError::Range
    })
}

impl<I, D, E> Bq35100<I, D>
where
    D: delay::DelayNs,
    I: i2c::I2c<Error = E>,
{
    /// Enters (true) or leaves (false) calibration mode
    pub async fn enter_calibration_mode(&mut self, enable: bool) -> Result<(), ChipError<E>> {
        self.request_calibration_mode(enable).await?;
        self.wait_for_calibration_mode(enable).await
    }

    async fn request_calibration_mode(&mut self, enable: bool) -> Result<(), ChipError<E>> {
        let subcommand = if enable {
            control_subcommands::ENTER_CAL
        } else {
            control_subcommands::EXIT_CAL
        };

        self.delay.delay_ms(CAL_SETTLE_MS).await;
        self.write_subcommand(subcommand).await
    }

    async fn wait_for_calibration_mode(&mut self, enable: bool) -> Result<(), ChipError<E>> {
        let expected = if enable {
            ControlStatus::CAL_MODE
        } else {
            ControlStatus::empty()
        };

        self.wait_for_status(expected, ControlStatus::CAL_MODE, CAL_SETTLE_MS)
            .await?;

        debug!("calibration mode {}", if enable { "enabled" } else { "disabled" });

        Ok(())
    }

    /// Averages a few raw conversions of `command` (one of the CAL_* registers).
    /// Only conversions with a fresh counter value are taken into account.
    /// Once ENTER_CAL went out, calibration mode is left on every path
    pub async fn raw_calibration_average(&mut self, command: u8) -> Result<i16, ChipError<E>> {
        self.request_calibration_mode(true).await?;

        let average = match self.wait_for_calibration_mode(true).await {
            Ok(()) => self.sample_calibration_data(command).await,
            Err(e) => {
                error!("calibration mode not confirmed");
                Err(e)
            }
        };

        let exit = self.enter_calibration_mode(false).await;

        let average = average?;
        exit?;

        Ok(average)
    }

    async fn sample_calibration_data(&mut self, command: u8) -> Result<i16, ChipError<E>> {
        let mut budget = RetryBudget::new(CAL_MAX_POLLS);
        let mut previous = self.read_u8(commands::CAL_COUNT).await?;
        let mut sum: i32 = 0;
        let mut samples = 0;

        while samples < CAL_SAMPLES {
            if !budget.next_attempt() {
                error!("ADC stopped converting");
                return Err(ChipError::PollTimeout);
            }

            self.delay.delay_ms(CAL_SAMPLE_INTERVAL_MS).await;

            let counter = self.read_u8(commands::CAL_COUNT).await?;
            if counter == previous {
                continue;
            }

            previous = counter;

            let sample = self.read_u16(command).await? as i16;
            debug!("calibration sample: {}", sample);

            sum += sample as i32;
            samples += 1;
        }

        let average = (sum / CAL_SAMPLES) as i16;
        debug!("calibration average: {}", average);

        Ok(average)
    }

    /// Calibrates the voltage with a known voltage applied, mV
    pub async fn cal_voltage(&mut self, voltage: u16) -> Result<(), ChipError<E>> {
        let average = self
            .raw_calibration_average(commands::CAL_VOLTAGE)
            .await?;
        let offset = offset_from(voltage as i32, average)?;

        self.delay.delay_ms(CAL_SETTLE_MS).await;
        self.write_extended(flash::PACK_V_OFFSET, &[offset as u8])
            .await?;

        info!("voltage offset set to {}", offset);

        Ok(())
    }

    /// Calibrates the currently selected temperature sensor with a known
    /// temperature, 0.1 K. Select the sensor before calling this
    pub async fn cal_temperature(&mut self, temperature: u16) -> Result<(), ChipError<E>> {
        let mut config = [0u8];
        self.read_extended(flash::OPERATION_CONFIG_A, &mut config)
            .await?;

        let external = config[0] & OperationConfigA::TEMPS.bits() != 0;
        debug!(
            "calibrating {} temperature",
            if external { "external" } else { "internal" }
        );

        self.delay.delay_ms(CAL_SETTLE_MS).await;

        let average = self
            .raw_calibration_average(commands::CAL_TEMPERATURE)
            .await?;
        let offset = offset_from(temperature as i32, average)?;

        let address = if external {
            flash::EXT_TEMP_OFFSET
        } else {
            flash::INT_TEMP_OFFSET
        };

        self.delay.delay_ms(CAL_SETTLE_MS).await;
        self.write_extended(address, &[offset as u8]).await?;

        info!("temperature offset set to {}", offset);

        Ok(())
    }

    /// Calibrates the coulomb counter with a known constant current flowing, mA.
    /// Returns the new CC gain
    pub async fn cal_current(&mut self, current: i16) -> Result<f32, ChipError<E>> {
        let mut raw = [0u8; 2];
        self.read_extended(flash::CC_OFFSET, &mut raw).await?;
        let cc_offset = BigEndian::read_i16(&raw);

        let mut raw = [0u8; 1];
        self.read_extended(flash::BOARD_OFFSET, &mut raw).await?;
        let board_offset = raw[0] as i8;

        self.delay.delay_ms(CAL_SETTLE_MS).await;

        let average = self
            .raw_calibration_average(commands::CAL_CURRENT)
            .await?;

        let denominator = average as i32 - (cc_offset as i32 + board_offset as i32) / 16;
        if denominator == 0 {
            error!("current calibration has nothing to divide by");
            return Err(ChipError::Range);
        }

        let cc_gain = current as f32 / denominator as f32;
        let cc_delta = cc_gain * CC_DELTA_FACTOR;

        debug!("cc gain {}, cc delta {}", cc_gain, cc_delta);

        self.delay.delay_ms(CAL_SETTLE_MS).await;
        self.write_extended(flash::CC_GAIN, &float_to_device_format(cc_gain))
            .await?;

        self.delay.delay_ms(CAL_DELTA_SETTLE_MS).await;
        self.write_extended(flash::CC_DELTA, &float_to_device_format(cc_delta))
            .await?;

        info!("current calibrated");

        Ok(cc_gain)
    }
}
