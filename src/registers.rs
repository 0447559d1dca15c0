//! These are low-level definitions for BQ35100

use crate::fmt::bitflags;

/// This is a list of commands (i.e *registers*) supported by the gauge
pub mod commands {
    #![allow(dead_code)]
    pub const CONTROL: u8 = 0x00;
    pub const ACCUMULATED_CAPACITY: u8 = 0x02;
    pub const TEMPERATURE: u8 = 0x06;
    pub const VOLTAGE: u8 = 0x08;
    pub const BATTERY_STATUS: u8 = 0x0A;
    pub const BATTERY_ALERT: u8 = 0x0B;
    pub const CURRENT: u8 = 0x0C;
    pub const SCALED_R: u8 = 0x16;
    pub const MEASURED_Z: u8 = 0x22;
    pub const INTERNAL_TEMPERATURE: u8 = 0x28;
    pub const STATE_OF_HEALTH: u8 = 0x2E;
    pub const DESIGN_CAPACITY: u8 = 0x3C;

    // Manufacturer access, i.e subcommands and extended data
    pub const MAC_CONTROL: u8 = 0x3E;
    pub const MAC_DATA: u8 = 0x40;
    pub const MAC_DATA_SUM: u8 = 0x60;
    pub const MAC_DATA_LEN: u8 = 0x61;

    // Raw ADC data, only meaningful in calibration mode
    pub const CAL_COUNT: u8 = 0x79;
    pub const CAL_CURRENT: u8 = 0x7A;
    pub const CAL_VOLTAGE: u8 = 0x7C;
    pub const CAL_TEMPERATURE: u8 = 0x7E;
}

/// Subcommands are written to ManufacturerAccessControl. Ones returning
/// data expose it through MACData afterwards
pub mod control_subcommands {
    #![allow(dead_code)]
    pub const CONTROL_STATUS: u16 = 0x0000;
    pub const DEVICE_TYPE: u16 = 0x0001;
    pub const FW_VERSION: u16 = 0x0002;
    pub const HW_VERSION: u16 = 0x0003;
    pub const GAUGE_START: u16 = 0x0011;
    pub const GAUGE_STOP: u16 = 0x0012;
    pub const SEALED: u16 = 0x0020;
    pub const CAL_ENABLE: u16 = 0x002D;
    pub const RESET: u16 = 0x0041;
    pub const EXIT_CAL: u16 = 0x0080;
    pub const ENTER_CAL: u16 = 0x0081;
    pub const NEW_BATTERY: u16 = 0xA613;
}

/// Data flash locations. Multi-byte values are stored big-endian
pub mod flash {
    #![allow(dead_code)]
    pub const START: u16 = 0x4000;
    pub const END: u16 = 0x43FF;

    pub const CC_GAIN: u16 = 0x4000;
    pub const CC_DELTA: u16 = 0x4004;
    pub const CC_OFFSET: u16 = 0x4008;
    pub const BOARD_OFFSET: u16 = 0x400A;
    pub const INT_TEMP_OFFSET: u16 = 0x400B;
    pub const EXT_TEMP_OFFSET: u16 = 0x400C;
    pub const PACK_V_OFFSET: u16 = 0x400D;
    pub const OPERATION_CONFIG_A: u16 = 0x41B1;
    pub const ALERT_CONFIG: u16 = 0x41B2;
    pub const CELL_DESIGN_CAPACITY: u16 = 0x41B4;
    pub const FULL_ACCESS_CODES: u16 = 0x41D0;
}

/// Security codes shipped with a fresh chip
pub mod codes {
    pub const DEFAULT_UNSEAL: u32 = 0x0414_3672;
}

pub const DEVICE_TYPE_ID: u16 = 0x0100;

bitflags! {
    /// Contents of the control status register
    pub struct ControlStatus: u16 {
        const FLASHF = 1 << 15;
        const SEC1 = 1 << 14;
        const SEC0 = 1 << 13;
        const CAL_MODE = 1 << 12;
        const INITCOMP = 1 << 7;
        const GA = 1 << 0;
    }
}

bitflags! {
    /// BatteryStatus() register
    pub struct BatteryStatus: u8 {
        const ALERT = 1 << 2;
        const DSG = 1 << 0;
    }
}

bitflags! {
    /// BatteryAlert() register, and the mask written to Alert Configuration
    pub struct BatteryAlert: u8 {
        const BATLOW = 1 << 7;
        const TEMP_LOW = 1 << 6;
        const TEMP_HIGH = 1 << 5;
        const SOH_LOW = 1 << 4;
        const EOS = 1 << 3;
        const G_DONE = 1 << 1;
        const INITCOMP = 1 << 0;
    }
}

bitflags! {
    /// Operation Config A, as stored in data flash
    pub struct OperationConfigA: u8 {
        /// Set when the external thermistor is used
        const TEMPS = 1 << 7;
        const GMSEL1 = 1 << 1;
        const GMSEL0 = 1 << 0;
    }
}

impl From<u16> for ControlStatus {
    fn from(value: u16) -> Self {
        ControlStatus::from_bits_truncate(value)
    }
}
