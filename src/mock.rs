//! In-memory stand-in for the gauge, good enough to drive every code path
//! of the driver without hardware

use std::collections::VecDeque;
use std::vec::Vec;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use embedded_hal::digital;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

use crate::registers::*;
use crate::SecurityMode;

const ADDRESS: u8 = 0x55;
const FLASH_SIZE: usize = (flash::END - flash::START) as usize + 1;
const FULL_ACCESS_CODES: u32 = 0x1234_ABCD;
const FW_VERSION: u16 = 0x0110;
const HW_VERSION: u16 = 0x00A8;

fn frame_checksum(bytes: &[u8]) -> u8 {
    0xFF - bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

pub struct FakeChip {
    pub security: SecurityMode,
    pub device_type: u16,
    pub gauge_active: bool,
    pub calibrating: bool,

    /// Every flash write is rejected with FLASHF
    pub flash_failure: bool,
    /// Keys and SEALED are ignored
    pub stuck_security: bool,
    /// Extended data frames come with a broken checksum
    pub corrupt_frames: bool,
    /// Extended data frames echo the next address
    pub echo_wrong_address: bool,
    pub nack: bool,
    /// GAUGE_START and GAUGE_STOP are ignored
    pub gauge_unresponsive: bool,
    /// Full access keys that drop the chip back to sealed
    pub reseal_on_full_access: u8,

    /// Control status values returned before the real one
    pub status_script: VecDeque<u16>,
    /// CAL_COUNT values, the last one sticks once these run out
    pub cal_counts: VecDeque<u8>,

    pub subcommands: Vec<u16>,
    pub flash_writes: usize,
    pub status_reads: usize,
    pub transactions: usize,
    pub register_reads: [usize; 256],
    pub last_data_sum: Option<u8>,
    pub last_data_len: Option<u8>,

    registers: [u8; 256],
    flash: Vec<u8>,
    pointer: u8,
    mac_data: u16,
    selected: u16,
    pending_key: Option<u16>,
    pending_write: Option<Vec<u8>>,
    pending_sum: Option<u8>,
    cal_count: u8,
    flashf: bool,
}

impl FakeChip {
    pub fn new() -> Self {
        let mut chip = Self {
            security: SecurityMode::Sealed,
            device_type: DEVICE_TYPE_ID,
            gauge_active: false,
            calibrating: false,
            flash_failure: false,
            stuck_security: false,
            corrupt_frames: false,
            echo_wrong_address: false,
            nack: false,
            gauge_unresponsive: false,
            reseal_on_full_access: 0,
            status_script: VecDeque::new(),
            cal_counts: VecDeque::new(),
            subcommands: Vec::new(),
            flash_writes: 0,
            status_reads: 0,
            transactions: 0,
            register_reads: [0; 256],
            last_data_sum: None,
            last_data_len: None,
            registers: [0; 256],
            flash: std::vec![0; FLASH_SIZE],
            pointer: 0,
            mac_data: 0,
            selected: flash::START,
            pending_key: None,
            pending_write: None,
            pending_sum: None,
            cal_count: 0,
            flashf: false,
        };

        let mut codes = [0u8; 4];
        BigEndian::write_u32(&mut codes, FULL_ACCESS_CODES);
        chip.set_flash(flash::FULL_ACCESS_CODES, &codes);

        chip
    }

    pub fn set_register(&mut self, register: u8, bytes: &[u8]) {
        let start = register as usize;
        self.registers[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn set_flash(&mut self, address: u16, bytes: &[u8]) {
        let start = (address - flash::START) as usize;
        self.flash[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn flash_at(&self, address: u16, len: usize) -> Vec<u8> {
        let start = (address - flash::START) as usize;
        self.flash[start..start + len].to_vec()
    }

    fn control_status(&self) -> u16 {
        let mut status = ControlStatus::INITCOMP;

        status |= match self.security {
            SecurityMode::Full => ControlStatus::SEC0,
            SecurityMode::Unsealed => ControlStatus::SEC1,
            SecurityMode::Sealed => ControlStatus::SEC1 | ControlStatus::SEC0,
            SecurityMode::Unknown => ControlStatus::empty(),
        };

        status.set(ControlStatus::GA, self.gauge_active);
        status.set(ControlStatus::CAL_MODE, self.calibrating);
        status.set(ControlStatus::FLASHF, self.flashf);

        status.bits()
    }

    fn full_access_codes(&self) -> u32 {
        let start = (flash::FULL_ACCESS_CODES - flash::START) as usize;
        BigEndian::read_u32(&self.flash[start..start + 4])
    }

    fn accept_key(&mut self, key: u32) -> bool {
        if self.stuck_security {
            return false;
        }

        match self.security {
            SecurityMode::Sealed if key == codes::DEFAULT_UNSEAL => {
                self.security = SecurityMode::Unsealed;
                true
            }
            SecurityMode::Unsealed if key == self.full_access_codes() => {
                if self.reseal_on_full_access > 0 {
                    self.reseal_on_full_access -= 1;
                    self.security = SecurityMode::Sealed;
                } else {
                    self.security = SecurityMode::Full;
                }
                true
            }
            _ => false,
        }
    }

    fn subcommand(&mut self, code: u16) {
        self.subcommands.push(code);

        if let Some(high) = self.pending_key.take() {
            if self.accept_key((high as u32) << 16 | code as u32) {
                return;
            }
        }

        match code {
            control_subcommands::DEVICE_TYPE => self.mac_data = self.device_type,
            control_subcommands::FW_VERSION => self.mac_data = FW_VERSION,
            control_subcommands::HW_VERSION => self.mac_data = HW_VERSION,
            control_subcommands::GAUGE_START if !self.gauge_unresponsive => self.gauge_active = true,
            control_subcommands::GAUGE_STOP if !self.gauge_unresponsive => self.gauge_active = false,
            control_subcommands::SEALED if !self.stuck_security => self.security = SecurityMode::Sealed,
            control_subcommands::ENTER_CAL => self.calibrating = true,
            control_subcommands::EXIT_CAL => self.calibrating = false,
            control_subcommands::RESET => {
                self.gauge_active = false;
                self.calibrating = false;
            }
            flash::START..=flash::END => self.selected = code,
            other => self.pending_key = Some(other),
        }
    }

    fn commit(&mut self, len: u8) {
        let sum = self.pending_sum.take();
        self.flashf = true;

        let Some(block) = self.pending_write.take() else {
            return;
        };

        let valid = block.len() >= 3
            && sum == Some(frame_checksum(&block))
            && len as usize == block.len() + 2
            && self.security != SecurityMode::Sealed
            && !self.flash_failure;

        if !valid {
            return;
        }

        let address = LittleEndian::read_u16(&block[0..2]);
        self.set_flash(address, &block[2..]);
        self.flash_writes += 1;
        self.flashf = false;
    }

    fn frame(&self) -> [u8; 36] {
        let mut raw = [0u8; 36];
        let offset = (self.selected - flash::START) as usize;
        let len = (FLASH_SIZE - offset).min(32);

        let echoed = if self.echo_wrong_address {
            self.selected.wrapping_add(1)
        } else {
            self.selected
        };

        LittleEndian::write_u16(&mut raw[0..2], echoed);
        raw[2..2 + len].copy_from_slice(&self.flash[offset..offset + len]);

        let sum = frame_checksum(&raw[..2 + len]);
        raw[34] = if self.corrupt_frames { !sum } else { sum };
        raw[35] = len as u8 + 4;

        raw
    }

    fn on_write(&mut self, bytes: &[u8]) {
        let Some((&register, data)) = bytes.split_first() else {
            return;
        };

        self.pointer = register;

        match (register, data.len()) {
            (_, 0) => {}
            (commands::MAC_CONTROL, 2) => self.subcommand(LittleEndian::read_u16(data)),
            (commands::MAC_CONTROL, _) => self.pending_write = Some(data.to_vec()),
            (commands::MAC_DATA_SUM, _) => {
                self.pending_sum = Some(data[0]);
                self.last_data_sum = Some(data[0]);
            }
            (commands::MAC_DATA_LEN, _) => {
                self.last_data_len = Some(data[0]);
                self.commit(data[0]);
            }
            _ => self.set_register(register, data),
        }
    }

    fn on_read(&mut self, buffer: &mut [u8]) {
        let register = self.pointer;
        self.register_reads[register as usize] += 1;

        match register {
            commands::CONTROL => {
                self.status_reads += 1;
                let status = match self.status_script.pop_front() {
                    Some(status) => status,
                    None => self.control_status(),
                };
                copy_clipped(buffer, &status.to_le_bytes());
            }
            commands::MAC_CONTROL => copy_clipped(buffer, &self.frame()),
            commands::MAC_DATA => copy_clipped(buffer, &self.mac_data.to_le_bytes()),
            commands::CAL_COUNT => {
                if let Some(count) = self.cal_counts.pop_front() {
                    self.cal_count = count;
                }
                copy_clipped(buffer, &[self.cal_count]);
            }
            _ => {
                let start = register as usize;
                let end = (start + buffer.len()).min(self.registers.len());
                copy_clipped(buffer, &self.registers[start..end]);
            }
        }
    }
}

fn copy_clipped(buffer: &mut [u8], source: &[u8]) {
    let len = buffer.len().min(source.len());
    buffer[..len].copy_from_slice(&source[..len]);
}

impl ErrorType for FakeChip {
    type Error = ErrorKind;
}

impl I2c for FakeChip {
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.transactions += 1;

        if self.nack || address != ADDRESS {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }

        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(bytes) => self.on_write(bytes),
                Operation::Read(buffer) => self.on_read(buffer),
            }
        }

        Ok(())
    }
}

/// Records every nap instead of taking it, in milliseconds
#[derive(Default)]
pub struct FakeDelay {
    pub sleeps: Vec<u32>,
}

impl FakeDelay {
    pub fn count(&self, ms: u32) -> usize {
        self.sleeps.iter().filter(|&&sleep| sleep == ms).count()
    }
}

impl DelayNs for FakeDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.sleeps.push(ns / 1_000_000);
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.sleeps.push(ms);
    }
}

#[derive(Default)]
pub struct FakePin {
    pub high: bool,
    /// Every pin operation fails
    pub broken: bool,
}

impl digital::ErrorType for FakePin {
    type Error = digital::ErrorKind;
}

impl digital::OutputPin for FakePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        if self.broken {
            return Err(digital::ErrorKind::Other);
        }

        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        if self.broken {
            return Err(digital::ErrorKind::Other);
        }

        self.high = true;
        Ok(())
    }
}
