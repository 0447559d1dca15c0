//! Besides regular commands and subcommands there is also indirect access
//! to the data flash, addressed through ManufacturerAccessControl.
//! Some vital parameters (e.g cell design capacity, calibration constants)
//! are available exclusively through this interface.
//!
//! The chip answers a read with a frame: echoed address, up to 32 bytes of
//! data, checksum and the total frame length. Writes are the same frame,
//! sent in three separate pieces.

use byteorder::{ByteOrder, LittleEndian};
use embedded_hal_async::{delay, i2c};

#[cfg(feature = "defmt")]
use crate::fmt::*;
use crate::registers::*;
use crate::{Bq35100, ChipError, ProtocolError, SecurityMode};

/// Maximum amount of data moved by a single extended data access
pub const MAX_BLOCK_SIZE: usize = 32;

/// Address, data, checksum and length
const FRAME_SIZE: usize = MAX_BLOCK_SIZE + 4;

const FLASH_SETTLE_MS: u32 = 1000;
const FLASH_WRITE_SETTLE_MS: u32 = 100;
const FRAME_PIECE_SETTLE_MS: u32 = 10;

/// Simple checksum used by the gauge
pub fn checksum(bytes: &[u8]) -> u8 {
    let mut csum: u8 = 0;

    for b in bytes.iter() {
        csum = csum.wrapping_add(*b);
    }

    255 - csum
}

fn is_extended_address(address: u16) -> bool {
    (flash::START..=flash::END).contains(&address)
}

/// Reply to an extended data read, as it comes from the chip
pub(crate) struct ExtendedFrame {
    raw: [u8; FRAME_SIZE],
}

impl ExtendedFrame {
    fn new() -> Self {
        Self {
            raw: [0; FRAME_SIZE],
        }
    }

    fn address(&self) -> u16 {
        LittleEndian::read_u16(&self.raw[0..2])
    }

    fn checksum(&self) -> u8 {
        self.raw[FRAME_SIZE - 2]
    }

    fn declared_len(&self) -> u8 {
        self.raw[FRAME_SIZE - 1]
    }

    /// Checks the frame against the address it was requested for and
    /// returns the data part. The length byte counts address, checksum
    /// and itself, the checksum covers address and data
    pub(crate) fn payload(&self, address: u16) -> Result<&[u8], ProtocolError> {
        if self.address() != address {
            return Err(ProtocolError::AddressMismatch);
        }

        let len = self.declared_len();
        if !(4..=FRAME_SIZE).contains(&(len as usize)) {
            return Err(ProtocolError::BadFrameLength(len));
        }

        let end = len as usize - 2;
        if checksum(&self.raw[..end]) != self.checksum() {
            return Err(ProtocolError::ChecksumMismatch);
        }

        Ok(&self.raw[2..end])
    }
}

impl<I, D, E> Bq35100<I, D>
where
    D: delay::DelayNs,
    I: i2c::I2c<Error = E>,
{
    /// Selects the address and pulls the whole reply frame, unchecked
    pub(crate) async fn read_frame(&mut self, address: u16) -> Result<ExtendedFrame, ChipError<E>> {
        let mut frame = ExtendedFrame::new();

        self.write_subcommand(address).await?;
        self.delay.delay_ms(FLASH_SETTLE_MS).await;

        self.i2c
            .write_read(self.addr, &[commands::MAC_CONTROL], &mut frame.raw)
            .await?;

        Ok(frame)
    }

    /// Reads up to `buffer.len()` bytes of data flash at `address`.
    /// Returns how many bytes were actually copied
    pub async fn read_extended(
        &mut self,
        address: u16,
        buffer: &mut [u8],
    ) -> Result<usize, ChipError<E>> {
        if !is_extended_address(address) || buffer.is_empty() {
            error!("invalid extended data address {:#x}", address);
            return Err(ChipError::Range);
        }

        let entry_mode = self.state.security_mode;
        if entry_mode == SecurityMode::Unknown {
            error!("security mode is unknown, refusing to touch data flash");
            return Err(ChipError::Security(entry_mode));
        }

        let result = self.read_extended_unsealed(address, buffer).await;
        self.restore_security_mode(entry_mode, result).await
    }

    async fn read_extended_unsealed(
        &mut self,
        address: u16,
        buffer: &mut [u8],
    ) -> Result<usize, ChipError<E>> {
        if self.state.security_mode == SecurityMode::Sealed {
            self.set_security_mode(SecurityMode::Unsealed).await?;
        }

        let frame = self.read_frame(address).await?;
        let payload = frame.payload(address).map_err(|e| {
            error!("extended data at {:#x} is broken: {}", address, e);
            ChipError::Protocol(e)
        })?;

        let len = payload.len().min(buffer.len());
        buffer[..len].copy_from_slice(&payload[..len]);

        Ok(len)
    }

    /// Writes 1 to 32 bytes of data flash at `address`
    pub async fn write_extended(&mut self, address: u16, data: &[u8]) -> Result<(), ChipError<E>> {
        if !is_extended_address(address) || data.is_empty() || data.len() > MAX_BLOCK_SIZE {
            error!("invalid extended data write at {:#x}", address);
            return Err(ChipError::Range);
        }

        let entry_mode = self.state.security_mode;
        if entry_mode == SecurityMode::Unknown {
            error!("security mode is unknown, refusing to touch data flash");
            return Err(ChipError::Security(entry_mode));
        }

        let result = self.write_extended_unsealed(address, data).await;
        self.restore_security_mode(entry_mode, result).await
    }

    async fn write_extended_unsealed(&mut self, address: u16, data: &[u8]) -> Result<(), ChipError<E>> {
        let mut request = [0u8; 3 + MAX_BLOCK_SIZE];
        let len = data.len();

        if self.state.security_mode == SecurityMode::Sealed {
            self.set_security_mode(SecurityMode::Unsealed).await?;
        }

        self.write_subcommand(address).await?;

        request[0] = commands::MAC_CONTROL;
        LittleEndian::write_u16(&mut request[1..3], address);
        request[3..3 + len].copy_from_slice(data);

        debug!("writing {} bytes at {:#x}...", len, address);

        self.i2c.write(self.addr, &request[..3 + len]).await?;
        self.delay.delay_ms(FRAME_PIECE_SETTLE_MS).await;

        // Checksum covers the address and the data, but not the register byte
        let csum = checksum(&request[1..3 + len]);
        self.i2c
            .write(self.addr, &[commands::MAC_DATA_SUM, csum])
            .await?;
        self.delay.delay_ms(FRAME_PIECE_SETTLE_MS).await;

        // Length counts address, checksum and itself
        self.i2c
            .write(self.addr, &[commands::MAC_DATA_LEN, len as u8 + 4])
            .await?;

        // And let it think for a bit...
        self.delay.delay_ms(FLASH_WRITE_SETTLE_MS).await;

        if self.status().await?.contains(ControlStatus::FLASHF) {
            error!("flash write at {:#x} failed", address);
            return Err(ChipError::Protocol(ProtocolError::FlashWriteFailed));
        }

        debug!("write successful");

        Ok(())
    }

    /// Puts the security mode back the way it was found. An error that
    /// happened before wins over a failure to restore
    async fn restore_security_mode<T>(
        &mut self,
        entry_mode: SecurityMode,
        result: Result<T, ChipError<E>>,
    ) -> Result<T, ChipError<E>> {
        if self.state.security_mode != entry_mode {
            if let Err(e) = self.set_security_mode(entry_mode).await {
                error!("unable to return to {} mode", entry_mode);
                return result.and(Err(e));
            }
        }

        result
    }
}
