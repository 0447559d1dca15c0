//! The chip gates its data flash behind three security levels. Full access
//! and unsealed are only reachable from each other through sealed, and
//! a transition request may silently fail, so the resulting mode is
//! always read back from the chip rather than assumed.

use byteorder::{BigEndian, ByteOrder};
use embedded_hal_async::{delay, i2c};

#[cfg(feature = "defmt")]
use crate::fmt::*;
use crate::registers::*;
use crate::status::RetryBudget;
use crate::{Bq35100, ChipError, ProtocolError};

const SECURITY_ATTEMPTS: u8 = 3;
const SECURITY_SETTLE_MS: u32 = 100;
const SECURITY_BACKOFF_MS: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityMode {
    #[default]
    Unknown,
    Full,
    Unsealed,
    Sealed,
}

impl From<ControlStatus> for SecurityMode {
    fn from(status: ControlStatus) -> Self {
        match (status.bits() >> 13) & 0b11 {
            1 => Self::Full,
            2 => Self::Unsealed,
            3 => Self::Sealed,
            _ => Self::Unknown,
        }
    }
}

impl<I, D, E> Bq35100<I, D>
where
    D: delay::DelayNs,
    I: i2c::I2c<Error = E>,
{
    /// Last security mode reported by the chip
    pub fn security_mode(&self) -> SecurityMode {
        self.state.security_mode
    }

    /// Reads the security mode from the chip and remembers it
    pub async fn read_security_mode(&mut self) -> Result<SecurityMode, ChipError<E>> {
        let mode = SecurityMode::from(self.status().await?);

        debug!("security mode is {}", mode);
        self.state.security_mode = mode;

        Ok(mode)
    }

    /// Moves the chip to the given security mode. If the chip does not confirm
    /// it after a few tries, the mode it reported last is returned in the error.
    /// Every attempt starts over from the mode the chip reported last, so a
    /// chip that fell back to sealed halfway is unsealed again
    pub async fn set_security_mode(&mut self, target: SecurityMode) -> Result<(), ChipError<E>> {
        if target == SecurityMode::Unknown {
            error!("unknown is not a security mode one can ask for");
            return Err(ChipError::Range);
        }

        if self.state.security_mode == SecurityMode::Unknown {
            self.read_security_mode().await?;
        }

        if self.state.security_mode == target {
            debug!("already in {} mode", target);
            return Ok(());
        }

        let mut budget = RetryBudget::new(SECURITY_ATTEMPTS);
        let mut full_access_codes = None;

        while budget.next_attempt() {
            // Full access and unsealed only reach each other through sealed
            let via = match (self.state.security_mode, target) {
                (SecurityMode::Sealed, SecurityMode::Full) => Some(SecurityMode::Unsealed),
                (SecurityMode::Full, SecurityMode::Unsealed) => Some(SecurityMode::Sealed),
                _ => None,
            };

            if let Some(via) = via {
                let key = (via == SecurityMode::Unsealed).then_some(codes::DEFAULT_UNSEAL);
                let mode = self.security_step(key).await?;
                if mode != via {
                    debug!("intermediate {} mode not reached, got {}", via, mode);
                }
            }

            let key = match target {
                SecurityMode::Full => match full_access_codes {
                    Some(known) => Some(known),
                    None => {
                        let fetched = self.read_full_access_codes().await?;
                        full_access_codes = Some(fetched);
                        Some(fetched)
                    }
                },
                SecurityMode::Unsealed => Some(codes::DEFAULT_UNSEAL),
                _ => None,
            };

            let mode = self.security_step(key).await?;
            if mode == target {
                info!("security mode set to {}", mode);
                return Ok(());
            }

            warn!(
                "security mode set failed (wanted {}, got {}), attempt {}",
                target,
                mode,
                budget.attempt()
            );

            if !budget.is_spent() {
                self.delay.delay_ms(SECURITY_BACKOFF_MS).await;
            }
        }

        error!("giving up on security mode {}", target);
        Err(ChipError::Security(self.state.security_mode))
    }

    /// Sends a key, or SEALED when there is none, and reads back what the chip did
    async fn security_step(&mut self, key: Option<u32>) -> Result<SecurityMode, ChipError<E>> {
        match key {
            Some(key) => self.send_key(key).await?,
            None => {
                self.write_subcommand(control_subcommands::SEALED)
                    .await?
            }
        }

        self.delay.delay_ms(SECURITY_SETTLE_MS).await;
        self.read_security_mode().await
    }

    /// Keys are sent as two subcommands, most significant half first
    async fn send_key(&mut self, key: u32) -> Result<(), ChipError<E>> {
        self.write_subcommand((key >> 16) as u16).await?;
        self.write_subcommand(key as u16).await
    }

    /// Full access codes live in data flash, which is readable while unsealed
    async fn read_full_access_codes(&mut self) -> Result<u32, ChipError<E>> {
        let frame = self.read_frame(flash::FULL_ACCESS_CODES).await?;
        let payload = frame
            .payload(flash::FULL_ACCESS_CODES)
            .map_err(ChipError::Protocol)?;

        if payload.len() < 4 {
            return Err(ChipError::Protocol(ProtocolError::BadFrameLength(
                payload.len() as u8 + 4,
            )));
        }

        Ok(BigEndian::read_u32(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FakeChip, FakeDelay};
    use crate::Config;
    use embassy_futures::block_on;

    const SETTABLE: [SecurityMode; 3] = [
        SecurityMode::Sealed,
        SecurityMode::Unsealed,
        SecurityMode::Full,
    ];

    #[test]
    fn mode_comes_from_status_bits() {
        assert_eq!(SecurityMode::from(ControlStatus::from(0x0000)), SecurityMode::Unknown);
        assert_eq!(SecurityMode::from(ControlStatus::from(0x2000)), SecurityMode::Full);
        assert_eq!(SecurityMode::from(ControlStatus::from(0x4001)), SecurityMode::Unsealed);
        assert_eq!(SecurityMode::from(ControlStatus::from(0xE080)), SecurityMode::Sealed);
    }

    #[test]
    fn every_transition_succeeds_on_the_first_try() {
        for from in SETTABLE {
            for to in SETTABLE.into_iter().filter(|to| *to != from) {
                let mut chip = FakeChip::new();
                let mut delay = FakeDelay::default();
                chip.security = from;

                {
                    let mut gauge = Bq35100::new(&mut chip, &mut delay, Config::default());
                    block_on(gauge.set_security_mode(to)).unwrap();
                    assert_eq!(gauge.security_mode(), to);
                }

                assert_eq!(chip.security, to);
                assert_eq!(delay.count(SECURITY_BACKOFF_MS), 0, "{:?} -> {:?}", from, to);
            }
        }
    }

    #[test]
    fn full_access_to_unsealed_goes_through_sealed() {
        let mut chip = FakeChip::new();
        let mut delay = FakeDelay::default();
        chip.security = SecurityMode::Full;

        {
            let mut gauge = Bq35100::new(&mut chip, &mut delay, Config::default());
            block_on(gauge.set_security_mode(SecurityMode::Unsealed)).unwrap();
        }

        assert_eq!(
            chip.subcommands,
            [
                control_subcommands::SEALED,
                (codes::DEFAULT_UNSEAL >> 16) as u16,
                codes::DEFAULT_UNSEAL as u16,
            ]
        );
    }

    #[test]
    fn stubborn_chip_is_given_up_on_after_three_attempts() {
        let mut chip = FakeChip::new();
        let mut delay = FakeDelay::default();
        chip.security = SecurityMode::Sealed;
        chip.stuck_security = true;

        {
            let mut gauge = Bq35100::new(&mut chip, &mut delay, Config::default());

            assert!(matches!(
                block_on(gauge.set_security_mode(SecurityMode::Unsealed)),
                Err(ChipError::Security(SecurityMode::Sealed))
            ));
            assert_eq!(gauge.security_mode(), SecurityMode::Sealed);
        }

        let first_halves = chip
            .subcommands
            .iter()
            .filter(|&&code| code == (codes::DEFAULT_UNSEAL >> 16) as u16)
            .count();

        assert_eq!(first_halves, 3);
        assert_eq!(delay.count(SECURITY_BACKOFF_MS), 2);
    }

    #[test]
    fn chip_falling_back_to_sealed_is_unsealed_again() {
        let mut chip = FakeChip::new();
        let mut delay = FakeDelay::default();
        chip.security = SecurityMode::Sealed;
        chip.reseal_on_full_access = 1;

        {
            let mut gauge = Bq35100::new(&mut chip, &mut delay, Config::default());
            block_on(gauge.set_security_mode(SecurityMode::Full)).unwrap();
            assert_eq!(gauge.security_mode(), SecurityMode::Full);
        }

        let unseal = [
            (codes::DEFAULT_UNSEAL >> 16) as u16,
            codes::DEFAULT_UNSEAL as u16,
        ];
        let unseals = chip
            .subcommands
            .windows(2)
            .filter(|pair| *pair == unseal)
            .count();

        assert_eq!(chip.security, SecurityMode::Full);
        assert_eq!(unseals, 2);
        assert_eq!(delay.count(SECURITY_BACKOFF_MS), 1);
        // Codes are only fetched once
        assert_eq!(
            chip.subcommands
                .iter()
                .filter(|&&code| code == flash::FULL_ACCESS_CODES)
                .count(),
            1
        );
    }

    #[test]
    fn same_mode_is_a_no_op() {
        let mut chip = FakeChip::new();
        let mut delay = FakeDelay::default();
        chip.security = SecurityMode::Unsealed;

        {
            let mut gauge = Bq35100::new(&mut chip, &mut delay, Config::default());
            block_on(gauge.read_security_mode()).unwrap();
            block_on(gauge.set_security_mode(SecurityMode::Unsealed)).unwrap();
        }

        assert!(chip.subcommands.is_empty());
    }

    #[test]
    fn unknown_is_not_a_target() {
        let mut chip = FakeChip::new();
        let mut delay = FakeDelay::default();

        {
            let mut gauge = Bq35100::new(&mut chip, &mut delay, Config::default());
            assert!(matches!(
                block_on(gauge.set_security_mode(SecurityMode::Unknown)),
                Err(ChipError::Range)
            ));
        }

        assert_eq!(chip.transactions, 0);
    }
}
