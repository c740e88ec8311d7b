#![no_std]
//! This is a platform agnostic library for 25-series SPI NOR flash using [embedded-hal](https://github.com/rust-embedded/embedded-hal).
//!
//! On top of the raw command set, the driver keeps the flash usable as plain byte addressable
//! storage:
//! * writes of any length and alignment are split into page program bursts,
//! * the sectors under a write are erased first, unless they already read back as erased,
//! * block protection and the status register lock are driven together with the `WP#` pin.
//!
//! Multiple chips are supported, see [`profile`]:
//! * Winbond W25Q80, W25Q16, W25Q32, W25Q64, W25Q128
//! * Boya Microelectronics BY25D40
//!
//! Both a [`blocking`] and an [`asynchronous`] driver are provided, they issue the same command
//! sequences.

pub mod asynchronous;
pub mod blocking;
pub mod command;
pub mod error;
pub mod plan;
pub mod profile;
pub mod register;

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin};

use crate::error::Error;

pub const BLOCK64_SIZE: u32 = 0x010000;
pub const BLOCK32_SIZE: u32 = BLOCK64_SIZE / 2;

pub const SECTOR_SIZE: u32 = 0x1000;
pub const PAGE_SIZE: u32 = 0x100;

/// Bytes read per transaction when checking a region for erased cells
pub(crate) const PROBE_CHUNK: usize = 16;

/// How the driver waits for the chip to finish a program, erase or status write.
///
/// The default polls the status register until the busy bit clears, however long it takes.
/// Set `max_polls` to turn a hung or missing chip into [`Error::Timeout`] instead.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusyPoll {
    /// Number of status reads before giving up, `None` for no limit
    pub max_polls: Option<u32>,
    /// Pause between two status reads in microseconds. With 0 the blocking driver spins and
    /// the async driver yields.
    pub interval_us: u32,
}

impl BusyPoll {
    pub const fn bounded(max_polls: u32, interval_us: u32) -> Self {
        Self {
            max_polls: Some(max_polls),
            interval_us,
        }
    }

    /// Whether `polls` status reads have used up the budget
    pub(crate) fn exhausted(&self, polls: u32) -> bool {
        self.max_polls.is_some_and(|max| polls >= max)
    }
}

/// Stand-in for boards where `WP#` is tied high instead of wired to the MCU.
/// Locking then only sets the status register bit.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWriteProtectPin;

impl ErrorType for NoWriteProtectPin {
    type Error = Infallible;
}

impl OutputPin for NoWriteProtectPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

pub(crate) fn check_range<S, P>(
    capacity: u32,
    offset: u32,
    length: usize,
) -> Result<(), Error<S, P>> {
    let length = u32::try_from(length).map_err(|_| Error::OutOfBounds)?;
    if length > capacity || offset > capacity - length {
        return Err(Error::OutOfBounds);
    }
    Ok(())
}

pub(crate) fn check_erase<S, P>(
    capacity: u32,
    sector_size: u32,
    from: u32,
    to: u32,
) -> Result<(), Error<S, P>> {
    if from > to || to > capacity {
        return Err(Error::OutOfBounds);
    }
    if from % sector_size != 0 || to % sector_size != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

pub(crate) fn check_addr<S, P>(capacity: u32, addr: u32) -> Result<u32, Error<S, P>> {
    if addr >= capacity {
        return Err(Error::OutOfBounds);
    }
    Ok(addr)
}
