use core::marker::PhantomData;

use bit::BitIndex;
use embedded_hal::{
    delay::DelayNs,
    digital::OutputPin,
    spi::{Operation, SpiDevice},
};

use crate::{
    check_addr, check_erase, check_range,
    command::{addr_header, EraseType},
    error::Error,
    plan::{align_down, page_bursts, sector_strides},
    profile::{self, Profile},
    register::*,
    BusyPoll, PROBE_CHUNK,
};

/// Type alias for the W25Q80
pub type W25Q80<SPI, WP, D> = Flash<profile::W25Q80, SPI, WP, D>;

/// Type alias for the W25Q16
pub type W25Q16<SPI, WP, D> = Flash<profile::W25Q16, SPI, WP, D>;

/// Type alias for the W25Q32
pub type W25Q32<SPI, WP, D> = Flash<profile::W25Q32, SPI, WP, D>;

/// Type alias for the W25Q64
pub type W25Q64<SPI, WP, D> = Flash<profile::W25Q64, SPI, WP, D>;

/// Type alias for the W25Q128
pub type W25Q128<SPI, WP, D> = Flash<profile::W25Q128, SPI, WP, D>;

/// Type alias for the BY25D40
pub type BY25D40<SPI, WP, D> = Flash<profile::BY25D40, SPI, WP, D>;

/// The generic blocking driver.
///
/// Every operation that changes the array or the status register waits for the chip to be idle,
/// sets the write enable latch, issues the command and waits again, so consecutive calls never
/// race a program or erase still running in the chip.
pub struct Flash<P, SPI, WP, D> {
    spi: SPI,
    wp: WP,
    delay: D,
    poll: BusyPoll,
    _profile: PhantomData<P>,
}

impl<P, SPI, WP, D, E, PE> Flash<P, SPI, WP, D>
where
    P: Profile,
    SPI: SpiDevice<Error = E>,
    WP: OutputPin<Error = PE>,
    D: DelayNs,
{
    pub const fn capacity() -> usize {
        P::CAPACITY as usize
    }

    /// Create a new instance without talking to the chip, see [`Self::init`]
    pub fn new(spi: SPI, wp: WP, delay: D) -> Self {
        Self {
            spi,
            wp,
            delay,
            poll: BusyPoll::default(),
            _profile: PhantomData,
        }
    }

    /// Create a new instance and check that the chip on the bus is the one described by `P`.
    /// On Winbond parts the TB, SEC and CMP bits are cleared so [`ProtectionSize`] values
    /// protect from the top of the array.
    pub fn init(spi: SPI, wp: WP, delay: D) -> Result<Self, Error<E, PE>> {
        let mut flash = Self::new(spi, wp, delay);
        flash.wait_ready()?;

        let (ManufacturerId(manufacturer), DeviceId(device)) = flash.read_manufacturer_id()?;
        if manufacturer != P::MANUFACTURER_ID || P::DEVICE_ID.is_some_and(|id| id != device) {
            #[cfg(feature = "defmt")]
            defmt::error!(
                "Expected {=str}, found manufacturer {=u8:#x} device {=u8:#x}",
                P::NAME,
                manufacturer,
                device
            );
            return Err(Error::UnexpectedDevice {
                manufacturer,
                device,
            });
        }

        if P::RESET_PROTECTION_MODE {
            flash.reset_protection_mode()?;
        }

        #[cfg(feature = "defmt")]
        defmt::info!("{=str} ready", P::NAME);
        Ok(flash)
    }

    /// Change how the driver waits for the chip, see [`BusyPoll`]
    pub fn with_busy_poll(mut self, poll: BusyPoll) -> Self {
        self.poll = poll;
        self
    }

    /// Give back the bus, the pin and the delay
    pub fn release(self) -> (SPI, WP, D) {
        (self.spi, self.wp, self.delay)
    }

    fn command_write(&mut self, bytes: &[u8]) -> Result<(), Error<E, PE>> {
        self.spi.write(bytes).map_err(Error::Spi)
    }

    fn command_read(&mut self, command: &[u8], buff: &mut [u8]) -> Result<(), Error<E, PE>> {
        self.spi
            .transaction(&mut [Operation::Write(command), Operation::Read(buff)])
            .map_err(Error::Spi)
    }

    fn addr_command(&mut self, opcode: u8, addr: u32) -> Result<(), Error<E, PE>> {
        self.command_write(&addr_header(opcode, addr))
    }

    fn read_base(&mut self, addr: u32, buff: &mut [u8]) -> Result<(), Error<E, PE>> {
        self.command_read(&addr_header(P::OPCODES.read, addr), buff)
    }

    fn write_base(&mut self, addr: u32, buff: &[u8]) -> Result<(), Error<E, PE>> {
        let cmd = addr_header(P::OPCODES.page_program, addr);
        self.spi
            .transaction(&mut [Operation::Write(&cmd), Operation::Write(buff)])
            .map_err(Error::Spi)
    }

    fn prepare_write(&mut self) -> Result<(), Error<E, PE>> {
        self.wait_ready()?;
        self.write_enable()
    }

    /// Read n bytes from an address
    pub fn read(&mut self, addr: u32, buff: &mut [u8]) -> Result<(), Error<E, PE>> {
        check_range(P::CAPACITY, addr, buff.len())?;
        if buff.is_empty() {
            return Ok(());
        }
        self.wait_ready()?;
        self.read_base(addr, buff)
    }

    pub fn read_byte(&mut self, addr: u32) -> Result<u8, Error<E, PE>> {
        let mut buff = [0; 1];
        self.read(addr, &mut buff)?;
        Ok(buff[0])
    }

    /// Read a little endian half word
    pub fn read_word(&mut self, addr: u32) -> Result<u16, Error<E, PE>> {
        let mut buff = [0; 2];
        self.read(addr, &mut buff)?;
        Ok(u16::from_le_bytes(buff))
    }

    /// Check whether `len` bytes from `addr` all read as erased (0xFF).
    ///
    /// The range is streamed in small chunks and the check stops at the first chunk holding a
    /// programmed byte.
    pub fn is_erased(&mut self, addr: u32, len: u32) -> Result<bool, Error<E, PE>> {
        check_range(P::CAPACITY, addr, len as usize)?;
        self.wait_ready()?;

        let mut chunk = [0u8; PROBE_CHUNK];
        let end = addr + len;
        let mut cursor = addr;
        while cursor < end {
            let n = (end - cursor).min(PROBE_CHUNK as u32);
            let buff = &mut chunk[..n as usize];
            self.read_base(cursor, buff)?;
            if buff.iter().any(|&b| b != 0xFF) {
                return Ok(false);
            }
            cursor += n;
        }
        Ok(true)
    }

    /// Erase the sectors under `[addr, addr + len)` that are not erased already
    pub fn erase_for_write(&mut self, addr: u32, len: u32) -> Result<(), Error<E, PE>> {
        check_range(P::CAPACITY, addr, len as usize)?;
        for stride in sector_strides(addr, len, P::SECTOR_SIZE) {
            if !self.is_erased(stride.addr, stride.len)? {
                self.erase(EraseType::Sector, stride.addr)?;
            }
        }
        Ok(())
    }

    /// Program `bytes` at `addr` without erasing first, split so no burst crosses a page.
    /// Cells can only go from 1 to 0, the target must be erased to read back `bytes`.
    pub fn program(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Error<E, PE>> {
        check_range(P::CAPACITY, addr, bytes.len())?;

        let mut rest = bytes;
        for burst in page_bursts(addr, bytes.len() as u32, P::PAGE_SIZE) {
            let (now, later) = rest.split_at(burst.len as usize);
            #[cfg(feature = "defmt")]
            defmt::trace!("Program {=u32:#x} len {=u32}", burst.addr, burst.len);
            self.prepare_write()?;
            self.write_base(burst.addr, now)?;
            // Wait for the program to complete, to behave like a flush
            self.wait_ready()?;
            rest = later;
        }
        Ok(())
    }

    /// Write `bytes` at `addr`, erasing the sectors underneath unless they are erased already.
    ///
    /// Erasing works on whole sectors: bytes sharing a sector with the written range may be
    /// lost. A single byte write only erases when its page holds programmed data.
    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Error<E, PE>> {
        check_range(P::CAPACITY, addr, bytes.len())?;
        match bytes.len() {
            0 => return Ok(()),
            1 => {
                let page = align_down(addr, P::PAGE_SIZE);
                if !self.is_erased(page, P::PAGE_SIZE)? {
                    self.erase(EraseType::Sector, addr)?;
                }
            }
            len => self.erase_for_write(addr, len as u32)?,
        }
        self.program(addr, bytes)
    }

    pub fn write_byte(&mut self, addr: u32, byte: u8) -> Result<(), Error<E, PE>> {
        self.write_bytes(addr, &[byte])
    }

    /// Write a little endian half word
    pub fn write_word(&mut self, addr: u32, word: u16) -> Result<(), Error<E, PE>> {
        self.write_bytes(addr, &word.to_le_bytes())
    }

    /// Erase the granule of type `kind` containing `addr`. `addr` is ignored for a chip erase.
    pub fn erase(&mut self, kind: EraseType, addr: u32) -> Result<(), Error<E, PE>> {
        check_addr(P::CAPACITY, addr)?;
        let opcode = kind.opcode(&P::OPCODES);
        #[cfg(feature = "defmt")]
        defmt::debug!("Erase {:?} at {=u32:#x}", kind, addr);

        self.prepare_write()?;
        match kind {
            EraseType::Chip => self.command_write(&[opcode])?,
            _ => {
                let base = align_down(addr, kind.size(P::SECTOR_SIZE, P::CAPACITY));
                self.addr_command(opcode, base)?;
            }
        }
        // Wait for the erase to complete, acting like a flush
        self.wait_ready()?;
        Ok(())
    }

    /// Erase the 4kB sector containing `addr`
    pub fn erase_sector(&mut self, addr: u32) -> Result<(), Error<E, PE>> {
        self.erase(EraseType::Sector, addr)
    }

    /// Erase the 32kB block containing `addr`
    pub fn erase_half_block(&mut self, addr: u32) -> Result<(), Error<E, PE>> {
        self.erase(EraseType::HalfBlock, addr)
    }

    /// Erase the 64kB block containing `addr`
    pub fn erase_block(&mut self, addr: u32) -> Result<(), Error<E, PE>> {
        self.erase(EraseType::Block, addr)
    }

    /// Erase the whole chip
    pub fn erase_chip(&mut self) -> Result<(), Error<E, PE>> {
        self.erase(EraseType::Chip, 0)
    }

    /// Enable write operation, though you shouldn't need this function since it's already
    /// handled in the write/erase operations.
    pub fn write_enable(&mut self) -> Result<(), Error<E, PE>> {
        self.command_write(&[P::OPCODES.write_enable])
    }

    /// Disable write
    pub fn write_disable(&mut self) -> Result<(), Error<E, PE>> {
        self.command_write(&[P::OPCODES.write_disable])
    }

    /// Read the status register
    pub fn read_status(&mut self) -> Result<StatusRegister, Error<E, PE>> {
        let mut status = [0; 1];
        self.command_read(&[P::OPCODES.read_status], &mut status)?;
        Ok(StatusRegister::new(status[0], P::STATUS))
    }

    /// Write the status register. [`Self::write_enable`] is called internally
    pub fn write_status(&mut self, status: StatusRegister) -> Result<(), Error<E, PE>> {
        self.prepare_write()?;
        self.command_write(&[P::OPCODES.write_status, status.bits()])?;
        self.wait_ready()?;
        Ok(())
    }

    /// Read the second status register, [`Error::Value`] on chips without one
    pub fn read_status2(&mut self) -> Result<u8, Error<E, PE>> {
        let layout = P::STATUS2.ok_or(Error::Value)?;
        let mut status = [0; 1];
        self.command_read(&[layout.read_opcode], &mut status)?;
        Ok(status[0])
    }

    /// Write the second status register, [`Error::Value`] on chips without one
    pub fn write_status2(&mut self, bits: u8) -> Result<(), Error<E, PE>> {
        let layout = P::STATUS2.ok_or(Error::Value)?;
        self.prepare_write()?;
        self.command_write(&[layout.write_opcode, bits])?;
        self.wait_ready()?;
        Ok(())
    }

    /// Read the wip bit, just less noisy than the `read_status().unwrap().wip_bit()`
    pub fn poll_wip(&mut self) -> Result<(), Error<E, PE>> {
        if self.read_status()?.wip_bit() {
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Block until the chip is idle and return the last status read
    pub fn wait_ready(&mut self) -> Result<StatusRegister, Error<E, PE>> {
        let mut polls = 0;
        loop {
            let status = self.read_status()?;
            if !status.wip_bit() {
                return Ok(status);
            }
            polls += 1;
            if self.poll.exhausted(polls) {
                #[cfg(feature = "defmt")]
                defmt::warn!("Still busy after {=u32} polls", polls);
                return Err(Error::Timeout);
            }
            if self.poll.interval_us > 0 {
                self.delay.delay_us(self.poll.interval_us);
            }
        }
    }

    /// Read the manufacturer ID and the device ID
    pub fn read_manufacturer_id(&mut self) -> Result<(ManufacturerId, DeviceId), Error<E, PE>> {
        let mut ids = [0; 2];
        self.command_read(&addr_header(P::OPCODES.read_manufacturer_id, 0), &mut ids)?;
        Ok((ManufacturerId(ids[0]), DeviceId(ids[1])))
    }

    /// Currently protected size
    pub fn protection_size(&mut self) -> Result<ProtectionSize, Error<E, PE>> {
        let field = self.wait_ready()?.protected_block();
        ProtectionSize::from_field(field, P::PROTECTION).ok_or(Error::Value)
    }

    /// Protect `size` bytes, [`Error::Value`] if the chip has no such protection size.
    /// Only the protection field is rewritten, the lock bit and every other bit are kept.
    pub fn set_protection_size(&mut self, size: ProtectionSize) -> Result<(), Error<E, PE>> {
        let field = size.to_field(P::PROTECTION).ok_or(Error::Value)?;
        let status = self.wait_ready()?;
        #[cfg(feature = "defmt")]
        defmt::debug!("Protection {:?} -> field {=u8}", size, field);
        self.write_status(status.with_protected_block(field))
    }

    /// Remove block protection
    pub fn clear_protection(&mut self) -> Result<(), Error<E, PE>> {
        self.set_protection_size(ProtectionSize::None)
    }

    /// Set the status register lock bit, then pull `WP#` low. While both hold, the chip
    /// ignores status register writes.
    pub fn lock_protection_bits(&mut self) -> Result<(), Error<E, PE>> {
        let status = self.wait_ready()?;
        self.write_status(status.with_locked(true))?;
        self.wp.set_low().map_err(Error::Pin)
    }

    /// Release `WP#`, then clear the status register lock bit
    pub fn unlock_protection_bits(&mut self) -> Result<(), Error<E, PE>> {
        self.wp.set_high().map_err(Error::Pin)?;
        let status = self.wait_ready()?;
        self.write_status(status.with_locked(false))
    }

    fn reset_protection_mode(&mut self) -> Result<(), Error<E, PE>> {
        let status = self.wait_ready()?;
        let top = status.with_top_protection();
        if top != status {
            self.write_status(top)?;
        }

        if let Some(layout) = P::STATUS2 {
            let status2 = self.read_status2()?;
            let mut cleared = status2;
            cleared.set_bit(layout.complement as usize, false);
            if cleared != status2 {
                self.write_status2(cleared)?;
            }
        }
        Ok(())
    }
}

/// Implementation of the `NorFlash` traits of the `embedded_storage` crate. Unlike
/// [`Flash::write_bytes`], `NorFlash::write` does not erase, callers erase first.
mod es {
    use super::*;
    use core::fmt::Debug;
    use embedded_storage::nor_flash::{
        ErrorType, MultiwriteNorFlash, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
    };

    impl<S, P> From<NorFlashErrorKind> for Error<S, P> {
        fn from(e: NorFlashErrorKind) -> Self {
            match e {
                NorFlashErrorKind::NotAligned => Error::NotAligned,
                NorFlashErrorKind::OutOfBounds => Error::OutOfBounds,
                _ => Error::Value,
            }
        }
    }

    impl<S, P> NorFlashError for Error<S, P>
    where
        S: Debug,
        P: Debug,
    {
        fn kind(&self) -> NorFlashErrorKind {
            match self {
                Error::OutOfBounds => NorFlashErrorKind::OutOfBounds,
                Error::NotAligned => NorFlashErrorKind::NotAligned,
                _ => NorFlashErrorKind::Other,
            }
        }
    }

    impl<P, SPI, WP, D> ErrorType for Flash<P, SPI, WP, D>
    where
        P: Profile,
        SPI: SpiDevice,
        WP: OutputPin,
        D: DelayNs,
    {
        type Error = Error<SPI::Error, WP::Error>;
    }

    impl<P, SPI, WP, D> ReadNorFlash for Flash<P, SPI, WP, D>
    where
        P: Profile,
        SPI: SpiDevice,
        WP: OutputPin,
        D: DelayNs,
    {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            Flash::read(self, offset, bytes)
        }

        fn capacity(&self) -> usize {
            Self::capacity()
        }
    }

    impl<P, SPI, WP, D> NorFlash for Flash<P, SPI, WP, D>
    where
        P: Profile,
        SPI: SpiDevice,
        WP: OutputPin,
        D: DelayNs,
    {
        const WRITE_SIZE: usize = 1;
        const ERASE_SIZE: usize = P::SECTOR_SIZE as usize;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            check_erase(P::CAPACITY, P::SECTOR_SIZE, from, to)?;
            for stride in sector_strides(from, to - from, P::SECTOR_SIZE) {
                self.erase_sector(stride.addr)?;
            }
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            self.program(offset, bytes)
        }
    }

    impl<P, SPI, WP, D> MultiwriteNorFlash for Flash<P, SPI, WP, D>
    where
        P: Profile,
        SPI: SpiDevice,
        WP: OutputPin,
        D: DelayNs,
    {
    }
}
