use core::marker::PhantomData;

use bit::BitIndex;
use embassy_futures::yield_now;
use embedded_hal::{digital::OutputPin, spi::Operation};
use embedded_hal_async::{delay::DelayNs, spi::SpiDevice};
use embedded_storage_async::nor_flash::{MultiwriteNorFlash, NorFlash, ReadNorFlash};

use crate::{
    check_addr, check_erase, check_range,
    command::{addr_header, EraseType},
    error::Error,
    plan::{align_down, page_bursts, sector_strides},
    profile::{self, Profile},
    register::*,
    BusyPoll, PROBE_CHUNK,
};

/// Type alias for the AsyncW25Q80
pub type AsyncW25Q80<SPI, WP, D> = AsyncFlash<profile::W25Q80, SPI, WP, D>;

/// Type alias for the AsyncW25Q16
pub type AsyncW25Q16<SPI, WP, D> = AsyncFlash<profile::W25Q16, SPI, WP, D>;

/// Type alias for the AsyncW25Q32
pub type AsyncW25Q32<SPI, WP, D> = AsyncFlash<profile::W25Q32, SPI, WP, D>;

/// Type alias for the AsyncW25Q64
pub type AsyncW25Q64<SPI, WP, D> = AsyncFlash<profile::W25Q64, SPI, WP, D>;

/// Type alias for the AsyncW25Q128
pub type AsyncW25Q128<SPI, WP, D> = AsyncFlash<profile::W25Q128, SPI, WP, D>;

/// Type alias for the AsyncBY25D40
pub type AsyncBY25D40<SPI, WP, D> = AsyncFlash<profile::BY25D40, SPI, WP, D>;

/// The generic async driver, same command sequences as [`crate::blocking::Flash`]
pub struct AsyncFlash<P, SPI, WP, D> {
    spi: SPI,
    wp: WP,
    delay: D,
    poll: BusyPoll,
    _profile: PhantomData<P>,
}

impl<P, SPI, WP, D, E, PE> AsyncFlash<P, SPI, WP, D>
where
    P: Profile,
    SPI: SpiDevice<Error = E>,
    WP: OutputPin<Error = PE>,
    D: DelayNs,
{
    pub const fn capacity() -> usize {
        P::CAPACITY as usize
    }

    pub fn new(spi: SPI, wp: WP, delay: D) -> Self {
        Self {
            spi,
            wp,
            delay,
            poll: BusyPoll::default(),
            _profile: PhantomData,
        }
    }

    /// Create a new instance and check the chip ids, see [`crate::blocking::Flash::init`]
    pub async fn init(spi: SPI, wp: WP, delay: D) -> Result<Self, Error<E, PE>> {
        let mut flash = Self::new(spi, wp, delay);
        flash.wait_ready().await?;

        let (ManufacturerId(manufacturer), DeviceId(device)) =
            flash.read_manufacturer_id().await?;
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
            flash.reset_protection_mode().await?;
        }
        Ok(flash)
    }

    pub fn with_busy_poll(mut self, poll: BusyPoll) -> Self {
        self.poll = poll;
        self
    }

    pub fn release(self) -> (SPI, WP, D) {
        (self.spi, self.wp, self.delay)
    }

    async fn command_write(&mut self, bytes: &[u8]) -> Result<(), Error<E, PE>> {
        self.spi.write(bytes).await.map_err(Error::Spi)
    }

    async fn command_read(
        &mut self,
        command: &[u8],
        buff: &mut [u8],
    ) -> Result<(), Error<E, PE>> {
        self.spi
            .transaction(&mut [Operation::Write(command), Operation::Read(buff)])
            .await
            .map_err(Error::Spi)
    }

    async fn addr_command(&mut self, opcode: u8, addr: u32) -> Result<(), Error<E, PE>> {
        self.command_write(&addr_header(opcode, addr)).await
    }

    async fn read_base(&mut self, addr: u32, buff: &mut [u8]) -> Result<(), Error<E, PE>> {
        let res = self
            .command_read(&addr_header(P::OPCODES.read, addr), buff)
            .await;
        #[cfg(feature = "defmt")]
        if res.is_err() {
            defmt::error!("ERROR READ");
        }
        res
    }

    async fn write_base(&mut self, addr: u32, buff: &[u8]) -> Result<(), Error<E, PE>> {
        let cmd = addr_header(P::OPCODES.page_program, addr);
        self.spi
            .transaction(&mut [Operation::Write(&cmd), Operation::Write(buff)])
            .await
            .map_err(Error::Spi)
    }

    async fn prepare_write(&mut self) -> Result<(), Error<E, PE>> {
        self.wait_ready().await?;
        self.write_enable().await
    }

    /// Read n bytes from an address
    pub async fn read(&mut self, addr: u32, buff: &mut [u8]) -> Result<(), Error<E, PE>> {
        check_range(P::CAPACITY, addr, buff.len())?;
        if buff.is_empty() {
            return Ok(());
        }
        self.wait_ready().await?;
        self.read_base(addr, buff).await
    }

    pub async fn read_byte(&mut self, addr: u32) -> Result<u8, Error<E, PE>> {
        let mut buff = [0; 1];
        self.read(addr, &mut buff).await?;
        Ok(buff[0])
    }

    /// Read a little endian half word
    pub async fn read_word(&mut self, addr: u32) -> Result<u16, Error<E, PE>> {
        let mut buff = [0; 2];
        self.read(addr, &mut buff).await?;
        Ok(u16::from_le_bytes(buff))
    }

    /// Check whether `len` bytes from `addr` all read as erased (0xFF)
    pub async fn is_erased(&mut self, addr: u32, len: u32) -> Result<bool, Error<E, PE>> {
        check_range(P::CAPACITY, addr, len as usize)?;
        self.wait_ready().await?;

        let mut chunk = [0u8; PROBE_CHUNK];
        let end = addr + len;
        let mut cursor = addr;
        while cursor < end {
            let n = (end - cursor).min(PROBE_CHUNK as u32);
            let buff = &mut chunk[..n as usize];
            self.read_base(cursor, buff).await?;
            if buff.iter().any(|&b| b != 0xFF) {
                return Ok(false);
            }
            cursor += n;
        }
        Ok(true)
    }

    /// Erase the sectors under `[addr, addr + len)` that are not erased already
    pub async fn erase_for_write(&mut self, addr: u32, len: u32) -> Result<(), Error<E, PE>> {
        check_range(P::CAPACITY, addr, len as usize)?;
        for stride in sector_strides(addr, len, P::SECTOR_SIZE) {
            if !self.is_erased(stride.addr, stride.len).await? {
                self.erase(EraseType::Sector, stride.addr).await?;
            }
        }
        Ok(())
    }

    /// Program `bytes` at `addr` without erasing first, split so no burst crosses a page
    pub async fn program(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Error<E, PE>> {
        check_range(P::CAPACITY, addr, bytes.len())?;

        let mut rest = bytes;
        for burst in page_bursts(addr, bytes.len() as u32, P::PAGE_SIZE) {
            let (now, later) = rest.split_at(burst.len as usize);
            #[cfg(feature = "defmt")]
            defmt::trace!("Program {=u32:#x} len {=u32}", burst.addr, burst.len);
            self.prepare_write().await?;
            self.write_base(burst.addr, now).await?;
            self.wait_ready().await?;
            rest = later;
        }
        Ok(())
    }

    /// Write `bytes` at `addr`, erasing the sectors underneath unless they are erased already.
    /// See [`crate::blocking::Flash::write_bytes`].
    pub async fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Error<E, PE>> {
        check_range(P::CAPACITY, addr, bytes.len())?;
        match bytes.len() {
            0 => return Ok(()),
            1 => {
                let page = align_down(addr, P::PAGE_SIZE);
                if !self.is_erased(page, P::PAGE_SIZE).await? {
                    self.erase(EraseType::Sector, addr).await?;
                }
            }
            len => self.erase_for_write(addr, len as u32).await?,
        }
        self.program(addr, bytes).await
    }

    pub async fn write_byte(&mut self, addr: u32, byte: u8) -> Result<(), Error<E, PE>> {
        self.write_bytes(addr, &[byte]).await
    }

    /// Write a little endian half word
    pub async fn write_word(&mut self, addr: u32, word: u16) -> Result<(), Error<E, PE>> {
        self.write_bytes(addr, &word.to_le_bytes()).await
    }

    /// Erase the granule of type `kind` containing `addr`. `addr` is ignored for a chip erase.
    pub async fn erase(&mut self, kind: EraseType, addr: u32) -> Result<(), Error<E, PE>> {
        check_addr(P::CAPACITY, addr)?;
        let opcode = kind.opcode(&P::OPCODES);
        #[cfg(feature = "defmt")]
        defmt::debug!("Erase {:?} at {=u32:#x}", kind, addr);

        self.prepare_write().await?;
        match kind {
            EraseType::Chip => self.command_write(&[opcode]).await?,
            _ => {
                let base = align_down(addr, kind.size(P::SECTOR_SIZE, P::CAPACITY));
                self.addr_command(opcode, base).await?;
            }
        }
        self.wait_ready().await?;
        Ok(())
    }

    /// Erase the 4kB sector containing `addr`
    pub async fn erase_sector(&mut self, addr: u32) -> Result<(), Error<E, PE>> {
        self.erase(EraseType::Sector, addr).await
    }

    /// Erase the 32kB block containing `addr`
    pub async fn erase_half_block(&mut self, addr: u32) -> Result<(), Error<E, PE>> {
        self.erase(EraseType::HalfBlock, addr).await
    }

    /// Erase the 64kB block containing `addr`
    pub async fn erase_block(&mut self, addr: u32) -> Result<(), Error<E, PE>> {
        self.erase(EraseType::Block, addr).await
    }

    /// Erase the whole chip
    pub async fn erase_chip(&mut self) -> Result<(), Error<E, PE>> {
        self.erase(EraseType::Chip, 0).await
    }

    /// Enable write operation, though you shouldn't need this function since it's already
    /// handled in the write/erase operations.
    pub async fn write_enable(&mut self) -> Result<(), Error<E, PE>> {
        self.command_write(&[P::OPCODES.write_enable]).await
    }

    /// Disable write
    pub async fn write_disable(&mut self) -> Result<(), Error<E, PE>> {
        self.command_write(&[P::OPCODES.write_disable]).await
    }

    /// Read the status register
    pub async fn read_status(&mut self) -> Result<StatusRegister, Error<E, PE>> {
        let mut status = [0; 1];
        self.command_read(&[P::OPCODES.read_status], &mut status).await?;
        Ok(StatusRegister::new(status[0], P::STATUS))
    }

    /// Write the status register. [`Self::write_enable`] is called internally
    pub async fn write_status(&mut self, status: StatusRegister) -> Result<(), Error<E, PE>> {
        self.prepare_write().await?;
        self.command_write(&[P::OPCODES.write_status, status.bits()]).await?;
        self.wait_ready().await?;
        Ok(())
    }

    pub async fn read_status2(&mut self) -> Result<u8, Error<E, PE>> {
        let layout = P::STATUS2.ok_or(Error::Value)?;
        let mut status = [0; 1];
        self.command_read(&[layout.read_opcode], &mut status).await?;
        Ok(status[0])
    }

    pub async fn write_status2(&mut self, bits: u8) -> Result<(), Error<E, PE>> {
        let layout = P::STATUS2.ok_or(Error::Value)?;
        self.prepare_write().await?;
        self.command_write(&[layout.write_opcode, bits]).await?;
        self.wait_ready().await?;
        Ok(())
    }

    /// Read the wip bit, just less noisy than the `read_status().await.unwrap().wip_bit()`
    pub async fn poll_wip(&mut self) -> Result<(), Error<E, PE>> {
        if self.read_status().await?.wip_bit() {
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Wait until the chip is idle and return the last status read
    pub async fn wait_ready(&mut self) -> Result<StatusRegister, Error<E, PE>> {
        let mut polls = 0;
        loop {
            let status = self.read_status().await?;
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
                self.delay.delay_us(self.poll.interval_us).await;
            } else {
                yield_now().await;
            }
        }
    }

    /// Read the manufacturer ID and the device ID
    pub async fn read_manufacturer_id(
        &mut self,
    ) -> Result<(ManufacturerId, DeviceId), Error<E, PE>> {
        let mut ids = [0; 2];
        self.command_read(&addr_header(P::OPCODES.read_manufacturer_id, 0), &mut ids)
            .await?;
        Ok((ManufacturerId(ids[0]), DeviceId(ids[1])))
    }

    pub async fn protection_size(&mut self) -> Result<ProtectionSize, Error<E, PE>> {
        let field = self.wait_ready().await?.protected_block();
        ProtectionSize::from_field(field, P::PROTECTION).ok_or(Error::Value)
    }

    /// Protect `size` bytes, [`Error::Value`] if the chip has no such protection size
    pub async fn set_protection_size(&mut self, size: ProtectionSize) -> Result<(), Error<E, PE>> {
        let field = size.to_field(P::PROTECTION).ok_or(Error::Value)?;
        let status = self.wait_ready().await?;
        self.write_status(status.with_protected_block(field)).await
    }

    pub async fn clear_protection(&mut self) -> Result<(), Error<E, PE>> {
        self.set_protection_size(ProtectionSize::None).await
    }

    /// Set the status register lock bit, then pull `WP#` low
    pub async fn lock_protection_bits(&mut self) -> Result<(), Error<E, PE>> {
        let status = self.wait_ready().await?;
        self.write_status(status.with_locked(true)).await?;
        self.wp.set_low().map_err(Error::Pin)
    }

    /// Release `WP#`, then clear the status register lock bit
    pub async fn unlock_protection_bits(&mut self) -> Result<(), Error<E, PE>> {
        self.wp.set_high().map_err(Error::Pin)?;
        let status = self.wait_ready().await?;
        self.write_status(status.with_locked(false)).await
    }

    async fn reset_protection_mode(&mut self) -> Result<(), Error<E, PE>> {
        let status = self.wait_ready().await?;
        let top = status.with_top_protection();
        if top != status {
            self.write_status(top).await?;
        }

        if let Some(layout) = P::STATUS2 {
            let status2 = self.read_status2().await?;
            let mut cleared = status2;
            cleared.set_bit(layout.complement as usize, false);
            if cleared != status2 {
                self.write_status2(cleared).await?;
            }
        }
        Ok(())
    }
}

impl<P, SPI, WP, D> embedded_storage_async::nor_flash::ErrorType for AsyncFlash<P, SPI, WP, D>
where
    P: Profile,
    SPI: SpiDevice,
    WP: OutputPin,
    D: DelayNs,
{
    type Error = Error<SPI::Error, WP::Error>;
}

impl<P, SPI, WP, D> ReadNorFlash for AsyncFlash<P, SPI, WP, D>
where
    P: Profile,
    SPI: SpiDevice,
    WP: OutputPin,
    D: DelayNs,
{
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        AsyncFlash::read(self, offset, bytes).await
    }

    fn capacity(&self) -> usize {
        Self::capacity()
    }
}

impl<P, SPI, WP, D> NorFlash for AsyncFlash<P, SPI, WP, D>
where
    P: Profile,
    SPI: SpiDevice,
    WP: OutputPin,
    D: DelayNs,
{
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = P::SECTOR_SIZE as usize;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(P::CAPACITY, P::SECTOR_SIZE, from, to)?;
        for stride in sector_strides(from, to - from, P::SECTOR_SIZE) {
            #[cfg(feature = "defmt")]
            defmt::trace!("Erase sector {=u32:#x}", stride.addr);
            self.erase_sector(stride.addr).await?;
        }
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.program(offset, bytes).await
    }
}

impl<P, SPI, WP, D> MultiwriteNorFlash for AsyncFlash<P, SPI, WP, D>
where
    P: Profile,
    SPI: SpiDevice,
    WP: OutputPin,
    D: DelayNs,
{
}
