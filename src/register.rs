use core::ops::Range;

use bit::BitIndex;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManufacturerId(pub u8);

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId(pub u8);

/// Bit positions of the fields in status register 1
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLayout {
    pub busy: u8,
    pub write_enable_latch: u8,
    pub protection_offset: u8,
    pub protection_width: u8,
    pub top_bottom: Option<u8>,
    pub sector_protect: Option<u8>,
    pub lock: u8,
}

impl StatusLayout {
    /// WIP/WEL in bit 0/1, BP2:0 in bits 2..5, TB, SEC, SRP in bit 7
    pub const STANDARD: StatusLayout = StatusLayout {
        busy: 0,
        write_enable_latch: 1,
        protection_offset: 2,
        protection_width: 3,
        top_bottom: Some(5),
        sector_protect: Some(6),
        lock: 7,
    };

    pub fn protection_range(&self) -> Range<usize> {
        let start = self.protection_offset as usize;
        start..start + self.protection_width as usize
    }

    /// Largest value the protection field can hold
    pub fn protection_max(&self) -> u8 {
        ((1u16 << self.protection_width) - 1) as u8
    }
}

/// Second status register, only present on some chips
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status2Layout {
    pub read_opcode: u8,
    pub write_opcode: u8,
    /// Complement protect, inverts the meaning of the protection field
    pub complement: u8,
}

impl Status2Layout {
    pub const W25Q: Status2Layout = Status2Layout {
        read_opcode: 0x35,
        write_opcode: 0x31,
        complement: 6,
    };
}

/// Raw status register together with the layout used to decode it.
/// Setters only touch their own field, every other bit is kept as read.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRegister {
    bits: u8,
    layout: StatusLayout,
}

impl StatusRegister {
    pub fn new(bits: u8, layout: StatusLayout) -> Self {
        Self { bits, layout }
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn layout(&self) -> StatusLayout {
        self.layout
    }

    pub fn wip_bit(&self) -> bool {
        self.bits.bit(self.layout.busy as usize)
    }

    pub fn write_enable_latch(&self) -> bool {
        self.bits.bit(self.layout.write_enable_latch as usize)
    }

    /// Raw value of the block protection field
    pub fn protected_block(&self) -> u8 {
        self.bits.bit_range(self.layout.protection_range())
    }

    pub fn top_bottom(&self) -> bool {
        self.layout
            .top_bottom
            .map_or(false, |pos| self.bits.bit(pos as usize))
    }

    pub fn sector_protect(&self) -> bool {
        self.layout
            .sector_protect
            .map_or(false, |pos| self.bits.bit(pos as usize))
    }

    /// Status register protect, the software half of the lock
    pub fn locked(&self) -> bool {
        self.bits.bit(self.layout.lock as usize)
    }

    /// Replace the protection field. Values wider than the field are masked.
    pub fn with_protected_block(mut self, value: u8) -> Self {
        let value = value & self.layout.protection_max();
        self.bits.set_bit_range(self.layout.protection_range(), value);
        self
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.bits.set_bit(self.layout.lock as usize, locked);
        self
    }

    /// Clear TB and SEC so the protection field counts from the top of the array
    pub fn with_top_protection(mut self) -> Self {
        if let Some(pos) = self.layout.top_bottom {
            self.bits.set_bit(pos as usize, false);
        }
        if let Some(pos) = self.layout.sector_protect {
            self.bits.set_bit(pos as usize, false);
        }
        self
    }
}

/// Amount of the array covered by block protection. Which sizes exist and the field
/// value encoding them depends on the chip, see [`crate::profile::Profile::PROTECTION`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionSize {
    None,
    Kb64,
    Kb128,
    Kb256,
    Kb384,
    Kb448,
    Kb480,
    Kb496,
    Kb504,
    Kb512,
    Mb1,
    Mb2,
    Mb4,
    Mb8,
    Mb16,
}

impl ProtectionSize {
    pub fn bytes(self) -> u32 {
        const KB: u32 = 1024;
        const MB: u32 = 1024 * KB;
        match self {
            ProtectionSize::None => 0,
            ProtectionSize::Kb64 => 64 * KB,
            ProtectionSize::Kb128 => 128 * KB,
            ProtectionSize::Kb256 => 256 * KB,
            ProtectionSize::Kb384 => 384 * KB,
            ProtectionSize::Kb448 => 448 * KB,
            ProtectionSize::Kb480 => 480 * KB,
            ProtectionSize::Kb496 => 496 * KB,
            ProtectionSize::Kb504 => 504 * KB,
            ProtectionSize::Kb512 => 512 * KB,
            ProtectionSize::Mb1 => MB,
            ProtectionSize::Mb2 => 2 * MB,
            ProtectionSize::Mb4 => 4 * MB,
            ProtectionSize::Mb8 => 8 * MB,
            ProtectionSize::Mb16 => 16 * MB,
        }
    }

    /// Field value encoding `self` in `ladder`
    pub fn to_field(self, ladder: &[(ProtectionSize, u8)]) -> Option<u8> {
        ladder
            .iter()
            .find(|(size, _)| *size == self)
            .map(|(_, field)| *field)
    }

    /// Size encoded by `field` in `ladder`
    pub fn from_field(field: u8, ladder: &[(ProtectionSize, u8)]) -> Option<ProtectionSize> {
        ladder
            .iter()
            .find(|(_, value)| *value == field)
            .map(|(size, _)| *size)
    }
}
