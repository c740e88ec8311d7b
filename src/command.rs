/// Instruction set of a chip. Every supported chip uses [`Opcodes::JEDEC`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcodes {
    pub write_enable: u8,
    pub write_disable: u8,
    pub read_status: u8,
    pub write_status: u8,
    pub read: u8,
    pub page_program: u8,
    pub sector_erase: u8,
    pub half_block_erase: u8,
    pub block_erase: u8,
    pub chip_erase: u8,
    pub read_manufacturer_id: u8,
}

impl Opcodes {
    pub const JEDEC: Opcodes = Opcodes {
        write_enable: 0x06,
        write_disable: 0x04,
        read_status: 0x05,
        write_status: 0x01,
        read: 0x03,
        page_program: 0x02,
        sector_erase: 0x20,
        half_block_erase: 0x52,
        block_erase: 0xD8,
        chip_erase: 0x60,
        read_manufacturer_id: 0x90,
    };
}

/// Erase granules of the chip. Only [`EraseType::Sector`] is ever used by the write path,
/// the larger ones are there for callers who want to clear big regions quickly.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseType {
    /// 4kB
    Sector,
    /// 32kB
    HalfBlock,
    /// 64kB
    Block,
    /// The whole array
    Chip,
}

impl EraseType {
    pub fn opcode(self, opcodes: &Opcodes) -> u8 {
        match self {
            EraseType::Sector => opcodes.sector_erase,
            EraseType::HalfBlock => opcodes.half_block_erase,
            EraseType::Block => opcodes.block_erase,
            EraseType::Chip => opcodes.chip_erase,
        }
    }

    /// Number of bytes cleared by one erase of this type
    pub fn size(self, sector_size: u32, capacity: u32) -> u32 {
        match self {
            EraseType::Sector => sector_size,
            EraseType::HalfBlock => crate::BLOCK32_SIZE,
            EraseType::Block => crate::BLOCK64_SIZE,
            EraseType::Chip => capacity,
        }
    }
}

/// Build the opcode + 24 bit big endian address header of a command
pub(crate) fn addr_header(opcode: u8, addr: u32) -> [u8; 4] {
    [opcode, (addr >> 16) as u8, (addr >> 8) as u8, addr as u8]
}
