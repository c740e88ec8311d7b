//! Chip profiles.
//!
//! Every supported part is a zero sized marker type implementing [`Profile`]. The engines in
//! [`crate::blocking`] and [`crate::asynchronous`] are generic over the profile, so adding a
//! part is a matter of describing its ids, geometry and protection ladder here.

use crate::{
    command::Opcodes,
    register::{ProtectionSize, Status2Layout, StatusLayout},
    PAGE_SIZE, SECTOR_SIZE,
};

/// Compile time description of a chip
pub trait Profile {
    /// Part name, for logs
    const NAME: &'static str;

    /// JEDEC manufacturer id as answered to the read manufacturer id command
    const MANUFACTURER_ID: u8;

    /// Device id as answered to the read manufacturer id command. `None` accepts any device
    /// of the manufacturer.
    const DEVICE_ID: Option<u8>;

    /// Size of the array in bytes
    const CAPACITY: u32;

    const PAGE_SIZE: u32 = PAGE_SIZE;
    const SECTOR_SIZE: u32 = SECTOR_SIZE;

    const OPCODES: Opcodes = Opcodes::JEDEC;
    const STATUS: StatusLayout = StatusLayout::STANDARD;
    const STATUS2: Option<Status2Layout> = None;

    /// Whether [`crate::blocking::Flash::init`] resets TB, SEC and CMP so the protection
    /// ladder below applies from the top of the array
    const RESET_PROTECTION_MODE: bool = false;

    /// Protection sizes supported by the chip and the field value selecting them
    const PROTECTION: &'static [(ProtectionSize, u8)];
}

macro_rules! winbond {
    ($(#[$meta:meta])* $name:ident, $device:expr, $capacity:expr, $ladder:expr) => {
        $(#[$meta])*
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl Profile for $name {
            const NAME: &'static str = stringify!($name);
            const MANUFACTURER_ID: u8 = 0xEF;
            const DEVICE_ID: Option<u8> = Some($device);
            const CAPACITY: u32 = $capacity;
            const STATUS2: Option<Status2Layout> = Some(Status2Layout::W25Q);
            const RESET_PROTECTION_MODE: bool = true;
            const PROTECTION: &'static [(ProtectionSize, u8)] = $ladder;
        }
    };
}

winbond!(
    /// Winbond W25Q80, 1MB
    W25Q80,
    0x13,
    0x10_0000,
    &[
        (ProtectionSize::None, 0),
        (ProtectionSize::Kb64, 1),
        (ProtectionSize::Kb128, 2),
        (ProtectionSize::Kb256, 3),
        (ProtectionSize::Kb512, 4),
        (ProtectionSize::Mb1, 7),
    ]
);

winbond!(
    /// Winbond W25Q16, 2MB
    W25Q16,
    0x14,
    0x20_0000,
    &[
        (ProtectionSize::None, 0),
        (ProtectionSize::Kb64, 1),
        (ProtectionSize::Kb128, 2),
        (ProtectionSize::Kb256, 3),
        (ProtectionSize::Kb512, 4),
        (ProtectionSize::Mb1, 5),
        (ProtectionSize::Mb2, 7),
    ]
);

winbond!(
    /// Winbond W25Q32, 4MB
    W25Q32,
    0x15,
    0x40_0000,
    &[
        (ProtectionSize::None, 0),
        (ProtectionSize::Kb64, 1),
        (ProtectionSize::Kb128, 2),
        (ProtectionSize::Kb256, 3),
        (ProtectionSize::Kb512, 4),
        (ProtectionSize::Mb1, 5),
        (ProtectionSize::Mb2, 6),
        (ProtectionSize::Mb4, 7),
    ]
);

winbond!(
    /// Winbond W25Q64, 8MB
    W25Q64,
    0x16,
    0x80_0000,
    &[
        (ProtectionSize::None, 0),
        (ProtectionSize::Kb128, 1),
        (ProtectionSize::Kb256, 2),
        (ProtectionSize::Kb512, 3),
        (ProtectionSize::Mb1, 4),
        (ProtectionSize::Mb2, 5),
        (ProtectionSize::Mb4, 6),
        (ProtectionSize::Mb8, 7),
    ]
);

winbond!(
    /// Winbond W25Q128, 16MB
    W25Q128,
    0x17,
    0x100_0000,
    &[
        (ProtectionSize::None, 0),
        (ProtectionSize::Kb256, 1),
        (ProtectionSize::Kb512, 2),
        (ProtectionSize::Mb1, 3),
        (ProtectionSize::Mb2, 4),
        (ProtectionSize::Mb4, 5),
        (ProtectionSize::Mb8, 6),
        (ProtectionSize::Mb16, 7),
    ]
);

/// Boya Microelectronics BY25D40, 512kB. Its ladder protects from the bottom up, the field
/// value decreases as the protected area grows.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct BY25D40;

impl Profile for BY25D40 {
    const NAME: &'static str = "BY25D40";
    const MANUFACTURER_ID: u8 = 0x68;
    const DEVICE_ID: Option<u8> = Some(0x12);
    const CAPACITY: u32 = 0x8_0000;
    const PROTECTION: &'static [(ProtectionSize, u8)] = &[
        (ProtectionSize::None, 0),
        (ProtectionSize::Kb504, 1),
        (ProtectionSize::Kb496, 2),
        (ProtectionSize::Kb480, 3),
        (ProtectionSize::Kb448, 4),
        (ProtectionSize::Kb384, 5),
        (ProtectionSize::Kb256, 6),
        (ProtectionSize::Kb512, 7),
    ];
}
