/// All possible errors emitted by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<SpiError, PinError> {
    /// Internal Spi error
    Spi(SpiError),

    /// The write protect pin could not be driven
    Pin(PinError),

    /// The chip answered with another manufacturer or device id than the profile expects
    UnexpectedDevice { manufacturer: u8, device: u8 },

    /// The chip stayed busy for longer than the configured poll budget
    Timeout,

    /// The chip is still executing a program, erase or status write
    Busy,

    /// Invalid value passed
    Value,

    /// Address out of bound
    OutOfBounds,

    /// Address not aligned
    NotAligned,
}
