//! Cathy3K bootloader wire protocol: command bytes and framing constants.
//!
//! Every exchange is a single-byte command, optionally followed by
//! fixed-format arguments, answered by a defined-length reply. The 16-bit
//! address and length fields are big-endian. These byte values are
//! normative; they must match the device firmware exactly.

/// Smallest addressable write unit of the cart's flash chip.
pub const PAGE_SIZE: usize = 256;

/// Transfer chunk size used by the protocol, independent of the chip's
/// native erase granularity.
pub const BLOCK_SIZE: usize = 4096;

/// Pages covered by one full block.
#[allow(clippy::cast_possible_truncation)] // 4096 / 256 = 16
pub const PAGES_PER_BLOCK: u16 = (BLOCK_SIZE / PAGE_SIZE) as u16;

/// Opening (and immediately closing) the CDC port at this rate resets
/// application firmware into the bootloader. Hardware convention of the
/// Caterina bootloader family; no response is expected.
pub const RESET_BAUD: u32 = 1200;

/// Data rate of the bootloader command protocol.
pub const PROTOCOL_BAUD: u32 = 57600;

/// Oldest bootloader version that understands the flash cart commands.
pub const MIN_PROTOCOL_VERSION: u8 = 13;

/// Bootloader command bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Query the protocol version (reply: two ASCII decimal digits).
    Version = b'V',
    /// Read the JEDEC identity (reply: manufacturer, device, capacity exponent).
    Identify = b'j',
    /// Select the destination page address for the next write (arg: u16 BE, reply: ack).
    SetAddress = b'A',
    /// Declare the byte length of the following data write (arg: u16 BE, no reply).
    SetLength = b'B',
    /// Stream the declared number of raw bytes (reply: ack).
    WriteData = b'C',
    /// Set the RGB status LED (arg: state code, reply: ack).
    SetLed = b'x',
    /// Leave the bootloader and resume application firmware (reply: ack).
    Exit = b'E',
}

/// RGB status LED codes understood by the `SetLed` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LedState {
    /// Restore normal bootloader LED breathing.
    Normal = 0x00,
    /// All channels off.
    Off = 0x40,
    /// Red; alternated with off while blocks are in flight.
    Red = 0x42,
    /// Green; transfer complete.
    Green = 0x44,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes_match_device_firmware() {
        assert_eq!(Command::Version as u8, 0x56);
        assert_eq!(Command::Identify as u8, 0x6A);
        assert_eq!(Command::SetAddress as u8, 0x41);
        assert_eq!(Command::SetLength as u8, 0x42);
        assert_eq!(Command::WriteData as u8, 0x43);
        assert_eq!(Command::SetLed as u8, 0x78);
        assert_eq!(Command::Exit as u8, 0x45);
    }

    #[test]
    fn test_led_codes() {
        assert_eq!(LedState::Normal as u8, 0x00);
        assert_eq!(LedState::Off as u8, 0x40);
        assert_eq!(LedState::Red as u8, 0x42);
        assert_eq!(LedState::Green as u8, 0x44);
    }

    #[test]
    fn test_block_geometry() {
        assert_eq!(PAGE_SIZE, 256);
        assert_eq!(BLOCK_SIZE, 4096);
        assert_eq!(PAGES_PER_BLOCK, 16);
    }
}
