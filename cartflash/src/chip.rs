//! JEDEC chip identity and the manufacturer name table.

use std::fmt;

/// Known JEDEC manufacturer codes seen on flash carts.
const MANUFACTURERS: &[(u8, &str)] = &[
    (0x01, "Spansion"),
    (0x14, "Cypress"),
    (0x1C, "EON"),
    (0x1F, "Adesto(Atmel)"),
    (0x20, "Micron"),
    (0x37, "AMIC"),
    (0x9D, "ISSI"),
    (0xC2, "General Plus"),
    (0xC8, "Giga Device"),
    (0xBF, "Microchip"),
    (0xEF, "Winbond"),
];

/// Look up a JEDEC manufacturer code.
///
/// Unrecognized codes render as "unknown"; they are never an error.
pub fn manufacturer_name(code: u8) -> &'static str {
    MANUFACTURERS
        .iter()
        .find(|(c, _)| *c == code)
        .map_or("unknown", |(_, name)| name)
}

/// The three-byte JEDEC identity of a cart's flash chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipIdentity {
    /// JEDEC manufacturer code.
    pub manufacturer: u8,
    /// Device code.
    pub device: u8,
    /// Capacity exponent; capacity in bytes is `2^exp`.
    pub capacity_exp: u8,
}

impl ChipIdentity {
    /// Build an identity from a raw identify reply.
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self {
            manufacturer: bytes[0],
            device: bytes[1],
            capacity_exp: bytes[2],
        }
    }

    /// Chip capacity in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        1u64 << self.capacity_exp
    }

    /// Human-readable manufacturer name, "unknown" if unrecognized.
    pub fn manufacturer_name(&self) -> &'static str {
        manufacturer_name(self.manufacturer)
    }
}

impl fmt::Display for ChipIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}{:02X}{:02X}",
            self.manufacturer, self.device, self.capacity_exp
        )
    }
}
