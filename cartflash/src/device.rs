//! Board discovery: match enumerated serial ports against known USB identities.
//!
//! Arduboy-family boards enumerate under two different product IDs
//! depending on which firmware is talking: the Caterina bootloader uses
//! one PID, the running application another. Each board therefore
//! contributes a pair of signatures, tagged explicitly with the firmware
//! [`Mode`] they denote.

use log::{debug, info};

use crate::port::{NativePortEnumerator, PortEnumerator, PortInfo};

/// Firmware mode a USB identity denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Application firmware is running; the board must be reset before it
    /// accepts bootloader commands.
    Normal,
    /// The Caterina bootloader is active and listening.
    Bootloader,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "application"),
            Self::Bootloader => write!(f, "bootloader"),
        }
    }
}

/// A known USB identity and the firmware mode it advertises.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    /// USB vendor ID.
    pub vid: u16,
    /// USB product ID.
    pub pid: u16,
    /// Firmware mode this identity denotes.
    pub mode: Mode,
    /// Human-readable board name.
    pub board: &'static str,
}

const fn sig(vid: u16, pid: u16, mode: Mode, board: &'static str) -> Signature {
    Signature {
        vid,
        pid,
        mode,
        board,
    }
}

/// Known boards, bootloader identity first, application identity second.
pub const SIGNATURES: &[Signature] = &[
    // Arduboy / Arduino Leonardo
    sig(0x2341, 0x0036, Mode::Bootloader, "Arduboy (Leonardo)"),
    sig(0x2341, 0x8036, Mode::Normal, "Arduboy (Leonardo)"),
    sig(0x2A03, 0x0036, Mode::Bootloader, "Arduboy (Leonardo)"),
    sig(0x2A03, 0x8036, Mode::Normal, "Arduboy (Leonardo)"),
    // Arduino Micro
    sig(0x2341, 0x0037, Mode::Bootloader, "Arduboy (Micro)"),
    sig(0x2341, 0x8037, Mode::Normal, "Arduboy (Micro)"),
    sig(0x2A03, 0x0037, Mode::Bootloader, "Arduboy (Micro)"),
    sig(0x2A03, 0x8037, Mode::Normal, "Arduboy (Micro)"),
    // Genuino Micro
    sig(0x2341, 0x0237, Mode::Bootloader, "Genuino Micro"),
    sig(0x2341, 0x8237, Mode::Normal, "Genuino Micro"),
    // SparkFun Pro Micro 5V
    sig(0x1B4F, 0x9205, Mode::Bootloader, "SparkFun Pro Micro 5V"),
    sig(0x1B4F, 0x9206, Mode::Normal, "SparkFun Pro Micro 5V"),
    // Adafruit ItsyBitsy 5V
    sig(0x239A, 0x000E, Mode::Bootloader, "Adafruit ItsyBitsy 5V"),
    sig(0x239A, 0x800E, Mode::Normal, "Adafruit ItsyBitsy 5V"),
];

/// A discovered board endpoint.
///
/// Recreated by every discovery poll; never mutated, only replaced. The
/// port path can change across a reset, since the bootloader re-enumerates
/// as a different USB device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Serial port name/path of the endpoint.
    pub port: String,
    /// Firmware mode derived from the matched signature.
    pub mode: Mode,
    /// Board name from the matched signature.
    pub board: &'static str,
}

/// Match a single enumerated port against the signature table.
pub fn match_port(info: &PortInfo) -> Option<DeviceHandle> {
    let (vid, pid) = (info.vid?, info.pid?);
    SIGNATURES
        .iter()
        .find(|s| s.vid == vid && s.pid == pid)
        .map(|s| DeviceHandle {
            port: info.name.clone(),
            mode: s.mode,
            board: s.board,
        })
}

/// Match enumerated ports against the signature table, preserving port order.
pub fn match_ports(ports: &[PortInfo]) -> Vec<DeviceHandle> {
    ports.iter().filter_map(match_port).collect()
}

/// Discover all attached boards.
///
/// Enumeration failures are logged and reported as "nothing found" rather
/// than an error; absence of a board is a normal, representable result.
pub fn find_devices() -> Vec<DeviceHandle> {
    match NativePortEnumerator::list_ports() {
        Ok(ports) => match_ports(&ports),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Discover the first attached board, if any.
pub fn find_device() -> Option<DeviceHandle> {
    let handle = find_devices().into_iter().next()?;
    info!("Found {} ({}) at {}", handle.board, handle.mode, handle.port);
    Some(handle)
}
