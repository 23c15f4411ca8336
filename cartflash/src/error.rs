//! Error types for cartflash.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for cartflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for cartflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Image length is not a whole number of flash pages.
    #[error("image size {size} is not a multiple of 256 bytes")]
    MisalignedImage {
        /// Offending image length in bytes.
        size: usize,
    },

    /// The image runs past the end of the 16-bit page address space.
    #[error("image does not fit: base page {base} + {pages} pages exceeds the 64K page space")]
    AddressOverflow {
        /// Requested base page address.
        base: u16,
        /// Number of pages the image occupies.
        pages: usize,
    },

    /// No compatible board found on any serial port.
    #[error("no Arduboy found")]
    DeviceNotFound,

    /// The board was reset at 1200 baud but never re-enumerated.
    #[error("device never re-enumerated within {0:?} after reset")]
    ResetTimeout(Duration),

    /// Bootloader firmware too old for the flash cart protocol.
    #[error("bootloader version {found} has no flash cart support (need {min} or newer)")]
    IncompatibleBootloader {
        /// Version reported by the device.
        found: u8,
        /// Oldest version with flash cart commands.
        min: u8,
    },

    /// The two JEDEC reads disagreed; no cart present or an unstable bus.
    #[error("no flash cart detected (JEDEC reads differ: {first:02X?} vs {second:02X?})")]
    UnstableChipId {
        /// First identify reply.
        first: [u8; 3],
        /// Second identify reply, taken after the settle delay.
        second: [u8; 3],
    },

    /// Malformed reply from the bootloader.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation interrupted by the operator.
    #[error("cancelled: {0}")]
    Cancelled(String),
}
