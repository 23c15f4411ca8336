//! # cartflash
//!
//! A library for writing flash cartridges on Arduboy-family handhelds.
//!
//! This crate provides the core functionality for programming a flash
//! cart through the board's serial bootloader, including:
//!
//! - Board discovery by USB identity (bootloader vs. application mode)
//! - The 1200 baud reset into bootloader mode, with an explicit
//!   re-enumeration state machine
//! - The bootloader command protocol (version, JEDEC identify,
//!   address/length/data framing, status LED, exit)
//! - Image validation, SSD1309 display patching, and the block transfer
//!
//! ## Example
//!
//! ```rust,no_run
//! use cartflash::{CartFlasher, ConnectOptions, FlashImage, enter_bootloader};
//!
//! fn main() -> cartflash::Result<()> {
//!     let image = FlashImage::from_file("flashcart.bin")?;
//!     image.validate()?;
//!
//!     let session = enter_bootloader(&ConnectOptions::default())?;
//!     let mut flasher = CartFlasher::new(session);
//!
//!     let info = flasher.probe()?;
//!     println!("Cart: {} ({} KiB)",
//!         info.identity.manufacturer_name(),
//!         info.identity.capacity_bytes() / 1024);
//!
//!     flasher.write_image(&image, 0, |done, total| {
//!         println!("Block {done}/{total}");
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod chip;
pub mod connect;
pub mod device;
pub mod error;
pub mod flasher;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by the block writer.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). The writer
/// consults it between blocks only; an abort leaves the cart partially
/// written.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupt_requested() -> bool {
    INTERRUPT_CHECKER.get().is_some_and(|checker| checker())
}

/// Serializes tests that toggle the process-wide interrupt flag.
#[cfg(test)]
pub(crate) fn interrupt_test_guard() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
pub use {
    chip::{ChipIdentity, manufacturer_name},
    connect::{ConnectOptions, enter_bootloader, enter_bootloader_with},
    device::{DeviceHandle, Mode, SIGNATURES, Signature, find_device, find_devices, match_ports},
    error::{Error, Result},
    flasher::{BlockSpec, CartFlasher, CartInfo, block_plan},
    image::{FlashImage, LCD_BOOT_PROGRAM},
    port::{NativePort, NativePortEnumerator, Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{BLOCK_SIZE, MIN_PROTOCOL_VERSION, PAGE_SIZE, PROTOCOL_BAUD, RESET_BAUD},
    session::BootSession,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        let _guard = interrupt_test_guard();
        test_set_interrupted(false);
        assert!(!is_interrupt_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        let _guard = interrupt_test_guard();
        test_set_interrupted(true);
        assert!(is_interrupt_requested());

        test_set_interrupted(false);
        assert!(!is_interrupt_requested());
    }
}
