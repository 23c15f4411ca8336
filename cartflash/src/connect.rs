//! Mode transition: force a board out of application firmware into its
//! bootloader and open the protocol connection.
//!
//! Application firmware cannot answer bootloader commands, so the board is
//! reset by the Caterina convention: open and immediately close its CDC
//! port at 1200 baud. The board then drops off the bus and re-enumerates
//! under its bootloader identity, usually at a different port path. The
//! wait for that round trip is an explicit two-phase state machine with a
//! deadline rather than an unbounded poll.

use log::{debug, info};
use std::thread;
use std::time::{Duration, Instant};

use crate::device::{self, DeviceHandle, Mode};
use crate::error::{Error, Result};
use crate::port::{NativePort, Port, SerialConfig};
use crate::protocol::{PROTOCOL_BAUD, RESET_BAUD};
use crate::session::BootSession;

/// Tunables for the reset / re-enumeration dance.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Interval between discovery polls.
    pub poll_interval: Duration,
    /// Deadline for the board to disappear and re-enumerate after the
    /// 1200 baud touch.
    pub reset_timeout: Duration,
    /// Settle delay before opening the protocol connection.
    pub settle_delay: Duration,
    /// Read/write timeout for the protocol connection.
    pub io_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            reset_timeout: Duration::from_secs(15),
            settle_delay: Duration::from_millis(100),
            io_timeout: Duration::from_secs(3),
        }
    }
}

impl ConnectOptions {
    /// Override the re-enumeration deadline.
    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

/// Where the re-enumeration wait currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetPhase {
    /// The old endpoint is still present; waiting for it to vanish.
    AwaitingDisconnect,
    /// The old endpoint is gone; waiting for any matching endpoint.
    AwaitingReconnect,
}

/// Touch the port at 1200 baud to reset into the bootloader.
///
/// Fire-and-forget: nothing is written or read, the open/close itself is
/// the signal.
fn touch_reset(port_name: &str) -> Result<()> {
    debug!("Touching {port_name} at {RESET_BAUD} baud");
    let mut port = NativePort::open(&SerialConfig::new(port_name, RESET_BAUD))?;
    port.close()
}

/// Drive the reset state machine until a matching endpoint reappears.
///
/// Generic over the locate closure so the phase/deadline logic is
/// testable without hardware. The bootloader may re-enumerate under the
/// old path faster than we poll, so a bootloader-mode sighting satisfies
/// the disconnect wait as well.
fn await_reenumeration<F>(
    mut locate: F,
    original_port: &str,
    opts: &ConnectOptions,
) -> Result<DeviceHandle>
where
    F: FnMut() -> Option<DeviceHandle>,
{
    let deadline = Instant::now() + opts.reset_timeout;
    let mut phase = ResetPhase::AwaitingDisconnect;

    loop {
        match phase {
            ResetPhase::AwaitingDisconnect => match locate() {
                Some(handle)
                    if handle.mode == Mode::Bootloader || handle.port != original_port =>
                {
                    return Ok(handle);
                },
                Some(_) => {},
                None => {
                    debug!("{original_port} disconnected");
                    phase = ResetPhase::AwaitingReconnect;
                },
            },
            ResetPhase::AwaitingReconnect => {
                if let Some(handle) = locate() {
                    debug!("Re-enumerated as {} at {}", handle.mode, handle.port);
                    return Ok(handle);
                }
            },
        }

        if Instant::now() >= deadline {
            return Err(Error::ResetTimeout(opts.reset_timeout));
        }
        thread::sleep(opts.poll_interval);
    }
}

/// Bring a located board into bootloader mode and open the session.
///
/// If the board is already in bootloader mode the reset is skipped
/// entirely. The returned session exclusively owns the connection.
pub fn enter_bootloader_with(
    found: DeviceHandle,
    opts: &ConnectOptions,
) -> Result<BootSession<NativePort>> {
    let target = if found.mode == Mode::Bootloader {
        found
    } else {
        info!("Selecting bootloader mode...");
        touch_reset(&found.port)?;
        // Poll quietly; find_device's per-hit logging would flood here.
        let locate = || device::find_devices().into_iter().next();
        await_reenumeration(locate, &found.port, opts)?
    };

    thread::sleep(opts.settle_delay);
    debug!("Opening {} at {PROTOCOL_BAUD} baud", target.port);
    let config =
        SerialConfig::new(&target.port, PROTOCOL_BAUD).with_timeout(opts.io_timeout);
    let mut port = NativePort::open(&config)?;
    // Drop anything the application firmware left in the buffers.
    port.clear_buffers()?;
    Ok(BootSession::new(port))
}

/// Locate the first attached board and open a bootloader session on it.
///
/// Absence of any board is terminal for the run.
pub fn enter_bootloader(opts: &ConnectOptions) -> Result<BootSession<NativePort>> {
    let found = device::find_device().ok_or(Error::DeviceNotFound)?;
    enter_bootloader_with(found, opts)
}
