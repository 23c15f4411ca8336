//! Flash cart transfer: block planning and the write loop.

use log::{debug, info};
use std::ops::Range;
use std::thread;
use std::time::Duration;

use crate::chip::ChipIdentity;
use crate::error::{Error, Result};
use crate::image::FlashImage;
use crate::port::Port;
use crate::protocol::{BLOCK_SIZE, LedState, PAGE_SIZE, PAGES_PER_BLOCK};
use crate::session::BootSession;

/// How long the green "done" indication is held before restoring the LED.
const DONE_HOLD: Duration = Duration::from_millis(500);

/// One transfer chunk: destination page and byte range within the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSpec {
    /// Zero-based block index.
    pub index: usize,
    /// Destination page address on the cart.
    pub page: u16,
    /// Byte range of the image covered by this block.
    pub range: Range<usize>,
}

impl BlockSpec {
    /// Block length in bytes.
    pub fn len(&self) -> usize {
        self.range.len()
    }

    /// Whether the block is empty (never produced by [`block_plan`]).
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Split an image of `len` bytes into write blocks starting at `base_page`.
///
/// All blocks are [`BLOCK_SIZE`] bytes except the last, which carries the
/// remainder. Fails when the image would run past the end of the 16-bit
/// page address space, since the wire format cannot express that.
pub fn block_plan(len: usize, base_page: u16) -> Result<Vec<BlockSpec>> {
    let total_pages = len.div_ceil(PAGE_SIZE);
    if u64::from(base_page) + total_pages as u64 > 0x1_0000 {
        return Err(Error::AddressOverflow {
            base: base_page,
            pages: total_pages,
        });
    }

    let blocks = len.div_ceil(BLOCK_SIZE);
    let mut plan = Vec::with_capacity(blocks);
    for index in 0..blocks {
        let start = index * BLOCK_SIZE;
        let end = (start + BLOCK_SIZE).min(len);
        // Bounded by the page-space check above.
        #[allow(clippy::cast_possible_truncation)]
        let page = base_page + (index as u16) * PAGES_PER_BLOCK;
        plan.push(BlockSpec {
            index,
            page,
            range: start..end,
        });
    }
    Ok(plan)
}

/// Everything learned from the bootloader before writing.
#[derive(Debug, Clone)]
pub struct CartInfo {
    /// Bootloader protocol version.
    pub version: u8,
    /// Confirmed JEDEC identity of the cart's flash chip.
    pub identity: ChipIdentity,
}

impl CartInfo {
    /// Whether an image of `len` bytes at `base_page` fits the chip.
    pub fn fits(&self, len: usize, base_page: u16) -> bool {
        u64::from(base_page) * PAGE_SIZE as u64 + len as u64 <= self.identity.capacity_bytes()
    }
}

/// Drives a [`BootSession`] through probe and transfer.
pub struct CartFlasher<P: Port> {
    session: BootSession<P>,
    done_hold: Duration,
}

impl<P: Port> CartFlasher<P> {
    /// Take exclusive ownership of an established session.
    pub fn new(session: BootSession<P>) -> Self {
        Self {
            session,
            done_hold: DONE_HOLD,
        }
    }

    /// Override the green-LED hold after the last block.
    #[must_use]
    pub fn with_done_hold(mut self, hold: Duration) -> Self {
        self.done_hold = hold;
        self
    }

    /// Get a mutable reference to the underlying session.
    pub fn session_mut(&mut self) -> &mut BootSession<P> {
        &mut self.session
    }

    /// Version gate and double-read chip identification. No writes.
    pub fn probe(&mut self) -> Result<CartInfo> {
        let version = self.session.check_version()?;
        let identity = self.session.read_chip_identity()?;
        info!(
            "Flash cart JEDEC ID {identity}: {}, {} KiB",
            identity.manufacturer_name(),
            identity.capacity_bytes() / 1024
        );
        Ok(CartInfo { version, identity })
    }

    /// Write `image` to the cart starting at `base_page`, then leave the
    /// bootloader.
    ///
    /// Strictly sequential: block N+1 is never started before block N's
    /// acknowledgment arrived. The status LED alternates red/off per
    /// block so a stalled transfer is visible at a glance. `progress`
    /// receives `(blocks_written, total_blocks)` after each block. An
    /// operator interrupt aborts between blocks, leaving the cart
    /// partially written; the only recovery is a fresh transfer.
    pub fn write_image<F>(
        &mut self,
        image: &FlashImage,
        base_page: u16,
        mut progress: F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        image.validate()?;
        let plan = block_plan(image.len(), base_page)?;
        let total = plan.len();
        debug!(
            "Writing {} bytes in {total} blocks from page {base_page}",
            image.len()
        );

        for block in &plan {
            if crate::is_interrupt_requested() {
                return Err(Error::Cancelled(
                    "transfer aborted between blocks; cart contents are incomplete".into(),
                ));
            }

            let led = if block.index % 2 == 0 {
                LedState::Red
            } else {
                LedState::Off
            };
            self.session.set_led(led)?;
            self.session.set_address(block.page)?;
            // Bounded by BLOCK_SIZE.
            #[allow(clippy::cast_possible_truncation)]
            self.session.set_length(block.len() as u16)?;
            self.session
                .write_data(&image.as_slice()[block.range.clone()])?;
            progress(block.index + 1, total);
        }

        self.session.set_led(LedState::Green)?;
        thread::sleep(self.done_hold);
        self.session.set_led(LedState::Normal)?;
        self.session.exit()
    }

    /// Probe, then write: the full query + transfer sequence.
    ///
    /// Performs no writes when the probe fails (old bootloader, unstable
    /// chip identity).
    pub fn flash_cart<F>(
        &mut self,
        image: &FlashImage,
        base_page: u16,
        progress: F,
    ) -> Result<CartInfo>
    where
        F: FnMut(usize, usize),
    {
        let info = self.probe()?;
        self.write_image(image, base_page, progress)?;
        Ok(info)
    }

    /// Leave the bootloader without writing anything.
    pub fn exit(&mut self) -> Result<()> {
        self.session.exit()
    }
}
