//! Flash image loading, validation, and display-variant patching.

use log::info;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::protocol::PAGE_SIZE;

/// SSD1306 display initialization sequence embedded in cart boot menus.
///
/// Bytes 2 and 3 are the charge pump enable command (`8D 14`); SSD1309
/// panels have no charge pump, so the patch blanks them with `E3` NOPs.
pub const LCD_BOOT_PROGRAM: [u8; 13] = [
    0xD5, 0xF0, 0x8D, 0x14, 0xA1, 0xC8, 0x81, 0xCF, 0xD9, 0xF1, 0xAF, 0x20, 0x00,
];

const SSD1309_NOP: u8 = 0xE3;

/// A binary image destined for the flash cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashImage {
    data: Vec<u8>,
}

impl FlashImage {
    /// Load an image from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path.as_ref())?;
        info!(
            "Read {} byte flash image from {}",
            data.len(),
            path.as_ref().display()
        );
        Ok(Self { data })
    }

    /// Wrap an in-memory image.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the image bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume the image and return its bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Require the image to be a whole number of flash pages.
    ///
    /// Checked before any device interaction so bad input never partially
    /// writes. Not retryable.
    pub fn validate(&self) -> Result<()> {
        if self.data.len() % PAGE_SIZE != 0 {
            return Err(Error::MisalignedImage {
                size: self.data.len(),
            });
        }
        Ok(())
    }

    /// Retarget every embedded display init sequence for SSD1309 panels.
    ///
    /// Rewrites offsets 2 and 3 of each occurrence of
    /// [`LCD_BOOT_PROGRAM`], resuming the scan strictly after each found
    /// offset. Returns the number of sites patched. Idempotent: patched
    /// sites no longer match the search pattern.
    pub fn patch_ssd1309(&mut self) -> usize {
        let mut patched = 0;
        let mut from = 0;
        while let Some(pos) = find_pattern(&self.data[from..], &LCD_BOOT_PROGRAM) {
            let at = from + pos;
            self.data[at + 2] = SSD1309_NOP;
            self.data[at + 3] = SSD1309_NOP;
            patched += 1;
            from = at + 1;
        }
        patched
    }
}

fn find_pattern(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_aligned_image_validates() {
        assert!(FlashImage::from_vec(vec![0; 512]).validate().is_ok());
        assert!(FlashImage::from_vec(Vec::new()).validate().is_ok());
    }

    #[test]
    fn test_misaligned_image_is_fatal() {
        let image = FlashImage::from_vec(vec![0; 5000]);
        assert!(matches!(
            image.validate(),
            Err(Error::MisalignedImage { size: 5000 })
        ));
    }

    #[test]
    fn test_patch_rewrites_offsets_2_and_3() {
        let mut data = vec![0u8; 64];
        data[10..23].copy_from_slice(&LCD_BOOT_PROGRAM);
        let mut image = FlashImage::from_vec(data);

        assert_eq!(image.patch_ssd1309(), 1);
        assert_eq!(image.as_slice()[12], 0xE3);
        assert_eq!(image.as_slice()[13], 0xE3);
        // The rest of the sequence is untouched.
        assert_eq!(image.as_slice()[10], 0xD5);
        assert_eq!(image.as_slice()[14], 0xA1);
    }

    #[test]
    fn test_patch_hits_every_occurrence() {
        let mut data = Vec::new();
        data.extend_from_slice(&LCD_BOOT_PROGRAM);
        data.extend_from_slice(&[0x00; 7]);
        data.extend_from_slice(&LCD_BOOT_PROGRAM);
        let mut image = FlashImage::from_vec(data);

        assert_eq!(image.patch_ssd1309(), 2);
        assert_eq!(image.as_slice()[2], 0xE3);
        assert_eq!(image.as_slice()[22], 0xE3);
    }

    #[test]
    fn test_patch_is_idempotent() {
        let mut data = vec![0u8; 32];
        data[0..13].copy_from_slice(&LCD_BOOT_PROGRAM);
        let mut image = FlashImage::from_vec(data);

        assert_eq!(image.patch_ssd1309(), 1);
        let once = image.clone();
        assert_eq!(image.patch_ssd1309(), 0);
        assert_eq!(image, once);
    }

    #[test]
    fn test_patch_without_pattern_is_a_no_op() {
        let mut image = FlashImage::from_vec(vec![0xFF; 256]);
        assert_eq!(image.patch_ssd1309(), 0);
        assert_eq!(image.as_slice(), &[0xFF; 256]);
    }

    #[test]
    fn test_patch_on_short_image() {
        let mut image = FlashImage::from_vec(vec![0xD5, 0xF0]);
        assert_eq!(image.patch_ssd1309(), 0);
    }
}
