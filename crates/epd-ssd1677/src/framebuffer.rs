//! In-memory framebuffer for the 800x480 panel.

use core::convert::TryFrom;

use crate::protocol::{BUFFER_SIZE, HEIGHT, LINE_BYTES, WIDTH};

/// 1bpp framebuffer for the panel.
///
/// A set bit is ink (black). Within one row byte, bit 7 is the leftmost pixel.
#[derive(Clone)]
pub struct FrameBuffer {
    bytes: [u8; BUFFER_SIZE],
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    /// Creates a blank (white) framebuffer.
    pub const fn new() -> Self {
        Self {
            bytes: [0u8; BUFFER_SIZE],
        }
    }

    pub fn bytes(&self) -> &[u8; BUFFER_SIZE] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; BUFFER_SIZE] {
        &mut self.bytes
    }

    /// Fills the framebuffer with white (`ink = false`) or black (`ink = true`).
    pub fn clear(&mut self, ink: bool) {
        self.bytes.fill(if ink { 0xFF } else { 0x00 });
    }

    /// Sets a pixel state.
    ///
    /// Returns `true` when pixel is in bounds, `false` otherwise.
    pub fn set_pixel(&mut self, x: usize, y: usize, ink: bool) -> bool {
        if x >= WIDTH || y >= HEIGHT {
            return false;
        }

        let byte_index = y * LINE_BYTES + (x / 8);
        let bit_mask = 1u8 << (7 - (x % 8));

        if ink {
            self.bytes[byte_index] |= bit_mask;
        } else {
            self.bytes[byte_index] &= !bit_mask;
        }

        true
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<bool> {
        if x >= WIDTH || y >= HEIGHT {
            return None;
        }

        let byte_index = y * LINE_BYTES + (x / 8);
        let bit_mask = 1u8 << (7 - (x % 8));
        Some((self.bytes[byte_index] & bit_mask) != 0)
    }

    /// Returns the packed bits of row `y` (0-based).
    pub fn row(&self, y: usize) -> Option<&[u8; LINE_BYTES]> {
        if y >= HEIGHT {
            return None;
        }

        let start = y * LINE_BYTES;
        <&[u8; LINE_BYTES]>::try_from(&self.bytes[start..start + LINE_BYTES]).ok()
    }

    /// Copies packed ink bits into row `y`.
    ///
    /// Shorter inputs only overwrite the leading bytes of the row.
    pub fn set_row(&mut self, y: usize, data: &[u8]) -> bool {
        if y >= HEIGHT {
            return false;
        }

        let len = data.len().min(LINE_BYTES);
        let start = y * LINE_BYTES;
        self.bytes[start..start + len].copy_from_slice(&data[..len]);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_bit_mapping_is_msb_first_within_byte() {
        let mut fb = FrameBuffer::new();

        assert!(fb.set_pixel(0, 0, true));
        assert!(fb.set_pixel(7, 0, true));
        assert!(fb.set_pixel(8, 0, true));

        let row0 = fb.row(0).unwrap();
        assert_eq!(row0[0], 0b1000_0001);
        assert_eq!(row0[1], 0b1000_0000);
    }

    #[test]
    fn out_of_bounds_pixel_is_ignored() {
        let mut fb = FrameBuffer::new();

        assert!(!fb.set_pixel(WIDTH, 0, true));
        assert!(!fb.set_pixel(0, HEIGHT, true));
        assert!(fb.bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn set_row_copies_packed_bits() {
        let mut fb = FrameBuffer::new();

        assert!(fb.set_row(HEIGHT - 1, &[0xF0, 0x0F]));
        assert_eq!(fb.pixel(0, HEIGHT - 1), Some(true));
        assert_eq!(fb.pixel(4, HEIGHT - 1), Some(false));
        assert_eq!(fb.pixel(12, HEIGHT - 1), Some(true));
        assert!(!fb.set_row(HEIGHT, &[0xFF]));
    }

    #[test]
    fn clear_fills_every_byte() {
        let mut fb = FrameBuffer::new();
        fb.clear(true);
        assert_eq!(fb.pixel(WIDTH - 1, HEIGHT - 1), Some(true));
        fb.clear(false);
        assert_eq!(fb.pixel(WIDTH - 1, HEIGHT - 1), Some(false));
    }
}
