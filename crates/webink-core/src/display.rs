//! Panel seam: pixel blocks in, error screens out.

use alloc::{format, string::String, vec::Vec};
use core::fmt;

use crate::{
    image::PixelData,
    types::{ColorMode, ErrorType},
};

/// Luma threshold below which a pixel is drawn as ink.
pub const INK_THRESHOLD: u32 = 128;

/// What the error screen shows. Layout is up to the panel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ErrorScreen<'a> {
    pub kind: ErrorType,
    pub title: &'static str,
    pub detail: &'a str,
    pub server: &'a str,
    pub retry_seconds: u32,
}

impl<'a> ErrorScreen<'a> {
    pub fn new(kind: ErrorType, detail: &'a str, server: &'a str, retry_seconds: u32) -> Self {
        Self {
            kind,
            title: kind.title(),
            detail,
            server,
            retry_seconds,
        }
    }

    pub fn server_line(&self) -> String {
        format!("Server: {}", self.server)
    }

    pub fn retry_notice(&self) -> String {
        format!("Will retry in {} seconds", self.retry_seconds)
    }
}

/// Physical display surface.
pub trait Panel {
    type Error: fmt::Debug;

    /// Width and height in pixels.
    fn dimensions(&self) -> (u16, u16);
    fn clear(&mut self) -> Result<(), Self::Error>;
    fn draw_pixel(&mut self, x: u16, y: u16, ink: bool) -> Result<(), Self::Error>;

    /// Draws a decoded block with its top-left corner at `(x, y)`, clipped to the panel.
    fn draw_pixel_block(
        &mut self,
        x: u16,
        y: u16,
        pixels: &PixelData<'_>,
    ) -> Result<(), Self::Error> {
        let (width, height) = self.dimensions();
        for row in 0..pixels.height {
            let py = y.saturating_add(row);
            if py >= height {
                break;
            }
            for col in 0..pixels.width {
                let px = x.saturating_add(col);
                if px >= width {
                    break;
                }
                self.draw_pixel(px, py, ink_at(pixels, col, row))?;
            }
        }
        Ok(())
    }

    /// Pushes pending drawing to the glass.
    fn refresh(&mut self) -> Result<(), Self::Error>;

    /// Renders and refreshes a full-screen error.
    fn show_error(&mut self, screen: &ErrorScreen<'_>) -> Result<(), Self::Error>;
}

/// Reduces the sample at `(x, y)` of a block to ink or paper.
///
/// Bitmaps follow the PBM convention (set bit is ink). Four-color values of 0
/// are ink. Gray and RGB samples are scaled by `max_value` and compared on
/// BT.601 luma.
pub fn ink_at(pixels: &PixelData<'_>, x: u16, y: u16) -> bool {
    if x >= pixels.width {
        return false;
    }
    let Some(row) = pixels.row(y) else {
        return false;
    };
    let x = x as usize;

    match pixels.mode {
        ColorMode::Mono => row
            .get(x / 8)
            .is_some_and(|byte| byte & (0x80 >> (x % 8)) != 0),
        ColorMode::FourColor => row
            .get(x / 4)
            .is_some_and(|byte| (byte >> (6 - 2 * (x % 4))) & 0x03 == 0),
        ColorMode::Grayscale => {
            let width = pixels.bytes_per_pixel.max(1) as usize;
            sample(row, x * width, width)
                .is_some_and(|value| scale(value, pixels.max_value) < INK_THRESHOLD)
        }
        ColorMode::Rgb => {
            let width = (pixels.bytes_per_pixel as usize / 3).max(1);
            let base = x * width * 3;
            let channel = |i: usize| {
                sample(row, base + i * width, width).map(|v| scale(v, pixels.max_value))
            };
            match (channel(0), channel(1), channel(2)) {
                (Some(r), Some(g), Some(b)) => {
                    (r * 299 + g * 587 + b * 114) / 1000 < INK_THRESHOLD
                }
                _ => false,
            }
        }
    }
}

/// Splits `text` on spaces into lines of at most `max_chars` characters.
///
/// Words longer than a line are hard-broken.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<&str> {
    let mut lines = Vec::new();
    if max_chars == 0 {
        return lines;
    }

    for paragraph in text.split('\n') {
        let mut rest = paragraph.trim();
        while !rest.is_empty() {
            if rest.chars().count() <= max_chars {
                lines.push(rest);
                break;
            }

            let limit = rest
                .char_indices()
                .nth(max_chars)
                .map_or(rest.len(), |(i, _)| i);
            let cut = if rest.as_bytes().get(limit) == Some(&b' ') {
                limit
            } else {
                rest[..limit].rfind(' ').filter(|i| *i > 0).unwrap_or(limit)
            };

            lines.push(rest[..cut].trim_end());
            rest = rest[cut..].trim_start();
        }
    }

    lines
}

fn sample(row: &[u8], offset: usize, width: usize) -> Option<u32> {
    match width {
        1 => row.get(offset).map(|b| *b as u32),
        _ => Some(u16::from_be_bytes([*row.get(offset)?, *row.get(offset + 1)?]) as u32),
    }
}

fn scale(value: u32, max_value: u16) -> u32 {
    match max_value {
        0 | 255 => value,
        max => value.min(max as u32) * 255 / max as u32,
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::image::PixelBuffer;

    fn block(mode: ColorMode, width: u16, bpp: u8, max_value: u16, bytes: Vec<u8>) -> PixelData<'static> {
        let stride = match mode {
            ColorMode::Mono | ColorMode::FourColor => crate::image::bytes_per_row(width, mode),
            ColorMode::Grayscale | ColorMode::Rgb => width as usize * bpp as usize,
        };
        PixelData {
            width,
            height: (bytes.len() / stride) as u16,
            bytes_per_pixel: bpp,
            stride,
            start_offset: 0,
            mode,
            max_value,
            buffer: PixelBuffer::Owned(bytes),
        }
    }

    #[test]
    fn mono_set_bit_is_ink() {
        let pixels = block(ColorMode::Mono, 8, 1, 1, vec![0b1000_0001]);
        assert!(ink_at(&pixels, 0, 0));
        assert!(!ink_at(&pixels, 1, 0));
        assert!(ink_at(&pixels, 7, 0));
        assert!(!ink_at(&pixels, 8, 0));
        assert!(!ink_at(&pixels, 0, 1));
    }

    #[test]
    fn gray_threshold_respects_max_value() {
        let pixels = block(ColorMode::Grayscale, 3, 1, 255, vec![127, 128, 0]);
        assert!(ink_at(&pixels, 0, 0));
        assert!(!ink_at(&pixels, 1, 0));
        assert!(ink_at(&pixels, 2, 0));

        let low_depth = block(ColorMode::Grayscale, 2, 1, 15, vec![7, 8]);
        assert!(ink_at(&low_depth, 0, 0));
        assert!(!ink_at(&low_depth, 1, 0));

        let wide = block(ColorMode::Grayscale, 1, 2, 1000, vec![0x01, 0xF6]);
        assert!(!ink_at(&wide, 0, 0));
    }

    #[test]
    fn rgb_uses_luma() {
        let pixels = block(ColorMode::Rgb, 2, 3, 255, vec![255, 0, 0, 0, 255, 0]);
        assert!(ink_at(&pixels, 0, 0));
        assert!(!ink_at(&pixels, 1, 0));
    }

    #[test]
    fn four_color_zero_is_ink() {
        let pixels = block(ColorMode::FourColor, 4, 1, 3, vec![0b00_01_10_11]);
        assert!(ink_at(&pixels, 0, 0));
        assert!(!ink_at(&pixels, 1, 0));
        assert!(!ink_at(&pixels, 3, 0));
    }

    #[test]
    fn wrap_breaks_on_spaces_and_long_words() {
        assert_eq!(
            wrap_text("Hash request failed: HTTP request timeout", 16),
            vec!["Hash request", "failed: HTTP", "request timeout"]
        );
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert!(wrap_text("", 10).is_empty());
    }

    #[test]
    fn error_screen_uses_kind_title() {
        let screen = ErrorScreen::new(ErrorType::SocketError, "boom", "http://h:1", 60);
        assert_eq!(screen.title, "Network Socket Error");
        assert_eq!(screen.retry_notice(), "Will retry in 60 seconds");
        assert_eq!(screen.server_line(), "Server: http://h:1");
    }
}
