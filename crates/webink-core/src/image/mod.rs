//! Netpbm (PBM/PGM/PPM) header and row decoding.
//!
//! Binary rasters are returned as borrowed views into the input buffer.
//! ASCII rasters are decoded into owned, packed buffers with the same layout
//! as their binary counterparts (8-bit samples for P2/P3).

use alloc::{format, string::String, vec::Vec};
use core::fmt;

use crate::types::ColorMode;

#[cfg(test)]
mod tests;

const MIN_HEADER_LEN: usize = 10;
const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
const MAX_ROWS_PER_CHUNK: usize = 128;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageFormat {
    /// ASCII bitmap.
    P1,
    /// ASCII graymap.
    P2,
    /// ASCII pixmap.
    P3,
    /// Binary bitmap.
    P4,
    /// Binary graymap.
    P5,
    /// Binary pixmap.
    P6,
}

impl ImageFormat {
    pub const fn from_magic_digit(digit: u8) -> Option<Self> {
        Some(match digit {
            b'1' => Self::P1,
            b'2' => Self::P2,
            b'3' => Self::P3,
            b'4' => Self::P4,
            b'5' => Self::P5,
            b'6' => Self::P6,
            _ => return None,
        })
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
            Self::P4 => "P4",
            Self::P5 => "P5",
            Self::P6 => "P6",
        }
    }

    pub const fn is_binary(self) -> bool {
        matches!(self, Self::P4 | Self::P5 | Self::P6)
    }

    pub const fn color_mode(self) -> ColorMode {
        match self {
            Self::P1 | Self::P4 => ColorMode::Mono,
            Self::P2 | Self::P5 => ColorMode::Grayscale,
            Self::P3 | Self::P6 => ColorMode::Rgb,
        }
    }

    const fn has_max_value(self) -> bool {
        !matches!(self, Self::P1 | Self::P4)
    }

    const fn channels(self) -> usize {
        match self {
            Self::P3 | Self::P6 => 3,
            _ => 1,
        }
    }

    const fn family(self) -> &'static str {
        match self {
            Self::P1 | Self::P4 => "PBM",
            Self::P2 | Self::P5 => "PGM",
            Self::P3 | Self::P6 => "PPM",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// Fewer bytes than the smallest possible header.
    TooShort,
    /// Magic is not `P1`..`P6`.
    UnknownFormat,
    /// Header fields are missing or not numeric.
    InvalidHeader,
    /// Zero or out-of-range width, height or max value.
    InvalidDimensions,
    RowOutOfRange,
    /// Pixel payload ends before the requested rows.
    Truncated,
    /// ASCII sample is not a decimal number.
    InvalidSample,
    OutOfMemory,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TooShort => "image data too short",
            Self::UnknownFormat => "unsupported image format",
            Self::InvalidHeader => "invalid image header",
            Self::InvalidDimensions => "invalid image dimensions",
            Self::RowOutOfRange => "start row outside image",
            Self::Truncated => "image data truncated",
            Self::InvalidSample => "invalid pixel sample",
            Self::OutOfMemory => "not enough memory for pixel rows",
        })
    }
}

/// Parsed raster metadata. Immutable once produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ImageHeader {
    pub format: ImageFormat,
    pub width: u16,
    pub height: u16,
    /// `1` for bitmaps.
    pub max_value: u16,
    pub color_mode: ColorMode,
    /// Offset of the first pixel byte.
    pub header_bytes: usize,
    /// Exact payload size for binary formats, remaining input for ASCII ones.
    pub data_bytes: usize,
    pub valid: bool,
}

impl ImageHeader {
    /// Bytes per decoded sample (2 for binary rasters with `max_value > 255`).
    pub fn sample_bytes(&self) -> usize {
        if self.format.is_binary() && self.max_value > 255 {
            2
        } else {
            1
        }
    }

    pub fn bytes_per_pixel(&self) -> u8 {
        match self.color_mode {
            ColorMode::Mono | ColorMode::FourColor => 1,
            _ => (self.format.channels() * self.sample_bytes()) as u8,
        }
    }

    /// Row length of the decoded pixel buffer.
    pub fn stride(&self) -> usize {
        match self.color_mode {
            ColorMode::Mono | ColorMode::FourColor => bytes_per_row(self.width, self.color_mode),
            _ => self.width as usize * self.bytes_per_pixel() as usize,
        }
    }
}

/// Backing storage of a [`PixelData`] view.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PixelBuffer<'a> {
    /// Zero-copy slice of the caller's input.
    Borrowed(&'a [u8]),
    /// Decoded rows owned by the view.
    Owned(Vec<u8>),
}

/// A block of decoded rows.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PixelData<'a> {
    pub width: u16,
    /// Rows in this block.
    pub height: u16,
    pub bytes_per_pixel: u8,
    pub stride: usize,
    /// First image row covered by the block.
    pub start_offset: u16,
    pub mode: ColorMode,
    /// Sample ceiling; ASCII rasters are rescaled to 255.
    pub max_value: u16,
    pub buffer: PixelBuffer<'a>,
}

impl PixelData<'_> {
    pub fn bytes(&self) -> &[u8] {
        match &self.buffer {
            PixelBuffer::Borrowed(bytes) => bytes,
            PixelBuffer::Owned(bytes) => bytes,
        }
    }

    pub fn is_zero_copy(&self) -> bool {
        matches!(self.buffer, PixelBuffer::Borrowed(_))
    }

    /// Row `y` relative to the block.
    pub fn row(&self, y: u16) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride;
        self.bytes().get(start..start + self.stride)
    }
}

/// Netpbm decoder entry points.
pub struct ImageDecoder;

impl ImageDecoder {
    pub fn parse_header(bytes: &[u8]) -> Result<ImageHeader, DecodeError> {
        if bytes.len() < MIN_HEADER_LEN {
            return Err(DecodeError::TooShort);
        }

        let mut cursor = Cursor::new(bytes);
        cursor.skip_bom();
        cursor.skip_ws_and_comments();

        let format = cursor.magic().ok_or(DecodeError::UnknownFormat)?;

        let width = dimension(cursor.number().ok_or(DecodeError::InvalidHeader)?)?;
        let height = dimension(cursor.number().ok_or(DecodeError::InvalidHeader)?)?;
        let max_value = if format.has_max_value() {
            dimension(cursor.number().ok_or(DecodeError::InvalidHeader)?)?
        } else {
            1
        };

        if format.is_binary() {
            // Exactly one separator; pixel bytes may look like whitespace.
            match cursor.peek() {
                Some(b) if b.is_ascii_whitespace() => cursor.pos += 1,
                Some(_) => return Err(DecodeError::InvalidHeader),
                None => {}
            }
        } else {
            cursor.skip_ws_and_comments();
        }

        let mut header = ImageHeader {
            format,
            width,
            height,
            max_value,
            color_mode: format.color_mode(),
            header_bytes: cursor.pos,
            data_bytes: 0,
            valid: true,
        };
        header.data_bytes = if format.is_binary() {
            header.stride() * height as usize
        } else {
            bytes.len() - cursor.pos
        };

        Ok(header)
    }

    /// Decodes `num_rows` rows from `start_row`. `0` rows means "to the end".
    pub fn parse_rows<'a>(
        bytes: &'a [u8],
        header: &ImageHeader,
        start_row: u16,
        num_rows: u16,
    ) -> Result<PixelData<'a>, DecodeError> {
        if !header.valid {
            return Err(DecodeError::InvalidHeader);
        }
        if start_row >= header.height {
            return Err(DecodeError::RowOutOfRange);
        }

        let remaining = header.height - start_row;
        let rows = if num_rows == 0 {
            remaining
        } else {
            num_rows.min(remaining)
        };
        let stride = header.stride();

        let buffer = if header.format.is_binary() {
            let start = header.header_bytes + start_row as usize * stride;
            let end = start + rows as usize * stride;
            PixelBuffer::Borrowed(bytes.get(start..end).ok_or(DecodeError::Truncated)?)
        } else {
            PixelBuffer::Owned(decode_ascii_rows(bytes, header, start_row, rows)?)
        };

        Ok(PixelData {
            width: header.width,
            height: rows,
            bytes_per_pixel: header.bytes_per_pixel(),
            stride,
            start_offset: start_row,
            mode: header.color_mode,
            max_value: match header.format {
                ImageFormat::P2 | ImageFormat::P3 => 255,
                _ => header.max_value,
            },
            buffer,
        })
    }

    pub fn parse_complete_image(bytes: &[u8]) -> Result<(ImageHeader, PixelData<'_>), DecodeError> {
        let header = Self::parse_header(bytes)?;
        let pixels = Self::parse_rows(bytes, &header, 0, 0)?;
        Ok((header, pixels))
    }

    pub fn validate_format(bytes: &[u8]) -> bool {
        Self::parse_header(bytes).is_ok()
    }

    /// Peeks at the magic only: `(format, is_binary)`.
    pub fn format_info(bytes: &[u8]) -> Option<(ImageFormat, bool)> {
        let mut cursor = Cursor::new(bytes);
        cursor.skip_bom();
        cursor.skip_ws_and_comments();
        let format = cursor.magic()?;
        Some((format, format.is_binary()))
    }

    pub fn describe(header: &ImageHeader) -> String {
        format!(
            "{} {} {}x{} ({}, max {}, {} data bytes)",
            header.format.family(),
            if header.format.is_binary() { "binary" } else { "ascii" },
            header.width,
            header.height,
            header.color_mode.as_str(),
            header.max_value,
            header.data_bytes
        )
    }
}

/// Packed bytes per row for a mode.
pub fn bytes_per_row(width: u16, mode: ColorMode) -> usize {
    let width = width as usize;
    match mode {
        ColorMode::Mono => width.div_ceil(8),
        ColorMode::FourColor => width.div_ceil(4),
        ColorMode::Grayscale => width,
        ColorMode::Rgb => width * 3,
    }
}

/// Rows that fit in `available_bytes`, clamped to 1..=128.
pub fn max_rows_for_memory(width: u16, mode: ColorMode, available_bytes: usize) -> u16 {
    let bpr = bytes_per_row(width, mode);
    if bpr == 0 {
        return 1;
    }
    (available_bytes / bpr).clamp(1, MAX_ROWS_PER_CHUNK) as u16
}

pub fn total_bytes(width: u16, height: u16, mode: ColorMode) -> usize {
    bytes_per_row(width, mode) * height as usize
}

/// Splits an image into row chunks that fit `budget_bytes`.
///
/// Returns `(rows_per_chunk, chunk_count)`, or `None` when not even one row fits.
pub fn allocation_plan(
    width: u16,
    height: u16,
    mode: ColorMode,
    budget_bytes: usize,
) -> Option<(u16, u16)> {
    let bpr = bytes_per_row(width, mode);
    if bpr == 0 || height == 0 || budget_bytes < bpr {
        return None;
    }
    let rows = max_rows_for_memory(width, mode, budget_bytes).min(height);
    Some((rows, height.div_ceil(rows)))
}

/// True when `(x, y)` addresses a pixel inside the block.
pub fn validate_pixel_range(pixels: &PixelData<'_>, x: u16, y: u16) -> bool {
    x < pixels.width && y < pixels.height
}

fn dimension(value: u32) -> Result<u16, DecodeError> {
    match u16::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(DecodeError::InvalidDimensions),
    }
}

fn decode_ascii_rows(
    bytes: &[u8],
    header: &ImageHeader,
    start_row: u16,
    rows: u16,
) -> Result<Vec<u8>, DecodeError> {
    let width = header.width as usize;
    let samples_per_row = width * header.format.channels();
    let stride = header.stride();
    let len = stride * rows as usize;

    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| DecodeError::OutOfMemory)?;
    out.resize(len, 0);

    let mut cursor = Cursor::new(bytes);
    cursor.pos = header.header_bytes;

    if header.format == ImageFormat::P1 {
        for _ in 0..start_row as usize * width {
            cursor.bit().ok_or(DecodeError::Truncated)??;
        }
        for row in 0..rows as usize {
            for x in 0..width {
                if cursor.bit().ok_or(DecodeError::Truncated)?? {
                    out[row * stride + x / 8] |= 0x80 >> (x % 8);
                }
            }
        }
        return Ok(out);
    }

    let max = header.max_value as u32;
    for _ in 0..start_row as usize * samples_per_row {
        cursor.sample().ok_or(DecodeError::Truncated)??;
    }
    for slot in out.iter_mut() {
        let value = cursor.sample().ok_or(DecodeError::Truncated)??.min(max);
        *slot = (value * 255 / max) as u8;
    }

    Ok(out)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_bom(&mut self) {
        if self.bytes.starts_with(&UTF8_BOM) {
            self.pos = UTF8_BOM.len();
        }
    }

    fn skip_ws_and_comments(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else if b == b'#' {
                while let Some(c) = self.peek() {
                    self.pos += 1;
                    if c == b'\n' || c == b'\r' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn magic(&mut self) -> Option<ImageFormat> {
        if self.peek()? != b'P' {
            return None;
        }
        let format = ImageFormat::from_magic_digit(*self.bytes.get(self.pos + 1)?)?;
        self.pos += 2;
        Some(format)
    }

    /// Next header number after whitespace and comments.
    fn number(&mut self) -> Option<u32> {
        self.skip_ws_and_comments();
        let start = self.pos;
        let mut value = 0u32;
        while let Some(b) = self.peek().filter(u8::is_ascii_digit) {
            value = value.checked_mul(10)?.checked_add((b - b'0') as u32)?;
            self.pos += 1;
        }
        (self.pos > start).then_some(value)
    }

    /// Next ASCII sample. `None` at end of input.
    fn sample(&mut self) -> Option<Result<u32, DecodeError>> {
        self.skip_ws_and_comments();
        self.peek()?;
        Some(self.number().ok_or(DecodeError::InvalidSample))
    }

    /// Next P1 digit; digits need not be separated. `None` at end of input.
    fn bit(&mut self) -> Option<Result<bool, DecodeError>> {
        self.skip_ws_and_comments();
        let b = self.peek()?;
        self.pos += 1;
        Some(match b {
            b'0' => Ok(false),
            b'1' => Ok(true),
            _ => Err(DecodeError::InvalidSample),
        })
    }
}
