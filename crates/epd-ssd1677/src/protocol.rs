//! Command set and payload builders for the SSD1677 controller.
//!
//! Commands are written with DC low, their payload with DC high.

/// Panel width in pixels.
pub const WIDTH: usize = 800;
/// Panel height in pixels.
pub const HEIGHT: usize = 480;
/// Number of bytes in one panel row.
pub const LINE_BYTES: usize = WIDTH / 8;
/// Total framebuffer size in bytes.
pub const BUFFER_SIZE: usize = LINE_BYTES * HEIGHT;

pub const DRIVER_OUTPUT_CONTROL: u8 = 0x01;
pub const BOOSTER_SOFT_START: u8 = 0x0C;
/// Payload `0x01` keeps RAM contents while sleeping.
pub const DEEP_SLEEP: u8 = 0x10;
pub const DATA_ENTRY_MODE: u8 = 0x11;
/// Requires waiting for BUSY to drop.
pub const SOFT_RESET: u8 = 0x12;
/// `0x80` selects the internal sensor.
pub const TEMP_SENSOR_CONTROL: u8 = 0x18;
/// Starts the sequence programmed with [`DISPLAY_UPDATE_CTRL2`].
pub const MASTER_ACTIVATION: u8 = 0x20;
pub const DISPLAY_UPDATE_CTRL1: u8 = 0x21;
pub const DISPLAY_UPDATE_CTRL2: u8 = 0x22;
/// Black/white RAM. A set bit is white.
pub const WRITE_RAM_BW: u8 = 0x24;
pub const WRITE_RAM_RED: u8 = 0x26;
pub const BORDER_WAVEFORM: u8 = 0x3C;
pub const SET_RAM_X_RANGE: u8 = 0x44;
pub const SET_RAM_Y_RANGE: u8 = 0x45;
pub const SET_RAM_X_COUNTER: u8 = 0x4E;
pub const SET_RAM_Y_COUNTER: u8 = 0x4F;

/// Ignore RED RAM during the update (plain black/white refresh).
pub const CTRL1_BYPASS_RED: u8 = 0x40;

/// X then Y increment, X is the fast axis.
pub const DATA_ENTRY_XY_INCREMENT: u8 = 0x03;

#[inline]
const fn le(value: u16) -> [u8; 2] {
    [(value & 0xFF) as u8, (value >> 8) as u8]
}

/// Builds the driver output payload for `rows` gate lines.
///
/// Returns `None` for `rows == 0` or rows beyond the controller limit.
#[inline]
pub fn build_driver_output(rows: u16, scan: u8) -> Option<[u8; 3]> {
    if rows == 0 || rows > 680 {
        return None;
    }

    let last = le(rows - 1);
    Some([last[0], last[1], scan])
}

/// Builds a `[start, end]` RAM range payload (inclusive end).
///
/// Returns `None` when the span is empty or leaves the panel area given by `limit`.
#[inline]
pub fn build_ram_range(start: u16, len: u16, limit: u16) -> Option<[u8; 4]> {
    if len == 0 || start.checked_add(len)? > limit {
        return None;
    }

    let s = le(start);
    let e = le(start + len - 1);
    Some([s[0], s[1], e[0], e[1]])
}

/// Builds a RAM address counter payload.
#[inline]
pub fn build_ram_counter(address: u16) -> [u8; 2] {
    le(address)
}

/// Converts framebuffer ink bits into controller RAM bits (set = white).
#[inline]
pub fn ink_to_ram(dst: &mut [u8], src: &[u8]) {
    for (out, byte) in dst.iter_mut().zip(src.iter()) {
        *out = !*byte;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_output_encodes_last_gate_line() {
        assert_eq!(build_driver_output(480, 0x02), Some([0xDF, 0x01, 0x02]));
        assert_eq!(build_driver_output(1, 0x00), Some([0x00, 0x00, 0x00]));
        assert_eq!(build_driver_output(0, 0x00), None);
        assert_eq!(build_driver_output(681, 0x00), None);
    }

    #[test]
    fn ram_range_is_inclusive_little_endian() {
        assert_eq!(
            build_ram_range(0, WIDTH as u16, WIDTH as u16),
            Some([0x00, 0x00, 0x1F, 0x03])
        );
        assert_eq!(
            build_ram_range(8, 16, WIDTH as u16),
            Some([0x08, 0x00, 0x17, 0x00])
        );
    }

    #[test]
    fn ram_range_rejects_overflow_and_empty_spans() {
        assert_eq!(build_ram_range(0, 0, 480), None);
        assert_eq!(build_ram_range(470, 11, 480), None);
        assert_eq!(build_ram_range(u16::MAX, 2, u16::MAX), None);
    }

    #[test]
    fn ink_conversion_inverts_bits() {
        let mut out = [0u8; 3];
        ink_to_ram(&mut out, &[0x00, 0xFF, 0b1010_0000]);
        assert_eq!(out, [0xFF, 0x00, 0b0101_1111]);
    }

    #[test]
    fn buffer_geometry_matches_panel() {
        assert_eq!(LINE_BYTES, 100);
        assert_eq!(BUFFER_SIZE, 48_000);
        assert_eq!(build_ram_counter(479), [0xDF, 0x01]);
    }
}
