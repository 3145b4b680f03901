//! Shared value types.

use alloc::{string::String, vec::Vec};

/// Controller cycle state. Exactly one is active at a time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum UpdateState {
    #[default]
    Idle,
    WifiWait,
    HashCheck,
    HashRequest,
    HashParse,
    ImageRequest,
    ImageDownload,
    ImageParse,
    ImageDisplay,
    DisplayUpdate,
    ErrorDisplay,
    SleepPrepare,
    Complete,
}

impl UpdateState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::WifiWait => "WIFI_WAIT",
            Self::HashCheck => "HASH_CHECK",
            Self::HashRequest => "HASH_REQUEST",
            Self::HashParse => "HASH_PARSE",
            Self::ImageRequest => "IMAGE_REQUEST",
            Self::ImageDownload => "IMAGE_DOWNLOAD",
            Self::ImageParse => "IMAGE_PARSE",
            Self::ImageDisplay => "IMAGE_DISPLAY",
            Self::DisplayUpdate => "DISPLAY_UPDATE",
            Self::ErrorDisplay => "ERROR_DISPLAY",
            Self::SleepPrepare => "SLEEP_PREPARE",
            Self::Complete => "COMPLETE",
        }
    }

    /// States whose dwell time is bounded by the controller timeout.
    pub const fn is_timed(self) -> bool {
        !matches!(self, Self::Idle | Self::Complete)
    }
}

/// Failure classification carried with every error detail string.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorType {
    #[default]
    None,
    WifiTimeout,
    ServerUnreachable,
    InvalidResponse,
    ParseError,
    MemoryError,
    SocketError,
    DisplayError,
}

impl ErrorType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::WifiTimeout => "WIFI_TIMEOUT",
            Self::ServerUnreachable => "SERVER_UNREACHABLE",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::ParseError => "PARSE_ERROR",
            Self::MemoryError => "MEMORY_ERROR",
            Self::SocketError => "SOCKET_ERROR",
            Self::DisplayError => "DISPLAY_ERROR",
        }
    }

    /// Headline shown on the error screen.
    pub const fn title(self) -> &'static str {
        match self {
            Self::WifiTimeout => "WiFi Connection Failed",
            Self::ServerUnreachable => "Server Unreachable",
            Self::InvalidResponse => "Invalid Server Response",
            Self::ParseError => "Image Parse Error",
            Self::MemoryError => "Insufficient Memory",
            Self::SocketError => "Network Socket Error",
            Self::DisplayError => "Display Error",
            Self::None => "Unknown Error",
        }
    }

    pub(crate) const fn to_byte(self) -> u8 {
        match self {
            Self::None => 0,
            Self::WifiTimeout => 1,
            Self::ServerUnreachable => 2,
            Self::InvalidResponse => 3,
            Self::ParseError => 4,
            Self::MemoryError => 5,
            Self::SocketError => 6,
            Self::DisplayError => 7,
        }
    }

    pub(crate) const fn from_byte(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::None,
            1 => Self::WifiTimeout,
            2 => Self::ServerUnreachable,
            3 => Self::InvalidResponse,
            4 => Self::ParseError,
            5 => Self::MemoryError,
            6 => Self::SocketError,
            7 => Self::DisplayError,
            _ => return None,
        })
    }
}

/// Pixel encoding of a raster or display mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColorMode {
    /// 1 bit per pixel, packed MSB first.
    Mono,
    /// 8 bits per pixel.
    Grayscale,
    /// 2 bits per pixel, packed MSB first.
    FourColor,
    /// 24 bits per pixel.
    Rgb,
}

impl ColorMode {
    /// Maps a display-mode letter (`B`, `G`, `R`, `C`).
    pub const fn from_mode_letter(letter: u8) -> Option<Self> {
        match letter {
            b'B' => Some(Self::Mono),
            b'G' => Some(Self::Grayscale),
            b'R' => Some(Self::FourColor),
            b'C' => Some(Self::Rgb),
            _ => None,
        }
    }

    /// Raster format requested from the server for this mode.
    pub const fn image_format(self) -> &'static str {
        match self {
            Self::Mono => "pbm",
            Self::Grayscale | Self::FourColor => "pgm",
            Self::Rgb => "ppm",
        }
    }

    /// Pixel layout of the raster named by [`Self::image_format`].
    ///
    /// 4-color panels are served 8-bit `pgm`, not packed 2-bit rows.
    pub const fn wire_mode(self) -> Self {
        match self {
            Self::FourColor => Self::Grayscale,
            other => other,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mono => "mono",
            Self::Grayscale => "grayscale",
            Self::FourColor => "4-color",
            Self::Rgb => "rgb",
        }
    }
}

/// How image bytes are fetched.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetworkMode {
    /// One HTTP request per slice of rows.
    HttpSliced,
    /// One raw TCP stream for the whole image.
    TcpSocket,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DisplayRect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl DisplayRect {
    pub const fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A region of the server raster plus the rows to fetch from it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ImageRequest {
    pub rect: DisplayRect,
    pub start_row: u16,
    /// Zero means "use the rect as given".
    pub num_rows: u16,
    pub format: &'static str,
}

impl ImageRequest {
    pub const fn new(rect: DisplayRect, format: &'static str) -> Self {
        Self {
            rect,
            start_row: 0,
            num_rows: 0,
            format,
        }
    }

    pub const fn with_rows(mut self, start_row: u16, num_rows: u16) -> Self {
        self.start_row = start_row;
        self.num_rows = num_rows;
        self
    }
}

/// Outcome of one network operation. Produced once, consumed once.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NetworkResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub data: Vec<u8>,
    pub error: ErrorType,
    pub error_message: String,
    pub bytes_received: usize,
}

impl NetworkResult {
    pub fn ok(status_code: Option<u16>, data: Vec<u8>) -> Self {
        let bytes_received = data.len();
        Self {
            success: true,
            status_code,
            data,
            bytes_received,
            ..Self::default()
        }
    }

    pub fn failed(error: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error,
            error_message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_bytes_received(mut self, bytes: usize) -> Self {
        self.bytes_received = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_bytes_round_trip_every_kind() {
        for byte in 0..8u8 {
            let kind = ErrorType::from_byte(byte).unwrap();
            assert_eq!(kind.to_byte(), byte);
        }
        assert_eq!(ErrorType::from_byte(8), None);
    }

    #[test]
    fn mode_letters_pick_formats() {
        assert_eq!(ColorMode::from_mode_letter(b'B').map(ColorMode::image_format), Some("pbm"));
        assert_eq!(ColorMode::from_mode_letter(b'G').map(ColorMode::image_format), Some("pgm"));
        assert_eq!(ColorMode::from_mode_letter(b'R').map(ColorMode::image_format), Some("pgm"));
        assert_eq!(ColorMode::from_mode_letter(b'C').map(ColorMode::image_format), Some("ppm"));
        assert_eq!(ColorMode::from_mode_letter(b'X'), None);
        assert_eq!(ColorMode::from_mode_letter(b'b'), None);
    }

    #[test]
    fn wire_mode_matches_the_requested_format() {
        assert_eq!(ColorMode::FourColor.wire_mode(), ColorMode::Grayscale);
        assert_eq!(ColorMode::Mono.wire_mode(), ColorMode::Mono);
        assert_eq!(ColorMode::Rgb.wire_mode(), ColorMode::Rgb);
    }

    #[test]
    fn only_idle_and_complete_are_untimed() {
        assert!(!UpdateState::Idle.is_timed());
        assert!(!UpdateState::Complete.is_timed());
        assert!(UpdateState::WifiWait.is_timed());
        assert!(UpdateState::ErrorDisplay.is_timed());
    }
}
