//! Device configuration, display-mode parsing and server URL building.

use alloc::{format, string::String};
use core::fmt;

use log::{info, warn};

use crate::{
    image,
    types::{ColorMode, DisplayRect, ImageRequest, NetworkMode},
};

pub const BASE_URL_CAPACITY: usize = 96;
pub const DEVICE_ID_CAPACITY: usize = 64;
pub const API_KEY_CAPACITY: usize = 64;
pub const DISPLAY_MODE_CAPACITY: usize = 16;

pub const DEFAULT_BASE_URL: &str = "http://192.168.68.69:8090";
pub const DEFAULT_DEVICE_ID: &str = "default";
pub const DEFAULT_API_KEY: &str = "myapikey";
pub const DEFAULT_DISPLAY_MODE: &str = "800x480x1xB";
pub const DEFAULT_SOCKET_PORT: u16 = 8091;
pub const DEFAULT_ROWS_PER_SLICE: u16 = 8;

pub const MAX_ROWS_PER_SLICE: u16 = 64;
const MIN_URL_LEN: usize = 10;

/// Configuration rejected by a setter or by [`WebInkConfig::validate`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigError {
    InvalidUrl,
    UrlTooLong,
    InvalidDeviceId,
    EmptyApiKey,
    InvalidDisplayMode,
    RowsPerSliceOutOfRange(u16),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl => f.write_str("invalid server URL format"),
            Self::UrlTooLong => f.write_str("server URL too long"),
            Self::InvalidDeviceId => f.write_str("invalid device ID format"),
            Self::EmptyApiKey => f.write_str("API key cannot be empty"),
            Self::InvalidDisplayMode => f.write_str("invalid display mode format"),
            Self::RowsPerSliceOutOfRange(rows) => {
                write!(f, "rows per slice out of range: {rows}")
            }
        }
    }
}

/// Parsed `WIDTHxHEIGHTxBITSxMODE` string, e.g. `800x480x1xB`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DisplayMode {
    pub width: u16,
    pub height: u16,
    pub bits: u8,
    pub color: ColorMode,
}

impl DisplayMode {
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split('x');
        let width = parse_positive(parts.next()?)?;
        let height = parse_positive(parts.next()?)?;
        let bits: u8 = parse_positive(parts.next()?)?.try_into().ok()?;
        let letter = parts.next()?;
        if parts.next().is_some() || letter.len() != 1 {
            return None;
        }
        let color = ColorMode::from_mode_letter(letter.as_bytes()[0])?;

        if !matches!(bits, 1 | 2 | 8 | 24) {
            return None;
        }

        Some(Self {
            width,
            height,
            bits,
            color,
        })
    }

    pub fn bytes_per_row(&self) -> usize {
        image::bytes_per_row(self.width, self.color)
    }
}

fn parse_positive(text: &str) -> Option<u16> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse::<u16>().ok().filter(|v| *v > 0)
}

/// Accepts `http://` or `https://` URLs of at least 10 characters.
pub fn is_valid_server_url(url: &str) -> bool {
    url.len() >= MIN_URL_LEN && (url.starts_with("http://") || url.starts_with("https://"))
}

/// Accepts 1..=64 characters of `[A-Za-z0-9_-]`.
pub fn is_valid_device_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= DEVICE_ID_CAPACITY
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Server address, device identity and transfer tuning.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WebInkConfig {
    base_url: heapless::String<BASE_URL_CAPACITY>,
    device_id: heapless::String<DEVICE_ID_CAPACITY>,
    api_key: heapless::String<API_KEY_CAPACITY>,
    display_mode: heapless::String<DISPLAY_MODE_CAPACITY>,
    socket_mode_port: u16,
    rows_per_slice: u16,
}

impl Default for WebInkConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl WebInkConfig {
    pub fn new() -> Self {
        Self {
            base_url: bounded(DEFAULT_BASE_URL),
            device_id: bounded(DEFAULT_DEVICE_ID),
            api_key: bounded(DEFAULT_API_KEY),
            display_mode: bounded(DEFAULT_DISPLAY_MODE),
            socket_mode_port: DEFAULT_SOCKET_PORT,
            rows_per_slice: DEFAULT_ROWS_PER_SLICE,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn display_mode_str(&self) -> &str {
        &self.display_mode
    }

    pub fn socket_mode_port(&self) -> u16 {
        self.socket_mode_port
    }

    pub fn rows_per_slice(&self) -> u16 {
        self.rows_per_slice
    }

    pub fn set_server_url(&mut self, url: &str) -> Result<(), ConfigError> {
        if !is_valid_server_url(url) {
            warn!("config: invalid server url {url}");
            return Err(ConfigError::InvalidUrl);
        }
        let mut next = heapless::String::new();
        next.push_str(url).map_err(|_| ConfigError::UrlTooLong)?;

        info!("config: server url {} -> {}", self.base_url, next);
        self.base_url = next;
        Ok(())
    }

    pub fn set_device_id(&mut self, id: &str) -> Result<(), ConfigError> {
        if !is_valid_device_id(id) {
            warn!("config: invalid device id {id}");
            return Err(ConfigError::InvalidDeviceId);
        }

        info!("config: device id {} -> {}", self.device_id, id);
        self.device_id = bounded(id);
        Ok(())
    }

    /// Over-long keys are truncated, never rejected.
    pub fn set_api_key(&mut self, key: &str) {
        if key.len() > API_KEY_CAPACITY {
            warn!("config: api key longer than {API_KEY_CAPACITY} chars, truncating");
        }
        self.api_key = bounded(key);
        info!("config: api key updated (len={})", self.api_key.len());
    }

    pub fn set_display_mode(&mut self, mode: &str) -> Result<(), ConfigError> {
        if mode.len() > DISPLAY_MODE_CAPACITY || DisplayMode::parse(mode).is_none() {
            warn!("config: invalid display mode {mode}");
            return Err(ConfigError::InvalidDisplayMode);
        }

        info!("config: display mode {} -> {}", self.display_mode, mode);
        self.display_mode = bounded(mode);
        Ok(())
    }

    /// Port `0` disables socket mode.
    pub fn set_socket_port(&mut self, port: u16) {
        if port == 0 {
            info!("config: socket mode disabled, using http slices");
        } else {
            info!("config: socket port {} -> {}", self.socket_mode_port, port);
        }
        self.socket_mode_port = port;
    }

    pub fn set_rows_per_slice(&mut self, rows: u16) -> Result<(), ConfigError> {
        if !(1..=MAX_ROWS_PER_SLICE).contains(&rows) {
            warn!("config: rows per slice {rows} outside 1..={MAX_ROWS_PER_SLICE}");
            return Err(ConfigError::RowsPerSliceOutOfRange(rows));
        }

        self.rows_per_slice = rows;
        Ok(())
    }

    pub fn reset_to_defaults(&mut self) {
        *self = Self::new();
        info!("config: reset to defaults");
    }

    /// Reports the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_server_url(&self.base_url) {
            return Err(ConfigError::InvalidUrl);
        }
        if !is_valid_device_id(&self.device_id) {
            return Err(ConfigError::InvalidDeviceId);
        }
        if self.api_key.is_empty() {
            return Err(ConfigError::EmptyApiKey);
        }
        if self.display_mode().is_none() {
            return Err(ConfigError::InvalidDisplayMode);
        }
        if !(1..=MAX_ROWS_PER_SLICE).contains(&self.rows_per_slice) {
            return Err(ConfigError::RowsPerSliceOutOfRange(self.rows_per_slice));
        }
        Ok(())
    }

    pub fn display_mode(&self) -> Option<DisplayMode> {
        DisplayMode::parse(&self.display_mode)
    }

    pub fn network_mode(&self) -> NetworkMode {
        if self.socket_mode_port > 0 {
            NetworkMode::TcpSocket
        } else {
            NetworkMode::HttpSliced
        }
    }

    /// Full-panel request in the configured display mode.
    pub fn full_frame_request(&self) -> Option<ImageRequest> {
        let mode = self.display_mode()?;
        Some(ImageRequest::new(
            DisplayRect::new(0, 0, mode.width, mode.height),
            mode.color.image_format(),
        ))
    }

    pub fn build_hash_url(&self) -> String {
        format!(
            "{}/get_hash?api_key={}&device={}&mode={}",
            self.base_url, self.api_key, self.device_id, self.display_mode
        )
    }

    /// Uses `start_row`/`num_rows` for `y`/`h` when `num_rows > 0`.
    pub fn build_image_url(&self, request: &ImageRequest) -> String {
        let (y, h) = if request.num_rows > 0 {
            (request.start_row, request.num_rows)
        } else {
            (request.rect.y, request.rect.height)
        };

        format!(
            "{}/get_image?api_key={}&device={}&mode={}&x={}&y={}&w={}&h={}&format={}",
            self.base_url,
            self.api_key,
            self.device_id,
            self.display_mode,
            request.rect.x,
            y,
            request.rect.width,
            h,
            request.format
        )
    }

    pub fn build_log_url(&self) -> String {
        format!(
            "{}/post_log?api_key={}&device={}",
            self.base_url, self.api_key, self.device_id
        )
    }

    pub fn build_sleep_url(&self) -> String {
        format!(
            "{}/get_sleep?api_key={}&device={}",
            self.base_url, self.api_key, self.device_id
        )
    }

    /// Newline-terminated request line of the raw socket protocol.
    pub fn build_socket_request(&self, request: &ImageRequest) -> String {
        format!(
            "webInkV1 {} {} {} {} {} {} {} {}\n",
            self.api_key,
            self.device_id,
            self.display_mode,
            request.rect.x,
            request.rect.y,
            request.rect.width,
            request.rect.height,
            request.format
        )
    }

    /// Host and port of the server URL. Port defaults to 80.
    pub fn server_host(&self) -> Option<(&str, u16)> {
        let url = self.base_url.as_str();
        let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
        let authority = rest.split_once('/').map_or(rest, |(authority, _)| authority);

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => (host, parse_positive(port)?),
            None => (authority, 80),
        };

        if host.is_empty() {
            return None;
        }
        Some((host, port))
    }

    /// Host name of the server, or the raw URL when it cannot be split.
    pub fn server_hostname(&self) -> &str {
        self.server_host()
            .map_or(self.base_url.as_str(), |(host, _)| host)
    }

    pub fn bytes_per_row(&self) -> usize {
        self.display_mode().map_or(0, |mode| mode.bytes_per_row())
    }

    /// Rows that fit in `available_bytes`, clamped to 1..=64.
    pub fn optimal_rows_per_slice(&self, available_bytes: usize) -> u16 {
        let bpr = self.bytes_per_row();
        if bpr == 0 {
            return self.rows_per_slice;
        }
        (available_bytes / bpr).clamp(1, MAX_ROWS_PER_SLICE as usize) as u16
    }

    pub fn total_image_bytes(&self) -> usize {
        self.display_mode()
            .map_or(0, |mode| mode.bytes_per_row() * mode.height as usize)
    }

    pub fn summary(&self) -> String {
        format!(
            "[CONFIG] URL: {}, Device: {}, Mode: {}, Socket: {}, Rows: {}",
            self.base_url,
            self.device_id,
            self.display_mode,
            self.socket_mode_port,
            self.rows_per_slice
        )
    }
}

/// Copies `text` into a bounded string, truncating at a char boundary.
pub(crate) fn bounded<const N: usize>(text: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for ch in text.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_mono_800x480_socket_mode() {
        let config = WebInkConfig::new();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.network_mode(), NetworkMode::TcpSocket);
        assert_eq!(
            config.display_mode(),
            Some(DisplayMode {
                width: 800,
                height: 480,
                bits: 1,
                color: ColorMode::Mono,
            })
        );
        assert_eq!(config.bytes_per_row(), 100);
        assert_eq!(config.total_image_bytes(), 48_000);
    }

    #[test]
    fn display_mode_rejects_malformed_strings() {
        for bad in ["", "800x480x1", "800x480x3xB", "0x480x1xB", "800x480x1xBB", "800x480x1xZ"] {
            assert_eq!(DisplayMode::parse(bad), None, "{bad}");
        }
        assert!(DisplayMode::parse("400x300x24xC").is_some());
    }

    #[test]
    fn setters_validate_input() {
        let mut config = WebInkConfig::new();
        assert_eq!(config.set_server_url("ftp://x"), Err(ConfigError::InvalidUrl));
        assert_eq!(config.set_device_id("bad id"), Err(ConfigError::InvalidDeviceId));
        assert_eq!(
            config.set_rows_per_slice(65),
            Err(ConfigError::RowsPerSliceOutOfRange(65))
        );
        assert_eq!(config.set_display_mode("big"), Err(ConfigError::InvalidDisplayMode));
        assert_eq!(config, WebInkConfig::new());

        config.set_socket_port(0);
        assert_eq!(config.network_mode(), NetworkMode::HttpSliced);
    }

    #[test]
    fn api_key_is_truncated_and_empty_key_fails_validation() {
        let mut config = WebInkConfig::new();
        let long = "k".repeat(80);
        config.set_api_key(&long);
        assert_eq!(config.api_key().len(), API_KEY_CAPACITY);

        config.set_api_key("");
        assert_eq!(config.validate(), Err(ConfigError::EmptyApiKey));
    }

    #[test]
    fn urls_carry_identity_and_slice_rows() {
        let config = WebInkConfig::new();
        assert_eq!(
            config.build_hash_url(),
            "http://192.168.68.69:8090/get_hash?api_key=myapikey&device=default&mode=800x480x1xB"
        );

        let request = config.full_frame_request().unwrap().with_rows(16, 8);
        assert_eq!(
            config.build_image_url(&request),
            "http://192.168.68.69:8090/get_image?api_key=myapikey&device=default&mode=800x480x1xB&x=0&y=16&w=800&h=8&format=pbm"
        );
        assert_eq!(
            config.build_socket_request(&request),
            "webInkV1 myapikey default 800x480x1xB 0 0 800 480 pbm\n"
        );
        assert!(config.build_sleep_url().ends_with("/get_sleep?api_key=myapikey&device=default"));
        assert!(config.build_log_url().ends_with("/post_log?api_key=myapikey&device=default"));
    }

    #[test]
    fn server_host_defaults_to_port_80() {
        let mut config = WebInkConfig::new();
        assert_eq!(config.server_host(), Some(("192.168.68.69", 8090)));

        config.set_server_url("http://signage.local/base").unwrap();
        assert_eq!(config.server_host(), Some(("signage.local", 80)));

        config.set_server_url("http://host:notaport").unwrap();
        assert_eq!(config.server_host(), None);
        assert_eq!(config.server_hostname(), "http://host:notaport");
    }

    #[test]
    fn optimal_rows_are_clamped() {
        let config = WebInkConfig::new();
        assert_eq!(config.optimal_rows_per_slice(0), 1);
        assert_eq!(config.optimal_rows_per_slice(700), 7);
        assert_eq!(config.optimal_rows_per_slice(1_000_000), 64);
    }

    #[test]
    fn summary_lists_every_field() {
        assert_eq!(
            WebInkConfig::new().summary(),
            "[CONFIG] URL: http://192.168.68.69:8090, Device: default, Mode: 800x480x1xB, Socket: 8091, Rows: 8"
        );
    }
}
