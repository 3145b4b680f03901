//! Image transfer: HTTP slices or one raw socket stream, drawn row by row.

use alloc::{format, vec::Vec};
use core::task::Poll;

use log::{debug, info, warn};

use super::{Purpose, SocketPhase, TickResult, WebInkController};
use crate::{
    display::Panel,
    host::HostStatus,
    image::{self, DecodeError, PixelBuffer, PixelData},
    net::Transport,
    types::{ColorMode, DisplayRect, ErrorType, ImageRequest, NetworkMode, UpdateState},
};

pub(super) const FALLBACK_WIDTH: u16 = 800;
pub(super) const FALLBACK_ROWS: u16 = 480;

/// Collects raw stream bytes into whole rows.
///
/// The stream carries packed rows with no header, so chunk boundaries fall
/// anywhere. Each completed row is handed out as a one-row [`PixelData`].
#[derive(Debug)]
pub struct RowAssembler {
    width: u16,
    mode: ColorMode,
    bytes_per_row: usize,
    row: Vec<u8>,
    rows_emitted: u16,
}

impl Default for RowAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl RowAssembler {
    pub const fn new() -> Self {
        Self {
            width: 0,
            mode: ColorMode::Mono,
            bytes_per_row: 0,
            row: Vec::new(),
            rows_emitted: 0,
        }
    }

    /// Prepares for a new image and reserves the row buffer.
    pub fn reset(&mut self, width: u16, mode: ColorMode) -> Result<(), DecodeError> {
        self.width = width;
        self.mode = mode;
        self.bytes_per_row = image::bytes_per_row(width, mode);
        self.rows_emitted = 0;
        self.row.clear();
        self.row
            .try_reserve_exact(self.bytes_per_row)
            .map_err(|_| DecodeError::OutOfMemory)
    }

    /// Drops the buffer and forgets the geometry.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }

    pub fn rows_emitted(&self) -> u16 {
        self.rows_emitted
    }

    /// Bytes of the row currently being filled.
    pub fn pending_bytes(&self) -> usize {
        self.row.len()
    }

    /// Appends `chunk` and calls `on_row(y, row)` for every row it completes.
    ///
    /// Stops at the first error from `on_row`; the failing row still counts.
    pub fn feed<E, F>(&mut self, mut chunk: &[u8], mut on_row: F) -> Result<(), E>
    where
        F: FnMut(u16, &PixelData<'_>) -> Result<(), E>,
    {
        if self.bytes_per_row == 0 {
            return Ok(());
        }

        while !chunk.is_empty() {
            let take = (self.bytes_per_row - self.row.len()).min(chunk.len());
            self.row.extend_from_slice(&chunk[..take]);
            chunk = &chunk[take..];

            if self.row.len() < self.bytes_per_row {
                break;
            }

            let y = self.rows_emitted;
            self.rows_emitted = self.rows_emitted.saturating_add(1);
            let pixels = PixelData {
                width: self.width,
                height: 1,
                bytes_per_pixel: if self.mode == ColorMode::Rgb { 3 } else { 1 },
                stride: self.bytes_per_row,
                start_offset: y,
                mode: self.mode,
                max_value: match self.mode {
                    ColorMode::Mono => 1,
                    ColorMode::FourColor => 3,
                    ColorMode::Grayscale | ColorMode::Rgb => 255,
                },
                buffer: PixelBuffer::Borrowed(&self.row),
            };
            let drawn = on_row(y, &pixels);
            self.row.clear();
            drawn?;
        }

        Ok(())
    }
}

impl<T, P, H> WebInkController<T, P, H>
where
    T: Transport,
    P: Panel,
    H: HostStatus,
{
    /// Full-panel request, falling back to 800x480 PBM when the mode is unusable.
    pub(super) fn frame_request(&self) -> ImageRequest {
        self.config.full_frame_request().unwrap_or(ImageRequest::new(
            DisplayRect::new(0, 0, FALLBACK_WIDTH, FALLBACK_ROWS),
            "pbm",
        ))
    }

    pub(super) fn handle_image_request(&mut self, now_ms: u64) -> TickResult {
        let frame = self.frame_request();
        // Stream rows arrive in the layout of the requested format.
        let mode = self
            .config
            .display_mode()
            .map_or(ColorMode::Mono, |mode| mode.color.wire_mode());

        self.total_rows = frame.rect.height;
        self.rows_completed = 0;
        self.current_request = None;
        if let Err(err) = self.assembler.reset(frame.rect.width, mode) {
            self.handle_error(
                ErrorType::MemoryError,
                &format!("Row buffer allocation failed: {err}"),
                now_ms,
            );
            return TickResult::Continue;
        }

        info!(
            "webink: image {}x{} {} via {:?}",
            frame.rect.width,
            frame.rect.height,
            frame.format,
            self.config.network_mode()
        );

        if self.config.network_mode() == NetworkMode::TcpSocket {
            let Some((host, _)) = self.config.server_host() else {
                self.handle_error(
                    ErrorType::SocketError,
                    "Failed to connect to image server",
                    now_ms,
                );
                return TickResult::Continue;
            };
            let port = self.config.socket_mode_port();

            if self.network.socket_connect(host, port, 0).is_err() {
                self.handle_error(
                    ErrorType::SocketError,
                    "Failed to connect to image server",
                    now_ms,
                );
                return TickResult::Continue;
            }
            self.socket_phase = SocketPhase::AwaitConnect;
        }

        self.transition(UpdateState::ImageDownload, now_ms);
        TickResult::Continue
    }

    pub(super) fn handle_image_download(&mut self, now_ms: u64) -> TickResult {
        match self.config.network_mode() {
            NetworkMode::HttpSliced => self.request_next_slice(now_ms),
            NetworkMode::TcpSocket => self.drive_socket_download(now_ms),
        }
        TickResult::Continue
    }

    fn request_next_slice(&mut self, now_ms: u64) {
        // A slice is still in flight or its response is not yet dispatched.
        if self.network.is_operation_pending() || self.current_request.is_some() {
            return;
        }
        if self.rows_completed >= self.total_rows {
            self.transition(UpdateState::DisplayUpdate, now_ms);
            return;
        }

        let remaining = self.total_rows - self.rows_completed;
        let rows = self.config.rows_per_slice().min(remaining);
        let request = self.frame_request().with_rows(self.rows_completed, rows);
        let url = self.config.build_image_url(&request);

        debug!(
            "webink: slice rows {}..{} of {}",
            request.start_row,
            request.start_row + rows,
            self.total_rows
        );
        self.current_request = Some(request);
        self.network.http_get(Purpose::ImageSlice, &url, 0, now_ms);
    }

    fn drive_socket_download(&mut self, now_ms: u64) {
        if self.socket_phase == SocketPhase::AwaitConnect {
            match self.network.poll_socket_connect() {
                Poll::Pending => return,
                Poll::Ready(Ok(())) => self.socket_phase = SocketPhase::SendRequest,
                Poll::Ready(Err(err)) => {
                    warn!("webink: socket handshake failed: {err}");
                    self.handle_error(
                        ErrorType::SocketError,
                        "Failed to connect to image server",
                        now_ms,
                    );
                    return;
                }
            }
        }

        if self.socket_phase == SocketPhase::SendRequest {
            let request = self.config.build_socket_request(&self.frame_request());
            if let Err(err) = self.network.socket_send(request.as_bytes()) {
                warn!("webink: socket request not sent: {err}");
                self.handle_error(
                    ErrorType::SocketError,
                    "Failed to send socket request",
                    now_ms,
                );
                return;
            }

            let max_bytes = self.assembler.bytes_per_row() * self.total_rows as usize;
            if let Err(err) =
                self.network
                    .socket_receive_stream(Purpose::ImageStream, max_bytes, 0, now_ms)
            {
                warn!("webink: stream not started: {err}");
                self.handle_error(
                    ErrorType::SocketError,
                    "Failed to start socket receive",
                    now_ms,
                );
                return;
            }

            info!("webink: streaming {max_bytes} bytes");
            self.socket_phase = SocketPhase::Receive;
        }
    }

    /// Runs the network client and draws any rows the stream completed.
    pub(super) fn pump_network(&mut self, now_ms: u64) {
        let rows_before = self.rows_completed;
        let mut draw_error = None;

        let Self {
            network,
            panel,
            assembler,
            ..
        } = &mut *self;
        network.update(now_ms, |tag, chunk| {
            if tag != Purpose::ImageStream || draw_error.is_some() {
                return;
            }
            if let Err(err) = assembler.feed(chunk, |y, row| panel.draw_pixel_block(0, y, row)) {
                draw_error = Some(err);
            }
        });

        if let Some(err) = draw_error {
            self.handle_error(
                ErrorType::DisplayError,
                &format!("Failed to draw image rows: {err:?}"),
                now_ms,
            );
            return;
        }

        if self.current == UpdateState::ImageDownload
            && self.socket_phase == SocketPhase::Receive
        {
            self.rows_completed = self.assembler.rows_emitted().min(self.total_rows);
            if self.rows_completed != rows_before {
                self.state_entered_ms = now_ms;
                self.report_download_progress();
            }
        }
    }

    pub(super) fn report_download_progress(&mut self) {
        let total = self.total_rows.max(1) as u32;
        let percent = 50 + (self.rows_completed as u32 * 30 / total).min(30) as u8;
        self.report_progress(percent, "Downloading image");
    }
}
