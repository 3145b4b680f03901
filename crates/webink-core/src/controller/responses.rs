use alloc::format;

use log::{debug, info, warn};

use super::{ControllerEvent, Purpose, SleepPhase, WebInkController};
use crate::{
    display::Panel,
    host::HostStatus,
    image::{DecodeError, ImageDecoder},
    json::{self, HashField, SleepField},
    net::{Completion, Transport},
    types::{ErrorType, NetworkResult, UpdateState},
};

impl<T, P, H> WebInkController<T, P, H>
where
    T: Transport,
    P: Panel,
    H: HostStatus,
{
    /// Routes every finished network operation to its handler.
    pub(super) fn dispatch_completions(&mut self, now_ms: u64) {
        while let Some(Completion { tag, result }) = self.network.take_completion() {
            match tag {
                Purpose::Hash => self.on_hash_response(result, now_ms),
                Purpose::ImageSlice => self.on_slice_response(result, now_ms),
                Purpose::ImageStream => self.on_stream_complete(result, now_ms),
                Purpose::Sleep => self.on_sleep_response(result),
                Purpose::Log => {
                    if !result.success {
                        warn!("webink: log upload failed: {}", result.error_message);
                    }
                }
            }
        }
    }

    fn on_hash_response(&mut self, result: NetworkResult, now_ms: u64) {
        if self.current != UpdateState::HashParse {
            debug!("webink: stale hash response in {}", self.current.as_str());
            return;
        }
        if !result.success {
            self.handle_error(
                ErrorType::ServerUnreachable,
                &format!("Hash request failed: {}", result.error_message),
                now_ms,
            );
            return;
        }

        match json::extract_hash(&result.data) {
            HashField::Found(hash) => {
                if self.state.has_hash_changed(hash) {
                    self.state.update_hash(hash);
                    self.events
                        .push(ControllerEvent::Log("Content changed, downloading image"));
                    self.transition(UpdateState::ImageRequest, now_ms);
                } else {
                    info!("webink: hash unchanged ({hash}), skipping download");
                    self.events.push(ControllerEvent::Log("Content unchanged"));
                    self.transition(UpdateState::SleepPrepare, now_ms);
                }
            }
            HashField::Missing => self.handle_error(
                ErrorType::ParseError,
                "Hash not found in server response",
                now_ms,
            ),
            HashField::Malformed => self.handle_error(
                ErrorType::ParseError,
                "Failed to extract hash from response",
                now_ms,
            ),
        }
    }

    fn on_slice_response(&mut self, result: NetworkResult, now_ms: u64) {
        let Some(request) = self.current_request.take() else {
            debug!("webink: slice response without a request");
            return;
        };
        if self.current != UpdateState::ImageDownload {
            return;
        }
        if !result.success {
            self.handle_error(
                ErrorType::ServerUnreachable,
                &format!("Image request failed: {}", result.error_message),
                now_ms,
            );
            return;
        }
        if result.data.is_empty() {
            self.handle_error(ErrorType::ParseError, "Empty image data received", now_ms);
            return;
        }

        let pixels = match ImageDecoder::parse_complete_image(&result.data) {
            Ok((header, pixels)) => {
                debug!("webink: slice {}", ImageDecoder::describe(&header));
                pixels
            }
            Err(DecodeError::OutOfMemory) => {
                self.handle_error(
                    ErrorType::MemoryError,
                    "Insufficient memory for image slice",
                    now_ms,
                );
                return;
            }
            Err(err) => {
                self.handle_error(
                    ErrorType::ParseError,
                    &format!("Failed to parse image data: {err}"),
                    now_ms,
                );
                return;
            }
        };

        if let Err(err) = self.panel.draw_pixel_block(0, request.start_row, &pixels) {
            self.handle_error(
                ErrorType::DisplayError,
                &format!("Failed to draw image rows: {err:?}"),
                now_ms,
            );
            return;
        }

        let rows = pixels.height.min(request.num_rows);
        self.rows_completed = self.rows_completed.saturating_add(rows).min(self.total_rows);
        self.state_entered_ms = now_ms;
        self.report_download_progress();

        if self.rows_completed >= self.total_rows {
            info!("webink: all {} rows received", self.total_rows);
            self.transition(UpdateState::DisplayUpdate, now_ms);
        }
    }

    fn on_stream_complete(&mut self, result: NetworkResult, now_ms: u64) {
        if self.current != UpdateState::ImageDownload {
            return;
        }
        if !result.success {
            self.handle_error(
                ErrorType::SocketError,
                &format!("Image stream failed: {}", result.error_message),
                now_ms,
            );
            return;
        }

        self.network.socket_close();
        if self.rows_completed < self.total_rows {
            warn!(
                "webink: stream ended after {}/{} rows ({} bytes, {} left over)",
                self.rows_completed,
                self.total_rows,
                result.bytes_received,
                self.assembler.pending_bytes()
            );
        }
        self.transition(UpdateState::DisplayUpdate, now_ms);
    }

    fn on_sleep_response(&mut self, result: NetworkResult) {
        if self.current == UpdateState::SleepPrepare && self.sleep_phase == SleepPhase::AwaitInterval
        {
            self.sleep_phase = SleepPhase::Finalize;
        }

        if !result.success {
            warn!(
                "webink: sleep interval request failed ({}), keeping {}s",
                result.error_message,
                self.state.sleep_duration_seconds()
            );
            return;
        }

        match json::extract_sleep_seconds(&result.data) {
            SleepField::Found(seconds) => {
                self.state.set_sleep_duration_seconds(seconds);
                self.events.push(ControllerEvent::Log("Sleep interval updated"));
            }
            SleepField::Missing | SleepField::Invalid => warn!(
                "webink: no usable sleep interval in response, keeping {}s",
                self.state.sleep_duration_seconds()
            ),
        }
    }
}
