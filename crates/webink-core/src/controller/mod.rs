//! Wake-cycle state machine: hash check, image transfer, refresh, sleep handoff.

mod download;
mod events;
mod responses;


use alloc::{format, string::String};

use log::{debug, info, warn};

pub use download::RowAssembler;
pub use events::{ControllerEvent, EVENT_CAPACITY};

use events::EventQueue;

use crate::{
    config::{ConfigError, WebInkConfig},
    display::{ErrorScreen, Panel},
    host::HostStatus,
    net::{NetworkClient, Transport},
    state::{AWAKE_POLL_INTERVAL_MS, PersistentState},
    types::{ErrorType, ImageRequest, UpdateState},
};

/// Minimum spacing between two executed ticks.
pub const TICK_INTERVAL_MS: u64 = 50;
/// Longest time any timed state may be active.
pub const STATE_TIMEOUT_MS: u64 = 30_000;
/// How long the error screen stays up before the sleep sequence.
pub const ERROR_DWELL_MS: u64 = 2_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TickResult {
    /// Called too soon after the previous tick; nothing ran.
    Yielded,
    Continue,
    /// The cycle is over; the host should deep sleep for `duration_ms`.
    DeepSleep { duration_ms: u64 },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProgressInfo {
    pub percent: u8,
    pub status: &'static str,
}

/// Completion tag of each network operation the controller issues.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Purpose {
    Hash,
    ImageSlice,
    ImageStream,
    Sleep,
    Log,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SocketPhase {
    AwaitConnect,
    SendRequest,
    Receive,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SleepPhase {
    RequestInterval,
    AwaitInterval,
    Finalize,
    /// Status log in flight; the host must not sleep before it leaves.
    AwaitLog,
}

pub struct WebInkController<T, P, H>
where
    T: Transport,
    P: Panel,
    H: HostStatus,
{
    config: WebInkConfig,
    state: PersistentState,
    network: NetworkClient<T, Purpose>,
    panel: P,
    host: H,
    current: UpdateState,
    state_entered_ms: u64,
    last_tick_ms: Option<u64>,
    progress: Option<ProgressInfo>,
    events: EventQueue,

    assembler: RowAssembler,
    socket_phase: SocketPhase,
    sleep_phase: SleepPhase,
    total_rows: u16,
    rows_completed: u16,
    current_request: Option<ImageRequest>,
}

impl<T, P, H> WebInkController<T, P, H>
where
    T: Transport,
    P: Panel,
    H: HostStatus,
{
    pub fn new(config: WebInkConfig, state: PersistentState, transport: T, panel: P, host: H) -> Self {
        Self {
            config,
            state,
            network: NetworkClient::new(transport),
            panel,
            host,
            current: UpdateState::Idle,
            state_entered_ms: 0,
            last_tick_ms: None,
            progress: None,
            events: EventQueue::default(),
            assembler: RowAssembler::new(),
            socket_phase: SocketPhase::AwaitConnect,
            sleep_phase: SleepPhase::RequestInterval,
            total_rows: 0,
            rows_completed: 0,
            current_request: None,
        }
    }

    /// Validates the configuration and starts the session bookkeeping.
    pub fn setup(&mut self, now_ms: u64) -> Result<(), ConfigError> {
        self.config.validate()?;

        self.state.record_boot_time(now_ms);
        self.state.clear_error_flags();
        self.state_entered_ms = now_ms;

        info!("webink: {}", self.config.summary());
        info!(
            "webink: {:?}, wake counter {}, hash {}",
            self.state.boot_kind(),
            self.state.wake_counter(),
            self.state.last_hash()
        );
        self.events.push(ControllerEvent::Log("Controller ready"));
        Ok(())
    }

    /// Advances the cycle by at most one step.
    pub fn tick(&mut self, now_ms: u64) -> TickResult {
        if let Some(last) = self.last_tick_ms {
            if now_ms.saturating_sub(last) < TICK_INTERVAL_MS {
                return TickResult::Yielded;
            }
        }
        self.last_tick_ms = Some(now_ms);

        self.pump_network(now_ms);
        self.dispatch_completions(now_ms);

        if self.current.is_timed()
            && now_ms.saturating_sub(self.state_entered_ms) > STATE_TIMEOUT_MS
        {
            if self.current == UpdateState::WifiWait {
                self.handle_error(
                    ErrorType::WifiTimeout,
                    "WiFi connection timeout after 30 seconds",
                    now_ms,
                );
            } else {
                warn!("webink: {} timed out", self.current.as_str());
                self.handle_error(ErrorType::ServerUnreachable, "State machine timeout", now_ms);
            }
            return TickResult::Continue;
        }

        match self.current {
            UpdateState::Idle => {
                if self.state.should_start_update_cycle(now_ms) {
                    self.begin_cycle(now_ms);
                }
                TickResult::Continue
            }
            UpdateState::WifiWait => {
                if self.host.wifi_connected() {
                    self.report_progress(10, "WiFi connected");
                    self.transition(UpdateState::HashRequest, now_ms);
                }
                TickResult::Continue
            }
            UpdateState::HashCheck => {
                self.report_progress(15, "Checking hash");
                self.transition(UpdateState::HashRequest, now_ms);
                TickResult::Continue
            }
            UpdateState::HashRequest => {
                if !self.network.is_operation_pending() {
                    self.transition(UpdateState::HashParse, now_ms);
                    self.report_progress(25, "Waiting for hash response");
                    let url = self.config.build_hash_url();
                    self.network.http_get(Purpose::Hash, &url, 0, now_ms);
                }
                TickResult::Continue
            }
            UpdateState::HashParse => TickResult::Continue,
            UpdateState::ImageRequest => self.handle_image_request(now_ms),
            UpdateState::ImageDownload => self.handle_image_download(now_ms),
            UpdateState::ImageParse => {
                self.report_progress(75, "Parsing image");
                self.transition(UpdateState::ImageDisplay, now_ms);
                TickResult::Continue
            }
            UpdateState::ImageDisplay => {
                self.report_progress(85, "Displaying image");
                self.transition(UpdateState::DisplayUpdate, now_ms);
                TickResult::Continue
            }
            UpdateState::DisplayUpdate => {
                self.report_progress(95, "Refreshing display");
                if let Err(err) = self.panel.refresh() {
                    self.handle_error(
                        ErrorType::DisplayError,
                        &format!("Display refresh failed: {err:?}"),
                        now_ms,
                    );
                } else {
                    self.transition(UpdateState::SleepPrepare, now_ms);
                }
                TickResult::Continue
            }
            UpdateState::SleepPrepare => self.handle_sleep_prepare(now_ms),
            UpdateState::Complete => {
                self.reset_cycle();
                self.transition(UpdateState::Idle, now_ms);
                TickResult::Continue
            }
            UpdateState::ErrorDisplay => {
                if now_ms.saturating_sub(self.state_entered_ms) > ERROR_DWELL_MS {
                    self.transition(UpdateState::SleepPrepare, now_ms);
                }
                TickResult::Continue
            }
        }
    }

    /// Starts a cycle right away. Returns false while one is running.
    pub fn trigger_manual_update(&mut self, now_ms: u64) -> bool {
        if self.current != UpdateState::Idle {
            warn!(
                "webink: manual update ignored, cycle running ({})",
                self.current.as_str()
            );
            return false;
        }
        self.events.push(ControllerEvent::Log("Manual update triggered"));
        self.begin_cycle(now_ms);
        true
    }

    /// Abandons the running cycle and returns to idle.
    pub fn cancel_current_operation(&mut self) -> bool {
        if self.current == UpdateState::Idle {
            return false;
        }

        info!("webink: cancelling cycle in {}", self.current.as_str());
        self.network.cancel_all_operations();
        self.network.discard_completions();
        self.network.socket_close();
        self.reset_cycle();
        let now_ms = self.last_tick_ms.unwrap_or(self.state_entered_ms);
        self.transition(UpdateState::Idle, now_ms);
        true
    }

    /// Skips ahead to the sleep sequence when nothing vetoes sleep.
    pub fn trigger_deep_sleep(&mut self, now_ms: u64) -> bool {
        let button = self.host.button_pressed();
        if !self.state.can_deep_sleep(button, now_ms) {
            return false;
        }

        self.network.cancel_all_operations();
        self.network.discard_completions();
        self.network.socket_close();
        self.current_request = None;
        self.transition(UpdateState::SleepPrepare, now_ms);
        true
    }

    pub fn enable_deep_sleep(&mut self, enabled: bool) {
        info!("webink: deep sleep {}", if enabled { "enabled" } else { "disabled" });
        self.state.set_deep_sleep_enabled(enabled);
    }

    pub fn clear_hash_force_update(&mut self) {
        self.state.clear_hash_force_update();
    }

    pub fn current_state(&self) -> UpdateState {
        self.current
    }

    pub fn is_update_in_progress(&self) -> bool {
        self.current != UpdateState::Idle
    }

    /// Last reported progress of the running cycle.
    pub fn progress_info(&self) -> Option<ProgressInfo> {
        if self.current == UpdateState::Idle {
            return None;
        }
        self.progress
    }

    pub fn status_string(&self) -> String {
        let now_ms = self.last_tick_ms.unwrap_or(0);
        let percent = self.progress_info().map_or(0, |p| p.percent);
        format!(
            "{} State: {} ({}%)",
            self.state.status_string(now_ms),
            self.current.as_str(),
            percent
        )
    }

    pub fn next_event(&mut self) -> Option<ControllerEvent> {
        self.events.pop()
    }

    /// Events lost to queue overflow since boot.
    pub fn dropped_events(&self) -> u32 {
        self.events.dropped()
    }

    pub fn state(&self) -> &PersistentState {
        &self.state
    }

    pub fn config(&self) -> &WebInkConfig {
        &self.config
    }

    pub fn network(&self) -> &NetworkClient<T, Purpose> {
        &self.network
    }

    pub fn panel_mut(&mut self) -> &mut P {
        &mut self.panel
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    fn begin_cycle(&mut self, now_ms: u64) {
        self.state.clear_error_flags();
        self.state.increment_wake_counter();
        self.state.record_update_time(now_ms);
        self.reset_cycle();
        self.transition(UpdateState::WifiWait, now_ms);
        self.report_progress(0, "Starting update cycle");
    }

    fn handle_sleep_prepare(&mut self, now_ms: u64) -> TickResult {
        match self.sleep_phase {
            SleepPhase::RequestInterval => {
                if self.network.is_operation_pending() {
                    return TickResult::Continue;
                }
                self.report_progress(95, "Getting sleep interval");
                self.sleep_phase = SleepPhase::AwaitInterval;
                let url = self.config.build_sleep_url();
                self.network.http_get(Purpose::Sleep, &url, 0, now_ms);
                TickResult::Continue
            }
            SleepPhase::AwaitInterval => TickResult::Continue,
            SleepPhase::Finalize => {
                self.report_progress(100, "Update complete");
                self.send_status_log(now_ms);

                if self.network.is_operation_pending() {
                    self.sleep_phase = SleepPhase::AwaitLog;
                    self.state_entered_ms = now_ms;
                    return TickResult::Continue;
                }
                self.finish_cycle(now_ms)
            }
            SleepPhase::AwaitLog => {
                if self.network.is_operation_pending() {
                    let waited = now_ms.saturating_sub(self.state_entered_ms);
                    if waited < self.network.http_timeout_ms() as u64 {
                        return TickResult::Continue;
                    }
                    warn!("webink: status log still pending after {waited}ms, dropping it");
                    self.network.cancel_all_operations();
                    self.network.discard_completions();
                }
                self.finish_cycle(now_ms)
            }
        }
    }

    fn finish_cycle(&mut self, now_ms: u64) -> TickResult {
        let button = self.host.button_pressed();
        let sleep = self.state.can_deep_sleep(button, now_ms);
        self.transition(UpdateState::Complete, now_ms);
        if sleep {
            TickResult::DeepSleep {
                duration_ms: self.state.sleep_duration_ms(),
            }
        } else {
            TickResult::Continue
        }
    }

    fn send_status_log(&mut self, now_ms: u64) {
        if self.network.is_operation_pending() {
            debug!("webink: status log skipped, operation pending");
            return;
        }
        let url = self.config.build_log_url();
        let body = self.state.status_string(now_ms);
        self.network
            .http_post(Purpose::Log, &url, body.as_bytes(), "text/plain", 0, now_ms);
    }

    /// Records the failure, shows it on the panel and parks in `ERROR_DISPLAY`.
    fn handle_error(&mut self, kind: ErrorType, detail: &str, now_ms: u64) {
        warn!("webink: {} - {}", kind.as_str(), detail);
        self.state.set_error(kind, detail);

        self.network.cancel_all_operations();
        self.network.discard_completions();
        self.network.socket_close();
        self.current_request = None;

        self.events.push(ControllerEvent::Error {
            kind,
            detail: String::from(detail),
        });

        // A zero interval keeps the device awake and polling.
        let retry_seconds = match self.state.sleep_duration_seconds() {
            0 => (AWAKE_POLL_INTERVAL_MS / 1000) as u32,
            seconds => seconds,
        };
        let screen = ErrorScreen::new(kind, detail, self.config.base_url(), retry_seconds);
        match self.panel.show_error(&screen) {
            Ok(()) => self.state.mark_error_screen_displayed(),
            Err(err) => warn!("webink: error screen failed: {err:?}"),
        }

        self.transition(UpdateState::ErrorDisplay, now_ms);
    }

    fn transition(&mut self, to: UpdateState, now_ms: u64) {
        let from = self.current;
        self.current = to;
        self.state_entered_ms = now_ms;
        if to == UpdateState::SleepPrepare {
            self.sleep_phase = SleepPhase::RequestInterval;
        }

        if from != to {
            info!("webink: state {} -> {}", from.as_str(), to.as_str());
            self.events.push(ControllerEvent::StateChanged { from, to });
        }
    }

    fn report_progress(&mut self, percent: u8, status: &'static str) {
        let progress = ProgressInfo { percent, status };
        if self.progress == Some(progress) {
            return;
        }
        debug!("webink: progress {percent}% {status}");
        self.progress = Some(progress);
        self.events.push(ControllerEvent::Progress { percent, status });
    }

    fn reset_cycle(&mut self) {
        self.total_rows = 0;
        self.rows_completed = 0;
        self.current_request = None;
        self.socket_phase = SocketPhase::AwaitConnect;
        self.sleep_phase = SleepPhase::RequestInterval;
        self.assembler.clear();
        self.progress = None;
    }
}
