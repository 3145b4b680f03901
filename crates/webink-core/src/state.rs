//! Wake-cycle bookkeeping and the sleep-retained snapshot.

use alloc::{format, string::String};

use log::{debug, info, warn};

use crate::{config::bounded, types::ErrorType};

pub const HASH_CAPACITY: usize = 32;
pub const ERROR_MESSAGE_CAPACITY: usize = 128;

pub const DEFAULT_HASH: &str = "00000000";
pub const DEFAULT_SLEEP_SECONDS: u32 = 60;

/// Cold boots stay awake this long so the device can be reflashed.
pub const BOOT_PROTECTION_MS: u64 = 5 * 60 * 1000;
/// Poll interval while the server has disabled sleep.
pub const AWAKE_POLL_INTERVAL_MS: u64 = 60 * 1000;

const SNAPSHOT_MAGIC: u32 = 0x4B4E_4957; // "WINK"
const SNAPSHOT_VERSION: u8 = 1;
const OFF_VERSION: usize = 4;
const OFF_WAKE_COUNTER: usize = 5;
const OFF_SLEEP_SECONDS: usize = 9;
const OFF_FLAGS: usize = 13;
const OFF_ERROR: usize = 14;
const OFF_HASH_LEN: usize = 15;
const OFF_HASH: usize = 16;
const OFF_MESSAGE_LEN: usize = OFF_HASH + HASH_CAPACITY;
const OFF_MESSAGE: usize = OFF_MESSAGE_LEN + 1;
const OFF_CHECKSUM: usize = OFF_MESSAGE + ERROR_MESSAGE_CAPACITY;
/// Encoded snapshot size in bytes.
pub const SNAPSHOT_LEN: usize = OFF_CHECKSUM + 4;

const FLAG_DEEP_SLEEP_ENABLED: u8 = 1 << 0;
const FLAG_ERROR_SCREEN_DISPLAYED: u8 = 1 << 1;

/// How the current session started.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BootKind {
    /// Power-on or reset. Boot protection applies.
    #[default]
    ColdBoot,
    DeepSleepWake,
}

/// Counters, hash and error flags driving the wake cycle.
///
/// Fields up to `error_screen_displayed` survive deep sleep via [`Self::encode`].
/// The rest describe the current session and reset on every boot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PersistentState {
    last_hash: heapless::String<HASH_CAPACITY>,
    wake_counter: u32,
    sleep_duration_seconds: u32,
    deep_sleep_enabled: bool,
    current_error: ErrorType,
    error_message: heapless::String<ERROR_MESSAGE_CAPACITY>,
    error_screen_displayed: bool,

    cycles_since_boot: u32,
    boot_time_ms: Option<u64>,
    last_update_time_ms: u64,
    last_cycle_had_error: bool,
    boot_kind: BootKind,
}

impl Default for PersistentState {
    fn default() -> Self {
        Self::new(BootKind::ColdBoot)
    }
}

impl PersistentState {
    pub fn new(boot_kind: BootKind) -> Self {
        Self {
            last_hash: bounded(DEFAULT_HASH),
            wake_counter: 0,
            sleep_duration_seconds: DEFAULT_SLEEP_SECONDS,
            deep_sleep_enabled: true,
            current_error: ErrorType::None,
            error_message: heapless::String::new(),
            error_screen_displayed: false,
            cycles_since_boot: 0,
            boot_time_ms: None,
            last_update_time_ms: 0,
            last_cycle_had_error: false,
            boot_kind,
        }
    }

    pub const fn with_boot_kind(mut self, boot_kind: BootKind) -> Self {
        self.boot_kind = boot_kind;
        self
    }

    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    pub fn wake_counter(&self) -> u32 {
        self.wake_counter
    }

    pub fn cycles_since_boot(&self) -> u32 {
        self.cycles_since_boot
    }

    pub fn sleep_duration_seconds(&self) -> u32 {
        self.sleep_duration_seconds
    }

    pub fn sleep_duration_ms(&self) -> u64 {
        self.sleep_duration_seconds as u64 * 1000
    }

    pub fn deep_sleep_enabled(&self) -> bool {
        self.deep_sleep_enabled
    }

    pub fn current_error(&self) -> ErrorType {
        self.current_error
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn error_screen_displayed(&self) -> bool {
        self.error_screen_displayed
    }

    pub fn last_cycle_had_error(&self) -> bool {
        self.last_cycle_had_error
    }

    pub fn last_update_time_ms(&self) -> u64 {
        self.last_update_time_ms
    }

    pub fn boot_kind(&self) -> BootKind {
        self.boot_kind
    }

    pub fn is_deep_sleep_wake(&self) -> bool {
        self.boot_kind == BootKind::DeepSleepWake
    }

    pub fn set_sleep_duration_seconds(&mut self, seconds: u32) {
        if seconds != self.sleep_duration_seconds {
            info!(
                "state: sleep duration {}s -> {}s",
                self.sleep_duration_seconds, seconds
            );
        }
        self.sleep_duration_seconds = seconds;
    }

    pub fn set_deep_sleep_enabled(&mut self, enabled: bool) {
        self.deep_sleep_enabled = enabled;
    }

    pub fn mark_error_screen_displayed(&mut self) {
        self.error_screen_displayed = true;
    }

    /// Records the session start. Ignored after a deep-sleep wake.
    pub fn record_boot_time(&mut self, now_ms: u64) {
        if self.is_deep_sleep_wake() {
            debug!("state: deep sleep wake, boot time not recorded");
            return;
        }
        self.boot_time_ms = Some(now_ms);
        info!("state: boot time recorded at {now_ms}ms");
    }

    pub fn record_update_time(&mut self, now_ms: u64) {
        self.last_update_time_ms = now_ms;
    }

    pub fn increment_wake_counter(&mut self) {
        self.wake_counter = self.wake_counter.wrapping_add(1);
        self.cycles_since_boot = self.cycles_since_boot.saturating_add(1);
        debug!(
            "state: wake #{} (cycle #{} since boot)",
            self.wake_counter, self.cycles_since_boot
        );
    }

    pub fn clear_error_flags(&mut self) {
        self.current_error = ErrorType::None;
        self.error_message.clear();
        self.error_screen_displayed = false;
        self.last_cycle_had_error = false;
    }

    pub fn set_error(&mut self, kind: ErrorType, message: &str) {
        self.current_error = kind;
        self.error_message = bounded(message);
        self.last_cycle_had_error = true;
        warn!("state: error set {} - {}", kind.as_str(), self.error_message);
    }

    /// Compares against the stored hash after truncation to its capacity.
    pub fn has_hash_changed(&self, new_hash: &str) -> bool {
        let candidate: heapless::String<HASH_CAPACITY> = bounded(new_hash);
        let changed = candidate != self.last_hash;
        if changed {
            info!("state: hash changed {} -> {}", self.last_hash, candidate);
        }
        changed
    }

    pub fn update_hash(&mut self, new_hash: &str) {
        self.last_hash = bounded(new_hash);
    }

    /// Resets the stored hash so the next cycle always downloads.
    pub fn clear_hash_force_update(&mut self) {
        self.last_hash = bounded(DEFAULT_HASH);
        info!("state: hash cleared, next cycle forces an update");
    }

    pub fn time_since_boot(&self, now_ms: u64) -> u64 {
        self.boot_time_ms
            .map_or(0, |boot| now_ms.saturating_sub(boot))
    }

    /// Only cold boots are protected.
    pub fn within_boot_protection_period(&self, now_ms: u64) -> bool {
        !self.is_deep_sleep_wake() && self.time_since_boot(now_ms) < BOOT_PROTECTION_MS
    }

    /// Checks every sleep veto in a fixed order and logs the first that applies.
    pub fn can_deep_sleep(&self, button_pressed: bool, now_ms: u64) -> bool {
        if !self.deep_sleep_enabled {
            warn!("sleep: disabled via configuration");
            return false;
        }
        if self.sleep_duration_seconds == 0 {
            warn!("sleep: interval is 0, server asked to stay awake");
            return false;
        }
        if button_pressed {
            warn!("sleep: override button held");
            return false;
        }
        if self.last_cycle_had_error {
            warn!("sleep: last cycle had an error, staying awake");
            return false;
        }
        if self.within_boot_protection_period(now_ms) {
            let remaining = BOOT_PROTECTION_MS.saturating_sub(self.time_since_boot(now_ms));
            warn!("sleep: boot protection, {}s remaining", remaining / 1000);
            return false;
        }

        info!(
            "sleep: checks passed, sleeping for {}s",
            self.sleep_duration_seconds
        );
        true
    }

    pub fn should_start_update_cycle(&self, now_ms: u64) -> bool {
        if self.wake_counter == 0 || self.cycles_since_boot == 0 {
            return true;
        }

        let interval_ms = if self.sleep_duration_seconds == 0 {
            AWAKE_POLL_INTERVAL_MS
        } else {
            self.sleep_duration_ms()
        };
        now_ms.saturating_sub(self.last_update_time_ms) >= interval_ms
    }

    pub fn status_string(&self, now_ms: u64) -> String {
        format!(
            "[STATUS] Wake #{}, Boot cycle #{}, {} sec since boot, Hash: {}, Sleep: {}s, Errors: {}",
            self.wake_counter,
            self.cycles_since_boot,
            self.time_since_boot(now_ms) / 1000,
            self.last_hash,
            self.sleep_duration_seconds,
            if self.last_cycle_had_error { "YES" } else { "NO" }
        )
    }

    /// Encodes the sleep-retained fields.
    pub fn encode(&self) -> [u8; SNAPSHOT_LEN] {
        let mut buf = [0u8; SNAPSHOT_LEN];
        buf[0..4].copy_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
        buf[OFF_VERSION] = SNAPSHOT_VERSION;
        buf[OFF_WAKE_COUNTER..OFF_WAKE_COUNTER + 4].copy_from_slice(&self.wake_counter.to_le_bytes());
        buf[OFF_SLEEP_SECONDS..OFF_SLEEP_SECONDS + 4]
            .copy_from_slice(&self.sleep_duration_seconds.to_le_bytes());

        let mut flags = 0u8;
        if self.deep_sleep_enabled {
            flags |= FLAG_DEEP_SLEEP_ENABLED;
        }
        if self.error_screen_displayed {
            flags |= FLAG_ERROR_SCREEN_DISPLAYED;
        }
        buf[OFF_FLAGS] = flags;
        buf[OFF_ERROR] = self.current_error.to_byte();

        let hash = self.last_hash.as_bytes();
        buf[OFF_HASH_LEN] = hash.len() as u8;
        buf[OFF_HASH..OFF_HASH + hash.len()].copy_from_slice(hash);

        let message = self.error_message.as_bytes();
        buf[OFF_MESSAGE_LEN] = message.len() as u8;
        buf[OFF_MESSAGE..OFF_MESSAGE + message.len()].copy_from_slice(message);

        let checksum = checksum32(&buf[..OFF_CHECKSUM]);
        buf[OFF_CHECKSUM..].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Restores a snapshot into a fresh session.
    ///
    /// Returns `None` for blank, foreign or corrupted bytes.
    pub fn decode(bytes: &[u8], boot_kind: BootKind) -> Option<Self> {
        if bytes.len() < SNAPSHOT_LEN {
            return None;
        }
        let bytes = &bytes[..SNAPSHOT_LEN];

        if read_u32(bytes, 0) != SNAPSHOT_MAGIC || bytes[OFF_VERSION] != SNAPSHOT_VERSION {
            return None;
        }
        if read_u32(bytes, OFF_CHECKSUM) != checksum32(&bytes[..OFF_CHECKSUM]) {
            return None;
        }

        let hash_len = bytes[OFF_HASH_LEN] as usize;
        let message_len = bytes[OFF_MESSAGE_LEN] as usize;
        if hash_len > HASH_CAPACITY || message_len > ERROR_MESSAGE_CAPACITY {
            return None;
        }
        let hash = core::str::from_utf8(&bytes[OFF_HASH..OFF_HASH + hash_len]).ok()?;
        let message = core::str::from_utf8(&bytes[OFF_MESSAGE..OFF_MESSAGE + message_len]).ok()?;
        let flags = bytes[OFF_FLAGS];

        let mut state = Self::new(boot_kind);
        state.last_hash = bounded(hash);
        state.wake_counter = read_u32(bytes, OFF_WAKE_COUNTER);
        state.sleep_duration_seconds = read_u32(bytes, OFF_SLEEP_SECONDS);
        state.deep_sleep_enabled = flags & FLAG_DEEP_SLEEP_ENABLED != 0;
        state.error_screen_displayed = flags & FLAG_ERROR_SCREEN_DISPLAYED != 0;
        state.current_error = ErrorType::from_byte(bytes[OFF_ERROR])?;
        state.error_message = bounded(message);
        Some(state)
    }
}

/// Backend that keeps [`PersistentState`] across deep sleep.
pub trait StateStore {
    type Error;

    fn load(&mut self, boot_kind: BootKind) -> Result<Option<PersistentState>, Self::Error>;
    fn save(&mut self, state: &PersistentState) -> Result<(), Self::Error>;
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn checksum32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C9DC5u32;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
