//! Wake-cycle snapshot kept in RTC fast memory across deep sleep.

use core::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

use esp_hal::rtc_cntl::SocResetReason;
use log::{debug, info};
use webink_core::state::{BootKind, PersistentState, SNAPSHOT_LEN, StateStore};

/// Survives deep sleep and soft resets. Garbage after power loss; the
/// snapshot checksum rejects it.
#[esp_hal::ram(unstable(rtc_fast, persistent))]
static mut RTC_SNAPSHOT: [u8; SNAPSHOT_LEN] = [0; SNAPSHOT_LEN];

static TAKEN: AtomicBool = AtomicBool::new(false);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreError {
    /// Bytes did not decode; defaults apply.
    Corrupt,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupt => f.write_str("rtc snapshot corrupt"),
        }
    }
}

/// Maps the reset reason of the boot core to a [`BootKind`].
pub fn boot_kind_from_reset(reason: Option<SocResetReason>) -> BootKind {
    if reason == Some(SocResetReason::CoreDeepSleep) {
        BootKind::DeepSleepWake
    } else {
        BootKind::ColdBoot
    }
}

/// Sole owner of the RTC snapshot region.
#[derive(Debug)]
pub struct RtcStateStore {
    _private: (),
}

impl RtcStateStore {
    /// Returns the store once; later calls get `None`.
    pub fn take() -> Option<Self> {
        if TAKEN.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Self { _private: () })
    }

    fn region(&mut self) -> &mut [u8; SNAPSHOT_LEN] {
        // SAFETY: `take` hands out a single store, and `&mut self` serialises access.
        unsafe { &mut *core::ptr::addr_of_mut!(RTC_SNAPSHOT) }
    }

    /// Loads the snapshot, falling back to defaults for `boot_kind`.
    pub fn restore(&mut self, boot_kind: BootKind) -> PersistentState {
        match self.load(boot_kind) {
            Ok(Some(state)) => {
                info!(
                    "rtc: restored snapshot (wake #{}, hash {})",
                    state.wake_counter(),
                    state.last_hash()
                );
                state
            }
            Ok(None) | Err(_) => {
                info!("rtc: no usable snapshot, starting fresh");
                PersistentState::new(boot_kind)
            }
        }
    }
}

impl StateStore for RtcStateStore {
    type Error = StoreError;

    fn load(&mut self, boot_kind: BootKind) -> Result<Option<PersistentState>, Self::Error> {
        let bytes = self.region();
        if bytes.iter().all(|b| *b == 0) {
            return Ok(None);
        }
        PersistentState::decode(bytes, boot_kind)
            .map(Some)
            .ok_or(StoreError::Corrupt)
    }

    fn save(&mut self, state: &PersistentState) -> Result<(), Self::Error> {
        *self.region() = state.encode();
        debug!("rtc: saved snapshot ({} bytes)", SNAPSHOT_LEN);
        Ok(())
    }
}
