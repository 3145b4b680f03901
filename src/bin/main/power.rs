use core::time::Duration as CoreDuration;

use esp_hal::{
    gpio::RtcPin,
    peripherals::{GPIO4, LPWR},
    rtc_cntl::{
        Rtc,
        sleep::{RtcioWakeupSource, TimerWakeupSource, WakeupLevel},
    },
};
use log::{info, warn};
use webink_core::{PersistentState, state::StateStore};
use webink_hal_esp32s3::storage::rtc_state::RtcStateStore;

/// Saves the wake-cycle snapshot, parks the panel and sleeps until the timer
/// or the override button (GPIO4, active low) wakes the chip.
pub(super) fn enter_deep_sleep<E: core::fmt::Debug>(
    store: &mut RtcStateStore,
    state: &PersistentState,
    park_panel: impl FnOnce() -> Result<(), E>,
    duration_ms: u64,
) -> ! {
    if let Err(err) = store.save(state) {
        warn!("power: snapshot not saved: {}", err);
    }
    if let Err(err) = park_panel() {
        warn!("power: panel sleep failed: {:?}", err);
    }

    info!("power: deep sleep for {} ms", duration_ms);

    let mut rtc = Rtc::new(unsafe { LPWR::steal() });
    let timer = TimerWakeupSource::new(CoreDuration::from_millis(duration_ms));
    let mut wake_button = unsafe { GPIO4::steal() };
    let mut wake_pins: [(&mut dyn RtcPin, WakeupLevel); 1] =
        [(&mut wake_button, WakeupLevel::Low)];
    let button = RtcioWakeupSource::new(&mut wake_pins);

    rtc.sleep_deep(&[&timer, &button]);
}
