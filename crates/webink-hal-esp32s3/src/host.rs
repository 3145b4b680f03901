//! [`HostStatus`] for the board: Wi-Fi from the shared handle, override from the button.

use embedded_hal::digital::InputPin;
use log::{info, warn};
use webink_core::host::HostStatus;

use crate::{
    input::button::{ButtonEvent, OverrideButton},
    network::ConnectivityHandle,
};

pub struct BoardHost<PIN> {
    connectivity: &'static ConnectivityHandle,
    button: OverrideButton<PIN>,
    manual_request: bool,
    button_fault_logged: bool,
}

impl<PIN> BoardHost<PIN>
where
    PIN: InputPin,
{
    pub fn new(connectivity: &'static ConnectivityHandle, button: OverrideButton<PIN>) -> Self {
        Self {
            connectivity,
            button,
            manual_request: false,
            button_fault_logged: false,
        }
    }

    /// Samples the button. Call once per loop iteration.
    pub fn poll_button(&mut self) {
        match self.button.poll() {
            Ok(Some(ButtonEvent::Press)) => {
                info!("board: override button pressed");
                self.manual_request = true;
            }
            Ok(Some(ButtonEvent::Release)) => info!("board: override button released"),
            Ok(None) => {}
            Err(err) => {
                if !self.button_fault_logged {
                    warn!("board: button read failed: {:?}", err);
                    self.button_fault_logged = true;
                }
            }
        }
    }

    /// True once per press since the last call.
    pub fn take_manual_request(&mut self) -> bool {
        core::mem::take(&mut self.manual_request)
    }

    pub fn connectivity(&self) -> &'static ConnectivityHandle {
        self.connectivity
    }
}

impl<PIN> HostStatus for BoardHost<PIN>
where
    PIN: InputPin,
{
    fn wifi_connected(&mut self) -> bool {
        self.connectivity.is_online()
    }

    fn button_pressed(&mut self) -> bool {
        self.button.is_pressed()
    }
}
