//! Pull-based queries the controller makes against the host runtime.

/// Board state the controller polls once per tick.
pub trait HostStatus {
    fn wifi_connected(&mut self) -> bool;

    /// Sleep override: while held, the device stays awake.
    fn button_pressed(&mut self) -> bool;
}
