use embedded_hal::digital::InputPin;

#[derive(Debug, Clone, Copy)]
pub struct ButtonConfig {
    active_low: bool,
    debounce_polls: u8,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            active_low: true,
            debounce_polls: 3,
        }
    }
}

impl ButtonConfig {
    pub const fn with_active_low(mut self, active_low: bool) -> Self {
        self.active_low = active_low;
        self
    }

    pub const fn with_debounce_polls(mut self, debounce_polls: u8) -> Self {
        self.debounce_polls = debounce_polls;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ButtonEvent {
    Press,
    Release,
}

/// Debounced sleep-override button.
///
/// Holding it keeps the device awake; each debounced press is reported once
/// so the board loop can request a manual update.
#[derive(Debug)]
pub struct OverrideButton<PIN> {
    pin: PIN,
    config: ButtonConfig,
    raw: bool,
    stable: bool,
    stable_count: u8,
}

impl<PIN> OverrideButton<PIN>
where
    PIN: InputPin,
{
    /// Samples the pin once so a button held through boot reads as pressed.
    pub fn new(mut pin: PIN, config: ButtonConfig) -> Result<Self, PIN::Error> {
        let pressed = pressed_from_level(pin.is_high()?, config.active_low);
        Ok(Self {
            pin,
            config,
            raw: pressed,
            stable: pressed,
            stable_count: 0,
        })
    }

    pub fn is_pressed(&self) -> bool {
        self.stable
    }

    pub fn poll(&mut self) -> Result<Option<ButtonEvent>, PIN::Error> {
        let pressed = pressed_from_level(self.pin.is_high()?, self.config.active_low);

        if pressed == self.raw {
            self.stable_count = self.stable_count.saturating_add(1);
        } else {
            self.raw = pressed;
            self.stable_count = 0;
        }

        let threshold = self.config.debounce_polls.max(1);
        if self.stable_count >= threshold && self.stable != self.raw {
            self.stable = self.raw;
            return Ok(Some(if self.stable {
                ButtonEvent::Press
            } else {
                ButtonEvent::Release
            }));
        }

        Ok(None)
    }

    pub fn release(self) -> PIN {
        self.pin
    }
}

#[inline]
fn pressed_from_level(high: bool, active_low: bool) -> bool {
    if active_low { !high } else { high }
}
