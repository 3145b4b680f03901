use alloc::string::String;

use heapless::Deque;

use crate::types::{ErrorType, UpdateState};

pub const EVENT_CAPACITY: usize = 32;

/// Something the host may want to show or log. Drained with
/// [`super::WebInkController::next_event`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ControllerEvent {
    StateChanged { from: UpdateState, to: UpdateState },
    Progress { percent: u8, status: &'static str },
    Error { kind: ErrorType, detail: String },
    Log(&'static str),
}

/// Bounded FIFO that overwrites its oldest entry when full.
#[derive(Debug, Default)]
pub(super) struct EventQueue {
    events: Deque<ControllerEvent, EVENT_CAPACITY>,
    dropped: u32,
}

impl EventQueue {
    pub(super) fn push(&mut self, event: ControllerEvent) {
        if self.events.is_full() {
            self.events.pop_front();
            self.dropped = self.dropped.saturating_add(1);
        }
        let _ = self.events.push_back(event);
    }

    pub(super) fn pop(&mut self) -> Option<ControllerEvent> {
        self.events.pop_front()
    }

    pub(super) fn dropped(&self) -> u32 {
        self.dropped
    }
}
