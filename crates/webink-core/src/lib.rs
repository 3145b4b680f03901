#![cfg_attr(not(test), no_std)]

//! Platform-independent update client for WebInk e-ink signage.
//!
//! The controller polls a server for a content hash, downloads raster slices
//! when the hash changes, pushes them to a [`display::Panel`] and hands the
//! device back to the host for deep sleep.

extern crate alloc;

pub mod config;
pub mod controller;
pub mod display;
pub mod host;
pub mod image;
pub mod json;
pub mod net;
pub mod state;
pub mod types;

pub use config::WebInkConfig;
pub use controller::{ControllerEvent, ProgressInfo, TickResult, WebInkController};
pub use state::PersistentState;
pub use types::{ColorMode, ErrorType, UpdateState};
