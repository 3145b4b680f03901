#![no_std]

//! ESP32-S3 board adapters for the WebInk update client.

extern crate alloc;

pub mod host;
pub mod input;
pub mod network;
pub mod platform;
pub mod storage;
