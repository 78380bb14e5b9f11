//! Hardware-independent core library for hygro-rs
//!
//! This crate contains the complete DHT22 single-wire protocol engine: pulse
//! classification, frame assembly, checksum validation, value decoding, and
//! the two interchangeable read strategies (a busy-wait reader and an
//! interrupt-driven state machine). Everything that touches a register lives
//! behind the traits in [`hal`].
//!
//! It is `#![no_std]` so it compiles on both embedded targets (ESP32-S3) and
//! desktop hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

pub mod blocking;
pub mod config;
pub mod error;
pub mod frame;
pub mod hal;
pub mod machine;
pub mod reading;
pub mod report;
pub mod shared;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod timing;

pub use blocking::BlockingSensor;
pub use error::ErrorKind;
pub use frame::RawFrame;
pub use machine::{InterruptSensor, ProtocolState, Status};
pub use reading::SensorReading;
pub use shared::SharedSensor;
