//! ESP32-S3 firmware-specific modules for hygro-rs
//!
//! Hardware glue that cannot compile on desktop targets: the register-level
//! DHT22 data line, the esp-hal timer and edge interrupt adapters, and the
//! sampling loops that print status lines on the RTT console.

#![no_std]

pub mod dual_mode_pin;
pub mod hw;
pub mod sampler;
