//! Hardware-independent core library for otagate
//!
//! This crate contains all platform-agnostic logic of the device: the
//! one-time-programmable identity store (delta staging, conflict detection,
//! CRC validation), the gated OTA decision engine, the update attempt that
//! streams an image into a flash slot, and the Wi-Fi link supervisor.
//!
//! Every hardware seam is a trait, so it is `#![no_std]` with
//! `extern crate alloc` and compiles on both embedded targets (ESP32-S3) and
//! desktop hosts (for the simulator and tests). The `std` feature adds
//! `std::error::Error` impls to the error types for host callers.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod config;
pub mod connectivity;
pub mod crc;
pub mod efuse;
pub mod gate;
pub mod ota;
