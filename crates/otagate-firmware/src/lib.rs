//! ESP32-S3 glue for otagate
//!
//! Implements the `otagate-core` seams on real hardware: the flash-backed
//! virtual eFuse store, the HTTPS transport, the OTA slot writer and the
//! gate inputs, plus the Wi-Fi and SNTP tasks.

#![no_std]

extern crate alloc;

pub mod config;
pub mod flash_efuse;
pub mod https;
pub mod network;
pub mod ota_slot;
pub mod ports;
pub mod security;
pub mod time_sync;

// RNG hook esp-mbedtls links against
#[unsafe(no_mangle)]
extern "C" fn random() -> core::ffi::c_ulong {
    use esp_hal::rng::Rng;

    Rng::new().random() as core::ffi::c_ulong
}
