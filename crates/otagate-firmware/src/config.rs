//! Build-time device configuration.
//!
//! Every value is exported by `build.rs` and parsed at compile time, so a
//! malformed or out-of-range number fails the build instead of the boot.

use otagate_core::config::{MAX_BUTTON_GPIO, OtaConfig, parse_hour, parse_i8, parse_u32};
use otagate_core::ota::MaintenanceWindow;

pub const SSID: &str = env!("SSID");
pub const PASSWORD: &str = env!("PASSWORD");

pub const FIRMWARE_URL: &str = env!("OTAGATE_FIRMWARE_URL");
pub const TRIGGER_URL: &str = env!("OTAGATE_TRIGGER_URL");

pub const POLL_PERIOD_MS: u32 = setting_u32(env!("OTAGATE_POLL_PERIOD_MS"));
pub const MAINT_START_HOUR: u8 = setting_hour(env!("OTAGATE_MAINT_START_HOUR"));
pub const MAINT_END_HOUR: u8 = setting_hour(env!("OTAGATE_MAINT_END_HOUR"));
pub const ALLOW_NO_TIME: bool = setting_u32(env!("OTAGATE_ALLOW_NO_TIME")) != 0;
pub const BATT_MIN_MV: u32 = setting_u32(env!("OTAGATE_BATT_MIN_MV"));
/// Reported battery voltage until a fuel gauge is wired up
pub const BATT_FAKE_MV: u32 = setting_u32(env!("OTAGATE_BATT_FAKE_MV"));
pub const UTC_OFFSET_HOURS: i8 = setting_i8(env!("OTAGATE_UTC_OFFSET_HOURS"));

/// The BOOT button, pulled up, low while pressed
pub const BUTTON_GPIO: u8 = 0;

// main wires `peripherals.GPIO0` as the button
const _: () = assert!(BUTTON_GPIO == 0 && BUTTON_GPIO <= MAX_BUTTON_GPIO);

pub static ROOT_CA: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/server_root_cert.pem"));

/// Identity burned by the `program-efuse` feature.
/// A production line would take these from its provisioning system.
#[cfg(feature = "program-efuse")]
pub mod demo_identity {
    pub const SERIAL: &str = "SN-ESP32S3-0001";
    pub const HW_REV: u16 = 0x0001;
    pub const FEATURE_FLAGS: u32 = 0x0000_000F;
}

pub fn ota_config() -> OtaConfig<'static> {
    OtaConfig {
        trigger_url: TRIGGER_URL,
        firmware_url: FIRMWARE_URL,
        poll_period_ms: POLL_PERIOD_MS,
        window: MaintenanceWindow::new(MAINT_START_HOUR, MAINT_END_HOUR),
        min_battery_mv: BATT_MIN_MV,
        allow_without_time: ALLOW_NO_TIME,
        button_gpio: BUTTON_GPIO,
        utc_offset_hours: UTC_OFFSET_HOURS,
        root_ca: ROOT_CA,
    }
}

const fn setting_u32(s: &str) -> u32 {
    match parse_u32(s) {
        Some(v) => v,
        None => panic!("numeric setting must be a decimal u32"),
    }
}

const fn setting_hour(s: &str) -> u8 {
    match parse_hour(s) {
        Some(hour) => hour,
        None => panic!("maintenance window hours must be 0..=23"),
    }
}

const fn setting_i8(s: &str) -> i8 {
    match parse_i8(s) {
        Some(v) => v,
        None => panic!("UTC offset must fit in an i8"),
    }
}
