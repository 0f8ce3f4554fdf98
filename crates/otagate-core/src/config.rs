//! Runtime configuration of the OTA decision loop.

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::ota::{MaintenanceWindow, OtaError, parse_https_host};

/// Default time between two decision cycles
pub const DEFAULT_POLL_PERIOD_MS: u32 = 60_000;

/// Default minimum battery voltage for an update
pub const DEFAULT_MIN_BATTERY_MV: u32 = 3600;

/// Highest GPIO number on the ESP32-S3
pub const MAX_BUTTON_GPIO: u8 = 48;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be an hour between 0 and 23, got {hour}")]
    HourOutOfRange { field: &'static str, hour: u8 },
    #[error("poll period must be non-zero")]
    ZeroPollPeriod,
    #[error("UTC offset {0} is outside -25..=25 hours")]
    UtcOffset(i8),
    #[error("button GPIO {0} does not exist")]
    ButtonGpio(u8),
    #[error("invalid {field}: {cause}")]
    Url {
        field: &'static str,
        cause: OtaError,
    },
}

/// Everything the decision loop needs, borrowed from wherever the values
/// live (build-time constants on the device, argv in the simulator).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct OtaConfig<'a> {
    /// Optional HTTPS endpoint answering `1` to request an update; empty disables it
    pub trigger_url: &'a str,
    pub firmware_url: &'a str,
    pub poll_period_ms: u32,
    pub window: MaintenanceWindow,
    pub min_battery_mv: u32,
    /// Maintenance-window verdict while the clock is not synchronised
    pub allow_without_time: bool,
    /// Update button pin, pulled up and active low
    pub button_gpio: u8,
    pub utc_offset_hours: i8,
    /// PEM root certificate for both the trigger and the firmware server
    pub root_ca: &'a [u8],
}

impl Default for OtaConfig<'_> {
    fn default() -> Self {
        Self {
            trigger_url: "",
            firmware_url: "",
            poll_period_ms: DEFAULT_POLL_PERIOD_MS,
            window: MaintenanceWindow::DEFAULT,
            min_battery_mv: DEFAULT_MIN_BATTERY_MV,
            allow_without_time: false,
            button_gpio: 0,
            utc_offset_hours: 0,
            root_ca: &[],
        }
    }
}

impl OtaConfig<'_> {
    /// Reject values the decision loop cannot work with.
    ///
    /// The root certificate is not checked here; a short certificate fails
    /// the update attempt instead.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, hour) in [
            ("window start", self.window.start_hour),
            ("window end", self.window.end_hour),
        ] {
            if hour >= 24 {
                return Err(ConfigError::HourOutOfRange { field, hour });
            }
        }
        if self.poll_period_ms == 0 {
            return Err(ConfigError::ZeroPollPeriod);
        }
        if self.button_gpio > MAX_BUTTON_GPIO {
            return Err(ConfigError::ButtonGpio(self.button_gpio));
        }
        if !(-25..=25).contains(&self.utc_offset_hours) {
            return Err(ConfigError::UtcOffset(self.utc_offset_hours));
        }
        parse_https_host(self.firmware_url).map_err(|cause| ConfigError::Url {
            field: "firmware URL",
            cause,
        })?;
        if !self.trigger_url.is_empty() {
            parse_https_host(self.trigger_url).map_err(|cause| ConfigError::Url {
                field: "trigger URL",
                cause,
            })?;
        }
        Ok(())
    }
}

/// Parse a decimal setting at compile time.
///
/// `None` for an empty string, a non-digit or a value above `u32::MAX`.
pub const fn parse_u32(s: &str) -> Option<u32> {
    parse_digits(s.as_bytes())
}

const fn parse_digits(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() {
        return None;
    }
    let mut value: u32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            return None;
        }
        value = match value.checked_mul(10) {
            Some(v) => match v.checked_add((bytes[i] - b'0') as u32) {
                Some(v) => v,
                None => return None,
            },
            None => return None,
        };
        i += 1;
    }
    Some(value)
}

/// Parse an hour of day (0..=23).
pub const fn parse_hour(s: &str) -> Option<u8> {
    match parse_u32(s) {
        Some(hour) if hour < 24 => Some(hour as u8),
        _ => None,
    }
}

/// Parse a signed setting with an optional leading `-`, range-checked to `i8`.
pub const fn parse_i8(s: &str) -> Option<i8> {
    let (negative, digits) = match s.as_bytes() {
        [b'-', rest @ ..] => (true, rest),
        digits => (false, digits),
    };
    match parse_digits(digits) {
        Some(v) if negative && v <= 128 => Some((-(v as i32)) as i8),
        Some(v) if !negative && v <= 127 => Some(v as i8),
        _ => None,
    }
}
