use esp_hal::efuse::{Efuse, SECURE_BOOT_EN};
use log::info;

fn yes_no(enabled: bool) -> &'static str {
    if enabled { "YES" } else { "NO" }
}

/// Log whether Secure Boot and Flash Encryption are enabled.
pub fn log_security_state() {
    info!(
        "Secure Boot enabled: {}",
        yes_no(Efuse::read_bit(SECURE_BOOT_EN))
    );
    info!(
        "Flash Encryption enabled: {}",
        yes_no(Efuse::flash_encryption())
    );
}
