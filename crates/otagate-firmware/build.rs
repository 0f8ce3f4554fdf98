//! Bakes the device configuration into the firmware.
//!
//! Values come from the environment, with a `.env` file in the crate (or any
//! parent) directory loaded first. The root certificate PEM named by
//! `OTAGATE_ROOT_CA_PATH` is copied to `OUT_DIR` so the firmware can
//! `include_bytes!` it; without one an empty file is embedded and every
//! update attempt fails the certificate check.

use std::{env, fs, path::PathBuf};

/// Variables forwarded to the crate, with their defaults
const SETTINGS: &[(&str, &str)] = &[
    ("SSID", ""),
    ("PASSWORD", ""),
    ("OTAGATE_FIRMWARE_URL", ""),
    ("OTAGATE_TRIGGER_URL", ""),
    ("OTAGATE_POLL_PERIOD_MS", "60000"),
    ("OTAGATE_MAINT_START_HOUR", "2"),
    ("OTAGATE_MAINT_END_HOUR", "5"),
    ("OTAGATE_ALLOW_NO_TIME", "0"),
    ("OTAGATE_BATT_MIN_MV", "3600"),
    ("OTAGATE_BATT_FAKE_MV", "4000"),
    ("OTAGATE_UTC_OFFSET_HOURS", "0"),
];

fn main() {
    // A missing .env is fine, plain environment variables still apply
    if let Ok(path) = dotenvy::dotenv() {
        println!("cargo:rerun-if-changed={}", path.display());
    }

    for (key, default) in SETTINGS {
        println!("cargo:rerun-if-env-changed={key}");
        let value = env::var(key).unwrap_or_else(|_| (*default).to_string());
        println!("cargo:rustc-env={key}={value}");
    }

    println!("cargo:rerun-if-env-changed=OTAGATE_ROOT_CA_PATH");
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let ca = match env::var("OTAGATE_ROOT_CA_PATH") {
        Ok(path) if !path.is_empty() => {
            println!("cargo:rerun-if-changed={path}");
            fs::read(&path).unwrap_or_else(|e| panic!("cannot read root CA {path}: {e}"))
        }
        _ => {
            println!("cargo:warning=OTAGATE_ROOT_CA_PATH not set, OTA updates will be refused");
            Vec::new()
        }
    };
    fs::write(out_dir.join("server_root_cert.pem"), ca).expect("write root CA to OUT_DIR");

    println!("cargo:rerun-if-changed=partitions.csv");
}
