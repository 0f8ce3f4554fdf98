//! Desktop simulator for otagate.
//!
//! Runs the `otagate-core` provisioning and OTA logic against host
//! collaborators so both flows can be exercised without a board.
//!
//! # Commands
//!
//! | Command     | What it does                                                  |
//! |-------------|---------------------------------------------------------------|
//! | `provision` | Burn an identity into a file-backed virtual eFuse image       |
//! | `status`    | Read the identity back and check its CRC                      |
//! | `ota`       | Run OTA decision cycles with a local firmware file            |
//!
//! Set `RUST_LOG=debug` for the full gate-by-gate log.

mod efuse_file;
mod host;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use embassy_futures::block_on;
use log::{error, info};
use otagate_core::config::{DEFAULT_MIN_BATTERY_MV, DEFAULT_POLL_PERIOD_MS, OtaConfig};
use otagate_core::efuse::{EfuseField, FaultPlan, Provisioner};
use otagate_core::gate::GateTrail;
use otagate_core::ota::{MaintenanceWindow, OtaEngine, PollOutcome};

use host::{FileSink, HostPorts, LocalTransport, NetworkMode, SimClock, StdDelay};

/// Stand-in certificate, long enough to pass the length check
const SIM_ROOT_CA: &[u8] = b"-----BEGIN CERTIFICATE-----\nb3RhZ2F0ZS1zaW11bGF0b3I=\n-----END CERTIFICATE-----\n";

#[derive(Parser, Debug)]
#[command(name = "otagate-simulator", version, about = "Simulate eFuse provisioning and gated OTA on the host")]
struct Cli {
    /// Virtual eFuse image file, created blank on first use
    #[arg(long, global = true, default_value = "efuse.bin")]
    efuse: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Program the identity fields once (idempotent)
    Provision(ProvisionArgs),
    /// Print the stored identity and CRC verdict
    Status,
    /// Run OTA decision cycles
    Ota(OtaArgs),
}

#[derive(Args, Debug)]
struct ProvisionArgs {
    #[arg(long, default_value = "SN-ESP32S3-0001")]
    serial: String,
    #[arg(long, default_value_t = 0x0001, value_parser = parse_number::<u16>)]
    hw_rev: u16,
    #[arg(long, default_value_t = 0x0000_000F, value_parser = parse_number::<u32>)]
    flags: u32,
    /// Fail the next write to this field
    #[arg(long, value_enum)]
    fail_write: Option<FieldArg>,
    /// Fail the batch commit
    #[arg(long)]
    fail_commit: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum FieldArg {
    Serial,
    HwRev,
    Flags,
    Crc,
}

impl From<FieldArg> for EfuseField {
    fn from(arg: FieldArg) -> Self {
        match arg {
            FieldArg::Serial => EfuseField::SerialNumber,
            FieldArg::HwRev => EfuseField::HwRev,
            FieldArg::Flags => EfuseField::FeatureFlags,
            FieldArg::Crc => EfuseField::ProvisioningCrc16,
        }
    }
}

#[derive(Args, Debug)]
struct OtaArgs {
    /// Image served at the firmware URL
    #[arg(long)]
    firmware: PathBuf,
    /// Where an accepted image is written (the "inactive slot")
    #[arg(long, default_value = "slot.bin")]
    slot: PathBuf,
    #[arg(long, default_value = "https://fw.example.com/app.bin")]
    firmware_url: String,
    #[arg(long, default_value = "https://example.com/ota/trigger")]
    trigger_url: String,
    /// Body returned by the trigger URL, a leading '1' requests an update
    #[arg(long, default_value = "0")]
    trigger_body: String,
    /// Hold the update button down
    #[arg(long)]
    button: bool,
    /// Fixed local hour; the host clock is used when omitted
    #[arg(long, conflicts_with = "no_time")]
    hour: Option<u8>,
    /// Behave as if SNTP never synchronised
    #[arg(long)]
    no_time: bool,
    /// Allow updates while the clock is unsynchronised
    #[arg(long)]
    allow_without_time: bool,
    #[arg(long, default_value_t = 0)]
    utc_offset: i8,
    #[arg(long, default_value_t = MaintenanceWindow::DEFAULT.start_hour)]
    window_start: u8,
    #[arg(long, default_value_t = MaintenanceWindow::DEFAULT.end_hour)]
    window_end: u8,
    #[arg(long, default_value_t = 4000)]
    battery_mv: u32,
    #[arg(long, default_value_t = DEFAULT_MIN_BATTERY_MV)]
    min_battery_mv: u32,
    #[arg(long, value_enum, default_value_t = NetworkArg::AssumeOnline)]
    network: NetworkArg,
    /// Number of decision cycles; stops early after a restart
    #[arg(long, default_value_t = 1)]
    polls: u32,
    #[arg(long, default_value_t = DEFAULT_POLL_PERIOD_MS)]
    poll_period_ms: u32,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum NetworkArg {
    Connect,
    AssumeOnline,
    Offline,
}

impl From<NetworkArg> for NetworkMode {
    fn from(arg: NetworkArg) -> Self {
        match arg {
            NetworkArg::Connect => NetworkMode::Connect,
            NetworkArg::AssumeOnline => NetworkMode::AssumeOnline,
            NetworkArg::Offline => NetworkMode::Offline,
        }
    }
}

/// Accept decimal or `0x`-prefixed hex
fn parse_number<T: TryFrom<u64>>(s: &str) -> std::result::Result<T, String> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| e.to_string())?;
    T::try_from(value).map_err(|_| format!("{s} is out of range"))
}

fn log_trail(trail: &GateTrail) {
    for result in trail.evaluated() {
        info!(
            "  gate {:<16} {}",
            result.gate.label(),
            if result.passed { "pass" } else { "BLOCKED" }
        );
    }
}

fn provision(cli: &Cli, args: &ProvisionArgs) -> Result<()> {
    let mut efuse = efuse_file::load(&cli.efuse)?;
    efuse.inject(FaultPlan {
        fail_read: None,
        fail_write: args.fail_write.map(Into::into),
        fail_commit: args.fail_commit,
    });

    let mut provisioner = Provisioner::new(efuse);
    let result = provisioner.program(&args.serial, args.hw_rev, args.flags);
    log_trail(provisioner.last_gates());

    // Nothing was burned on failure, so there is nothing to save
    let outcome = result.with_context(|| format!("provisioning {}", args.serial))?;
    info!("Provisioning: {:?}", outcome);
    provisioner.report().context("reading back the identity")?;
    let efuse = provisioner.into_inner();
    let stats = efuse.stats();
    info!(
        "eFuse activity: {} reads, {} writes, {} commits, {} cancels",
        stats.reads, stats.writes, stats.commits, stats.cancels
    );
    efuse_file::save(&cli.efuse, &efuse)
}

fn status(cli: &Cli) -> Result<()> {
    let efuse = efuse_file::load(&cli.efuse)?;
    let mut provisioner = Provisioner::new(efuse);
    let check = provisioner
        .is_provisioned()
        .with_context(|| format!("checking {}", cli.efuse.display()))?;
    provisioner.report().context("reading back the identity")?;
    info!(
        "Provisioned: {}, CRC valid: {}",
        check.provisioned, check.crc_ok
    );
    Ok(())
}

fn ota(args: &OtaArgs) -> Result<()> {
    let config = OtaConfig {
        trigger_url: &args.trigger_url,
        firmware_url: &args.firmware_url,
        poll_period_ms: args.poll_period_ms,
        window: MaintenanceWindow::new(args.window_start, args.window_end),
        min_battery_mv: args.min_battery_mv,
        allow_without_time: args.allow_without_time,
        button_gpio: 0,
        utc_offset_hours: args.utc_offset,
        root_ca: SIM_ROOT_CA,
    };
    config.validate().context("invalid OTA configuration")?;

    let clock = match (args.no_time, args.hour) {
        (true, _) => SimClock::Unset,
        (false, Some(hour)) => SimClock::Fixed { hour },
        (false, None) => SimClock::Host {
            utc_offset_hours: args.utc_offset,
        },
    };
    let ports = HostPorts {
        button_pressed: args.button,
        clock,
        battery_mv: args.battery_mv,
        network: args.network.into(),
        restart_requested: false,
    };
    let transport = LocalTransport {
        trigger_url: args.trigger_url.clone(),
        trigger_body: args.trigger_body.clone(),
        firmware_url: args.firmware_url.clone(),
        firmware_path: args.firmware.clone(),
    };
    let sink = FileSink::new(&args.slot);

    let mut engine = OtaEngine::new(config, ports, transport, sink, StdDelay);
    for cycle in 1..=args.polls {
        let report = block_on(engine.poll_once());
        info!("Cycle {}: {:?}", cycle, report.outcome);
        log_trail(&report.trail);

        if let PollOutcome::UpdateFailed(e) = report.outcome {
            error!("Update failed ({:?}): {}", e.kind(), e);
        }
        if engine.ports().restart_requested {
            info!("New image written to {}", engine.sink().dest().display());
            break;
        }
        if cycle < args.polls {
            std::thread::sleep(Duration::from_millis(args.poll_period_ms as u64));
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    info!("Starting otagate simulator");

    let result = match &cli.command {
        Command::Provision(args) => provision(&cli, args),
        Command::Status => status(&cli),
        Command::Ota(args) => ota(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otagate_core::config::ConfigError;
    use otagate_core::efuse::{ProvisionError, VirtualEfuseError};

    #[test]
    fn test_parse_number_accepts_hex_and_decimal() {
        assert_eq!(parse_number::<u16>("0x0001"), Ok(1));
        assert_eq!(parse_number::<u32>("15"), Ok(15));
        assert_eq!(parse_number::<u32>("0X0F"), Ok(15));
    }

    #[test]
    fn test_parse_number_range_checked() {
        assert!(parse_number::<u16>("0x10000").is_err());
        assert!(parse_number::<u16>("ten").is_err());
    }

    #[test]
    fn test_cli_parses_ota_flags() {
        let cli = Cli::try_parse_from([
            "otagate-simulator",
            "ota",
            "--firmware",
            "app.bin",
            "--button",
            "--hour",
            "3",
            "--network",
            "offline",
        ])
        .unwrap();
        let Command::Ota(args) = cli.command else {
            panic!("expected ota command");
        };
        assert!(args.button);
        assert_eq!(args.hour, Some(3));
        assert!(matches!(args.network, NetworkArg::Offline));
        assert_eq!(cli.efuse, PathBuf::from("efuse.bin"));
    }

    #[test]
    fn test_hour_conflicts_with_no_time() {
        let result = Cli::try_parse_from([
            "otagate-simulator",
            "ota",
            "--firmware",
            "app.bin",
            "--hour",
            "3",
            "--no-time",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_provision_then_status_on_file_image() {
        let path =
            std::env::temp_dir().join(format!("otagate-sim-main-{}.bin", std::process::id()));
        let cli = Cli::try_parse_from([
            "otagate-simulator",
            "--efuse",
            path.to_str().unwrap(),
            "provision",
        ])
        .unwrap();
        let Command::Provision(args) = &cli.command else {
            panic!("expected provision command");
        };

        provision(&cli, args).unwrap();
        let burned = efuse_file::load(&path).unwrap();
        assert_eq!(burned.burned().stored_crc(), 0x3305);

        // Second run is a no-op on the same image
        provision(&cli, args).unwrap();
        assert_eq!(efuse_file::load(&path).unwrap().burned(), burned.burned());

        status(&cli).unwrap();
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_failed_commit_keeps_core_error() {
        let path =
            std::env::temp_dir().join(format!("otagate-sim-commit-{}.bin", std::process::id()));
        let cli = Cli::try_parse_from([
            "otagate-simulator",
            "--efuse",
            path.to_str().unwrap(),
            "provision",
            "--fail-commit",
        ])
        .unwrap();
        let Command::Provision(args) = &cli.command else {
            panic!("expected provision command");
        };

        let err = provision(&cli, args).unwrap_err();

        assert_eq!(err.to_string(), "provisioning SN-ESP32S3-0001");
        assert!(matches!(
            err.downcast_ref::<ProvisionError<VirtualEfuseError>>(),
            Some(ProvisionError::Batch { step: "commit", .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_invalid_window_rejected_before_any_cycle() {
        let cli = Cli::try_parse_from([
            "otagate-simulator",
            "ota",
            "--firmware",
            "missing.bin",
            "--window-start",
            "24",
        ])
        .unwrap();
        let Command::Ota(args) = &cli.command else {
            panic!("expected ota command");
        };

        let err = ota(args).unwrap_err();

        assert_eq!(err.to_string(), "invalid OTA configuration");
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }
}
