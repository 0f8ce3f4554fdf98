//! The OTA decision loop.
//!
//! Each cycle walks the gates in a fixed order and stops at the first one
//! that is closed:
//!
//! 1. update requested (button, else cloud trigger)
//! 2. inside the maintenance window (or the no-time fallback)
//! 3. battery at or above the minimum
//! 4. firmware host resolvable and reachable
//!
//! Only when all four pass is the firmware downloaded. A successful update
//! ends in a restart, any failure just waits for the next cycle.

use core::net::SocketAddr;
use core::ops::ControlFlow;

use embedded_hal_async::delay::DelayNs;
use log::{debug, error, info, warn};

use super::error::OtaError;
use super::ports::{HttpsRequest, HttpsTransport, ImageSink, OtaPorts};
use super::update::UpdateAttempt;
use super::url::parse_https_host;
use crate::config::OtaConfig;
use crate::gate::{GateId, GateTrail};

/// Settle time between the two button samples
pub const DEBOUNCE_MS: u32 = 30;

pub const TRIGGER_TIMEOUT_MS: u32 = 5_000;

/// Bytes of the trigger response looked at
pub const TRIGGER_READ_LEN: usize = 7;

/// Pause between activating the new image and rebooting into it
pub const RESTART_GRACE_MS: u32 = 500;

pub const NETWORK_CHECK_TIMEOUT_MS: u32 = 5_000;

/// Which input asked for the update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Button,
    Cloud,
}

/// How a decision cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    NotRequested,
    OutsideWindow,
    BatteryLow { millivolts: u32 },
    NetworkUnavailable,
    UpdateFailed(OtaError),
    /// New image activated, restart requested
    Restarting { image_len: u32 },
}

/// Result of one [`OtaEngine::poll_once`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub trail: GateTrail,
    pub source: Option<UpdateSource>,
    pub outcome: PollOutcome,
}

pub struct OtaEngine<'a, P, T, S, D> {
    config: OtaConfig<'a>,
    ports: P,
    transport: T,
    sink: S,
    delay: D,
}

impl<'a, P, T, S, D> OtaEngine<'a, P, T, S, D>
where
    P: OtaPorts,
    T: HttpsTransport,
    S: ImageSink,
    D: DelayNs,
{
    pub fn new(config: OtaConfig<'a>, ports: P, transport: T, sink: S, delay: D) -> Self {
        Self {
            config,
            ports,
            transport,
            sink,
            delay,
        }
    }

    pub fn config(&self) -> &OtaConfig<'a> {
        &self.config
    }

    pub fn ports(&self) -> &P {
        &self.ports
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn delay(&self) -> &D {
        &self.delay
    }

    /// Two low samples 30 ms apart.
    pub async fn button_pressed(&mut self) -> bool {
        let first = self.ports.button_is_low();
        self.delay.delay_ms(DEBOUNCE_MS).await;
        let second = self.ports.button_is_low();
        first && second
    }

    /// Ask the trigger endpoint whether an update is wanted.
    ///
    /// `false` when no endpoint is configured or the request fails; only a
    /// body starting with `'1'` counts as a request.
    pub async fn cloud_trigger_requested(&mut self) -> bool {
        let url = self.config.trigger_url;
        if url.is_empty() {
            return false;
        }

        let request = HttpsRequest {
            url,
            root_ca: self.config.root_ca,
            timeout_ms: TRIGGER_TIMEOUT_MS,
            keep_alive: false,
        };

        let mut buf = [0u8; TRIGGER_READ_LEN];
        let mut len = 0;
        let result = self
            .transport
            .get(&request, |chunk| {
                let take = chunk.len().min(buf.len() - len);
                buf[len..len + take].copy_from_slice(&chunk[..take]);
                len += take;
                Ok(if len == buf.len() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                })
            })
            .await;

        match result {
            Ok(_) => len > 0 && buf[0] == b'1',
            Err(e) => {
                warn!("Cloud trigger check failed: {e}");
                false
            }
        }
    }

    /// Button first; the cloud is only asked when the button is not pressed.
    pub async fn update_requested(&mut self) -> Option<UpdateSource> {
        if self.button_pressed().await {
            return Some(UpdateSource::Button);
        }
        if self.cloud_trigger_requested().await {
            return Some(UpdateSource::Cloud);
        }
        None
    }

    pub fn in_maintenance_window(&mut self) -> bool {
        let now = self.ports.local_time();
        if !now.is_valid() {
            debug!(
                "Clock not set (year {}), no-time policy allows update: {}",
                now.year, self.config.allow_without_time
            );
        }
        self.config
            .window
            .admits(now, self.config.allow_without_time)
    }

    /// Resolve the firmware host and open (then close) a TCP connection.
    pub async fn network_ready(&mut self) -> bool {
        let target = match parse_https_host(self.config.firmware_url) {
            Ok(target) => target,
            Err(e) => {
                warn!("Firmware URL unusable: {e}");
                return false;
            }
        };

        let ip = match self.ports.resolve(target.host).await {
            Ok(ip) => ip,
            Err(e) => {
                warn!("Resolving {} failed: {e}", target.host);
                return false;
            }
        };

        let addr = SocketAddr::new(ip, target.port);
        match self.ports.connect(addr, NETWORK_CHECK_TIMEOUT_MS).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Connecting to {addr} failed: {e}");
                false
            }
        }
    }

    async fn run_update(&mut self) -> Result<u32, OtaError> {
        let attempt = UpdateAttempt::new(self.config.firmware_url, self.config.root_ca)?;
        attempt.run(&mut self.transport, &mut self.sink).await
    }

    /// Run one decision cycle without the trailing poll delay.
    pub async fn poll_once(&mut self) -> PollReport {
        let mut trail = GateTrail::new();

        let source = self.update_requested().await;
        if !trail.record(GateId::UpdateRequested, source.is_some()) {
            return PollReport {
                trail,
                source,
                outcome: PollOutcome::NotRequested,
            };
        }
        if let Some(source) = source {
            info!("Update requested by {:?}", source);
        }

        if !trail.record(GateId::MaintenanceWindow, self.in_maintenance_window()) {
            info!("Outside maintenance window, update postponed");
            return PollReport {
                trail,
                source,
                outcome: PollOutcome::OutsideWindow,
            };
        }

        let millivolts = self.ports.battery_millivolts().await;
        if !trail.record(GateId::Battery, millivolts >= self.config.min_battery_mv) {
            warn!(
                "Battery too low for update: {} mV < {} mV",
                millivolts, self.config.min_battery_mv
            );
            return PollReport {
                trail,
                source,
                outcome: PollOutcome::BatteryLow { millivolts },
            };
        }

        if !trail.record(GateId::Network, self.network_ready().await) {
            return PollReport {
                trail,
                source,
                outcome: PollOutcome::NetworkUnavailable,
            };
        }

        let outcome = match self.run_update().await {
            Ok(image_len) => {
                info!("Update complete, restarting in {RESTART_GRACE_MS} ms");
                self.delay.delay_ms(RESTART_GRACE_MS).await;
                self.ports.restart();
                PollOutcome::Restarting { image_len }
            }
            Err(e) => {
                error!("Update failed ({:?}): {e}", e.kind());
                PollOutcome::UpdateFailed(e)
            }
        };

        PollReport {
            trail,
            source,
            outcome,
        }
    }

    /// Poll forever, `poll_period_ms` apart.
    pub async fn run(&mut self) -> ! {
        info!(
            "OTA decision loop started (window {:02}:00-{:02}:00, min battery {} mV, every {} ms, button GPIO{})",
            self.config.window.start_hour,
            self.config.window.end_hour,
            self.config.min_battery_mv,
            self.config.poll_period_ms,
            self.config.button_gpio
        );
        loop {
            self.cycle().await;
        }
    }

    /// One decision cycle followed by the poll-period wait.
    ///
    /// Returns after the wait whatever the outcome, so a failed update goes
    /// back to waiting like an idle cycle does.
    pub async fn cycle(&mut self) -> PollReport {
        let report = self.poll_once().await;
        debug!("OTA cycle: {:?}", report.outcome);
        self.delay.delay_ms(self.config.poll_period_ms).await;
        report
    }
}
