//! Counting test doubles for the OTA seams.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::net::{IpAddr, Ipv4Addr, SocketAddr};
use core::ops::ControlFlow;

use embedded_hal_async::delay::DelayNs;

use super::clock::LocalTime;
use super::error::OtaError;
use super::ports::{HttpsRequest, HttpsTransport, ImageSink, OtaPorts};
use super::update::IMAGE_MAGIC;

pub const CA: &[u8] = b"-----BEGIN CERTIFICATE-----\nMIIBtestroot\n-----END CERTIFICATE-----\n";
pub const TRIGGER_URL: &str = "https://example.com/ota/trigger";
pub const FIRMWARE_URL: &str = "https://fw.example.com/app.bin";

const CHUNK: usize = 8;

/// A plausible image of `len` bytes
pub fn image(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| if i == 0 { IMAGE_MAGIC } else { i as u8 })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: String,
    pub root_ca: Vec<u8>,
    pub timeout_ms: u32,
    pub keep_alive: bool,
}

pub struct MockTransport {
    pub trigger: Result<Vec<u8>, OtaError>,
    pub firmware: Result<Vec<u8>, OtaError>,
    /// Deliver this many chunks, then fail with `Stream`
    pub fail_after_chunks: Option<usize>,
    pub requests: Vec<RecordedRequest>,
}

impl MockTransport {
    pub fn serving(firmware: &[u8]) -> Self {
        Self {
            trigger: Ok(b"0".to_vec()),
            firmware: Ok(firmware.to_vec()),
            fail_after_chunks: None,
            requests: Vec::new(),
        }
    }

    pub fn failing(error: OtaError) -> Self {
        Self {
            firmware: Err(error),
            ..Self::serving(&[])
        }
    }

    pub fn requests_to(&self, url: &str) -> usize {
        self.requests.iter().filter(|r| r.url == url).count()
    }
}

impl HttpsTransport for MockTransport {
    async fn get<F>(&mut self, request: &HttpsRequest<'_>, mut on_chunk: F) -> Result<u32, OtaError>
    where
        F: FnMut(&[u8]) -> Result<ControlFlow<()>, OtaError>,
    {
        self.requests.push(RecordedRequest {
            url: request.url.to_string(),
            root_ca: request.root_ca.to_vec(),
            timeout_ms: request.timeout_ms,
            keep_alive: request.keep_alive,
        });

        let body = if request.url == TRIGGER_URL {
            &self.trigger
        } else {
            &self.firmware
        };
        let body = body.as_ref().map_err(|e| *e)?;

        let mut delivered = 0u32;
        for (i, chunk) in body.chunks(CHUNK).enumerate() {
            if self.fail_after_chunks == Some(i) {
                return Err(OtaError::Stream);
            }
            delivered += chunk.len() as u32;
            if on_chunk(chunk)?.is_break() {
                break;
            }
        }
        Ok(delivered)
    }
}

#[derive(Debug, Default)]
pub struct MockSink {
    pub began: u32,
    pub data: Vec<u8>,
    pub finalized: Option<u32>,
    pub aborts: u32,
    pub fail_write_at: Option<u32>,
}

impl ImageSink for MockSink {
    fn begin(&mut self) -> Result<(), OtaError> {
        self.began += 1;
        self.data.clear();
        Ok(())
    }

    fn write(&mut self, offset: u32, chunk: &[u8]) -> Result<(), OtaError> {
        if self.fail_write_at == Some(offset) {
            return Err(OtaError::ImageWrite { offset });
        }
        assert_eq!(offset as usize, self.data.len(), "non-sequential write");
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    fn finalize(&mut self, len: u32) -> Result<(), OtaError> {
        self.finalized = Some(len);
        Ok(())
    }

    fn abort(&mut self) {
        self.aborts += 1;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PortCalls {
    pub button_reads: u32,
    pub time_reads: u32,
    pub battery_reads: u32,
    pub resolves: u32,
    pub connects: u32,
    pub restarts: u32,
}

pub struct MockPorts {
    pub button_low: bool,
    /// Levels returned by the next reads before falling back to `button_low`
    pub button_script: Vec<bool>,
    pub time: LocalTime,
    pub battery_mv: u32,
    pub dns: Result<IpAddr, OtaError>,
    pub connect: Result<(), OtaError>,
    pub last_connect: Option<SocketAddr>,
    pub calls: PortCalls,
}

impl Default for MockPorts {
    fn default() -> Self {
        Self {
            button_low: false,
            button_script: Vec::new(),
            time: LocalTime::new(2025, 3),
            battery_mv: 4000,
            dns: Ok(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10))),
            connect: Ok(()),
            last_connect: None,
            calls: PortCalls::default(),
        }
    }
}

impl OtaPorts for MockPorts {
    fn button_is_low(&mut self) -> bool {
        self.calls.button_reads += 1;
        if self.button_script.is_empty() {
            self.button_low
        } else {
            self.button_script.remove(0)
        }
    }

    fn local_time(&mut self) -> LocalTime {
        self.calls.time_reads += 1;
        self.time
    }

    async fn battery_millivolts(&mut self) -> u32 {
        self.calls.battery_reads += 1;
        self.battery_mv
    }

    async fn resolve(&mut self, _host: &str) -> Result<IpAddr, OtaError> {
        self.calls.resolves += 1;
        self.dns
    }

    async fn connect(&mut self, addr: SocketAddr, _timeout_ms: u32) -> Result<(), OtaError> {
        self.calls.connects += 1;
        self.last_connect = Some(addr);
        self.connect
    }

    fn restart(&mut self) {
        self.calls.restarts += 1;
    }
}

/// Records requested delays instead of sleeping
#[derive(Debug, Default)]
pub struct MockDelay {
    pub delays_ms: Vec<u32>,
}

impl DelayNs for MockDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.delays_ms.push(ns / 1_000_000);
    }

    async fn delay_us(&mut self, us: u32) {
        self.delays_ms.push(us / 1_000);
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.delays_ms.push(ms);
    }
}
