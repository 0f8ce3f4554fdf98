//! Host implementations of the OTA seams.
//!
//! The network gate talks to the real resolver and opens a real TCP
//! connection, while HTTPS is replaced by local files: the trigger body is a
//! string and the firmware body is read from disk. The downloaded image is
//! written next to its destination and renamed into place on finalize.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use embedded_hal_async::delay::DelayNs;
use log::{debug, info, warn};
use otagate_core::ota::{HttpsRequest, HttpsTransport, ImageSink, LocalTime, OtaError, OtaPorts};

const CHUNK_LEN: usize = 1024;

/// Where the simulated clock comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimClock {
    /// The host's wall clock shifted by a UTC offset
    Host { utc_offset_hours: i8 },
    /// A fixed local hour in a year that counts as synchronised
    Fixed { hour: u8 },
    /// Never synchronised
    Unset,
}

/// Sentinel year for a fixed clock, any value past the validity cutoff works
const FIXED_CLOCK_YEAR: i16 = 2025;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// Resolve and connect for real
    Connect,
    /// Report the host reachable without touching the network
    AssumeOnline,
    Offline,
}

pub struct HostPorts {
    pub button_pressed: bool,
    pub clock: SimClock,
    pub battery_mv: u32,
    pub network: NetworkMode,
    pub restart_requested: bool,
}

impl OtaPorts for HostPorts {
    fn button_is_low(&mut self) -> bool {
        self.button_pressed
    }

    fn local_time(&mut self) -> LocalTime {
        match self.clock {
            SimClock::Host { utc_offset_hours } => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .ok()
                .and_then(|d| LocalTime::from_unix_micros(d.as_micros() as i64, utc_offset_hours))
                .unwrap_or(LocalTime::EPOCH),
            SimClock::Fixed { hour } => LocalTime::new(FIXED_CLOCK_YEAR, hour),
            SimClock::Unset => LocalTime::EPOCH,
        }
    }

    async fn battery_millivolts(&mut self) -> u32 {
        self.battery_mv
    }

    async fn resolve(&mut self, host: &str) -> Result<IpAddr, OtaError> {
        match self.network {
            NetworkMode::Offline => Err(OtaError::Dns),
            NetworkMode::AssumeOnline => Ok(IpAddr::from([127, 0, 0, 1])),
            NetworkMode::Connect => {
                let mut addrs = (host, 0).to_socket_addrs().map_err(|e| {
                    debug!("Resolving {host}: {e}");
                    OtaError::Dns
                })?;
                addrs
                    .find(|a| a.is_ipv4())
                    .map(|a| a.ip())
                    .ok_or(OtaError::Dns)
            }
        }
    }

    async fn connect(&mut self, addr: SocketAddr, timeout_ms: u32) -> Result<(), OtaError> {
        match self.network {
            NetworkMode::Offline => Err(OtaError::Connect),
            NetworkMode::AssumeOnline => Ok(()),
            NetworkMode::Connect => {
                let timeout = Duration::from_millis(timeout_ms as u64);
                match TcpStream::connect_timeout(&addr, timeout) {
                    Ok(_stream) => Ok(()),
                    Err(e) if e.kind() == ErrorKind::TimedOut => Err(OtaError::Timeout),
                    Err(e) => {
                        debug!("Connecting to {addr}: {e}");
                        Err(OtaError::Connect)
                    }
                }
            }
        }
    }

    fn restart(&mut self) {
        info!("Restart requested, the next boot would run the new image");
        self.restart_requested = true;
    }
}

/// Serves the trigger URL from a string and the firmware URL from a file.
pub struct LocalTransport {
    pub trigger_url: String,
    pub trigger_body: String,
    pub firmware_url: String,
    pub firmware_path: PathBuf,
}

impl LocalTransport {
    fn stream<R, F>(mut body: R, mut on_chunk: F) -> Result<u32, OtaError>
    where
        R: Read,
        F: FnMut(&[u8]) -> Result<ControlFlow<()>, OtaError>,
    {
        let mut buf = [0u8; CHUNK_LEN];
        let mut total = 0u32;
        loop {
            let n = body.read(&mut buf).map_err(|_| OtaError::Stream)?;
            if n == 0 {
                break;
            }
            total += n as u32;
            if on_chunk(&buf[..n])?.is_break() {
                break;
            }
        }
        Ok(total)
    }
}

impl HttpsTransport for LocalTransport {
    async fn get<F>(&mut self, request: &HttpsRequest<'_>, on_chunk: F) -> Result<u32, OtaError>
    where
        F: FnMut(&[u8]) -> Result<ControlFlow<()>, OtaError>,
    {
        debug!("GET {} (timeout {} ms)", request.url, request.timeout_ms);
        if request.url == self.trigger_url {
            Self::stream(self.trigger_body.as_bytes(), on_chunk)
        } else if request.url == self.firmware_url {
            let file = File::open(&self.firmware_path).map_err(|e| {
                warn!("Firmware file {}: {e}", self.firmware_path.display());
                OtaError::HttpStatus(404)
            })?;
            Self::stream(file, on_chunk)
        } else {
            Err(OtaError::HttpStatus(404))
        }
    }
}

/// Writes the image to `<dest>.part` and renames it over `dest` on finalize.
pub struct FileSink {
    dest: PathBuf,
    part: Option<File>,
}

impl FileSink {
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self {
            dest: dest.into(),
            part: None,
        }
    }

    fn part_path(&self) -> PathBuf {
        let mut name = self.dest.clone().into_os_string();
        name.push(".part");
        PathBuf::from(name)
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }
}

impl ImageSink for FileSink {
    fn begin(&mut self) -> Result<(), OtaError> {
        let file = File::create(self.part_path()).map_err(|_| OtaError::ImageWrite { offset: 0 })?;
        self.part = Some(file);
        Ok(())
    }

    fn write(&mut self, offset: u32, chunk: &[u8]) -> Result<(), OtaError> {
        let file = self.part.as_mut().ok_or(OtaError::ImageWrite { offset })?;
        file.seek(SeekFrom::Start(offset as u64))
            .and_then(|_| file.write_all(chunk))
            .map_err(|_| OtaError::ImageWrite { offset })
    }

    fn finalize(&mut self, len: u32) -> Result<(), OtaError> {
        let file = self.part.take().ok_or(OtaError::Activate)?;
        file.sync_all().map_err(|_| OtaError::Activate)?;
        drop(file);
        fs::rename(self.part_path(), &self.dest).map_err(|_| OtaError::Activate)?;
        info!("Activated {} byte image at {}", len, self.dest.display());
        Ok(())
    }

    fn abort(&mut self) {
        self.part = None;
        if let Err(e) = fs::remove_file(self.part_path()) {
            debug!("Removing partial image: {e}");
        }
    }
}

/// Sleeps the host thread. The core only awaits one delay at a time.
pub struct StdDelay;

impl DelayNs for StdDelay {
    async fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(ns as u64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use otagate_core::ota::HttpsRequest;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("otagate-host-{}-{}", std::process::id(), name))
    }

    fn request(url: &str) -> HttpsRequest<'_> {
        HttpsRequest {
            url,
            root_ca: &[],
            timeout_ms: 1000,
            keep_alive: false,
        }
    }

    fn transport(firmware_path: PathBuf) -> LocalTransport {
        LocalTransport {
            trigger_url: "https://example.com/trigger".into(),
            trigger_body: "1\n".into(),
            firmware_url: "https://example.com/fw.bin".into(),
            firmware_path,
        }
    }

    #[test]
    fn test_trigger_body_is_served() {
        let mut t = transport(scratch("unused.bin"));
        let mut seen = Vec::new();
        let n = block_on(t.get(&request("https://example.com/trigger"), |c| {
            seen.extend_from_slice(c);
            Ok(ControlFlow::Continue(()))
        }))
        .unwrap();
        assert_eq!(n, 2);
        assert_eq!(seen, b"1\n");
    }

    #[test]
    fn test_missing_firmware_is_not_found() {
        let mut t = transport(scratch("missing.bin"));
        let err = block_on(t.get(&request("https://example.com/fw.bin"), |_| {
            Ok(ControlFlow::Continue(()))
        }))
        .unwrap_err();
        assert_eq!(err, OtaError::HttpStatus(404));
    }

    #[test]
    fn test_unknown_url_is_not_found() {
        let mut t = transport(scratch("unused.bin"));
        let err = block_on(t.get(&request("https://other.example/"), |_| {
            Ok(ControlFlow::Continue(()))
        }))
        .unwrap_err();
        assert_eq!(err, OtaError::HttpStatus(404));
    }

    #[test]
    fn test_sink_renames_on_finalize() {
        let dest = scratch("slot.bin");
        let mut sink = FileSink::new(&dest);
        sink.begin().unwrap();
        sink.write(0, &[0xE9, 1, 2]).unwrap();
        sink.write(3, &[3, 4]).unwrap();
        sink.finalize(5).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), [0xE9, 1, 2, 3, 4]);
        assert!(!sink.part_path().exists());
        fs::remove_file(&dest).unwrap();
    }

    #[test]
    fn test_sink_abort_leaves_destination_alone() {
        let dest = scratch("untouched.bin");
        let mut sink = FileSink::new(&dest);
        sink.begin().unwrap();
        sink.write(0, &[0xE9]).unwrap();
        sink.abort();

        assert!(!dest.exists());
        assert!(!sink.part_path().exists());
    }

    #[test]
    fn test_fixed_clock_counts_as_synchronised() {
        let mut ports = HostPorts {
            button_pressed: false,
            clock: SimClock::Fixed { hour: 3 },
            battery_mv: 4000,
            network: NetworkMode::Offline,
            restart_requested: false,
        };
        let now = ports.local_time();
        assert!(now.is_valid());
        assert_eq!(now.hour, 3);

        ports.clock = SimClock::Unset;
        assert!(!ports.local_time().is_valid());
    }
}
