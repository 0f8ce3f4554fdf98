//! Hardware and network seams of the OTA engine.
//!
//! The engine never touches a peripheral directly. Firmware implements these
//! traits on top of esp-hal/embassy-net, the simulator on top of std, and
//! the unit tests with counting mocks.

use core::future::Future;
use core::net::{IpAddr, SocketAddr};
use core::ops::ControlFlow;

use super::clock::LocalTime;
use super::error::OtaError;

/// One HTTPS GET
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpsRequest<'a> {
    pub url: &'a str,
    /// PEM root certificate the server chain must lead to
    pub root_ca: &'a [u8],
    pub timeout_ms: u32,
    pub keep_alive: bool,
}

/// HTTPS client able to stream a response body.
pub trait HttpsTransport {
    /// Perform `request` and feed the body to `on_chunk` as it arrives.
    ///
    /// `on_chunk` returns `Break` to stop reading early; an `Err` from it
    /// aborts the transfer and is returned unchanged. Non-2xx statuses are
    /// reported as [`OtaError::HttpStatus`] before any chunk is delivered.
    /// Resolves to the number of body bytes handed to `on_chunk`.
    fn get<F>(
        &mut self,
        request: &HttpsRequest<'_>,
        on_chunk: F,
    ) -> impl Future<Output = Result<u32, OtaError>>
    where
        F: FnMut(&[u8]) -> Result<ControlFlow<()>, OtaError>;
}

/// Destination of a downloaded firmware image (the inactive OTA slot).
///
/// Calls arrive as `begin`, any number of `write`, then exactly one of
/// `finalize` or `abort`.
pub trait ImageSink {
    /// Prepare the slot. Called once before the first write.
    fn begin(&mut self) -> Result<(), OtaError>;

    /// Store `chunk` at byte `offset` of the image.
    fn write(&mut self, offset: u32, chunk: &[u8]) -> Result<(), OtaError>;

    /// Mark the `len`-byte image as the one to boot next.
    fn finalize(&mut self, len: u32) -> Result<(), OtaError>;

    /// Drop a partial image. The running firmware stays the boot target.
    fn abort(&mut self);
}

/// Device inputs consulted by the gates.
pub trait OtaPorts {
    /// Raw level of the update button (pulled up, active low).
    fn button_is_low(&mut self) -> bool;

    fn local_time(&mut self) -> LocalTime;

    fn battery_millivolts(&mut self) -> impl Future<Output = u32>;

    fn resolve(&mut self, host: &str) -> impl Future<Output = Result<IpAddr, OtaError>>;

    /// Open a TCP connection to `addr` and close it again.
    fn connect(
        &mut self,
        addr: SocketAddr,
        timeout_ms: u32,
    ) -> impl Future<Output = Result<(), OtaError>>;

    /// Reboot into the newly activated image. Does not return on hardware.
    fn restart(&mut self);
}
