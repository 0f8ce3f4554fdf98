//! A single firmware download into the inactive slot.

use core::ops::ControlFlow;

use log::{error, info};

use super::error::OtaError;
use super::ports::{HttpsRequest, HttpsTransport, ImageSink};

/// Shortest PEM accepted as a root certificate
pub const MIN_ROOT_CA_LEN: usize = 32;

/// First byte of every ESP application image
pub const IMAGE_MAGIC: u8 = 0xE9;

pub const FIRMWARE_TIMEOUT_MS: u32 = 15_000;

/// Download of `url` into an [`ImageSink`], checked against `root_ca`.
#[derive(Debug, Clone, Copy)]
pub struct UpdateAttempt<'a> {
    url: &'a str,
    root_ca: &'a [u8],
}

impl<'a> UpdateAttempt<'a> {
    /// Fails with [`OtaError::InvalidCertificate`] before any network traffic
    /// if the certificate is obviously not one.
    pub fn new(url: &'a str, root_ca: &'a [u8]) -> Result<Self, OtaError> {
        if root_ca.len() < MIN_ROOT_CA_LEN {
            return Err(OtaError::InvalidCertificate { len: root_ca.len() });
        }
        Ok(Self { url, root_ca })
    }

    pub fn request(&self) -> HttpsRequest<'a> {
        HttpsRequest {
            url: self.url,
            root_ca: self.root_ca,
            timeout_ms: FIRMWARE_TIMEOUT_MS,
            keep_alive: true,
        }
    }

    /// Stream the image into `sink` and activate it.
    ///
    /// On any error the sink is aborted, so a partial image never becomes
    /// the boot target. Returns the image length.
    pub async fn run<T, S>(&self, transport: &mut T, sink: &mut S) -> Result<u32, OtaError>
    where
        T: HttpsTransport,
        S: ImageSink,
    {
        info!("Downloading firmware from {}", self.url);
        sink.begin()?;

        let mut written: u32 = 0;
        let streamed = transport
            .get(&self.request(), |chunk| {
                if chunk.is_empty() {
                    return Ok(ControlFlow::Continue(()));
                }
                if written == 0 && chunk[0] != IMAGE_MAGIC {
                    return Err(OtaError::InvalidImage { first: chunk[0] });
                }
                sink.write(written, chunk)?;
                written += chunk.len() as u32;
                Ok(ControlFlow::Continue(()))
            })
            .await;

        let result = match streamed {
            Ok(_) if written == 0 => Err(OtaError::EmptyImage),
            Ok(_) => sink.finalize(written),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!("Firmware image of {written} bytes written and activated");
                Ok(written)
            }
            Err(e) => {
                error!("Firmware update failed after {written} bytes: {e}");
                sink.abort();
                Err(e)
            }
        }
    }
}
