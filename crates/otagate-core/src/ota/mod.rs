//! Gated over-the-air update decision engine.

pub mod clock;
pub mod engine;
pub mod error;
pub mod ports;
pub mod update;
pub mod url;
pub mod window;

#[cfg(test)]
mod mock;

pub use clock::LocalTime;
pub use engine::{OtaEngine, PollOutcome, PollReport, UpdateSource};
pub use error::{ErrorKind, OtaError};
pub use ports::{HttpsRequest, HttpsTransport, ImageSink, OtaPorts};
pub use update::UpdateAttempt;
pub use url::{HttpsTarget, parse_https_host};
pub use window::MaintenanceWindow;
