use thiserror_no_std::Error;

/// Failure taxonomy the decision loop reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Certificate,
    Network,
    Timeout,
    UpdateStream,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    #[error("root CA is {len} bytes, expected at least 32")]
    InvalidCertificate { len: usize },
    #[error("server certificate chain does not lead to the pinned root CA")]
    CertificateRejected,
    #[error("URL is not https://host[:port][/path]")]
    InvalidUrl,
    #[error("host name longer than 127 bytes")]
    HostTooLong,
    #[error("DNS lookup failed")]
    Dns,
    #[error("TCP connect failed")]
    Connect,
    #[error("operation timed out")]
    Timeout,
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("HTTPS transport error")]
    Transport,
    #[error("body stream interrupted")]
    Stream,
    #[error("image does not start with magic byte 0xE9 (got {first:#04x})")]
    InvalidImage { first: u8 },
    #[error("server sent an empty image")]
    EmptyImage,
    #[error("writing image at offset {offset} failed")]
    ImageWrite { offset: u32 },
    #[error("activating the new slot failed")]
    Activate,
}

impl OtaError {
    pub const fn kind(self) -> ErrorKind {
        match self {
            Self::InvalidCertificate { .. } | Self::CertificateRejected => {
                ErrorKind::Certificate
            }
            Self::InvalidUrl | Self::HostTooLong | Self::Dns | Self::Connect => {
                ErrorKind::Network
            }
            Self::Timeout => ErrorKind::Timeout,
            Self::HttpStatus(_)
            | Self::Transport
            | Self::Stream
            | Self::InvalidImage { .. }
            | Self::EmptyImage
            | Self::ImageWrite { .. }
            | Self::Activate => ErrorKind::UpdateStream,
        }
    }
}
