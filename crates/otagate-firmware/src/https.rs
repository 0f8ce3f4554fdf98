//! [`HttpsTransport`] over esp-mbedtls and embassy-net.
//!
//! Every request opens a fresh TCP connection and a TLS session whose only
//! trust anchor is the request's root CA, so a chain that does not lead to
//! it fails the handshake. HTTP framing comes from `reqwless`.

use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::ffi::CString;
use alloc::vec::Vec;
use core::ops::ControlFlow;

use embassy_net::Stack;
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_time::{Duration, TimeoutError, with_timeout};
use embedded_io_async::Read;
use esp_mbedtls::asynch::Session;
use esp_mbedtls::{Certificates, Mode, Tls, TlsError, TlsVersion, X509};
use log::{debug, warn};
use otagate_core::ota::{HttpsRequest, HttpsTransport, OtaError, parse_https_host};
use reqwless::request::{Method, Request, RequestBuilder};
use reqwless::response::Response;

const TCP_BUFFER_LEN: usize = 4096;
/// Response head (status line and headers)
const RX_LEN: usize = 2048;
const CHUNK_LEN: usize = 1024;

/// `MBEDTLS_ERR_X509_CERT_VERIFY_FAILED`
const X509_CERT_VERIFY_FAILED: i32 = -0x2700;

pub struct MbedtlsTransport<'a> {
    stack: Stack<'a>,
    tls: Tls<'a>,
    tcp_rx: Box<[u8]>,
    tcp_tx: Box<[u8]>,
    rx: Box<[u8]>,
    chunk: Box<[u8]>,
}

impl<'a> MbedtlsTransport<'a> {
    pub fn new(stack: Stack<'a>, tls: Tls<'a>) -> Self {
        Self {
            stack,
            tls,
            tcp_rx: alloc::vec![0; TCP_BUFFER_LEN].into_boxed_slice(),
            tcp_tx: alloc::vec![0; TCP_BUFFER_LEN].into_boxed_slice(),
            rx: alloc::vec![0; RX_LEN].into_boxed_slice(),
            chunk: alloc::vec![0; CHUNK_LEN].into_boxed_slice(),
        }
    }
}

impl HttpsTransport for MbedtlsTransport<'_> {
    async fn get<F>(&mut self, request: &HttpsRequest<'_>, mut on_chunk: F) -> Result<u32, OtaError>
    where
        F: FnMut(&[u8]) -> Result<ControlFlow<()>, OtaError>,
    {
        let target = parse_https_host(request.url)?;

        // mbedtls parses PEM only with a trailing NUL
        let pem = nul_terminated(request.root_ca);
        let ca_chain = X509::pem(&pem).map_err(|e| {
            warn!("Root CA unusable: {:?}", e);
            OtaError::InvalidCertificate {
                len: request.root_ca.len(),
            }
        })?;
        let servername = CString::new(target.host).map_err(|_| OtaError::InvalidUrl)?;

        // Bounds every network wait, not the whole transfer
        let timeout = Duration::from_millis(request.timeout_ms as u64);
        let timed_out = |_: TimeoutError| {
            warn!("GET {} stalled for {} ms", request.url, request.timeout_ms);
            OtaError::Timeout
        };

        let addrs = with_timeout(timeout, self.stack.dns_query(target.host, DnsQueryType::A))
            .await
            .map_err(timed_out)?
            .map_err(|e| {
                debug!("Resolving {} failed: {:?}", target.host, e);
                OtaError::Dns
            })?;
        let addr = *addrs.first().ok_or(OtaError::Dns)?;

        let mut socket = TcpSocket::new(self.stack, &mut self.tcp_rx, &mut self.tcp_tx);
        socket.set_timeout(Some(timeout));
        with_timeout(timeout, socket.connect((addr, target.port)))
            .await
            .map_err(timed_out)?
            .map_err(|e| {
                debug!("Connecting to {}:{} failed: {:?}", target.host, target.port, e);
                OtaError::Connect
            })?;

        let mut session = Session::new(
            &mut socket,
            Mode::Client {
                servername: &servername,
            },
            TlsVersion::Tls1_2,
            Certificates {
                ca_chain: Some(ca_chain),
                ..Default::default()
            },
            self.tls.reference(),
        )
        .map_err(map_tls_error)?;
        with_timeout(timeout, session.connect())
            .await
            .map_err(timed_out)?
            .map_err(map_tls_error)?;
        debug!("TLS session with {} established", target.host);

        let connection = if request.keep_alive { "keep-alive" } else { "close" };
        let headers = [("Connection", connection)];
        let http_request = Request::get(target.path)
            .host(target.host)
            .headers(&headers)
            .build();
        with_timeout(timeout, http_request.write(&mut session))
            .await
            .map_err(timed_out)?
            .map_err(map_http_error)?;

        let response = with_timeout(timeout, Response::read(&mut session, Method::GET, &mut self.rx))
            .await
            .map_err(timed_out)?
            .map_err(map_http_error)?;
        if !response.status.is_successful() {
            warn!("GET {} answered {}", request.url, response.status.0);
            return Err(OtaError::HttpStatus(response.status.0));
        }

        let mut body = response.body().reader();
        let mut delivered: u32 = 0;
        loop {
            let n = with_timeout(timeout, body.read(&mut self.chunk))
                .await
                .map_err(timed_out)?
                .map_err(|e| {
                    debug!("Body read failed after {delivered} bytes: {:?}", e);
                    OtaError::Stream
                })?;
            if n == 0 {
                break;
            }
            delivered += n as u32;
            if on_chunk(&self.chunk[..n])?.is_break() {
                break;
            }
        }
        Ok(delivered)
    }
}

fn nul_terminated(pem: &[u8]) -> Cow<'_, [u8]> {
    if pem.last() == Some(&0) {
        Cow::Borrowed(pem)
    } else {
        let mut owned = Vec::with_capacity(pem.len() + 1);
        owned.extend_from_slice(pem);
        owned.push(0);
        Cow::Owned(owned)
    }
}

fn map_tls_error(e: TlsError) -> OtaError {
    match e {
        TlsError::MbedTlsError(X509_CERT_VERIFY_FAILED) => {
            warn!("Server certificate rejected by the pinned root CA");
            OtaError::CertificateRejected
        }
        e => {
            debug!("TLS error: {:?}", e);
            OtaError::Transport
        }
    }
}

fn map_http_error(e: reqwless::Error) -> OtaError {
    debug!("HTTP error: {:?}", e);
    OtaError::Transport
}
