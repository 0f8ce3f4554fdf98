//! Device inputs for the OTA gates.

use core::net::{IpAddr, SocketAddr};

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpAddress, Stack};
use embassy_time::{Duration, with_timeout};
use esp_hal::gpio::Input;
use esp_hal::rtc_cntl::Rtc;
use log::debug;
use otagate_core::ota::{LocalTime, OtaError, OtaPorts};

const REACHABILITY_BUFFER_LEN: usize = 256;

pub struct EspOtaPorts<'a> {
    button: Input<'a>,
    rtc: &'a Rtc<'a>,
    stack: Stack<'a>,
    utc_offset_hours: i8,
    battery_mv: u32,
}

impl<'a> EspOtaPorts<'a> {
    pub fn new(
        button: Input<'a>,
        rtc: &'a Rtc<'a>,
        stack: Stack<'a>,
        utc_offset_hours: i8,
        battery_mv: u32,
    ) -> Self {
        Self {
            button,
            rtc,
            stack,
            utc_offset_hours,
            battery_mv,
        }
    }
}

impl OtaPorts for EspOtaPorts<'_> {
    fn button_is_low(&mut self) -> bool {
        self.button.is_low()
    }

    fn local_time(&mut self) -> LocalTime {
        LocalTime::from_unix_micros(self.rtc.current_time_us() as i64, self.utc_offset_hours)
            .unwrap_or(LocalTime::EPOCH)
    }

    async fn battery_millivolts(&mut self) -> u32 {
        self.battery_mv
    }

    async fn resolve(&mut self, host: &str) -> Result<IpAddr, OtaError> {
        let addrs = self
            .stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|e| {
                debug!("DNS query for {host} failed: {:?}", e);
                OtaError::Dns
            })?;
        let addr: IpAddress = *addrs.first().ok_or(OtaError::Dns)?;
        Ok(addr.into())
    }

    async fn connect(&mut self, addr: SocketAddr, timeout_ms: u32) -> Result<(), OtaError> {
        let IpAddr::V4(ip) = addr.ip() else {
            return Err(OtaError::Connect);
        };

        let mut rx = [0u8; REACHABILITY_BUFFER_LEN];
        let mut tx = [0u8; REACHABILITY_BUFFER_LEN];
        let mut socket = TcpSocket::new(self.stack, &mut rx, &mut tx);
        let timeout = Duration::from_millis(timeout_ms as u64);
        socket.set_timeout(Some(timeout));

        let result = match with_timeout(timeout, socket.connect((ip, addr.port()))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                debug!("TCP connect to {addr} failed: {:?}", e);
                Err(OtaError::Connect)
            }
            Err(_) => Err(OtaError::Timeout),
        };
        socket.close();
        result
    }

    fn restart(&mut self) {
        esp_hal::system::software_reset()
    }
}
