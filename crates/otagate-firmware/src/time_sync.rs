//! SNTP client keeping the RTC on wall-clock time.

use core::net::{IpAddr, SocketAddr};

use embassy_net::Stack;
use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_time::{Duration, Timer};
use esp_hal::rtc_cntl::Rtc;
use log::{error, info, warn};
use sntpc::{NtpContext, NtpTimestampGenerator, get_time};

pub const NTP_SERVER: &str = "pool.ntp.org";
const NTP_PORT: u16 = 123;

const USEC_IN_SEC: u64 = 1_000_000;

/// Re-sync period once the clock is set
const RESYNC_INTERVAL: Duration = Duration::from_secs(3600);
/// Retry period while the clock is still unset
const RETRY_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone, Copy)]
struct RtcTimestamp<'a> {
    rtc: &'a Rtc<'a>,
    current_time_us: u64,
}

impl NtpTimestampGenerator for RtcTimestamp<'_> {
    fn init(&mut self) {
        self.current_time_us = self.rtc.current_time_us();
    }

    fn timestamp_sec(&self) -> u64 {
        self.current_time_us / USEC_IN_SEC
    }

    fn timestamp_subsec_micros(&self) -> u32 {
        (self.current_time_us % USEC_IN_SEC) as u32
    }
}

#[embassy_executor::task]
pub async fn sntp_task(stack: Stack<'static>, rtc: &'static Rtc<'static>) {
    let mut rx_meta = [PacketMetadata::EMPTY; 4];
    let mut rx_buffer = [0; 512];
    let mut tx_meta = [PacketMetadata::EMPTY; 4];
    let mut tx_buffer = [0; 512];

    stack.wait_config_up().await;

    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    if let Err(e) = socket.bind(NTP_PORT) {
        error!("Binding the SNTP socket failed: {:?}", e);
        return;
    }

    let mut synced = false;
    loop {
        match sync_once(stack, &socket, rtc).await {
            Ok(()) => synced = true,
            Err(reason) => warn!("SNTP sync failed: {reason}"),
        }
        Timer::after(if synced { RESYNC_INTERVAL } else { RETRY_INTERVAL }).await;
    }
}

async fn sync_once(
    stack: Stack<'static>,
    socket: &UdpSocket<'_>,
    rtc: &'static Rtc<'static>,
) -> Result<(), &'static str> {
    let addrs = stack
        .dns_query(NTP_SERVER, DnsQueryType::A)
        .await
        .map_err(|_| "DNS lookup failed")?;
    let addr: IpAddr = (*addrs.first().ok_or("no address for NTP server")?).into();

    let time = get_time(
        SocketAddr::new(addr, NTP_PORT),
        socket,
        NtpContext::new(RtcTimestamp {
            rtc,
            current_time_us: 0,
        }),
    )
    .await
    .map_err(|e| {
        error!("SNTP request failed: {:?}", e);
        "no usable reply"
    })?;

    // Set immediately to keep the offset small
    rtc.set_current_time_us(
        (time.sec() as u64 * USEC_IN_SEC) + ((time.sec_fraction() as u64 * USEC_IN_SEC) >> 32),
    );
    match jiff::Timestamp::from_microsecond(rtc.current_time_us() as i64) {
        Ok(now) => info!("Time synchronised: {now}"),
        Err(_) => info!("Time synchronised"),
    }
    Ok(())
}
