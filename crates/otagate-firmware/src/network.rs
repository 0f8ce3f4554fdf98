//! Wi-Fi station bring-up and the embassy-net runner.

use embassy_net::{Runner, Stack};
use embassy_time::{Duration, with_timeout};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent};
use log::{error, info, warn};
use otagate_core::connectivity::{
    CONNECT_TIMEOUT_MS, LinkAction, LinkEvent, LinkEventChannel, LinkState, LinkStateSignal,
    LinkSupervisor, MAX_CONNECT_RETRIES,
};

use crate::config;

/// Events from the radio glue to the supervisor
pub static LINK_EVENTS: LinkEventChannel = LinkEventChannel::new();

/// Most recent link state
pub static LINK_STATE: LinkStateSignal = LinkStateSignal::new();

#[embassy_executor::task]
pub async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

/// Connects the station and keeps it connected until retries run out.
#[embassy_executor::task]
pub async fn wifi_task(mut controller: WifiController<'static>, stack: Stack<'static>) {
    if config::SSID.is_empty() {
        error!("SSID is empty, set it in .env before building");
        LINK_STATE.signal(LinkState::Failed);
        return;
    }

    let mode = ModeConfig::Client(
        ClientConfig::default()
            .with_ssid(config::SSID.into())
            .with_password(config::PASSWORD.into()),
    );
    if let Err(e) = controller.set_config(&mode) {
        error!("Wi-Fi configuration rejected: {:?}", e);
        LINK_STATE.signal(LinkState::Failed);
        return;
    }

    info!("Starting Wi-Fi station");
    if let Err(e) = controller.start_async().await {
        error!("Wi-Fi start failed: {:?}", e);
        LINK_STATE.signal(LinkState::Failed);
        return;
    }
    LINK_EVENTS.send(LinkEvent::Started).await;

    let mut supervisor = LinkSupervisor::new(MAX_CONNECT_RETRIES);
    let dhcp_timeout = Duration::from_millis(CONNECT_TIMEOUT_MS as u64);

    loop {
        let event = LINK_EVENTS.receive().await;
        let action = supervisor.handle(event);
        LINK_STATE.signal(supervisor.state());

        let next = match action {
            LinkAction::Connect => match controller.connect_async().await {
                Ok(()) => match with_timeout(dhcp_timeout, stack.wait_config_up()).await {
                    Ok(()) => {
                        if let Some(cfg) = stack.config_v4() {
                            info!("Got IP: {}", cfg.address);
                        }
                        LinkEvent::GotIp
                    }
                    Err(_) => {
                        warn!("No DHCP lease within {} ms", CONNECT_TIMEOUT_MS);
                        LinkEvent::Disconnected
                    }
                },
                Err(e) => {
                    warn!("Wi-Fi connect failed: {:?}", e);
                    LinkEvent::Disconnected
                }
            },
            LinkAction::Wait => {
                controller.wait_for_event(WifiEvent::StaDisconnected).await;
                warn!("Wi-Fi disconnected");
                LinkEvent::Disconnected
            }
            LinkAction::GiveUp => {
                error!("Wi-Fi unavailable, OTA checks will report the network as down");
                return;
            }
        };
        LINK_EVENTS.send(next).await;
    }
}

/// Block until the link is up, failed, or `CONNECT_TIMEOUT_MS` passed.
pub async fn wait_for_link() -> LinkState {
    let settle = async {
        loop {
            match LINK_STATE.wait().await {
                state @ (LinkState::Connected | LinkState::Failed) => break state,
                _ => {}
            }
        }
    };
    match with_timeout(Duration::from_millis(CONNECT_TIMEOUT_MS as u64), settle).await {
        Ok(state) => state,
        Err(_) => {
            warn!("Wi-Fi not connected after {} ms, continuing", CONNECT_TIMEOUT_MS);
            LinkState::Connecting { attempt: 0 }
        }
    }
}
