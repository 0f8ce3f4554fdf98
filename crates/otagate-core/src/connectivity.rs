//! Wi-Fi station link supervision.
//!
//! The radio driver reports what happened as [`LinkEvent`]s; the
//! [`LinkSupervisor`] decides what to do next and tracks the [`LinkState`]
//! other tasks wait on. Events travel through a [`LinkEventChannel`] so the
//! driver glue never has to share the supervisor.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use log::{info, warn};

/// Reconnect attempts after a disconnect before giving up
pub const MAX_CONNECT_RETRIES: u8 = 10;

/// How long start-up waits for the link to settle
pub const CONNECT_TIMEOUT_MS: u32 = 20_000;

pub const LINK_EVENT_CAPACITY: usize = 4;

pub type LinkEventChannel = Channel<CriticalSectionRawMutex, LinkEvent, LINK_EVENT_CAPACITY>;

/// Latest [`LinkState`], for tasks that only care about the outcome
pub type LinkStateSignal = Signal<CriticalSectionRawMutex, LinkState>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Station interface started
    Started,
    /// Association lost or connect attempt failed
    Disconnected,
    /// DHCP lease obtained
    GotIp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting { attempt: u8 },
    Connected,
    /// Retries exhausted
    Failed,
}

/// What the driver glue should do after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    Connect,
    Wait,
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct LinkSupervisor {
    max_retries: u8,
    retries: u8,
    state: LinkState,
}

impl LinkSupervisor {
    pub const fn new(max_retries: u8) -> Self {
        Self {
            max_retries,
            retries: 0,
            state: LinkState::Idle,
        }
    }

    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Reconnects used since the last IP acquisition
    pub const fn retries(&self) -> u8 {
        self.retries
    }

    pub fn handle(&mut self, event: LinkEvent) -> LinkAction {
        match event {
            LinkEvent::Started => {
                self.state = LinkState::Connecting { attempt: 0 };
                LinkAction::Connect
            }
            LinkEvent::Disconnected if self.retries < self.max_retries => {
                self.retries += 1;
                info!(
                    "Retrying Wi-Fi connection ({}/{})",
                    self.retries, self.max_retries
                );
                self.state = LinkState::Connecting {
                    attempt: self.retries,
                };
                LinkAction::Connect
            }
            LinkEvent::Disconnected => {
                if self.state != LinkState::Failed {
                    warn!(
                        "Wi-Fi connection failed after {} retries",
                        self.max_retries
                    );
                }
                self.state = LinkState::Failed;
                LinkAction::GiveUp
            }
            LinkEvent::GotIp => {
                self.retries = 0;
                self.state = LinkState::Connected;
                LinkAction::Wait
            }
        }
    }
}

impl Default for LinkSupervisor {
    fn default() -> Self {
        Self::new(MAX_CONNECT_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_connects() {
        let mut link = LinkSupervisor::default();
        assert_eq!(link.state(), LinkState::Idle);
        assert_eq!(link.handle(LinkEvent::Started), LinkAction::Connect);
        assert_eq!(link.state(), LinkState::Connecting { attempt: 0 });
    }

    #[test]
    fn test_retries_exhaust_after_ten() {
        let mut link = LinkSupervisor::default();
        link.handle(LinkEvent::Started);

        for attempt in 1..=MAX_CONNECT_RETRIES {
            assert_eq!(link.handle(LinkEvent::Disconnected), LinkAction::Connect);
            assert_eq!(link.state(), LinkState::Connecting { attempt });
        }
        assert_eq!(link.handle(LinkEvent::Disconnected), LinkAction::GiveUp);
        assert_eq!(link.state(), LinkState::Failed);
        // Stays failed
        assert_eq!(link.handle(LinkEvent::Disconnected), LinkAction::GiveUp);
    }

    #[test]
    fn test_ip_resets_retry_counter() {
        let mut link = LinkSupervisor::new(2);
        link.handle(LinkEvent::Started);
        link.handle(LinkEvent::Disconnected);
        link.handle(LinkEvent::Disconnected);
        assert_eq!(link.retries(), 2);

        assert_eq!(link.handle(LinkEvent::GotIp), LinkAction::Wait);
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(link.retries(), 0);

        assert_eq!(link.handle(LinkEvent::Disconnected), LinkAction::Connect);
    }

    #[test]
    fn test_events_through_channel() {
        let events = LinkEventChannel::new();
        events.try_send(LinkEvent::Started).unwrap();
        events.try_send(LinkEvent::GotIp).unwrap();

        let mut link = LinkSupervisor::default();
        let mut actions = heapless::Vec::<LinkAction, 4>::new();
        while let Ok(event) = events.try_receive() {
            actions.push(link.handle(event)).unwrap();
        }

        assert_eq!(actions.as_slice(), &[LinkAction::Connect, LinkAction::Wait]);
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[test]
    fn test_state_signal_keeps_latest() {
        let signal = LinkStateSignal::new();
        signal.signal(LinkState::Connecting { attempt: 1 });
        signal.signal(LinkState::Connected);
        assert_eq!(signal.try_take(), Some(LinkState::Connected));
        assert_eq!(signal.try_take(), None);
    }
}
