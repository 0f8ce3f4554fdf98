use serde::{Deserialize, Serialize};

use super::clock::LocalTime;

/// Hours of the day, `[start_hour, end_hour)`, in which updates may run.
///
/// `start_hour > end_hour` wraps past midnight, `start_hour == end_hour`
/// means the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl MaintenanceWindow {
    /// 02:00 to 05:00
    pub const DEFAULT: Self = Self::new(2, 5);

    pub const fn new(start_hour: u8, end_hour: u8) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    pub const fn contains(&self, hour: u8) -> bool {
        let (s, e) = (self.start_hour, self.end_hour);
        if s == e {
            true
        } else if s < e {
            hour >= s && hour < e
        } else {
            hour >= s || hour < e
        }
    }

    /// Gate verdict for `now`. Without a synchronised clock the decision is
    /// `allow_without_time`.
    pub const fn admits(&self, now: LocalTime, allow_without_time: bool) -> bool {
        if !now.is_valid() {
            return allow_without_time;
        }
        self.contains(now.hour)
    }
}

impl Default for MaintenanceWindow {
    fn default() -> Self {
        Self::DEFAULT
    }
}
