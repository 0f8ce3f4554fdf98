//! Wall-clock view used by the maintenance window gate.

use jiff::Timestamp;
use jiff::tz::Offset;

/// Earliest year treated as "time has been synchronised"
pub const MIN_VALID_YEAR: i16 = 2024;

/// The two calendar facts the gates need
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    pub year: i16,
    pub hour: u8,
}

impl LocalTime {
    /// What an unsynchronised RTC reports
    pub const EPOCH: Self = Self {
        year: 1970,
        hour: 0,
    };

    pub const fn new(year: i16, hour: u8) -> Self {
        Self { year, hour }
    }

    /// Convert a Unix timestamp in microseconds to local time at a fixed
    /// UTC offset. `None` if either value is out of range.
    pub fn from_unix_micros(micros: i64, utc_offset_hours: i8) -> Option<Self> {
        let ts = Timestamp::from_microsecond(micros).ok()?;
        let offset = Offset::from_hours(utc_offset_hours).ok()?;
        let dt = offset.to_datetime(ts);
        Some(Self {
            year: dt.year(),
            hour: u8::try_from(dt.hour()).ok()?,
        })
    }

    /// Whether SNTP has set the clock
    pub const fn is_valid(&self) -> bool {
        self.year >= MIN_VALID_YEAR
    }
}
