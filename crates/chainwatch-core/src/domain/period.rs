use chrono::{DateTime, Datelike, TimeZone, Utc};

/// A calendar-month billing period in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    /// The period containing `now`: first instant of the month through the
    /// first instant of the next month.
    pub fn containing(now: DateTime<Utc>) -> Self {
        let start = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .expect("first of month is always a valid UTC instant");
        let (year, month) = if now.month() == 12 {
            (now.year() + 1, 1)
        } else {
            (now.year(), now.month() + 1)
        };
        let end = Utc
            .with_ymd_and_hms(year, month, 1, 0, 0, 0)
            .single()
            .expect("first of month is always a valid UTC instant");
        Self { start, end }
    }

    /// Whole seconds from `now` until the period closes, floored at zero.
    pub fn seconds_until_end(&self, now: DateTime<Utc>) -> u64 {
        (self.end - now).num_seconds().max(0) as u64
    }
}

/// Month bucket label used in counter keys, e.g. `202608`.
pub fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y%m").to_string()
}
