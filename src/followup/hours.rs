//! Working-hours window in a fixed UTC offset.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Timelike, Utc};

use crate::config::WorkingHours;

impl WorkingHours {
    /// The configured offset, falling back to UTC when out of range.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }

    /// Whether `now` falls inside `[start_hour, end_hour)` local time.
    ///
    /// `start_hour > end_hour` wraps midnight; equal bounds mean always open.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let hour = now.with_timezone(&self.offset()).hour();
        let (start, end) = (self.start_hour, self.end_hour);
        if start == end {
            true
        } else if start < end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    /// Calendar date at `now` in the configured offset.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset()).date_naive()
    }
}
