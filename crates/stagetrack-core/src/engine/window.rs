//! Half-open UTC time windows used to bucket metrics.
//!
//! Day windows run [00:00, 24:00), weeks are ISO weeks (Monday-based),
//! months are calendar months.

use chrono::{DateTime, Datelike, Days, Months, NaiveTime, TimeZone, Utc, Weekday};

use crate::domain::metric::Interval;

/// A half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// The window of the given kind containing `t`.
    pub fn containing(t: DateTime<Utc>, interval: Interval) -> Self {
        match interval {
            Interval::Day => day_window(t),
            Interval::Week => week_window(t),
            Interval::Month => month_window(t),
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}

fn midnight(date: chrono::NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// [00:00, 24:00) of the UTC day containing `t`.
pub fn day_window(t: DateTime<Utc>) -> Window {
    let start = midnight(t.date_naive());
    Window {
        start,
        end: start + Days::new(1),
    }
}

/// The ISO week (Monday 00:00 .. next Monday 00:00) containing `t`.
pub fn week_window(t: DateTime<Utc>) -> Window {
    let monday = t.date_naive().week(Weekday::Mon).first_day();
    let start = midnight(monday);
    Window {
        start,
        end: start + Days::new(7),
    }
}

/// The calendar month containing `t`.
pub fn month_window(t: DateTime<Utc>) -> Window {
    let first = t.date_naive().with_day(1).expect("day 1 always exists");
    let start = midnight(first);
    Window {
        start,
        end: start + Months::new(1),
    }
}
