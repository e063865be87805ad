//! Market calendar: weekend and holiday gating.

use serde::{Deserialize, Serialize};
use time::Weekday;

use crate::UtcDateTime;

/// Inclusive start / exclusive end of one market holiday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolidayWindow {
    pub start: UtcDateTime,
    pub end: UtcDateTime,
}

impl HolidayWindow {
    pub fn contains(&self, ts: UtcDateTime) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// Weekly close/open boundary, expressed in UTC weekday + hour.
///
/// Defaults model a 24x5 FX week: closed from Friday 22:00 to Sunday
/// 22:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekendSchedule {
    pub close_day: Weekday,
    pub close_hour: u8,
    pub open_day: Weekday,
    pub open_hour: u8,
}

impl Default for WeekendSchedule {
    fn default() -> Self {
        Self {
            close_day: Weekday::Friday,
            close_hour: 22,
            open_day: Weekday::Sunday,
            open_hour: 22,
        }
    }
}

impl WeekendSchedule {
    // Minutes into the week, Monday 00:00 = 0.
    fn week_minute(day: Weekday, hour: u8, minute: u8) -> u32 {
        day.number_days_from_monday() as u32 * 24 * 60 + hour as u32 * 60 + minute as u32
    }

    fn is_closed_at(&self, ts: UtcDateTime) -> bool {
        let inner = ts.into_inner();
        let now = Self::week_minute(inner.weekday(), inner.hour(), inner.minute());
        let close = Self::week_minute(self.close_day, self.close_hour, 0);
        let open = Self::week_minute(self.open_day, self.open_hour, 0);

        if close <= open {
            now >= close && now < open
        } else {
            // Closed window wraps past the end of the week.
            now >= close || now < open
        }
    }
}

/// Answers whether a given instant falls in a holiday/weekend window.
/// Pure lookup, no I/O.
#[derive(Debug, Clone, Default)]
pub struct MarketCalendar {
    weekend: Option<WeekendSchedule>,
    holidays: Vec<HolidayWindow>,
}

impl MarketCalendar {
    pub fn new(weekend: Option<WeekendSchedule>, holidays: Vec<HolidayWindow>) -> Self {
        Self { weekend, holidays }
    }

    /// Calendar that never closes; used by tests and 24x7 instruments.
    pub fn always_open() -> Self {
        Self {
            weekend: None,
            holidays: Vec::new(),
        }
    }

    pub fn is_closed(&self, ts: UtcDateTime) -> bool {
        if let Some(weekend) = &self.weekend {
            if weekend.is_closed_at(ts) {
                return true;
            }
        }
        self.holidays.iter().any(|window| window.contains(ts))
    }

    pub fn is_open(&self, ts: UtcDateTime) -> bool {
        !self.is_closed(ts)
    }
}
