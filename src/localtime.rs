use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::error::{EngineError, Result};

/// A moment in time viewed through a user's IANA timezone.
///
/// Everything day-shaped in achievement evaluation (streaks, same-day
/// counts, time-of-day and holiday conditions) goes through this so the
/// "local day" boundary is a real tz-database lookup, not an offset guess.
#[derive(Debug, Clone, Copy)]
pub struct LocalDayContext {
    pub tz: Tz,
    pub now: DateTime<Utc>,
}

impl LocalDayContext {
    pub fn new(tz: Tz, now: DateTime<Utc>) -> Self {
        Self { tz, now }
    }

    pub fn from_tz_name(name: &str, now: DateTime<Utc>) -> Result<Self> {
        let tz = name
            .parse::<Tz>()
            .map_err(|_| EngineError::UnknownTimezone(name.to_string()))?;
        Ok(Self { tz, now })
    }

    pub fn local_now(&self) -> DateTime<Tz> {
        self.now.with_timezone(&self.tz)
    }

    pub fn hour(&self) -> u32 {
        self.local_now().hour()
    }

    pub fn weekday(&self) -> Weekday {
        self.local_now().weekday()
    }

    pub fn is_weekend(&self) -> bool {
        matches!(self.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// (month, day) of the local calendar date.
    pub fn month_day(&self) -> (u32, u32) {
        let local = self.local_now();
        (local.month(), local.day())
    }

    pub fn local_date(&self) -> NaiveDate {
        self.local_now().date_naive()
    }

    /// Local calendar date of an arbitrary UTC instant. Used to bucket
    /// historical results into local days for streak math.
    pub fn local_date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    /// Local hour of an arbitrary UTC instant.
    pub fn local_hour_of(&self, instant: DateTime<Utc>) -> u32 {
        instant.with_timezone(&self.tz).hour()
    }

    /// Local (month, day) of an arbitrary UTC instant.
    pub fn local_month_day_of(&self, instant: DateTime<Utc>) -> (u32, u32) {
        let local = instant.with_timezone(&self.tz);
        (local.month(), local.day())
    }

    pub fn local_weekday_of(&self, instant: DateTime<Utc>) -> Weekday {
        instant.with_timezone(&self.tz).weekday()
    }
}

/// Midnight-UTC start of the current UTC day. Leaderboard windows are
/// UTC-based so every user ranks against one shared boundary.
pub fn utc_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default())
}

/// Monday-midnight-UTC start of the current ISO week.
pub fn utc_week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_monday = now.date_naive().weekday().num_days_from_monday() as i64;
    utc_day_start(now) - chrono::Duration::days(days_from_monday)
}
