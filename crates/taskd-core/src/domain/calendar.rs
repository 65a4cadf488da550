//! Calendar - 壁時計の分解と cron 風のワイルドカード照合

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Which wall clock Scheduled tasks are matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarZone {
    #[default]
    Local,
    Utc,
}

/// Wall-clock time broken into the six fields a Scheduled task can pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarFields {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl CalendarFields {
    fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self {
        Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
        }
    }
}

impl CalendarZone {
    /// Break an epoch-seconds timestamp into calendar fields.
    ///
    /// Returns `None` only for timestamps chrono cannot represent.
    pub fn fields(self, epoch_secs: i64) -> Option<CalendarFields> {
        let utc = DateTime::<Utc>::from_timestamp(epoch_secs, 0)?;
        Some(match self {
            CalendarZone::Utc => CalendarFields::from_datetime(&utc),
            CalendarZone::Local => CalendarFields::from_datetime(&utc.with_timezone(&Local)),
        })
    }
}

/// A single pinned field: `None` is the wildcard and matches every value.
pub(crate) fn field_matches<T: PartialEq>(pinned: Option<T>, actual: T) -> bool {
    pinned.is_none_or(|value| value == actual)
}
