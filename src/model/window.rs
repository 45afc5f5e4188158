//! Half-open computation windows.

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, TimeDelta, TimeZone, Utc};

use crate::{Error, Result};

/// Most months one run may look back over.
pub const MAX_TRAILING_MONTHS: u32 = 1200;

/// `[from, to)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Window {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self> {
        if to <= from {
            return Err(Error::InvalidWindow { from, to });
        }
        Ok(Self { from, to })
    }

    /// Window covering one calendar month.
    pub fn month(year: i32, month: u32) -> Result<Self> {
        let from = first_of_month(year, month)?;
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
        let to = first_of_month(next_year, next_month)?;
        Self::new(from, to)
    }

    /// Windows of the `n` complete months before `now`, most recent first.
    ///
    /// `n == 0` yields no windows; `n` above [`MAX_TRAILING_MONTHS`] is rejected.
    pub fn trailing_months(now: DateTime<Utc>, n: u32) -> Result<Vec<Self>> {
        if n > MAX_TRAILING_MONTHS {
            return Err(Error::MonthCount {
                months: n,
                max: MAX_TRAILING_MONTHS,
            });
        }
        let mut year = now.year();
        let mut month = now.month();
        let mut windows = Vec::new();
        for _ in 0..n {
            if month == 1 {
                year -= 1;
                month = 12;
            } else {
                month -= 1;
            }
            windows.push(Self::month(year, month)?);
        }
        Ok(windows)
    }

    pub fn duration(&self) -> TimeDelta {
        self.to - self.from
    }

    /// Window in the `from,to` RFC 3339 form used by allocation queries.
    pub fn to_query_param(&self) -> String {
        format!(
            "{},{}",
            self.from.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.to.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    /// Window length as a metrics range string, rounded to whole seconds
    /// (`744h0m0s`, `5m0s`, `42s`).
    pub fn range_string(&self) -> String {
        format_duration(self.duration())
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.from.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.to.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// First instant of a month in UTC.
pub fn first_of_month(year: i32, month: u32) -> Result<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or(Error::InvalidPeriod { year, month })
}

fn format_duration(delta: TimeDelta) -> String {
    let millis = delta.num_milliseconds();
    let sign = if millis < 0 { "-" } else { "" };
    let secs = (millis.unsigned_abs() + 500) / 1000;

    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{sign}{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{sign}{minutes}m{seconds}s")
    } else {
        format!("{sign}{seconds}s")
    }
}
