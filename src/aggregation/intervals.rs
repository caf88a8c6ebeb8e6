//! Report window partitioning.
//!
//! Boundaries are computed on the report timezone's wall clock (local
//! midnight, Monday, the 1st of the month) and stored in UTC. Hourly
//! boundaries step in absolute hours, so a DST jump yields one fewer or one
//! more hour in the local day.

use chrono::{
    DateTime, Datelike, Days, Duration, LocalResult, Months, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{ChargebackError, ChargebackResult};

/// Size of one report sub-interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[cfg_attr(feature = "cli", value(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hourly,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Start of the local period containing `local`.
    fn floor(self, local: NaiveDateTime) -> NaiveDateTime {
        let date = local.date();
        match self {
            Self::Hourly => date.and_hms_opt(local.hour(), 0, 0).unwrap_or(local),
            Self::Daily => date.and_time(NaiveTime::MIN),
            Self::Weekly => {
                let back = u64::from(date.weekday().num_days_from_monday());
                date.checked_sub_days(Days::new(back))
                    .unwrap_or(date)
                    .and_time(NaiveTime::MIN)
            }
            Self::Monthly => date.with_day(1).unwrap_or(date).and_time(NaiveTime::MIN),
        }
    }

    /// Move a period start `n` periods forward (or back when negative).
    fn step(self, start: NaiveDateTime, n: i64) -> Option<NaiveDateTime> {
        match self {
            Self::Hourly => start.checked_add_signed(Duration::try_hours(n)?),
            Self::Daily => add_days(start, n),
            Self::Weekly => add_days(start, n.checked_mul(7)?),
            Self::Monthly => {
                let months = Months::new(u32::try_from(n.unsigned_abs()).ok()?);
                if n >= 0 {
                    start.checked_add_months(months)
                } else {
                    start.checked_sub_months(months)
                }
            }
        }
    }

    fn label(self, local: NaiveDateTime) -> String {
        match self {
            Self::Hourly => local.format("%Y-%m-%d %H:00").to_string(),
            Self::Daily => local.format("%Y-%m-%d").to_string(),
            Self::Weekly => format!("week of {}", local.format("%Y-%m-%d")),
            Self::Monthly => local.format("%Y-%m").to_string(),
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn add_days(start: NaiveDateTime, n: i64) -> Option<NaiveDateTime> {
    let days = Days::new(n.unsigned_abs());
    if n >= 0 {
        start.checked_add_days(days)
    } else {
        start.checked_sub_days(days)
    }
}

/// Map a local wall-clock time to UTC.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times skipped by
/// a DST jump resolve to the first valid instant after the gap.
fn localize(tz: Tz, local: NaiveDateTime) -> ChargebackResult<DateTime<Utc>> {
    let resolved = match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Some(dt),
        LocalResult::None => (1..=4).find_map(|h| {
            let shifted = local.checked_add_signed(Duration::try_hours(h)?)?;
            tz.from_local_datetime(&shifted).earliest()
        }),
    };
    resolved
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            ChargebackError::InvalidIntervalConfiguration(format!(
                "{local} does not exist in timezone {tz}"
            ))
        })
}

/// Start of the hour containing `ts`, on the `tz` clock.
fn hour_floor(ts: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = ts.with_timezone(&tz);
    let into_hour = Duration::minutes(i64::from(local.minute()))
        + Duration::seconds(i64::from(local.second()))
        + Duration::nanoseconds(i64::from(local.nanosecond()));
    ts - into_hour
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> ChargebackResult<Tz> {
    name.parse::<Tz>().map_err(|_| {
        ChargebackError::InvalidIntervalConfiguration(format!("unknown timezone '{name}'"))
    })
}

/// One sub-interval of a report window, `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interval {
    /// 1-based position within the window
    pub index: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub label: String,
    /// Local calendar date the interval starts on
    #[serde(skip)]
    pub local_date: NaiveDate,
}

impl Interval {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// How the window edges are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowBounds {
    /// Fixed instants; a missing end means "now".
    Explicit {
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    },
    /// `interval_size` whole periods ending `end_interval_offset` periods
    /// before the current one ends.
    Offset {
        end_interval_offset: u32,
        interval_size: u32,
    },
}

/// Everything needed to partition a report window.
#[derive(Debug, Clone, Copy)]
pub struct WindowSpec {
    pub granularity: Granularity,
    pub tz: Tz,
    pub bounds: WindowBounds,
    /// Report run time; no interval extends past it
    pub now: DateTime<Utc>,
}

/// A partitioned report window.
#[derive(Debug, Clone, Serialize)]
pub struct ReportWindow {
    pub granularity: Granularity,
    #[serde(serialize_with = "serialize_tz")]
    pub tz: Tz,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub intervals: Vec<Interval>,
}

fn serialize_tz<S: serde::Serializer>(tz: &Tz, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(tz.name())
}

impl ReportWindow {
    pub fn build(spec: &WindowSpec) -> ChargebackResult<Self> {
        let WindowSpec {
            granularity,
            tz,
            bounds,
            now,
        } = *spec;
        let overflow = || {
            ChargebackError::InvalidIntervalConfiguration("window is out of range".into())
        };

        let (start, end) = match bounds {
            WindowBounds::Explicit { start, end } => {
                let end = end.unwrap_or(now);
                if end <= start {
                    return Err(ChargebackError::InvalidIntervalConfiguration(format!(
                        "end {end} is not after start {start}"
                    )));
                }
                (start, end)
            }
            WindowBounds::Offset {
                end_interval_offset,
                interval_size,
            } => {
                if interval_size == 0 {
                    return Err(ChargebackError::InvalidIntervalConfiguration(
                        "interval_size must be at least 1".into(),
                    ));
                }
                let current = granularity.floor(now.with_timezone(&tz).naive_local());
                let end_local = granularity
                    .step(current, 1 - i64::from(end_interval_offset))
                    .ok_or_else(overflow)?;
                let start_local = granularity
                    .step(end_local, -i64::from(interval_size))
                    .ok_or_else(overflow)?;
                (localize(tz, start_local)?, localize(tz, end_local)?)
            }
        };

        let capped_end = end.min(now);
        if capped_end <= start {
            return Err(ChargebackError::InvalidIntervalConfiguration(format!(
                "window starting {start} lies after the run time {now}"
            )));
        }

        let mut intervals = Vec::new();
        let mut cursor = start;
        let mut period = granularity.floor(start.with_timezone(&tz).naive_local());
        let mut period_start = match granularity {
            Granularity::Hourly => hour_floor(start, tz),
            _ => start,
        };
        while cursor < capped_end {
            // Hours are absolute so DST transitions neither repeat nor merge them
            let (boundary, next_local) = match granularity {
                Granularity::Hourly => {
                    let boundary = period_start
                        .checked_add_signed(Duration::hours(1))
                        .ok_or_else(overflow)?;
                    (boundary, boundary.with_timezone(&tz).naive_local())
                }
                _ => {
                    let next_local = granularity.step(period, 1).ok_or_else(overflow)?;
                    (localize(tz, next_local)?, next_local)
                }
            };
            let interval_end = boundary.min(capped_end);
            if interval_end > cursor {
                intervals.push(Interval {
                    index: intervals.len() + 1,
                    start: cursor,
                    end: interval_end,
                    label: granularity.label(period),
                    local_date: period.date(),
                });
                cursor = interval_end;
            }
            period = next_local;
            period_start = boundary;
        }

        Ok(Self {
            granularity,
            tz,
            start,
            end: capped_end,
            intervals,
        })
    }

    pub fn time_range(&self) -> crate::db::repos::TimeRange {
        crate::db::repos::TimeRange::new(self.start, self.end)
    }
}
