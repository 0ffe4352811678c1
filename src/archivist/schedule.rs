use crate::archivist::config::ScheduleConfig;
use crate::error::ArchivistError;
use anyhow::Result;
use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::time::Duration;

/// Interval mode kicks in below a full day; otherwise the cycle runs daily.
const DAILY_THRESHOLD_HOURS: u64 = 24;

#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    Interval(Duration),
    Daily { at: NaiveTime, zone: Tz },
}

/// Accepts `04:00`, `04:00:00`, `4h`, `4h30` and a bare hour.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let clean = raw.trim().to_ascii_lowercase().replace('h', ":");
    if clean.is_empty() {
        return None;
    }
    let mut parts = clean.split(':');
    let hour = parts.next()?.trim().parse::<u32>().ok()?;
    let minute = match parts.next().map(str::trim) {
        None | Some("") => 0,
        Some(m) => m.parse::<u32>().ok()?,
    };
    let second = match parts.next().map(str::trim) {
        None | Some("") => 0,
        Some(s) => s.parse::<u32>().ok()?,
    };
    if parts.next().is_some() {
        return None;
    }
    NaiveTime::from_hms_opt(hour, minute, second)
}

impl Schedule {
    pub fn from_config(cfg: &ScheduleConfig) -> Result<Self> {
        if cfg.interval_hours < DAILY_THRESHOLD_HOURS {
            return Ok(Self::Interval(Duration::from_secs(
                cfg.interval_hours.saturating_mul(3600),
            )));
        }
        let at = parse_time_of_day(&cfg.time).ok_or_else(|| {
            ArchivistError::InvalidConfig(format!("schedule.time `{}` is invalid", cfg.time))
        })?;
        let zone = match cfg.timezone.as_deref() {
            Some(name) => name.parse::<Tz>().map_err(|_| {
                ArchivistError::InvalidConfig(format!("schedule.timezone `{name}` is unknown"))
            })?,
            None => Tz::UTC,
        };
        Ok(Self::Daily { at, zone })
    }

    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Interval(every) => {
                now + chrono::Duration::from_std(*every).unwrap_or(chrono::Duration::hours(1))
            }
            Self::Daily { at, zone } => next_daily(now, zone, *at),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Interval(every) => format!("every {}h", every.as_secs() / 3600),
            Self::Daily { at, zone } => {
                format!("daily at {} ({})", at.format("%H:%M"), zone.name())
            }
        }
    }
}

fn next_daily<Z: TimeZone>(now: DateTime<Utc>, zone: &Z, at: NaiveTime) -> DateTime<Utc> {
    let local_now = now.with_timezone(zone);
    let mut day = local_now.date_naive();
    // Two tries cover "later today" and "tomorrow"; a third absorbs a DST gap.
    for _ in 0..3 {
        if let Some(candidate) = zone.from_local_datetime(&day.and_time(at)).earliest() {
            let candidate = candidate.with_timezone(&Utc);
            if candidate > now {
                return candidate;
            }
        }
        day = match day.checked_add_days(Days::new(1)) {
            Some(next) => next,
            None => break,
        };
    }
    now + chrono::Duration::days(1)
}

pub fn wait_duration(schedule: &Schedule, now: DateTime<Utc>) -> (Duration, DateTime<Utc>) {
    let next = schedule.next_run_after(now);
    let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
    (wait, next)
}
