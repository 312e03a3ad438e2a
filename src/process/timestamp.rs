use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, Timelike};
use std::str::FromStr;

use crate::error::PipelineError;

/// Zone in which offset-bearing timestamps are read before taking the hour.
/// Naive timestamps are assumed to already be in this zone and are not shifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampZone {
    /// The host's local zone.
    Local,
    Fixed(FixedOffset),
}

impl FromStr for TimestampZone {
    type Err = PipelineError;

    /// `local`, `UTC`/`Z`, or `±HH:MM` / `±HHMM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("local") {
            return Ok(TimestampZone::Local);
        }
        if s.eq_ignore_ascii_case("utc") || s == "Z" {
            return Ok(TimestampZone::Fixed(FixedOffset::east_opt(0).unwrap()));
        }
        parse_offset(s)
            .map(TimestampZone::Fixed)
            .ok_or_else(|| PipelineError::Config(format!("unrecognised timezone `{}`", s)))
    }
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) || rest.len() > 5 {
        return None;
    }
    let hh: i32 = digits[0..2].parse().ok()?;
    let mm: i32 = digits[2..4].parse().ok()?;
    if hh > 23 || mm > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hh * 3600 + mm * 60))
}

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Hour of day (0–23) of a textual timestamp, or `None` if it cannot be parsed.
pub fn hour_of(raw: &str, zone: TimestampZone) -> Option<u32> {
    let s = raw.trim().trim_matches('"');

    let with_offset = DateTime::parse_from_rfc3339(s).ok().or_else(|| {
        OFFSET_FORMATS
            .iter()
            .find_map(|f| DateTime::parse_from_str(s, f).ok())
    });
    if let Some(dt) = with_offset {
        return Some(match zone {
            TimestampZone::Local => dt.with_timezone(&Local).hour(),
            TimestampZone::Fixed(off) => dt.with_timezone(&off).hour(),
        });
    }

    if let Some(naive) = NAIVE_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
    {
        return Some(naive.hour());
    }

    // a bare date is midnight
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(|_| 0)
}
