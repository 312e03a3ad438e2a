// src/date.rs

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{fmt, str::FromStr};

use crate::error::{PipelineError, Result};

static DATE_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,4}/\d{1,2}/\d{1,2}$").unwrap());

/// Calendar date the job runs for, as given on the command line (`YYYY/MM/DD`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessDate(NaiveDate);

impl ProcessDate {
    /// `YYYY/MM/DD`, zero-padded; also the partition prefix layout.
    pub fn slashed(&self) -> String {
        self.0.format("%Y/%m/%d").to_string()
    }

    /// `YYYYMMDD`
    pub fn compact(&self) -> String {
        format!("{:04}{:02}{:02}", self.0.year(), self.0.month(), self.0.day())
    }
}

impl FromStr for ProcessDate {
    type Err = PipelineError;

    /// Accepts only a real calendar date written exactly as `YYYY/MM/DD`.
    fn from_str(s: &str) -> Result<Self> {
        let parsed = if DATE_SHAPE.is_match(s) {
            NaiveDate::parse_from_str(s, "%Y/%m/%d").ok()
        } else {
            None
        };
        let date = parsed.ok_or_else(|| {
            PipelineError::Input(format!(
                "invalid date format `{}`, expected YYYY/MM/DD",
                s
            ))
        })?;

        let out = ProcessDate(date);
        if out.slashed() != s {
            return Err(PipelineError::Input(format!(
                "date `{}` must be zero-padded as YYYY/MM/DD",
                s
            )));
        }
        Ok(out)
    }
}

impl fmt::Display for ProcessDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.slashed())
    }
}

/// Every location a run touches, derived from the date, bucket and label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub bucket: String,
    /// `YYYY/MM/DD/`
    pub source_prefix: String,
    /// `daily_agg_YYYYMMDD_<LABEL>.csv`
    pub target_file: String,
    /// `results/YYYY/MM/DD/<target_file>`
    pub target_key: String,
}

impl RunPaths {
    pub fn for_date(date: &ProcessDate, bucket: &str, label: &str) -> Self {
        let slashed = date.slashed();
        let target_file = format!("daily_agg_{}_{}.csv", date.compact(), label);
        Self {
            bucket: bucket.to_string(),
            source_prefix: format!("{}/", slashed),
            target_key: format!("results/{}/{}", slashed, target_file),
            target_file,
        }
    }

    /// `s3://bucket/YYYY/MM/DD/*.csv`, for logs only.
    pub fn source_uri(&self) -> String {
        format!("s3://{}/{}*.csv", self.bucket, self.source_prefix)
    }

    pub fn target_uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.target_key)
    }
}
