use arrow::{
    array::{Array, ArrayRef, Float64Array, Int32Array, Int64Array, StringArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{info, warn};

use super::timestamp::{hour_of, TimestampZone};
use super::{
    string_column, Dataset, CAMPAIGN_ID, HOUR, IMPRESSION, IMPRESSION_DATETIME, TOTAL_IMPRESSIONS,
};
use crate::error::{PipelineError, Result};

/// Running total that stays integral until a fractional value shows up.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Total {
    Empty,
    Int(i64),
    Float(f64),
}

impl Total {
    fn add(self, v: Number) -> Self {
        match (self, v) {
            (Total::Empty, Number::Int(i)) => Total::Int(i),
            (Total::Empty, Number::Float(f)) => Total::Float(f),
            (Total::Int(a), Number::Int(b)) => match a.checked_add(b) {
                Some(s) => Total::Int(s),
                None => Total::Float(a as f64 + b as f64),
            },
            (Total::Int(a), Number::Float(b)) => Total::Float(a as f64 + b),
            (Total::Float(a), Number::Int(b)) => Total::Float(a + b as f64),
            (Total::Float(a), Number::Float(b)) => Total::Float(a + b),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

fn parse_impression(raw: &str) -> Option<Number> {
    let s = raw.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Number::Int(i));
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Number::Float)
}

type GroupKey = (Option<String>, Option<i32>);

/// How hours are derived and totals are typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateOptions {
    pub zone: TimestampZone,
    /// Emit Int64 totals when every summed value is integral. Off: always Float64.
    pub integral_totals: bool,
    /// Fail on an unreadable timestamp. Off: the row is grouped under a null hour.
    pub strict_timestamps: bool,
}

impl AggregateOptions {
    pub fn new(zone: TimestampZone) -> Self {
        Self {
            zone,
            integral_totals: false,
            strict_timestamps: false,
        }
    }
}

/// Sum `IMPRESSION` per (`CAMPAIGN_ID`, hour of `IMPRESSION_DATETIME`).
///
/// Output columns are `CAMPAIGN_ID`, `Hour`, `Total_Impressions`, one row per key, sorted by key.
/// `Total_Impressions` is Float64 unless `integral_totals` is set and every value is an integer.
pub fn aggregate(batch: &Dataset, opts: &AggregateOptions) -> Result<Dataset> {
    let campaigns = string_column(batch, CAMPAIGN_ID)?;
    let times = string_column(batch, IMPRESSION_DATETIME)?;
    let counts = string_column(batch, IMPRESSION)?;

    let mut groups: BTreeMap<GroupKey, Total> = BTreeMap::new();
    let mut unreadable = 0usize;
    for row in 0..batch.num_rows() {
        let hour = match times.is_null(row) {
            true => None,
            false => {
                let raw = times.value(row);
                match hour_of(raw, opts.zone) {
                    Some(h) => Some(h as i32),
                    None if opts.strict_timestamps => {
                        return Err(PipelineError::Type(format!(
                            "row {}: cannot read {} value `{}` as a timestamp",
                            row, IMPRESSION_DATETIME, raw
                        )))
                    }
                    None => {
                        unreadable += 1;
                        None
                    }
                }
            }
        };
        let campaign = (!campaigns.is_null(row)).then(|| campaigns.value(row).to_string());

        let total = groups.entry((campaign, hour)).or_insert(Total::Empty);
        if counts.is_null(row) {
            continue;
        }
        let raw = counts.value(row);
        let n = parse_impression(raw).ok_or_else(|| {
            PipelineError::Type(format!(
                "row {}: {} value `{}` is not numeric",
                row, IMPRESSION, raw
            ))
        })?;
        *total = total.add(n);
    }

    if unreadable > 0 {
        warn!(rows = unreadable, "unreadable timestamps grouped under a null hour");
    }

    let all_int = opts.integral_totals
        && groups
            .values()
            .all(|t| matches!(t, Total::Int(_) | Total::Empty));

    let campaign_col: StringArray = groups.keys().map(|(c, _)| c.as_deref()).collect();
    let hour_col: Int32Array = groups.keys().map(|(_, h)| *h).collect();
    let (total_type, total_col): (DataType, ArrayRef) = if all_int {
        let arr: Int64Array = groups
            .values()
            .map(|t| match t {
                Total::Int(i) => Some(*i),
                _ => None,
            })
            .collect();
        (DataType::Int64, Arc::new(arr))
    } else {
        let arr: Float64Array = groups
            .values()
            .map(|t| match t {
                Total::Int(i) => Some(*i as f64),
                Total::Float(f) => Some(*f),
                Total::Empty => None,
            })
            .collect();
        (DataType::Float64, Arc::new(arr))
    };

    let schema = Schema::new(vec![
        Field::new(CAMPAIGN_ID, DataType::Utf8, true),
        Field::new(HOUR, DataType::Int32, true),
        Field::new(TOTAL_IMPRESSIONS, total_type, true),
    ]);
    let out = RecordBatch::try_new(
        Arc::new(schema),
        vec![Arc::new(campaign_col), Arc::new(hour_col), total_col],
    )
    .map_err(|e| PipelineError::Type(format!("assembling aggregate: {}", e)))?;

    info!(rows_in = batch.num_rows(), groups = out.num_rows(), "aggregated impressions");
    Ok(out)
}
