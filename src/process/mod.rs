// src/process/mod.rs

pub mod aggregate;
pub mod dedupe;
pub mod reader;
pub mod timestamp;
pub mod writer;

use arrow::{array::StringArray, record_batch::RecordBatch};

use crate::error::{PipelineError, Result};

pub use aggregate::{aggregate, AggregateOptions};
pub use dedupe::dedupe;
pub use reader::read_partition;
pub use writer::ResultWriter;

/// In-memory table passed between stages.
pub type Dataset = RecordBatch;

pub const IMPRESSION_ID: &str = "IMPRESSION_ID";
pub const IMPRESSION_DATETIME: &str = "IMPRESSION_DATETIME";
pub const CAMPAIGN_ID: &str = "CAMPAIGN_ID";
pub const IMPRESSION: &str = "IMPRESSION";
pub const HOUR: &str = "Hour";
pub const TOTAL_IMPRESSIONS: &str = "Total_Impressions";

/// Look up a text column by name.
pub(crate) fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| PipelineError::Type(format!("column `{}` not present in dataset", name)))?;
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| {
            PipelineError::Type(format!(
                "column `{}` is {:?}, expected Utf8",
                name,
                batch.column(idx).data_type()
            ))
        })
}

/// Run CPU-bound work on tokio's blocking pool; panics are re-raised on the caller.
pub(crate) async fn run_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(res) => res,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(PipelineError::Write(format!("blocking task cancelled: {}", e))),
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use arrow::{
        array::{ArrayRef, StringArray},
        datatypes::{DataType, Field, Schema},
        record_batch::RecordBatch,
    };
    use std::sync::Arc;

    /// Build an all-Utf8 batch; `None` cells become nulls.
    pub fn text_batch(headers: &[&str], rows: &[Vec<Option<&str>>]) -> RecordBatch {
        let schema = Schema::new(
            headers
                .iter()
                .map(|h| Field::new(*h, DataType::Utf8, true))
                .collect::<Vec<_>>(),
        );
        let columns: Vec<ArrayRef> = (0..headers.len())
            .map(|c| {
                let col: StringArray = rows.iter().map(|r| r[c]).collect();
                Arc::new(col) as ArrayRef
            })
            .collect();
        RecordBatch::try_new(Arc::new(schema), columns).unwrap()
    }

    /// Impression rows as (id, datetime, campaign, impression).
    pub fn impressions(rows: &[(&str, &str, &str, &str)]) -> RecordBatch {
        let rows: Vec<Vec<Option<&str>>> = rows
            .iter()
            .map(|(id, dt, c, n)| vec![Some(*id), Some(*dt), Some(*c), Some(*n)])
            .collect();
        text_batch(
            &[
                super::IMPRESSION_ID,
                super::IMPRESSION_DATETIME,
                super::CAMPAIGN_ID,
                super::IMPRESSION,
            ],
            &rows,
        )
    }
}
