use arrow::{array::BooleanArray, compute::filter_record_batch};
use std::collections::HashSet;
use tracing::info;

use super::{string_column, Dataset, IMPRESSION_DATETIME, IMPRESSION_ID};
use crate::error::{PipelineError, Result};

/// Drop rows repeating an (`IMPRESSION_ID`, `IMPRESSION_DATETIME`) pair.
/// The first occurrence is the one kept; nulls match other nulls.
pub fn dedupe(batch: &Dataset) -> Result<Dataset> {
    let ids = string_column(batch, IMPRESSION_ID)?;
    let times = string_column(batch, IMPRESSION_DATETIME)?;

    let mut seen: HashSet<(Option<&str>, Option<&str>)> =
        HashSet::with_capacity(batch.num_rows());
    let keep: BooleanArray = ids
        .iter()
        .zip(times.iter())
        .map(|key| Some(seen.insert(key)))
        .collect();

    let out = filter_record_batch(batch, &keep)
        .map_err(|e| PipelineError::Type(format!("filtering duplicates: {}", e)))?;
    info!(
        rows_in = batch.num_rows(),
        rows_out = out.num_rows(),
        dropped = batch.num_rows() - out.num_rows(),
        "removed duplicates"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::test_util::{impressions, text_batch};
    use crate::process::{CAMPAIGN_ID, IMPRESSION};

    fn keys(batch: &Dataset) -> Vec<(String, String)> {
        let ids = string_column(batch, IMPRESSION_ID).unwrap();
        let times = string_column(batch, IMPRESSION_DATETIME).unwrap();
        (0..batch.num_rows())
            .map(|i| (ids.value(i).to_string(), times.value(i).to_string()))
            .collect()
    }

    #[test]
    fn drops_repeated_keys() {
        let batch = impressions(&[
            ("a", "2024-03-07 10:00:00", "c1", "1"),
            ("a", "2024-03-07 10:00:00", "c1", "1"),
            ("a", "2024-03-07 11:00:00", "c1", "1"),
            ("b", "2024-03-07 10:00:00", "c2", "5"),
            ("a", "2024-03-07 10:00:00", "c9", "7"),
        ]);
        let out = dedupe(&batch).unwrap();
        assert_eq!(out.num_rows(), 3);

        let got = keys(&out);
        let unique: HashSet<_> = got.iter().collect();
        assert_eq!(unique.len(), got.len());
        assert!(got.contains(&("a".into(), "2024-03-07 11:00:00".into())));
        assert!(got.contains(&("b".into(), "2024-03-07 10:00:00".into())));
    }

    #[test]
    fn output_rows_come_from_input() {
        let batch = impressions(&[
            ("x", "t1", "c1", "1"),
            ("x", "t1", "c2", "2"),
            ("y", "t1", "c3", "3"),
        ]);
        let out = dedupe(&batch).unwrap();
        let campaigns = string_column(&out, CAMPAIGN_ID).unwrap();
        let counts = string_column(&out, IMPRESSION).unwrap();
        for i in 0..out.num_rows() {
            let pair = (campaigns.value(i), counts.value(i));
            assert!([("c1", "1"), ("c2", "2"), ("c3", "3")].contains(&pair));
        }
        assert_eq!(out.num_columns(), batch.num_columns());
    }

    #[test]
    fn null_keys_collapse_together() {
        let batch = text_batch(
            &[IMPRESSION_ID, IMPRESSION_DATETIME],
            &[
                vec![None, Some("t")],
                vec![None, Some("t")],
                vec![Some("a"), None],
            ],
        );
        assert_eq!(dedupe(&batch).unwrap().num_rows(), 2);
    }

    #[test]
    fn empty_in_empty_out() {
        let batch = impressions(&[]);
        assert_eq!(dedupe(&batch).unwrap().num_rows(), 0);
    }

    #[test]
    fn missing_key_column_is_type_error() {
        let batch = text_batch(&[IMPRESSION_ID], &[vec![Some("a")]]);
        assert!(matches!(dedupe(&batch), Err(PipelineError::Type(_))));
    }
}
