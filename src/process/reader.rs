use arrow::{
    array::{ArrayRef, StringBuilder},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use csv::ReaderBuilder;
use futures::{stream, StreamExt, TryStreamExt};
use std::{sync::Arc, time::Instant};
use tracing::{debug, info, warn};

use super::{run_blocking, Dataset};
use crate::date::ProcessDate;
use crate::error::{PipelineError, Result};
use crate::storage::{ObjectInfo, ObjectStore};

/// Keys matching `<prefix>*.csv`: direct children of the prefix ending in `.csv` (case-sensitive).
/// Hidden and marker files (leading `.` or `_`) are skipped.
pub fn select_csv_keys(prefix: &str, objects: &[ObjectInfo]) -> Vec<String> {
    objects
        .iter()
        .filter_map(|o| {
            let name = o.key.strip_prefix(prefix)?;
            let hidden = name.starts_with('.') || name.starts_with('_');
            if hidden || name.contains('/') || !name.ends_with(".csv") {
                return None;
            }
            Some(o.key.clone())
        })
        .collect()
}

/// List, fetch and parse every CSV for `date` into one dataset.
#[tracing::instrument(level = "info", skip(store, date), fields(date = %date))]
pub async fn read_partition<S: ObjectStore + ?Sized>(
    store: &S,
    bucket: &str,
    date: &ProcessDate,
    fetch_concurrency: usize,
) -> Result<Dataset> {
    let prefix = format!("{}/", date.slashed());
    let start = Instant::now();

    let listed = store.list(bucket, &prefix).await?;
    let keys = select_csv_keys(&prefix, &listed);
    if keys.is_empty() {
        return Err(PipelineError::NotFound(format!(
            "no CSV objects under s3://{}/{}",
            bucket, prefix
        )));
    }
    info!(
        files = keys.len(),
        skipped = listed.len() - keys.len(),
        "found source files"
    );

    let files: Vec<(String, Vec<u8>)> = stream::iter(keys)
        .map(|key| async move {
            let bytes = store.get(bucket, &key).await?;
            debug!(key = %key, bytes = bytes.len(), "fetched");
            Ok::<_, PipelineError>((key, bytes))
        })
        .buffered(fetch_concurrency.max(1))
        .try_collect()
        .await?;

    let batch = run_blocking(move || parse_csv_files(&files)).await?;
    info!(rows = batch.num_rows(), elapsed = ?start.elapsed(), "read source data");
    Ok(batch)
}

/// Union CSV files into one all-text dataset whose schema comes from the first file's header.
/// Later headers are skipped; short rows are padded with nulls and long rows truncated.
pub fn parse_csv_files(files: &[(String, Vec<u8>)]) -> Result<Dataset> {
    let mut headers: Option<Vec<String>> = None;
    let mut builders: Vec<StringBuilder> = Vec::new();

    for (name, data) in files {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(data.as_slice());

        let file_headers = rdr
            .headers()
            .map_err(|e| PipelineError::Type(format!("reading header of {}: {}", name, e)))?
            .clone();
        if file_headers.is_empty() {
            warn!(file = %name, "skipping empty file");
            continue;
        }

        let width = match &headers {
            Some(h) => {
                if file_headers.len() != h.len() {
                    warn!(
                        file = %name,
                        expected = h.len(),
                        found = file_headers.len(),
                        "header width differs from first file"
                    );
                }
                h.len()
            }
            None => {
                let names: Vec<String> = file_headers
                    .iter()
                    .enumerate()
                    .map(|(i, h)| {
                        let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
                        h.trim().to_string()
                    })
                    .collect();
                if names.is_empty() || names.iter().all(String::is_empty) {
                    return Err(PipelineError::Type(format!("{} has no header row", name)));
                }
                builders = names.iter().map(|_| StringBuilder::new()).collect();
                let width = names.len();
                headers = Some(names);
                width
            }
        };

        for (idx, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| {
                PipelineError::Type(format!("CSV parse error in {} at record {}: {}", name, idx, e))
            })?;
            for (col, builder) in builders.iter_mut().enumerate().take(width) {
                match record.get(col) {
                    Some(v) if !v.is_empty() => builder.append_value(v),
                    _ => builder.append_null(),
                }
            }
        }
    }

    let headers = headers
        .ok_or_else(|| PipelineError::NotFound("every source CSV file is empty".into()))?;
    let schema = Schema::new(
        headers
            .iter()
            .map(|h| Field::new(h, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    );
    let columns: Vec<ArrayRef> = builders
        .into_iter()
        .map(|mut b| Arc::new(b.finish()) as ArrayRef)
        .collect();

    RecordBatch::try_new(Arc::new(schema), columns)
        .map_err(|e| PipelineError::Type(format!("assembling dataset: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{string_column, CAMPAIGN_ID, IMPRESSION_ID};
    use crate::storage::LocalStore;
    use arrow::array::Array;

    fn file(name: &str, body: &str) -> (String, Vec<u8>) {
        (name.to_string(), body.as_bytes().to_vec())
    }

    #[test]
    fn unions_files_under_first_header() {
        let files = vec![
            file(
                "a.csv",
                "IMPRESSION_ID,IMPRESSION_DATETIME,CAMPAIGN_ID,IMPRESSION\n1,2024-03-07 10:00:00,c1,3\n",
            ),
            file(
                "b.csv",
                "id,ts,campaign,n\n2,2024-03-07 11:00:00,c2,4\n3,2024-03-07 11:30:00,,\n",
            ),
        ];
        let batch = parse_csv_files(&files).unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.schema().field(0).name(), IMPRESSION_ID);

        let campaigns = string_column(&batch, CAMPAIGN_ID).unwrap();
        assert_eq!(campaigns.value(1), "c2");
        assert!(campaigns.is_null(2));
    }

    #[test]
    fn pads_short_rows_and_truncates_long_ones() {
        let files = vec![file("a.csv", "A,B,C\n1,2\n1,2,3,4\n")];
        let batch = parse_csv_files(&files).unwrap();
        assert_eq!(batch.num_columns(), 3);
        let c = string_column(&batch, "C").unwrap();
        assert!(c.is_null(0));
        assert_eq!(c.value(1), "3");
    }

    #[test]
    fn strips_bom_from_first_header() {
        let files = vec![file("a.csv", "\u{feff}IMPRESSION_ID,X\n1,2\n")];
        let batch = parse_csv_files(&files).unwrap();
        assert_eq!(batch.schema().field(0).name(), IMPRESSION_ID);
    }

    #[test]
    fn header_only_file_gives_empty_dataset() {
        let batch = parse_csv_files(&[file("a.csv", "A,B\n")]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 2);
    }

    #[test]
    fn empty_files_are_skipped() {
        let files = vec![file("empty.csv", ""), file("a.csv", "A\n1\n")];
        let batch = parse_csv_files(&files).unwrap();
        assert_eq!(batch.num_rows(), 1);

        let err = parse_csv_files(&[file("empty.csv", "")]).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[test]
    fn selects_direct_csv_children_only() {
        let objs: Vec<ObjectInfo> = [
            "2024/03/07/a.csv",
            "2024/03/07/b.CSV",
            "2024/03/07/c.csv",
            "2024/03/07/notes.txt",
            "2024/03/07/nested/d.csv",
            "2024/03/07/_SUCCESS.csv",
            "2024/03/07/.e.csv",
            "2024/03/07/_temporary.csv",
        ]
        .iter()
        .map(|k| ObjectInfo {
            key: k.to_string(),
            size: 1,
        })
        .collect();
        assert_eq!(
            select_csv_keys("2024/03/07/", &objs),
            vec!["2024/03/07/a.csv", "2024/03/07/c.csv"]
        );
    }

    #[tokio::test]
    async fn empty_partition_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("bucket/2024/03/07");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("readme.txt"), "nothing here").unwrap();

        let store = LocalStore::new(root.path());
        let date: ProcessDate = "2024/03/07".parse().unwrap();
        let err = read_partition(&store, "bucket", &date, 4).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn reads_partition_from_store() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("bucket/2024/03/07");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("part1.csv"), "A,B\n1,x\n2,y\n").unwrap();
        std::fs::write(dir.join("part2.csv"), "A,B\n3,z\n").unwrap();

        let store = LocalStore::new(root.path());
        let date: ProcessDate = "2024/03/07".parse().unwrap();
        let batch = read_partition(&store, "bucket", &date, 2).await.unwrap();
        assert_eq!(batch.num_rows(), 3);
        let a = string_column(&batch, "A").unwrap();
        assert_eq!(a.value(2), "3");
    }
}
