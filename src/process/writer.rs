use arrow::{csv::WriterBuilder, record_batch::RecordBatch};
use rayon::prelude::*;
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::{debug, info};

use super::Dataset;
use crate::error::{PipelineError, Result};

/// Output shards and the merged result share this naming convention.
pub const PART_PREFIX: &str = "part-";
const PART_SUFFIX: &str = ".csv";
const STAGING_DIR: &str = "_staging";

fn part_name(index: usize) -> String {
    format!("{}{:05}{}", PART_PREFIX, index, PART_SUFFIX)
}

/// Materializes a dataset as exactly one CSV file with a header.
///
/// Rows are written as parallel shards into a staging directory, then merged in order
/// into a single `part-00000.csv` before being renamed to the final name.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    shards: usize,
}

impl ResultWriter {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: shards.max(1),
        }
    }

    /// Write `batch` into `scratch_dir` and rename the result to `final_name`.
    pub fn write(&self, batch: &Dataset, scratch_dir: &Path, final_name: &str) -> Result<PathBuf> {
        self.materialize(batch, scratch_dir)?;
        rename_part_file(scratch_dir, final_name)
    }

    /// Shard, write and merge; returns the single merged part file.
    #[tracing::instrument(
        level = "info",
        skip(self, batch),
        fields(rows = batch.num_rows(), dir = %scratch_dir.display())
    )]
    pub fn materialize(&self, batch: &Dataset, scratch_dir: &Path) -> Result<PathBuf> {
        let start = Instant::now();
        let staging = scratch_dir.join(STAGING_DIR);
        fs::create_dir_all(&staging)
            .map_err(|e| PipelineError::write_io(&format!("creating {}", staging.display()), e))?;

        let rows = batch.num_rows();
        let shards = self.shards.min(rows).max(1);
        let per_shard = rows.div_ceil(shards).max(1);

        let parts: Vec<PathBuf> = (0..shards)
            .into_par_iter()
            .map(|i| {
                let offset = (i * per_shard).min(rows);
                let len = per_shard.min(rows - offset);
                let path = staging.join(part_name(i));
                write_part(&batch.slice(offset, len), &path)?;
                Ok(path)
            })
            .collect::<Result<_>>()?;
        debug!(shards = parts.len(), "wrote shards");

        let merged = scratch_dir.join(part_name(0));
        let written = merge_parts(batch, &parts, &merged)?;
        if written != rows {
            return Err(PipelineError::Write(format!(
                "merged {} rows but dataset has {}",
                written, rows
            )));
        }
        fs::remove_dir_all(&staging)
            .map_err(|e| PipelineError::write_io(&format!("removing {}", staging.display()), e))?;

        info!(path = %merged.display(), shards, elapsed = ?start.elapsed(), "materialized result");
        Ok(merged)
    }
}

fn write_part(batch: &RecordBatch, path: &Path) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| PipelineError::write_io(&format!("creating {}", path.display()), e))?;
    let mut writer = WriterBuilder::new().with_header(true).build(file);
    writer
        .write(batch)
        .map_err(|e| PipelineError::Write(format!("writing {}: {}", path.display(), e)))?;
    Ok(())
}

/// Concatenate shard files into `dest` under a single header taken from the schema.
fn merge_parts(batch: &RecordBatch, parts: &[PathBuf], dest: &Path) -> Result<usize> {
    let schema = batch.schema();
    let header: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();

    let mut out = csv::Writer::from_path(dest)
        .map_err(|e| PipelineError::Write(format!("creating {}: {}", dest.display(), e)))?;
    out.write_record(&header)
        .map_err(|e| PipelineError::Write(e.to_string()))?;

    let mut rows = 0;
    for part in parts {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(part)
            .map_err(|e| PipelineError::Write(format!("opening {}: {}", part.display(), e)))?;
        for record in rdr.records() {
            let record = record
                .map_err(|e| PipelineError::Write(format!("reading {}: {}", part.display(), e)))?;
            out.write_record(&record)
                .map_err(|e| PipelineError::Write(e.to_string()))?;
            rows += 1;
        }
    }
    out.flush()
        .map_err(|e| PipelineError::write_io(&format!("flushing {}", dest.display()), e))?;
    Ok(rows)
}

/// Data files in `dir` following the part naming convention, sorted by name.
pub fn find_part_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| PipelineError::write_io(&format!("listing {}", dir.display()), e))?;

    let mut parts = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::write_io("reading directory entry", e))?;
        let path = entry.path();
        let is_part = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(PART_PREFIX) && n.ends_with(PART_SUFFIX))
            .unwrap_or(false);
        if is_part && path.is_file() {
            parts.push(path);
        }
    }
    parts.sort();
    Ok(parts)
}

/// Rename the single part file in `dir` to `final_name`.
/// Zero or several part files means the output is incomplete or ambiguous, and is an error.
pub fn rename_part_file(dir: &Path, final_name: &str) -> Result<PathBuf> {
    let parts = find_part_files(dir)?;
    let part = match parts.as_slice() {
        [one] => one,
        [] => {
            return Err(PipelineError::Write(format!(
                "no part file found in {}",
                dir.display()
            )))
        }
        many => {
            return Err(PipelineError::Write(format!(
                "expected one part file in {}, found {}",
                dir.display(),
                many.len()
            )))
        }
    };

    let target = dir.join(final_name);
    fs::rename(part, &target).map_err(|e| {
        PipelineError::write_io(
            &format!("renaming {} -> {}", part.display(), target.display()),
            e,
        )
    })?;
    info!(from = %part.display(), to = %target.display(), "renamed result file");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::reader::parse_csv_files;
    use crate::process::test_util::impressions;
    use crate::process::timestamp::TimestampZone;
    use crate::process::{
        aggregate, string_column, AggregateOptions, CAMPAIGN_ID, HOUR, TOTAL_IMPRESSIONS,
    };
    use chrono::FixedOffset;

    fn integral_utc() -> AggregateOptions {
        AggregateOptions {
            integral_totals: true,
            ..AggregateOptions::new(TimestampZone::Fixed(FixedOffset::east_opt(0).unwrap()))
        }
    }

    fn aggregated() -> Dataset {
        let rows: Vec<(String, String, String, String)> = (0..50)
            .map(|i| {
                (
                    i.to_string(),
                    format!("2024-03-07 {:02}:00:00", i % 5),
                    format!("camp,{}", i % 3),
                    "2".to_string(),
                )
            })
            .collect();
        let refs: Vec<(&str, &str, &str, &str)> = rows
            .iter()
            .map(|(a, b, c, d)| (a.as_str(), b.as_str(), c.as_str(), d.as_str()))
            .collect();
        aggregate(&impressions(&refs), &integral_utc()).unwrap()
    }

    fn read_back(path: &Path) -> Dataset {
        let bytes = fs::read(path).unwrap();
        parse_csv_files(&[(path.display().to_string(), bytes)]).unwrap()
    }

    #[test]
    fn writes_one_file_that_reads_back() {
        let scratch = tempfile::tempdir().unwrap();
        let batch = aggregated();
        let out = ResultWriter::new(4)
            .write(&batch, scratch.path(), "daily_agg_20240307_ZS.csv")
            .unwrap();

        assert_eq!(out, scratch.path().join("daily_agg_20240307_ZS.csv"));
        let names: Vec<_> = fs::read_dir(scratch.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1, "staging and shards must be gone: {:?}", names);

        let back = read_back(&out);
        assert_eq!(back.num_rows(), batch.num_rows());
        let schema = back.schema();
        let header: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(header, vec![CAMPAIGN_ID, HOUR, TOTAL_IMPRESSIONS]);

        // campaign ids contain commas, so quoting must survive shard + merge
        let orig = string_column(&batch, CAMPAIGN_ID).unwrap();
        let got = string_column(&back, CAMPAIGN_ID).unwrap();
        let hours = string_column(&back, HOUR).unwrap();
        let totals = string_column(&back, TOTAL_IMPRESSIONS).unwrap();
        for i in 0..batch.num_rows() {
            assert_eq!(orig.value(i), got.value(i));
            assert!(hours.value(i).parse::<i32>().unwrap() < 5);
        }
        let sum: i64 = (0..back.num_rows())
            .map(|i| totals.value(i).parse::<i64>().unwrap())
            .sum();
        assert_eq!(sum, 100);
    }

    #[test]
    fn empty_dataset_writes_header_only() {
        let scratch = tempfile::tempdir().unwrap();
        let batch = aggregate(&impressions(&[]), &integral_utc()).unwrap();
        let out = ResultWriter::new(3)
            .write(&batch, scratch.path(), "out.csv")
            .unwrap();
        let text = fs::read_to_string(out).unwrap();
        assert_eq!(text.trim_end(), "CAMPAIGN_ID,Hour,Total_Impressions");
    }

    #[test]
    fn two_part_files_fail_instead_of_picking_one() {
        let scratch = tempfile::tempdir().unwrap();
        fs::write(scratch.path().join("part-00000.csv"), "a\n1\n").unwrap();
        fs::write(scratch.path().join("part-00001.csv"), "a\n2\n").unwrap();

        let err = rename_part_file(scratch.path(), "final.csv").unwrap_err();
        assert!(matches!(err, PipelineError::Write(ref m) if m.contains("found 2")));
        assert!(!scratch.path().join("final.csv").exists());
    }

    #[test]
    fn no_part_file_is_write_error() {
        let scratch = tempfile::tempdir().unwrap();
        fs::write(scratch.path().join("_SUCCESS"), "").unwrap();
        let err = rename_part_file(scratch.path(), "final.csv").unwrap_err();
        assert!(matches!(err, PipelineError::Write(_)));
    }

    #[test]
    fn ignores_non_part_files() {
        let scratch = tempfile::tempdir().unwrap();
        fs::write(scratch.path().join("part-00000.csv"), "a\n1\n").unwrap();
        fs::write(scratch.path().join(".part-00000.csv.crc"), "").unwrap();
        fs::write(scratch.path().join("_SUCCESS"), "").unwrap();

        let out = rename_part_file(scratch.path(), "final.csv").unwrap();
        assert_eq!(fs::read_to_string(out).unwrap(), "a\n1\n");
    }
}
