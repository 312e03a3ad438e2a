// src/pipeline.rs

use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tracing::info;

use crate::config::{self, AppConfig, JobSettings};
use crate::date::{ProcessDate, RunPaths};
use crate::error::{AtStage, PipelineError, Result, Stage, StageError};
use crate::process::{self, run_blocking, writer, AggregateOptions, ResultWriter};
use crate::storage::{LocalStore, ObjectStore, S3Store};

const SCRATCH_PREFIX: &str = "temp_csv_";

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub rows_read: usize,
    pub rows_deduplicated: usize,
    pub groups: usize,
    pub bucket: String,
    pub target_key: String,
    pub elapsed: Duration,
}

fn enter(stage: Stage) {
    info!(stage = %stage, "stage reached");
}

/// Load the config, build the store it describes, and run the job for `date`.
pub async fn run_with_config(
    config_path: &Path,
    date: &ProcessDate,
) -> std::result::Result<RunSummary, StageError> {
    enter(Stage::Init);
    let cfg = config::load(config_path).at(Stage::CredentialsLoaded)?;
    enter(Stage::CredentialsLoaded);

    match &cfg.job.local_root {
        Some(root) => {
            info!(root = %root.display(), "using local directory store");
            let store = LocalStore::new(root.clone());
            Pipeline::from_config(store, &cfg)
                .at(Stage::CredentialsLoaded)?
                .run(date)
                .await
        }
        None => {
            let store = S3Store::connect(&cfg.credentials, &cfg.aws)
                .await
                .at(Stage::Authenticated)?;
            Pipeline::from_config(store, &cfg)
                .at(Stage::CredentialsLoaded)?
                .run(date)
                .await
        }
    }
}

/// One day's read → dedupe → aggregate → write → upload sequence against a store.
pub struct Pipeline<S: ObjectStore> {
    store: S,
    bucket: String,
    label: String,
    scratch_root: PathBuf,
    aggregate: AggregateOptions,
    writer: ResultWriter,
    fetch_concurrency: usize,
}

impl<S: ObjectStore> Pipeline<S> {
    pub fn new(store: S, job: &JobSettings) -> Result<Self> {
        Ok(Self {
            store,
            bucket: job.bucket.clone(),
            label: job.label.clone(),
            scratch_root: job.scratch_root.clone(),
            aggregate: job.aggregate_options()?,
            writer: ResultWriter::new(job.output_shards),
            fetch_concurrency: job.fetch_concurrency,
        })
    }

    pub fn from_config(store: S, cfg: &AppConfig) -> Result<Self> {
        Self::new(store, &cfg.job)
    }

    /// Run every stage after credentials are loaded. The scratch directory is removed
    /// whether or not the run succeeds.
    #[tracing::instrument(level = "info", skip(self, date), fields(date = %date))]
    pub async fn run(&self, date: &ProcessDate) -> std::result::Result<RunSummary, StageError> {
        let start = Instant::now();
        let paths = RunPaths::for_date(date, &self.bucket, &self.label);
        info!(source = %paths.source_uri(), destination = %paths.target_uri(), "starting run");

        self.store
            .authenticate(&self.bucket)
            .await
            .at(Stage::Authenticated)?;
        enter(Stage::Authenticated);

        let raw = process::read_partition(&self.store, &self.bucket, date, self.fetch_concurrency)
            .await
            .at(Stage::Read)?;
        let rows_read = raw.num_rows();
        enter(Stage::Read);

        let deduped = run_blocking(move || process::dedupe(&raw))
            .await
            .at(Stage::Deduplicated)?;
        let rows_deduplicated = deduped.num_rows();
        enter(Stage::Deduplicated);

        let opts = self.aggregate;
        let aggregated = run_blocking(move || process::aggregate(&deduped, &opts))
            .await
            .at(Stage::Aggregated)?;
        let groups = aggregated.num_rows();
        enter(Stage::Aggregated);

        let scratch = self.acquire_scratch().at(Stage::LocalWritten)?;
        let scratch_path = scratch.path().to_path_buf();

        let result_writer = self.writer.clone();
        let dir = scratch_path.clone();
        run_blocking(move || result_writer.materialize(&aggregated, &dir))
            .await
            .at(Stage::LocalWritten)?;
        enter(Stage::LocalWritten);

        let local_file =
            writer::rename_part_file(&scratch_path, &paths.target_file).at(Stage::Renamed)?;
        enter(Stage::Renamed);

        self.store
            .put_file(&local_file, &paths.bucket, &paths.target_key)
            .await
            .at(Stage::Uploaded)?;
        enter(Stage::Uploaded);

        scratch
            .close()
            .map_err(|e| PipelineError::write_io("removing scratch directory", e))
            .at(Stage::CleanedUp)?;
        enter(Stage::CleanedUp);

        let summary = RunSummary {
            rows_read,
            rows_deduplicated,
            groups,
            bucket: paths.bucket,
            target_key: paths.target_key,
            elapsed: start.elapsed(),
        };
        info!(
            rows_read = summary.rows_read,
            rows_deduplicated = summary.rows_deduplicated,
            groups = summary.groups,
            uploaded = %format!("s3://{}/{}", summary.bucket, summary.target_key),
            elapsed = ?summary.elapsed,
            "run complete"
        );
        Ok(summary)
    }

    /// Fresh, uniquely named scratch directory, deleted when dropped.
    fn acquire_scratch(&self) -> Result<tempfile::TempDir> {
        std::fs::create_dir_all(&self.scratch_root).map_err(|e| {
            PipelineError::write_io(&format!("creating {}", self.scratch_root.display()), e)
        })?;
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&self.scratch_root)
            .map_err(|e| PipelineError::write_io("creating scratch directory", e))?;
        info!(path = %dir.path().display(), "acquired scratch directory");
        Ok(dir)
    }
}
