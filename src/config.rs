// src/config.rs

use serde::Deserialize;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::process::{timestamp::TimestampZone, AggregateOptions};

/// Default location of the job configuration, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
/// Bucket holding both the raw logs and the results.
pub const DEFAULT_BUCKET: &str = "global-interview-bucket";
/// Short label embedded in the result filename.
pub const DEFAULT_LABEL: &str = "ZS";

/// Access key pair handed to the storage client. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Deserialize)]
struct RawAws {
    #[serde(default)]
    access_key: Option<String>,
    #[serde(default)]
    secret_key: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
}

/// Non-secret connection settings from the `aws` section.
#[derive(Debug, Clone, Default)]
pub struct AwsSettings {
    /// Falls back to the SDK region chain when unset.
    pub region: Option<String>,
    /// S3-compatible endpoint (LocalStack, MinIO); enables path-style addressing.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub bucket: String,
    pub label: String,
    /// Directory under which the per-run scratch directory is created.
    pub scratch_root: PathBuf,
    /// `local`, `UTC` or a fixed offset such as `+10:00`.
    pub timezone: String,
    pub output_shards: usize,
    pub fetch_concurrency: usize,
    /// Keep `Total_Impressions` integral when every value is an integer.
    pub integral_totals: bool,
    /// Fail on an unreadable `IMPRESSION_DATETIME` rather than grouping it under a null hour.
    pub strict_timestamps: bool,
    /// When set, `<local_root>/<bucket>/...` stands in for the remote bucket.
    pub local_root: Option<PathBuf>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            label: DEFAULT_LABEL.to_string(),
            scratch_root: PathBuf::from("."),
            timezone: "local".to_string(),
            output_shards: 4,
            fetch_concurrency: 8,
            integral_totals: false,
            strict_timestamps: false,
            local_root: None,
        }
    }
}

impl JobSettings {
    pub fn timestamp_zone(&self) -> Result<TimestampZone> {
        self.timezone.parse()
    }

    pub fn aggregate_options(&self) -> Result<AggregateOptions> {
        Ok(AggregateOptions {
            zone: self.timestamp_zone()?,
            integral_totals: self.integral_totals,
            strict_timestamps: self.strict_timestamps,
        })
    }
}

#[derive(Clone, Deserialize)]
struct RawConfig {
    aws: Option<RawAws>,
    #[serde(default)]
    job: JobSettings,
}

/// Validated job configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub credentials: Credentials,
    pub aws: AwsSettings,
    pub job: JobSettings,
}

/// Read and validate the YAML config at `path`.
#[tracing::instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
pub fn load<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path = path.as_ref();
    info!("loading configuration");
    let text = fs::read_to_string(path)
        .map_err(|e| PipelineError::Config(format!("reading {}: {}", path.display(), e)))?;
    parse(&text).map_err(|e| match e {
        PipelineError::Config(msg) => PipelineError::Config(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Parse config text; split out from [`load`] so it can be checked without touching disk.
pub fn parse(text: &str) -> Result<AppConfig> {
    let raw: RawConfig =
        serde_yaml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))?;

    let aws = raw
        .aws
        .ok_or_else(|| PipelineError::Config("missing `aws` section".into()))?;
    let access_key = required(&aws.access_key, "aws.access_key")?;
    let secret_key = required(&aws.secret_key, "aws.secret_key")?;

    let job = raw.job;
    if job.bucket.trim().is_empty() {
        return Err(PipelineError::Config("job.bucket must not be empty".into()));
    }
    if job.output_shards == 0 || job.fetch_concurrency == 0 {
        return Err(PipelineError::Config(
            "job.output_shards and job.fetch_concurrency must be at least 1".into(),
        ));
    }
    // surface a bad zone here rather than halfway through the run
    job.timestamp_zone()
        .map_err(|e| PipelineError::Config(format!("job.timezone: {}", e)))?;

    Ok(AppConfig {
        credentials: Credentials {
            access_key,
            secret_key,
        },
        aws: AwsSettings {
            region: aws.region,
            endpoint: aws.endpoint,
        },
        job,
    })
}

fn required(value: &Option<String>, key: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(PipelineError::Config(format!("missing `{}`", key))),
    }
}
