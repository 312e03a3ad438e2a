// src/error.rs

use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Every failure the job can hit. All of them are fatal for the run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Bad `--date` argument.
    #[error("invalid input: {0}")]
    Input(String),

    /// Config file missing, unreadable or incomplete.
    #[error("configuration error: {0}")]
    Config(String),

    /// Credentials rejected or absent.
    #[error("access denied: {0}")]
    Access(String),

    /// Nothing to read for the requested partition.
    #[error("not found: {0}")]
    NotFound(String),

    /// Result materialization did not produce exactly one file.
    #[error("write error: {0}")]
    Write(String),

    /// Transport or service failure talking to storage.
    #[error("network error: {0}")]
    Network(String),

    /// A column is missing or holds a value that cannot be used.
    #[error("type error: {0}")]
    Type(String),
}

impl PipelineError {
    pub(crate) fn write_io(what: &str, err: std::io::Error) -> Self {
        PipelineError::Write(format!("{}: {}", what, err))
    }
}

/// Stages of a run, in the order they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    CredentialsLoaded,
    Authenticated,
    Read,
    Deduplicated,
    Aggregated,
    LocalWritten,
    Renamed,
    Uploaded,
    CleanedUp,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::CredentialsLoaded => "credentials_loaded",
            Stage::Authenticated => "authenticated",
            Stage::Read => "read",
            Stage::Deduplicated => "deduplicated",
            Stage::Aggregated => "aggregated",
            Stage::LocalWritten => "local_written",
            Stage::Renamed => "renamed",
            Stage::Uploaded => "uploaded",
            Stage::CleanedUp => "cleaned_up",
        };
        f.write_str(name)
    }
}

/// A `PipelineError` tagged with the stage that was being entered when it occurred.
#[derive(Error, Debug)]
#[error("stage `{stage}` failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: PipelineError,
}

/// Attach the stage being attempted to a pipeline result.
pub trait AtStage<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageError> {
        self.map_err(|source| StageError { stage, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_names_the_stage() {
        let res: Result<()> = Err(PipelineError::NotFound("2024/03/07/".into()));
        let err = res.at(Stage::Read).unwrap_err();
        assert_eq!(err.stage, Stage::Read);
        assert_eq!(
            err.to_string(),
            "stage `read` failed: not found: 2024/03/07/"
        );
    }
}
