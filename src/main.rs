use anyhow::{Context, Result};
use clap::Parser;
use impression_agg::{config::DEFAULT_CONFIG_PATH, date::ProcessDate, error::StageError, pipeline};
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Aggregate one day of impression logs into hourly per-campaign totals.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Day to process, as YYYY/MM/DD (zero-padded).
    #[arg(long)]
    date: String,

    /// YAML file with credentials and job settings.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

#[tokio::main]
async fn main() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    // usage errors exit 1, same as a bad date
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(args).await {
        match e.downcast_ref::<StageError>() {
            Some(stage_err) => error!(stage = %stage_err.stage, "{:#}", e),
            None => error!("{:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    // validate before any config or network access
    let date: ProcessDate = args
        .date
        .parse()
        .with_context(|| format!("bad --date `{}`", args.date))?;
    info!(date = %date, config = %args.config, "startup");

    let summary = pipeline::run_with_config(Path::new(&args.config), &date).await?;
    info!(
        uploaded = %format!("s3://{}/{}", summary.bucket, summary.target_key),
        elapsed = ?summary.elapsed,
        "done"
    );
    Ok(())
}
