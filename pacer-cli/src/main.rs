use anyhow::{Context, Result};
use clap::Parser;
use pacer::core::Report;
use pacer::Run;
use std::process::ExitCode;
#[allow(unused)]
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
use cli::Cli;

const EXIT_FAILED: u8 = 1;
const EXIT_ABORTED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    FmtSubscriber::builder().with_env_filter(filter).init();

    match run(&cli).await {
        Ok(report) if report.verdict.pass => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(EXIT_FAILED),
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_ABORTED)
        }
    }
}

async fn run(cli: &Cli) -> Result<Report> {
    let config = cli.run_config()?;

    let run = Run::new(config);
    let handle = run.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            handle.cancel();
        }
    });

    let report = run.await?;
    println!("{report}");

    if let Some(path) = &cli.summary_export {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!("Wrote summary to {}", path.display());
    }

    Ok(report)
}
