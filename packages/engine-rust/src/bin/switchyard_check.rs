//! # switchyard-check
//!
//! Validates a configuration document and prints its endpoint tree.
//! Exits non-zero when the document does not build.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use switchyard_engine::config::ConfigurationBuilder;
use switchyard_engine::telemetry::{init_tracing, LogFormat};
use tracing::error;

#[derive(Parser)]
#[command(name = "switchyard-check")]
#[command(about = "Validate a Switchyard mediation configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to the JSON configuration document.
    #[arg(short, long, env = "SWITCHYARD_CONFIG")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

fn run(cli: &Cli) -> anyhow::Result<String> {
    let text = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("cannot read {}", cli.config.display()))?;
    let config = ConfigurationBuilder::new()
        .build_json(&text)
        .with_context(|| format!("invalid configuration in {}", cli.config.display()))?;

    let mut report = format!("main sequence: {}\n", config.main_sequence());
    report.push_str(&format!("sequences: {}\n", config.sequence_names().join(", ")));
    report.push_str("endpoints:\n");
    report.push_str(&config.endpoints().describe());
    Ok(report)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    });

    match run(&cli) {
        Ok(report) => {
            print!("{report}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = format!("{err:#}"), "configuration check failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
