//! Scenario replay CLI
//!
//! Usage:
//!   bpmn-stream-replay scenarios/invoice.yaml
//!   bpmn-stream-replay scenarios/invoice.yaml --runs 5 --json
//!   bpmn-stream-replay scenarios/invoice.yaml --dump-log

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use bpmn_stream_replay::{replay, run_once, Scenario};

#[derive(Parser, Debug)]
#[command(name = "bpmn-stream-replay")]
#[command(about = "Replay a scenario through fresh stream cores and compare the runs")]
struct Args {
    /// Scenario file (YAML)
    scenario: PathBuf,

    /// Override the scenario's run count
    #[arg(long, short = 'r')]
    runs: Option<usize>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Print the log of a single run as JSON lines instead of comparing runs
    #[arg(long)]
    dump_log: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut scenario = Scenario::load(&args.scenario)?;
    if let Some(runs) = args.runs {
        scenario.runs = runs;
    }

    if args.dump_log {
        let config = match scenario.config.clone() {
            Some(config) => config,
            None => bpmn_stream_core::EngineConfig::from_env()?,
        };
        let (_, log) = run_once(&scenario, config)?;
        for logged in log {
            println!("{}", serde_json::to_string(&logged)?);
        }
        return Ok(());
    }

    let report = replay(&scenario)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (i, run) in report.runs.iter().enumerate() {
            println!(
                "run {}: log {} state {} ({} records, {} rejections, {} for host)",
                i + 1,
                run.log_digest,
                run.state_fingerprint,
                run.records,
                run.rejections,
                run.host_commands
            );
        }
    }

    if !report.deterministic {
        bail!("runs diverged");
    }
    Ok(())
}
