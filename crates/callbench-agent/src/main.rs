//! callbench
//!
//! Runs voice-call clients in pairs under emulated network conditions and
//! ranks implementation versions by the quality of what got through.
//!
//! - `run`: execute a plan and append one ledger row per session
//! - `report`: aggregate an existing ledger

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use callbench_agent::config::HarnessConfig;
use callbench_agent::driver::{build_controller, run_plan, StopFlag};
use callbench_agent::plan::RunPlan;
use callbench_common::aggregate::ScoreReport;
use callbench_common::ledger::read_rows;

/// Comparative call-quality test harness.
#[derive(Parser, Debug)]
#[command(name = "callbench", version, about = "Call-quality test harness")]
struct Cli {
    /// Harness config file.
    #[arg(long, short, default_value = "callbench.toml", env = "CALLBENCH_CONFIG")]
    config: PathBuf,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every session of a plan and print the report.
    Run {
        /// Run plan file.
        #[arg(long, short, default_value = "plan.toml")]
        plan: PathBuf,

        /// Device to shape, overriding the config and auto-detection.
        #[arg(long, short)]
        interface: Option<String>,
    },
    /// Print ranked scores from a ledger.
    Report {
        /// Ledger to read instead of the configured one.
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Command::Run { plan, interface } => {
            let cfg = HarnessConfig::load(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            let plan = RunPlan::load(&plan).with_context(|| format!("loading {}", plan.display()))?;
            run(cfg, plan, interface)
        }
        Command::Report { ledger } => {
            let path = match ledger {
                Some(p) => p,
                None => HarnessConfig::load(&cli.config)?.paths.ledger,
            };
            let rows = read_rows(&path)
                .with_context(|| format!("reading {}", path.display()))?
                .collect::<Result<Vec<_>, _>>()?;
            print!("{}", ScoreReport::from_rows(&rows));
            Ok(())
        }
    }
}

fn run(cfg: HarnessConfig, plan: RunPlan, interface: Option<String>) -> anyhow::Result<()> {
    tracing::info!(
        entries = cfg.entries.len(),
        sessions = plan.sessions.len(),
        iterations = plan.iterations,
        "callbench starting"
    );

    let missing = cfg.missing_final_raters();
    if !missing.is_empty() {
        tracing::warn!(
            raters = ?missing,
            "weighted raters not configured, final scores will be n/a"
        );
    }

    let stop = Arc::new(StopFlag::default());
    let handler_stop = stop.clone();
    // Peers run in their own process groups, so only the harness sees SIGINT.
    ctrlc::set_handler(move || {
        if handler_stop.request() {
            eprintln!("\nInterrupt received, finishing the current session...");
        } else {
            eprintln!("\nAlready stopping, waiting for the session to clean up.");
        }
    })
    .context("installing signal handler")?;

    let mut ctl = build_controller(&cfg, interface.as_deref())?;
    let summary = run_plan(&mut ctl, &cfg, &plan, &stop)?;
    let report = ctl.close_and_report()?;

    print!("{report}");
    println!();
    print!("{summary}");

    if summary.has_provider_failure() {
        tracing::error!("connection broker failures occurred");
        std::process::exit(2);
    }
    Ok(())
}
