//! racegate - time-gated, channel-raced acquisition runner
//!
//! ## Commands
//!
//! - `run`: wait for the target time, race every entity until it succeeds
//! - `probe`: fetch and validate a batch of channels once
//! - `check-config`: print the effective configuration

mod config;
mod countdown;
mod report;

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use racegate_core::{
    ChannelSource, ChannelValidator, CountdownObserver, LogCountdown, OrchestrationRun, RunMode,
    SystemClock, TimeGate, ValidChannel, METRICS,
};
use racegate_net::{HttpAttemptExecutor, HttpChannelSource, HttpProbeValidator, WebhookNotifier};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

use crate::config::{FileConfig, Overrides};
use crate::countdown::TerminalCountdown;
use crate::report::{render_summary, RunReport};

#[derive(Parser)]
#[command(name = "racegate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Time-gated, channel-raced acquisition runner", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for the target time, then race every entity until it succeeds
    Run {
        /// Path to the JSON config file
        #[arg(short, long, env = "RACEGATE_CONFIG")]
        config: PathBuf,

        /// Target time today (HH:MM:SS, local) or an RFC 3339 instant
        #[arg(long, env = "RACEGATE_AT")]
        at: Option<String>,

        /// Operating preset: direct or pooled
        #[arg(long, value_parser = parse_mode)]
        mode: Option<RunMode>,

        /// Seconds before the target at which channel priming starts
        #[arg(long)]
        lead_secs: Option<u64>,

        /// Channels per entity (0 = direct)
        #[arg(long)]
        channels: Option<usize>,

        /// Round cap per entity
        #[arg(long)]
        max_rounds: Option<u32>,

        /// Directory for the JSON run report
        #[arg(long, env = "RACEGATE_REPORT_DIR")]
        report_dir: Option<PathBuf>,
    },

    /// Fetch and validate a batch of channels once
    Probe {
        /// Path to the JSON config file
        #[arg(short, long, env = "RACEGATE_CONFIG")]
        config: PathBuf,

        /// Number of candidates to request
        #[arg(long, default_value = "5")]
        count: usize,
    },

    /// Parse the config file and print the effective settings
    CheckConfig {
        /// Path to the JSON config file
        #[arg(short, long, env = "RACEGATE_CONFIG")]
        config: PathBuf,
    },
}

fn parse_mode(raw: &str) -> std::result::Result<RunMode, String> {
    match raw.to_ascii_lowercase().as_str() {
        "direct" => Ok(RunMode::Direct),
        "pooled" => Ok(RunMode::Pooled),
        other => Err(format!("unknown mode {other:?}, expected direct or pooled")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    racegate_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            config,
            at,
            mode,
            lead_secs,
            channels,
            max_rounds,
            report_dir,
        } => {
            let overrides = Overrides {
                at,
                mode,
                lead_secs,
                channels,
                max_rounds,
            };
            cmd_run(&config, &overrides, report_dir.as_deref(), cli.json).await
        }
        Commands::Probe { config, count } => cmd_probe(&config, count).await,
        Commands::CheckConfig { config } => cmd_check_config(&config),
    }
}

fn build_pool(file: &FileConfig) -> Result<(Arc<dyn ChannelSource>, Arc<dyn ChannelValidator>)> {
    let Some(source) = file.source.clone() else {
        bail!("pooled mode needs a `source` section");
    };
    let source = HttpChannelSource::new(source).context("Invalid source config")?;
    let validator = HttpProbeValidator::new(file.validator.clone().unwrap_or_default())
        .context("Invalid validator config")?;
    Ok((Arc::new(source), Arc::new(validator)))
}

/// Run the configured entities at the target time
async fn cmd_run(
    path: &Path,
    overrides: &Overrides,
    report_dir: Option<&Path>,
    json_logs: bool,
) -> Result<()> {
    let file = FileConfig::load(path)?;
    let mode = file.mode(overrides);
    let run_config = file.effective_run(overrides)?;
    let target = file.effective_target(overrides, Utc::now())?;
    let entities = file.selected_entities();
    if entities.is_empty() {
        bail!("no entities selected from {:?}", path);
    }

    let executor =
        HttpAttemptExecutor::new(file.executor.clone()).context("Invalid executor config")?;
    let observer: Arc<dyn CountdownObserver> = if json_logs {
        Arc::new(LogCountdown)
    } else {
        Arc::new(TerminalCountdown::stderr())
    };
    let mut run = OrchestrationRun::new(Arc::new(executor), run_config.clone())
        .with_gate(TimeGate::new(Arc::new(SystemClock), observer));
    if run_config.channels_per_entity > 0 {
        let (source, validator) = build_pool(&file)?;
        run = run.with_pool(source, validator);
    }
    if let Some(notifier) = file.notifier.clone() {
        let notifier = WebhookNotifier::new(notifier).context("Invalid notifier config")?;
        run = run.with_notifier(Arc::new(notifier));
    }

    info!(
        run_id = %run.run_id(),
        mode = %mode,
        entities = entities.len(),
        target = %target.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        channels_per_entity = run_config.channels_per_entity,
        "run configured"
    );
    if target < Utc::now() {
        warn!("target time has already passed, starting immediately");
    }

    let stop = run.stop_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current races");
            stop.stop();
        }
    });

    let summary = run.execute_at(&entities, target).await;
    ctrl_c.abort();

    println!("{}", render_summary(&summary, &entities));

    let report = RunReport::new(mode, target, run_config, summary, METRICS.snapshot());
    let dir = report_dir
        .map(Path::to_path_buf)
        .or_else(|| file.report_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let written = report.write_to(&dir)?;
    println!("Report: {}", written.display());
    Ok(())
}

/// Fetch `count` candidates and validate each once
async fn cmd_probe(path: &Path, count: usize) -> Result<()> {
    let file = FileConfig::load(path)?;
    let (source, validator) = build_pool(&file)?;

    let candidates = source
        .fetch(count)
        .await
        .context("Channel source failed")?;
    if candidates.is_empty() {
        println!("Source returned no candidates");
        return Ok(());
    }

    let total = candidates.len();
    let validations = futures::future::join_all(
        candidates.iter().map(|candidate| validator.validate(candidate)),
    )
    .await;

    let mut usable = 0;
    for (candidate, validation) in candidates.into_iter().zip(validations) {
        let address = candidate.address();
        match validation {
            Ok(v) => match ValidChannel::from_validation(candidate, &v) {
                Some(channel) => {
                    usable += 1;
                    println!(
                        "  ok   {:<22} {:>6}ms  {:<10}  egress {}",
                        address,
                        channel.latency.as_millis(),
                        channel.grade,
                        channel.egress_ip.as_deref().unwrap_or("-")
                    );
                }
                None => println!("  fail {:<22} {:>6}ms", address, v.latency.as_millis()),
            },
            Err(e) => println!("  err  {:<22} {}", address, e),
        }
    }
    println!("{} of {} candidates usable", usable, total);
    Ok(())
}

/// Print the effective configuration
fn cmd_check_config(path: &Path) -> Result<()> {
    let file = FileConfig::load(path)?;
    let overrides = Overrides::default();
    let run = file.effective_run(&overrides)?;
    let target = file.effective_target(&overrides, Utc::now())?;
    let entities = file.selected_entities();

    println!("Mode:     {}", file.mode(&overrides));
    println!(
        "Target:   {}",
        target.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "Entities: {} selected of {}",
        entities.len(),
        file.entities.len()
    );
    for entity in &entities {
        println!("  - {} ({})", entity.display_name(), entity.key);
    }
    println!("Run:");
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}
