use fbreplay_core::config::{RecoveryPolicy, ReplayConfig};
use fbreplay_core::executor::ReplayEngine;
use fbreplay_core::normalizer::{Action, ActionKind, plan};
use fbreplay_core::recovery::{FixedRecovery, PromptRecovery, RecoveryMode, RecoveryStrategy};
use fbreplay_core::transport::{SimulatedControlChannel, SimulatedTransport};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "fbreplay.toml";
const LOG_ENV_VAR: &str = "FBREPLAY_LOG";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Ignored when FBREPLAY_LOG holds a valid filter.
    #[clap(long, value_enum)]
    log_level: Option<LogLevel>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the commands mined from a binary without touching a device.
    Scan {
        binary: PathBuf,
        #[clap(long, value_enum, default_value_t = ScanFormat::Text)]
        format: ScanFormat,
    },
    /// Replay the mined commands against a device.
    Replay {
        binary: PathBuf,
        /// Run against the built-in simulated device. Required until a
        /// hardware transport is available.
        #[clap(long)]
        simulate: bool,
        #[clap(long, value_enum)]
        recovery: Option<RecoveryArg>,
        #[clap(long)]
        no_flash_fuzz: bool,
        #[clap(long)]
        seed: Option<u64>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ScanFormat {
    Text,
    Json,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum RecoveryArg {
    Prompt,
    Active,
    Passive,
}

impl From<RecoveryArg> for RecoveryPolicy {
    fn from(arg: RecoveryArg) -> Self {
        match arg {
            RecoveryArg::Prompt => RecoveryPolicy::Prompt,
            RecoveryArg::Active => RecoveryPolicy::Active,
            RecoveryArg::Passive => RecoveryPolicy::Passive,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Serialize)]
struct ScanRow {
    index: usize,
    shape: fbreplay_core::Shape,
    kind: &'static str,
    wire: String,
}

impl ScanRow {
    fn new(index: usize, action: &Action) -> Self {
        let kind = match action.kind() {
            ActionKind::Command { .. } => "command",
            ActionKind::Flash { .. } => "flash",
            ActionKind::Suppressed { .. } => "suppressed",
        };
        Self {
            index,
            shape: action.shape(),
            kind,
            wire: action.label(),
        }
    }
}

fn init_logging(level: Option<LogLevel>) {
    match EnvFilter::builder()
        .with_env_var(LOG_ENV_VAR)
        .try_from_env()
    {
        Ok(filter) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_max_level(
                    level
                        .map(tracing::Level::from)
                        .unwrap_or(tracing::Level::INFO),
                )
                .with_writer(std::io::stderr)
                .init();
        }
    };
}

fn load_config(config_file: Option<PathBuf>) -> Result<ReplayConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => {
            tracing::info!("Loading configuration from specified path: {config_path:?}");
            ReplayConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                tracing::info!(
                    "No config file specified via CLI, loading default: {default_config_path:?}"
                );
                ReplayConfig::load_from_file(&default_config_path)
            } else {
                tracing::debug!(
                    "No config file given and '{DEFAULT_CONFIG_FILE}' not found, using defaults."
                );
                Ok(ReplayConfig::default())
            }
        }
    }
}

fn mine(binary: &Path) -> Result<Vec<Action>, anyhow::Error> {
    let bytes =
        std::fs::read(binary).with_context(|| format!("Failed to read binary at {binary:?}"))?;
    tracing::info!(
        md5 = %format!("{:x}", md5::compute(&bytes)),
        len = bytes.len(),
        "Mining {binary:?}"
    );
    let actions = plan(bytes.as_slice())
        .with_context(|| format!("Failed to scan binary at {binary:?}"))?;
    tracing::info!("Found {} replayable commands", actions.len());
    Ok(actions)
}

fn recovery_strategy(policy: RecoveryPolicy) -> Box<dyn RecoveryStrategy> {
    match policy {
        RecoveryPolicy::Prompt => Box::new(PromptRecovery::new(
            std::io::stdin().lock(),
            std::io::stderr(),
        )),
        RecoveryPolicy::Active => Box::new(FixedRecovery(RecoveryMode::Active)),
        RecoveryPolicy::Passive => Box::new(FixedRecovery(RecoveryMode::Passive)),
    }
}

fn scan(binary: &Path, format: ScanFormat) -> Result<(), anyhow::Error> {
    let actions = mine(binary)?;
    let rows: Vec<ScanRow> = actions
        .iter()
        .enumerate()
        .map(|(index, action)| ScanRow::new(index, action))
        .collect();

    match format {
        ScanFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        ScanFormat::Text => {
            for row in &rows {
                println!(
                    "{:>5}  {:<8}  {:<10}  {}",
                    row.index,
                    row.shape.to_string(),
                    row.kind,
                    row.wire
                );
            }
        }
    }
    Ok(())
}

fn replay(binary: &Path, config: &ReplayConfig, simulate: bool) -> Result<(), anyhow::Error> {
    if !simulate {
        anyhow::bail!(
            "No hardware transport is built in, pass --simulate to use the simulated device"
        );
    }
    let actions = mine(binary)?;

    let mut engine = ReplayEngine::connect(
        config,
        SimulatedTransport::new(),
        SimulatedControlChannel::default(),
        recovery_strategy(config.recovery.mode),
    )
    .context("Failed to connect to device")?;

    tracing::info!(
        "Replaying {} commands (recovery: {})",
        actions.len(),
        config.recovery.mode.as_str()
    );
    let start_time = Instant::now();
    let summary = engine.run(&actions);

    println!("\nSimulated replay finished in {:.2?}.", start_time.elapsed());
    println!(
        "Actions: {}, Succeeded: {}, Rejected: {}, Mismatched: {}",
        summary.actions, summary.succeeded, summary.rejected, summary.mismatched
    );
    println!(
        "Recovered: {}, Skipped after retry: {}, Suppressed reboots: {}, Flash disabled: {}",
        summary.recovered, summary.skipped_after_retry, summary.suppressed, summary.flash_disabled
    );
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let mut config = load_config(cli.config_file)?;

    match cli.command {
        Command::Scan { binary, format } => scan(&binary, format),
        Command::Replay {
            binary,
            simulate,
            recovery,
            no_flash_fuzz,
            seed,
        } => {
            if let Some(recovery) = recovery {
                config.recovery.mode = recovery.into();
            }
            if no_flash_fuzz {
                config.flash_fuzz.enabled = false;
            }
            if seed.is_some() {
                config.flash_fuzz.seed = seed;
            }
            tracing::debug!("Effective configuration: {config:#?}");
            replay(&binary, &config, simulate)
        }
    }
}
