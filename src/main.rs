//! kvsync - incremental key copy between Redis-compatible stores
//!
//! `list-keys` prints the keys of a source store. `copy` indexes the
//! destination by content hash and copies only the keys that differ.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use colored::Colorize;

use kvsync::config::{Config, LogFormat, WriteMode};
use kvsync::sync::{list_keys, MigrationContext, RunReport, SyncEngine, Topology};

/// kvsync - incremental key copy between Redis-compatible stores
#[derive(Parser, Debug)]
#[command(name = "kvsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", env = "KVSYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error (overrides config file)
    #[arg(
        short = 'l',
        long = "log-level",
        value_name = "LEVEL",
        env = "KVSYNC_LOG_LEVEL",
        global = true
    )]
    log_level: Option<String>,

    /// Log output format (overrides config file)
    #[arg(long = "log-format", value_enum, global = true)]
    log_format: Option<LogFormatArg>,

    /// Source endpoints, comma separated: one host is a single node, more are cluster seeds
    #[arg(
        long = "source-hosts",
        value_name = "HOST:PORT",
        value_delimiter = ',',
        env = "KVSYNC_SOURCE_HOSTS",
        global = true
    )]
    source_hosts: Vec<String>,

    /// Config overrides in key=value format (can be specified multiple times)
    #[arg(long = "set", value_name = "KEY=VALUE", action = ArgAction::Append, global = true)]
    config_overrides: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every source key matching a filter, one per line
    ListKeys {
        /// Glob pattern of keys to list (default: sync.key_filter, else "*")
        #[arg(long)]
        key_filter: Option<String>,
    },

    /// Copy keys whose content differs from source to destination
    Copy {
        /// Destination endpoints, comma separated
        #[arg(
            long = "destination-hosts",
            value_name = "HOST:PORT",
            value_delimiter = ',',
            env = "KVSYNC_DESTINATION_HOSTS"
        )]
        destination_hosts: Vec<String>,

        /// File listing the keys to copy, one per line
        #[arg(long, value_name = "FILE", conflicts_with = "key_filter")]
        key_file: Option<PathBuf>,

        /// Glob pattern of keys to copy
        #[arg(long)]
        key_filter: Option<String>,

        /// Write each key with its own request instead of pipelining
        #[arg(long = "no-pipeline", action = ArgAction::SetTrue)]
        no_pipeline: bool,

        /// Pipeline batch bound
        #[arg(long, value_name = "N")]
        batch_size: Option<usize>,

        /// Keys requested per scan page
        #[arg(long, value_name = "N")]
        page_size: Option<usize>,

        /// Print the report as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

impl Cli {
    /// Layer command-line values over the loaded configuration.
    fn apply_to_config(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(ref level) = self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.logging.format = match format {
                LogFormatArg::Pretty => LogFormat::Pretty,
                LogFormatArg::Json => LogFormat::Json,
            };
        }
        if !self.source_hosts.is_empty() {
            config.source.hosts = self.source_hosts.clone();
        }

        if let Commands::ListKeys {
            key_filter: Some(filter),
        } = &self.command
        {
            config.sync.key_filter = filter.clone();
        }

        if let Commands::Copy {
            destination_hosts,
            key_file,
            key_filter,
            no_pipeline,
            batch_size,
            page_size,
            ..
        } = &self.command
        {
            if !destination_hosts.is_empty() {
                config.destination.hosts = destination_hosts.clone();
            }
            if let Some(path) = key_file {
                config.sync.key_file = Some(path.clone());
            }
            if let Some(filter) = key_filter {
                config.sync.key_filter = filter.clone();
            }
            if *no_pipeline {
                config.sync.write_mode = WriteMode::Direct;
            }
            if let Some(n) = batch_size {
                config.sync.batch_threshold = *n;
            }
            if let Some(n) = page_size {
                config.sync.page_size = *n;
            }
        }

        for override_str in &self.config_overrides {
            let (key, value) = override_str.split_once('=').with_context(|| {
                format!(
                    "Invalid config override '{}': expected key=value format",
                    override_str
                )
            })?;
            config.apply_override(key, value)?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(&cli)?;
    cli.apply_to_config(&mut config)?;
    config.validate(matches!(cli.command, Commands::Copy { .. }))?;

    init_logging(&config);

    match cli.command {
        Commands::ListKeys { .. } => cmd_list_keys(&config).await,
        Commands::Copy { json, .. } => cmd_copy(config, json).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    match cli.config {
        Some(ref path) => Ok(Config::from_file(path)?),
        None => Ok(Config::default()),
    }
}

fn init_logging(config: &Config) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // stdout carries key listings and reports
    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

async fn cmd_list_keys(config: &Config) -> anyhow::Result<()> {
    let source = Topology::connect(&config.source).await?;
    let keys = list_keys(&source, &config.sync.key_filter).await?;

    if keys.is_empty() {
        println!("No keys found in source cluster.");
        return Ok(());
    }
    for key in keys {
        println!("{}", String::from_utf8_lossy(&key));
    }
    Ok(())
}

async fn cmd_copy(config: Config, json: bool) -> anyhow::Result<()> {
    let source = Topology::connect(&config.source)
        .await
        .context("source unreachable")?;
    let destination = Topology::connect(&config.destination)
        .await
        .context("destination unreachable")?;

    let engine = SyncEngine::new(MigrationContext::new(source, destination, config.sync));
    let report = engine.run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("{}", report.to_string().green().bold());
    println!(
        "  {} destination keys indexed in {} ms",
        report.indexed_keys, report.elapsed_ms
    );

    for shard in report.incomplete_shards() {
        println!(
            "  {} {} {}",
            "!".yellow().bold(),
            shard.addr,
            serde_json::to_string(&shard.outcome).unwrap_or_default()
        );
    }

    if !report.failures.keys.is_empty() {
        println!("  {}", "Failed keys:".red().bold());
        for key in &report.failures.keys {
            println!("    {}", key);
        }
        if report.failures.truncated {
            println!("    ...");
        }
    }
}
