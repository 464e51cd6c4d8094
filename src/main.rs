//! CLI entry point for the fulltext tool.

use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use fulltext_core::{BatchItem, BatchOptions, DocumentOutcome, FullTextConfig, FullTextManager};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

mod cli;

use cli::{Args, BatchArgs, Command, parse_batch_line};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let mut config = load_config(args.config.as_deref())?;
    if let Some(root) = &args.cache_root {
        config.cache_root.clone_from(root);
    }
    let manager = FullTextManager::from_config(&config)
        .await
        .context("failed to start full-text manager")?;

    match args.command {
        Command::Get(ids) => {
            let response = manager.get_document(&ids.to_identifier_set()).await?;
            print_json(&response)?;
        }
        Command::Sources(ids) => {
            let listing = manager
                .list_candidate_sources(&ids.to_identifier_set())
                .await?;
            print_json(&listing)?;
        }
        Command::Batch(batch) => run_batch(&manager, &config, &batch, args.quiet).await?,
        Command::Query(query) => {
            let entries = manager.query(&query.to_query()).await?;
            print_json(&entries)?;
        }
        Command::Stats => {
            let providers = manager.provider_aggregates().await?;
            let duplicates = manager.duplicates().await?;
            let documents = match manager.index() {
                Some(index) => index.count().await?,
                None => 0,
            };
            print_json(&json!({
                "documents": documents,
                "providers": providers,
                "duplicates": duplicates,
            }))?;
        }
    }
    Ok(())
}

/// Explicit `--config`, else the default location if it exists, else defaults.
fn load_config(explicit: Option<&Path>) -> Result<FullTextConfig> {
    if let Some(path) = explicit {
        return FullTextConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => {
            debug!(path = %path.display(), "loading default config");
            FullTextConfig::load(&path)
                .with_context(|| format!("failed to load config {}", path.display()))
        }
        _ => Ok(FullTextConfig::default()),
    }
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/fulltext/config.toml`
/// 2. `$HOME/.config/fulltext/config.toml`
fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("fulltext")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("fulltext")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = std::env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

async fn run_batch(
    manager: &FullTextManager,
    config: &FullTextConfig,
    args: &BatchArgs,
    quiet: bool,
) -> Result<()> {
    let text = if args.input.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(&args.input)
            .with_context(|| format!("failed to read {}", args.input.display()))?
    };

    let mut inputs = Vec::new();
    for (number, line) in text.lines().enumerate() {
        match parse_batch_line(line) {
            Ok(Some(ids)) => inputs.push(ids),
            Ok(None) => {}
            Err(e) => bail!("line {}: invalid identifier object: {e}", number + 1),
        }
    }
    if inputs.is_empty() {
        info!("No identifiers found in input");
        print_json(&Vec::<BatchItem>::new())?;
        return Ok(());
    }

    let options = BatchOptions {
        concurrency: args
            .concurrency
            .map_or(config.batch_concurrency, usize::from),
        deadline: args
            .deadline
            .map(Duration::from_secs)
            .or_else(|| config.batch_deadline()),
    };
    info!(total = inputs.len(), concurrency = options.concurrency, "Starting batch");

    let progress = batch_progress(inputs.len(), quiet);
    let items = manager
        .batch_get_with(inputs, options, |item| {
            progress.inc(1);
            if let Ok(response) = &item.result {
                progress.set_message(response.identifier.display_name.clone());
            }
        })
        .await;
    progress.finish_and_clear();

    let stats = manager.stats();
    info!(
        downloads = stats.downloads,
        normalizations = stats.normalizations,
        cache_hits = stats.cache_hits,
        unavailable = stats.unavailable,
        "Batch complete"
    );

    if args.summary {
        let rows: Vec<_> = items.iter().map(summary_row).collect();
        print_json(&rows)
    } else {
        print_json(&items)
    }
}

fn batch_progress(total: usize, quiet: bool) -> ProgressBar {
    if quiet || !io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(u64::try_from(total).unwrap_or(u64::MAX));
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{pos}/{len}] {bar:30} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn summary_row(item: &BatchItem) -> serde_json::Value {
    match &item.result {
        Ok(response) => {
            let detail = match &response.outcome {
                DocumentOutcome::Normalized {
                    document, source, ..
                } => json!({
                    "provider": source.provider,
                    "format": source.format,
                    "quality": document.metadata.quality_score,
                }),
                DocumentOutcome::Unavailable { report } => json!({ "reason": report.summary() }),
                DocumentOutcome::NormalizationFailed { reason, .. } => json!({ "reason": reason }),
            };
            json!({
                "identifier": response.identifier.canonical_key,
                "state": response.outcome.state(),
                "detail": detail,
            })
        }
        Err(e) => json!({ "input": item.input, "error": e.to_string() }),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
