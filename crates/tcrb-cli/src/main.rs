//! `tcrb`, the marketplace snapshot normalization engine.
//!
//! Reads `tcrb.toml` (or the path given with `--config`), opens the SQLite
//! store and runs one command against it.
//!
//! ```
//! tcrb stage payloads.ndjson --source dutchie
//! tcrb normalize --source dutchie
//! tcrb score --limit 50
//! tcrb export
//! ```

mod settings;
mod staging;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tcrb_core::{
  driver::{normalize_source, score_products},
  score::PlaceholderKernel,
  store::CanonicalStore,
};
use tcrb_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::settings::EngineConfig;

#[derive(Parser)]
#[command(name = "tcrb", version, about = "Marketplace snapshot normalization engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "tcrb.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Append payloads from a JSON array or NDJSON file to the staging table.
  Stage {
    file: PathBuf,
    #[arg(short, long)]
    source: Option<String>,
  },
  /// Normalize every staged record of a source into the canonical tables.
  Normalize {
    #[arg(short, long)]
    source: Option<String>,
  },
  /// Score products with the placeholder kernel.
  Score {
    #[arg(short, long)]
    limit: Option<usize>,
  },
  /// Print the newest scores as JSON lines.
  Export {
    #[arg(short, long)]
    limit: Option<usize>,
  },
  /// Print per-table row counts.
  Counts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = EngineConfig::load(&cli.config)?;

  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;

  match cli.command {
    Command::Stage { file, source } => {
      let source = cfg.source_name(source.as_deref())?;
      let payloads = staging::read_payloads(&file)?;
      let total = payloads.len();
      for payload in payloads {
        store
          .stage(source.clone(), payload)
          .await
          .context("failed to stage payload")?;
      }
      tracing::info!(%source, staged = total, "staging complete");
      println!("Staged {total} {source} records");
    }

    Command::Normalize { source } => {
      let source = cfg.source_name(source.as_deref())?;
      let report = normalize_source(&store, &source, cfg.policy())
        .await
        .with_context(|| format!("normalization of {source} aborted"))?;
      println!("{report}");
      for failure in &report.failures {
        println!("  {} at {}: {}", failure.staging_id, failure.stage, failure.message);
      }
    }

    Command::Score { limit } => {
      let mut kernel = PlaceholderKernel::new();
      let report = score_products(&store, &mut kernel, limit.unwrap_or(cfg.score_limit))
        .await
        .context("scoring aborted")?;
      println!(
        "Scored {} of {} products ({} failed)",
        report.written, report.considered, report.failed
      );
    }

    Command::Export { limit } => {
      let rows = store
        .export_scores(limit.unwrap_or(cfg.export_limit))
        .await
        .context("failed to read score export")?;
      for row in rows {
        println!("{}", serde_json::to_string(&row)?);
      }
    }

    Command::Counts => {
      let counts = store.table_counts().await.context("failed to count rows")?;
      println!("{counts}");
    }
  }

  Ok(())
}
