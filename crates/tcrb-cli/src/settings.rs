//! Engine configuration: an optional TOML file layered with `TCRB_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;
use tcrb_core::{chain::ChainPolicy, refs::SourceName};

/// Runtime configuration, deserialised from `tcrb.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub store_path:       PathBuf,
  /// Source normalized when no `--source` flag is given.
  pub source:           String,
  pub resolve_attempts: u32,
  pub score_limit:      usize,
  pub export_limit:     usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      store_path:       PathBuf::from("tcrb.db"),
      source:           "dutchie".to_owned(),
      resolve_attempts: ChainPolicy::default().resolve_attempts,
      score_limit:      50,
      export_limit:     100,
    }
  }
}

impl EngineConfig {
  /// Read `path` (if it exists) and the environment. Missing keys keep their
  /// defaults.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("TCRB"))
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?;

    let mut cfg: Self = settings
      .try_deserialize()
      .context("failed to deserialise EngineConfig")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
  }

  pub fn policy(&self) -> ChainPolicy {
    ChainPolicy { resolve_attempts: self.resolve_attempts.max(1) }
  }

  /// The source to work on: the flag if given, else the configured one.
  pub fn source_name(&self, flag: Option<&str>) -> anyhow::Result<SourceName> {
    let name = flag.unwrap_or(&self.source);
    SourceName::new(name).with_context(|| format!("invalid source name {name:?}"))
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
