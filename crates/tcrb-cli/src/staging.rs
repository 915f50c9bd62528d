//! Reading provider payloads from disk for the `stage` command.
//!
//! A file is either one JSON array of payloads or newline-delimited JSON
//! (one payload per line, blank lines ignored).

use std::path::Path;

use anyhow::{Context as _, bail};
use serde_json::Value;

pub fn read_payloads(path: &Path) -> anyhow::Result<Vec<Value>> {
  let text = std::fs::read_to_string(path)
    .with_context(|| format!("reading staging file {}", path.display()))?;
  parse_payloads(&text).with_context(|| format!("parsing staging file {}", path.display()))
}

pub fn parse_payloads(text: &str) -> anyhow::Result<Vec<Value>> {
  if text.trim_start().starts_with('[') {
    let values: Vec<Value> =
      serde_json::from_str(text).context("expected a JSON array of payloads")?;
    return values
      .into_iter()
      .enumerate()
      .map(|(i, value)| require_object(value).with_context(|| format!("element {}", i + 1)))
      .collect();
  }

  text
    .lines()
    .enumerate()
    .filter(|(_, line)| !line.trim().is_empty())
    .map(|(i, line)| {
      serde_json::from_str(line)
        .map_err(anyhow::Error::from)
        .and_then(require_object)
        .with_context(|| format!("line {}", i + 1))
    })
    .collect()
}

fn require_object(value: Value) -> anyhow::Result<Value> {
  if !value.is_object() {
    bail!("payload is not a JSON object");
  }
  Ok(value)
}
