//! Provenance: per-source external references carried by canonical rows.
//!
//! Every canonical row owns an `external_refs` mapping from a source name to
//! that source's native identifiers for the entity. A write from one source
//! replaces that source's sub-mapping and never touches the others.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

// ─── Source name ─────────────────────────────────────────────────────────────

/// The name of a data provider, e.g. `dutchie`.
///
/// Restricted to ASCII alphanumerics, `_`, `-` and `.` so it can be embedded
/// in a JSON path without escaping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceName(String);

impl SourceName {
  pub const MAX_LEN: usize = 64;

  pub fn new(name: impl Into<String>) -> Result<Self> {
    let name = name.into();
    let valid = !name.is_empty()
      && name.len() <= Self::MAX_LEN
      && name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if valid {
      Ok(Self(name))
    } else {
      Err(Error::InvalidSourceName(name))
    }
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for SourceName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl FromStr for SourceName {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { Self::new(s) }
}

impl TryFrom<String> for SourceName {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { Self::new(s) }
}

impl From<SourceName> for String {
  fn from(name: SourceName) -> Self { name.0 }
}

// ─── Single-source reference ─────────────────────────────────────────────────

/// The identifiers one source supplied for an entity in one observation.
///
/// Identifiers are opaque: whatever JSON value the provider sent is kept as
/// is. Absent identifiers are simply left out, so an observation with no ids
/// still records that the source has seen the entity (`{"dutchie": {}}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
  pub source: SourceName,
  pub ids:    Map<String, Value>,
}

impl SourceRef {
  pub fn new(source: SourceName) -> Self { Self { source, ids: Map::new() } }

  /// Attach `key = value` unless the value is missing or JSON `null`.
  pub fn with_id(mut self, key: &str, value: Option<&Value>) -> Self {
    if let Some(v) = value.filter(|v| !v.is_null()) {
      self.ids.insert(key.to_owned(), v.clone());
    }
    self
  }

  /// The sub-mapping serialised as a JSON object string.
  pub fn ids_json(&self) -> String { Value::Object(self.ids.clone()).to_string() }
}

// ─── Merged references ───────────────────────────────────────────────────────

/// The accumulated `external_refs` of a canonical row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalRefs(BTreeMap<String, Map<String, Value>>);

impl ExternalRefs {
  /// The sub-mapping recorded for `source`, if any.
  pub fn get(&self, source: &str) -> Option<&Map<String, Value>> { self.0.get(source) }

  pub fn sources(&self) -> impl Iterator<Item = &str> { self.0.keys().map(String::as_str) }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }
}
