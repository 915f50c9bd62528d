//! Canonical entities: the rows the engine creates and refreshes.
//!
//! Identity is always a natural key (see each type); the UUIDs are surrogate
//! ids issued once on first observation and never reissued.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
  Error, Result,
  refs::{ExternalRefs, SourceName},
};

// ─── Staging ─────────────────────────────────────────────────────────────────

/// A raw provider payload as written by ingestion. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingRecord {
  pub staging_id:  Uuid,
  pub source:      SourceName,
  pub payload:     Value,
  pub received_at: DateTime<Utc>,
}

// ─── Catalogue ───────────────────────────────────────────────────────────────

/// Natural key: `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brand {
  pub brand_id:      Uuid,
  pub name:          String,
  pub external_refs: ExternalRefs,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
}

/// Natural key: `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispensary {
  pub dispensary_id: Uuid,
  pub name:          String,
  /// Provider-shaped location blob (address, coordinates, …).
  pub location:      Option<Value>,
  pub external_refs: ExternalRefs,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
}

/// Natural key: `(name, brand_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
  pub product_id:    Uuid,
  pub name:          String,
  pub brand_id:      Uuid,
  pub category:      String,
  pub subcategory:   Option<String>,
  pub external_refs: ExternalRefs,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
}

/// Natural key: `(product_id, dispensary_id)`.
///
/// `price` and `weight` are last-write-wins. `None` means the provider did
/// not report a usable figure; it is never the same thing as zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
  pub listing_id:    Uuid,
  pub product_id:    Uuid,
  pub dispensary_id: Uuid,
  pub price:         Option<f64>,
  pub weight:        Option<f64>,
  pub external_refs: ExternalRefs,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
}

// ─── Scores ──────────────────────────────────────────────────────────────────

/// Which kind of row a score is attached to.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubjectKind {
  Listing,
  Product,
}

/// The row a score describes. Natural key of [`Score`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ScoreSubject {
  Listing(Uuid),
  Product(Uuid),
}

impl ScoreSubject {
  pub fn kind(&self) -> SubjectKind {
    match self {
      Self::Listing(_) => SubjectKind::Listing,
      Self::Product(_) => SubjectKind::Product,
    }
  }

  pub fn id(&self) -> Uuid {
    match self {
      Self::Listing(id) | Self::Product(id) => *id,
    }
  }

  pub fn from_parts(kind: &str, id: Uuid) -> Result<Self> {
    match kind.parse::<SubjectKind>() {
      Ok(SubjectKind::Listing) => Ok(Self::Listing(id)),
      Ok(SubjectKind::Product) => Ok(Self::Product(id)),
      Err(_) => Err(Error::UnknownSubjectKind(kind.to_owned())),
    }
  }
}

/// A confidence figure in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
  /// Used when a provider reports a score without a confidence.
  pub const PROVIDER_DEFAULT: Confidence = Confidence(0.8);

  pub fn new(value: f64) -> Result<Self> {
    if (0.0..=1.0).contains(&value) {
      Ok(Self(value))
    } else {
      Err(Error::ConfidenceOutOfRange(value))
    }
  }

  pub fn value(self) -> f64 { self.0 }
}

impl TryFrom<f64> for Confidence {
  type Error = Error;

  fn try_from(value: f64) -> Result<Self> { Self::new(value) }
}

impl From<Confidence> for f64 {
  fn from(c: Confidence) -> Self { c.0 }
}

/// The current score artifact for a subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
  pub score_id:         Uuid,
  pub subject:          ScoreSubject,
  pub value:            f64,
  pub confidence:       Confidence,
  pub reason_codes:     BTreeSet<String>,
  pub feature_snapshot: Value,
  pub version:          String,
  pub computed_at:      DateTime<Utc>,
  pub external_refs:    ExternalRefs,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn confidence_bounds_are_inclusive() {
    assert!(Confidence::new(0.0).is_ok());
    assert!(Confidence::new(1.0).is_ok());
    assert!(Confidence::new(1.01).is_err());
    assert!(Confidence::new(-0.1).is_err());
    assert!(Confidence::new(f64::NAN).is_err());
  }

  #[test]
  fn subject_kind_roundtrips_through_text() {
    let id = Uuid::new_v4();
    let subject = ScoreSubject::Listing(id);
    assert_eq!(subject.kind().as_ref(), "listing");

    let back = ScoreSubject::from_parts("listing", id).unwrap();
    assert_eq!(back, subject);
    assert!(ScoreSubject::from_parts("brand", id).is_err());
  }
}
