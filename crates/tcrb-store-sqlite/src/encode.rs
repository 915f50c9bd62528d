//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are fixed-width RFC 3339 UTC strings (so they sort as text).
//! Structured fields (payloads, locations, external refs, reason codes) are
//! compact JSON. UUIDs are hyphenated lowercase strings.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tcrb_core::{
  entity::{
    Brand, Confidence, Dispensary, Listing, Product, Score, ScoreSubject, StagingRecord,
  },
  refs::{ExternalRefs, SourceName},
  store::ScoreExport,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

/// JSON path addressing one source's entry inside an `external_refs` object.
///
/// [`SourceName`] only admits characters that need no escaping here.
pub fn source_path(source: &SourceName) -> String { format!("$.\"{source}\"") }

fn decode_json(s: &str) -> Result<Value> { Ok(serde_json::from_str(s)?) }

fn decode_refs(s: &str) -> Result<ExternalRefs> { Ok(serde_json::from_str(s)?) }

pub fn encode_reason_codes(codes: &BTreeSet<String>) -> Result<String> {
  Ok(serde_json::to_string(codes)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `staging_sources` row.
pub struct RawStagingRecord {
  pub staging_id:  String,
  pub source:      String,
  pub payload:     String,
  pub received_at: String,
}

impl RawStagingRecord {
  pub fn into_record(self) -> Result<StagingRecord> {
    Ok(StagingRecord {
      staging_id:  decode_uuid(&self.staging_id)?,
      source:      SourceName::new(self.source)?,
      payload:     decode_json(&self.payload)?,
      received_at: decode_dt(&self.received_at)?,
    })
  }
}

pub struct RawBrand {
  pub brand_id:      String,
  pub name:          String,
  pub external_refs: String,
  pub created_at:    String,
  pub updated_at:    String,
}

impl RawBrand {
  pub fn into_brand(self) -> Result<Brand> {
    Ok(Brand {
      brand_id:      decode_uuid(&self.brand_id)?,
      name:          self.name,
      external_refs: decode_refs(&self.external_refs)?,
      created_at:    decode_dt(&self.created_at)?,
      updated_at:    decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawDispensary {
  pub dispensary_id: String,
  pub name:          String,
  pub location:      Option<String>,
  pub external_refs: String,
  pub created_at:    String,
  pub updated_at:    String,
}

impl RawDispensary {
  pub fn into_dispensary(self) -> Result<Dispensary> {
    Ok(Dispensary {
      dispensary_id: decode_uuid(&self.dispensary_id)?,
      name:          self.name,
      location:      self.location.as_deref().map(decode_json).transpose()?,
      external_refs: decode_refs(&self.external_refs)?,
      created_at:    decode_dt(&self.created_at)?,
      updated_at:    decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawProduct {
  pub product_id:    String,
  pub name:          String,
  pub brand_id:      String,
  pub category:      String,
  pub subcategory:   Option<String>,
  pub external_refs: String,
  pub created_at:    String,
  pub updated_at:    String,
}

impl RawProduct {
  pub fn into_product(self) -> Result<Product> {
    Ok(Product {
      product_id:    decode_uuid(&self.product_id)?,
      name:          self.name,
      brand_id:      decode_uuid(&self.brand_id)?,
      category:      self.category,
      subcategory:   self.subcategory,
      external_refs: decode_refs(&self.external_refs)?,
      created_at:    decode_dt(&self.created_at)?,
      updated_at:    decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawListing {
  pub listing_id:    String,
  pub product_id:    String,
  pub dispensary_id: String,
  pub price:         Option<f64>,
  pub weight:        Option<f64>,
  pub external_refs: String,
  pub created_at:    String,
  pub updated_at:    String,
}

impl RawListing {
  pub fn into_listing(self) -> Result<Listing> {
    Ok(Listing {
      listing_id:    decode_uuid(&self.listing_id)?,
      product_id:    decode_uuid(&self.product_id)?,
      dispensary_id: decode_uuid(&self.dispensary_id)?,
      price:         self.price,
      weight:        self.weight,
      external_refs: decode_refs(&self.external_refs)?,
      created_at:    decode_dt(&self.created_at)?,
      updated_at:    decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw `scores` row; exactly one of `listing_id`/`product_id` is set.
pub struct RawScore {
  pub score_id:         String,
  pub listing_id:       Option<String>,
  pub product_id:       Option<String>,
  pub value:            f64,
  pub confidence:       f64,
  pub reason_codes:     String,
  pub feature_snapshot: String,
  pub version:          String,
  pub computed_at:      String,
  pub external_refs:    String,
}

impl RawScore {
  pub fn into_score(self) -> Result<Score> {
    let subject = match (self.listing_id, self.product_id) {
      (Some(l), _) => ScoreSubject::Listing(decode_uuid(&l)?),
      (None, Some(p)) => ScoreSubject::Product(decode_uuid(&p)?),
      (None, None) => {
        return Err(Error::CorruptRow { table: "scores", reason: "score has no subject" });
      }
    };

    Ok(Score {
      score_id: decode_uuid(&self.score_id)?,
      subject,
      value: self.value,
      confidence: Confidence::new(self.confidence)?,
      reason_codes: serde_json::from_str(&self.reason_codes)?,
      feature_snapshot: decode_json(&self.feature_snapshot)?,
      version: self.version,
      computed_at: decode_dt(&self.computed_at)?,
      external_refs: decode_refs(&self.external_refs)?,
    })
  }
}

pub struct RawScoreExport {
  pub product_id:    String,
  pub product_name:  String,
  pub source:        Option<String>,
  pub price:         Option<f64>,
  pub score:         f64,
  pub confidence:    f64,
  pub computed_at:   String,
  pub listing_count: i64,
}

impl RawScoreExport {
  pub fn into_export(self) -> Result<ScoreExport> {
    Ok(ScoreExport {
      product_id:    decode_uuid(&self.product_id)?,
      product_name:  self.product_name,
      source:        self.source,
      price:         self.price,
      score:         self.score,
      confidence:    self.confidence,
      computed_at:   decode_dt(&self.computed_at)?,
      listing_count: u64::try_from(self.listing_count).unwrap_or(0),
    })
  }
}
