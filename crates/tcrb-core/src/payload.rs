//! Coercion of raw provider payloads into typed observations.
//!
//! Every payload field is optional. Missing text falls back to a documented
//! default, and numeric fields that are missing or unparseable become `None`.
//! A payload that is not a JSON object at all is treated as one with no
//! fields, so coercion itself never fails.

use serde_json::{Value, json};

use crate::{
  entity::{Confidence, StagingRecord},
  refs::SourceRef,
};

pub const UNKNOWN_BRAND: &str = "Unknown";
pub const UNKNOWN_DISPENSARY: &str = "Unknown";
pub const UNKNOWN_PRODUCT: &str = "Unknown Product";
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Version tag stamped on scores that come straight from a provider payload.
pub const PROVIDER_SCORE_VERSION: &str = "1.0";

// ─── Observation types ───────────────────────────────────────────────────────

/// A brand as seen in one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct BrandObservation {
  pub name:       String,
  pub source_ref: SourceRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispensaryObservation {
  pub name:       String,
  pub location:   Option<Value>,
  pub source_ref: SourceRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductObservation {
  pub name:        String,
  pub category:    String,
  pub subcategory: Option<String>,
  pub source_ref:  SourceRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingObservation {
  pub price:      Option<f64>,
  pub weight:     Option<f64>,
  pub source_ref: SourceRef,
}

/// Which payload field a provider score was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ScoreField {
  Score,
  Rating,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreObservation {
  pub value:      f64,
  pub confidence: Confidence,
  pub field:      ScoreField,
  /// The provider's value exactly as sent; kept as the feature snapshot.
  pub raw:        Value,
  pub source_ref: SourceRef,
}

impl ScoreObservation {
  pub fn feature_snapshot(&self) -> Value {
    json!({ "field": self.field.as_ref(), "raw": self.raw })
  }
}

/// Everything one staged payload says about the canonical model.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
  pub brand:      BrandObservation,
  pub dispensary: DispensaryObservation,
  pub product:    ProductObservation,
  pub listing:    ListingObservation,
  /// `None` when the payload carries neither `score` nor `rating`, or when
  /// neither of them coerces to a number.
  pub score:      Option<ScoreObservation>,
}

impl Observation {
  pub fn from_record(record: &StagingRecord) -> Self {
    let p = &record.payload;
    let field = |key: &str| p.get(key).filter(|v| !v.is_null());
    let source_ref = || SourceRef::new(record.source.clone());

    let brand = BrandObservation {
      name:       text_or(field("brand"), UNKNOWN_BRAND),
      source_ref: source_ref().with_id("brand_id", field("brand_id")),
    };

    let dispensary = DispensaryObservation {
      name:       text_or(field("dispensary"), UNKNOWN_DISPENSARY),
      location:   field("location").and_then(coerce_location),
      source_ref: source_ref().with_id("dispensary_id", field("dispensary_id")),
    };

    let product = ProductObservation {
      name:        text_or(field("name"), UNKNOWN_PRODUCT),
      category:    text_or(field("category"), UNKNOWN_CATEGORY),
      subcategory: field("subcategory").and_then(coerce_text),
      source_ref:  source_ref().with_id("product_id", field("product_id")),
    };

    let listing = ListingObservation {
      price:      number_field(p, "price"),
      weight:     number_field(p, "weight"),
      source_ref: source_ref().with_id("listing_id", field("listing_id")),
    };

    let score = [ScoreField::Score, ScoreField::Rating]
      .into_iter()
      .find_map(|f| {
        let raw = field(f.as_ref())?;
        coerce_number(raw).map(|value| (f, raw.clone(), value))
      })
      .map(|(field_used, raw, value)| ScoreObservation {
        value,
        confidence: confidence_field(p),
        field: field_used,
        raw,
        source_ref: source_ref().with_id("score_id", field("score_id")),
      });

    if score.is_none() && (field("score").is_some() || field("rating").is_some()) {
      tracing::debug!("score/rating present but not numeric; score step skipped");
    }

    Self { brand, dispensary, product, listing, score }
  }
}

// ─── Coercion helpers ────────────────────────────────────────────────────────

/// Coerce a JSON value to a finite number.
///
/// Accepts JSON numbers and numeric strings. Strings may carry a leading `$`
/// and a trailing unit suffix (`"3.5g"`, `"$12.50"`, `"28 g"`).
pub fn coerce_number(value: &Value) -> Option<f64> {
  match value {
    Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
    Value::String(s) => parse_decimal(s),
    _ => None,
  }
}

fn parse_decimal(s: &str) -> Option<f64> {
  let s = s.trim();
  let s = s.strip_prefix('$').unwrap_or(s);
  let digits = s
    .trim_end_matches(|c: char| c.is_ascii_alphabetic())
    .trim_end();
  digits.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Coerce a JSON value to non-empty, trimmed text.
pub fn coerce_text(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => {
      let s = s.trim();
      (!s.is_empty()).then(|| s.to_owned())
    }
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

fn text_or(value: Option<&Value>, default: &str) -> String {
  value.and_then(coerce_text).unwrap_or_else(|| default.to_owned())
}

fn coerce_location(value: &Value) -> Option<Value> {
  match value {
    Value::Object(m) if !m.is_empty() => Some(value.clone()),
    Value::String(s) if !s.trim().is_empty() => Some(value.clone()),
    _ => None,
  }
}

fn number_field(payload: &Value, key: &str) -> Option<f64> {
  let raw = payload.get(key).filter(|v| !v.is_null())?;
  let n = coerce_number(raw);
  if n.is_none() {
    tracing::debug!(field = key, value = %raw, "non-numeric value coerced to null");
  }
  n
}

fn confidence_field(payload: &Value) -> Confidence {
  match number_field(payload, "confidence").map(Confidence::new) {
    Some(Ok(c)) => c,
    Some(Err(e)) => {
      tracing::debug!(error = %e, "using default confidence");
      Confidence::PROVIDER_DEFAULT
    }
    None => Confidence::PROVIDER_DEFAULT,
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use uuid::Uuid;

  use super::*;
  use crate::refs::SourceName;

  fn record(payload: Value) -> StagingRecord {
    StagingRecord {
      staging_id: Uuid::new_v4(),
      source: SourceName::new("dutchie").unwrap(),
      payload,
      received_at: Utc::now(),
    }
  }

  #[test]
  fn empty_payload_uses_defaults() {
    let obs = Observation::from_record(&record(json!({})));

    assert_eq!(obs.brand.name, "Unknown");
    assert_eq!(obs.dispensary.name, "Unknown");
    assert_eq!(obs.product.name, "Unknown Product");
    assert_eq!(obs.product.category, "unknown");
    assert_eq!(obs.product.subcategory, None);
    assert_eq!(obs.dispensary.location, None);
    assert_eq!(obs.listing.price, None);
    assert_eq!(obs.listing.weight, None);
    assert!(obs.score.is_none());
    assert!(obs.brand.source_ref.ids.is_empty());
  }

  #[test]
  fn non_object_payload_is_treated_as_empty() {
    let obs = Observation::from_record(&record(json!("not an object")));
    assert_eq!(obs.brand.name, "Unknown");
    assert!(obs.score.is_none());
  }

  #[test]
  fn blank_names_fall_back_to_defaults() {
    let obs = Observation::from_record(&record(json!({
      "brand": "   ",
      "name": "",
    })));
    assert_eq!(obs.brand.name, "Unknown");
    assert_eq!(obs.product.name, "Unknown Product");
  }

  #[test]
  fn numeric_coercion() {
    assert_eq!(coerce_number(&json!(12.5)), Some(12.5));
    assert_eq!(coerce_number(&json!("12.50")), Some(12.5));
    assert_eq!(coerce_number(&json!(" $40 ")), Some(40.0));
    assert_eq!(coerce_number(&json!("3.5g")), Some(3.5));
    assert_eq!(coerce_number(&json!("28 g")), Some(28.0));
    assert_eq!(coerce_number(&json!("0")), Some(0.0));
    assert_eq!(coerce_number(&json!("free")), None);
    assert_eq!(coerce_number(&json!("NaN")), None);
    assert_eq!(coerce_number(&json!("inf")), None);
    assert_eq!(coerce_number(&json!(true)), None);
    assert_eq!(coerce_number(&json!({ "amount": 1 })), None);
  }

  #[test]
  fn zero_price_is_not_null() {
    let obs = Observation::from_record(&record(json!({ "price": 0 })));
    assert_eq!(obs.listing.price, Some(0.0));

    let obs = Observation::from_record(&record(json!({ "price": "call for price" })));
    assert_eq!(obs.listing.price, None);
  }

  #[test]
  fn ids_are_tagged_per_entity() {
    let obs = Observation::from_record(&record(json!({
      "brand_id": "b-1",
      "dispensary_id": 7,
      "product_id": "p-9",
      "listing_id": "l-3",
    })));

    assert_eq!(obs.brand.source_ref.ids["brand_id"], json!("b-1"));
    assert_eq!(obs.dispensary.source_ref.ids["dispensary_id"], json!(7));
    assert_eq!(obs.product.source_ref.ids["product_id"], json!("p-9"));
    assert_eq!(obs.listing.source_ref.ids["listing_id"], json!("l-3"));
    assert_eq!(obs.brand.source_ref.source.as_str(), "dutchie");
  }

  #[test]
  fn score_prefers_score_over_rating() {
    let obs = Observation::from_record(&record(json!({
      "score": "91.5",
      "rating": 4.2,
      "score_id": "s-1",
    })));
    let score = obs.score.unwrap();
    assert_eq!(score.value, 91.5);
    assert_eq!(score.field, ScoreField::Score);
    assert_eq!(score.confidence, Confidence::PROVIDER_DEFAULT);
    assert_eq!(score.source_ref.ids["score_id"], json!("s-1"));
    assert_eq!(
      score.feature_snapshot(),
      json!({ "field": "score", "raw": "91.5" })
    );
  }

  #[test]
  fn rating_is_used_when_score_is_absent_or_malformed() {
    let obs = Observation::from_record(&record(json!({ "rating": 4.2 })));
    assert_eq!(obs.score.as_ref().map(|s| s.field), Some(ScoreField::Rating));

    let obs = Observation::from_record(&record(json!({
      "score": "n/a",
      "rating": "4",
    })));
    let score = obs.score.unwrap();
    assert_eq!(score.field, ScoreField::Rating);
    assert_eq!(score.value, 4.0);
  }

  #[test]
  fn malformed_score_without_rating_skips_score() {
    let obs = Observation::from_record(&record(json!({ "score": "pending" })));
    assert!(obs.score.is_none());
  }

  #[test]
  fn confidence_is_read_or_defaulted() {
    let obs = Observation::from_record(&record(json!({
      "score": 80,
      "confidence": "0.95",
    })));
    assert_eq!(obs.score.unwrap().confidence.value(), 0.95);

    let obs = Observation::from_record(&record(json!({
      "score": 80,
      "confidence": 7,
    })));
    assert_eq!(obs.score.unwrap().confidence, Confidence::PROVIDER_DEFAULT);
  }

  #[test]
  fn location_must_be_structured_or_text() {
    let obs = Observation::from_record(&record(json!({
      "location": { "city": "Albany", "state": "NY" },
    })));
    assert_eq!(
      obs.dispensary.location,
      Some(json!({ "city": "Albany", "state": "NY" }))
    );

    let obs = Observation::from_record(&record(json!({ "location": {} })));
    assert_eq!(obs.dispensary.location, None);
  }
}
