//! The per-record resolution chain.
//!
//! ```text
//! Read → ResolveBrand → ResolveDispensary → ResolveProduct
//!      → UpsertListing → (WriteScore | Skip) → Committed
//! ```
//!
//! The order is mandatory: every step needs the id produced by an earlier one,
//! and foreign keys are enforced at insertion time. The chain itself does not
//! commit; the store wraps [`apply_record`] in a transaction.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
  entity::{ScoreSubject, StagingRecord},
  payload::Observation,
  score::ScoreWrite,
  store::{CanonicalSession, StoreError},
};

/// A step of the chain; recorded on failure.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
  Begin,
  ResolveBrand,
  ResolveDispensary,
  ResolveProduct,
  UpsertListing,
  WriteScore,
  Commit,
}

/// A store failure tagged with the stage that produced it.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct StageError<E> {
  pub stage:  Stage,
  #[source]
  pub source: E,
}

impl<E> StageError<E> {
  pub fn new(stage: Stage, source: E) -> Self { Self { stage, source } }

  /// Re-tag a lower-level error with `stage`.
  pub fn at(stage: Stage) -> impl FnOnce(E) -> Self { move |source| Self { stage, source } }
}

/// Tunables for one chain execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPolicy {
  /// Attempts per single resolve call when the store reports a key race.
  pub resolve_attempts: u32,
}

impl Default for ChainPolicy {
  fn default() -> Self { Self { resolve_attempts: 2 } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreStep {
  Written(Uuid),
  /// The payload carried no usable score or rating.
  Skipped,
}

/// The ids a committed record resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
  pub staging_id:    Uuid,
  pub brand_id:      Uuid,
  pub dispensary_id: Uuid,
  pub product_id:    Uuid,
  pub listing_id:    Uuid,
  pub score:         ScoreStep,
}

/// Resolve every canonical row `record` maps to, in dependency order.
pub fn apply_record<S: CanonicalSession>(
  session: &S,
  record: &StagingRecord,
  policy: ChainPolicy,
) -> Result<RecordOutcome, StageError<S::Error>> {
  let obs = Observation::from_record(record);

  let brand_id = retry(policy, Stage::ResolveBrand, || {
    session.resolve_brand(&obs.brand.name, &obs.brand.source_ref)
  })?;

  let dispensary_id = retry(policy, Stage::ResolveDispensary, || {
    session.resolve_dispensary(
      &obs.dispensary.name,
      obs.dispensary.location.as_ref(),
      &obs.dispensary.source_ref,
    )
  })?;

  let product_id = retry(policy, Stage::ResolveProduct, || {
    session.resolve_product(
      &obs.product.name,
      brand_id,
      &obs.product.category,
      obs.product.subcategory.as_deref(),
      &obs.product.source_ref,
    )
  })?;

  let listing_id = retry(policy, Stage::UpsertListing, || {
    session.upsert_listing(
      product_id,
      dispensary_id,
      obs.listing.price,
      obs.listing.weight,
      &obs.listing.source_ref,
    )
  })?;

  let score = match &obs.score {
    Some(observed) => {
      let write = ScoreWrite::from_provider(ScoreSubject::Listing(listing_id), observed);
      ScoreStep::Written(retry(policy, Stage::WriteScore, || session.write_score(&write))?)
    }
    None => ScoreStep::Skipped,
  };

  tracing::debug!(
    %brand_id,
    %dispensary_id,
    %product_id,
    %listing_id,
    scored = matches!(score, ScoreStep::Written(_)),
    "record resolved"
  );

  Ok(RecordOutcome {
    staging_id: record.staging_id,
    brand_id,
    dispensary_id,
    product_id,
    listing_id,
    score,
  })
}

/// Re-issue a single store call while it loses a unique-key race.
fn retry<T, E: StoreError>(
  policy: ChainPolicy,
  stage: Stage,
  mut call: impl FnMut() -> Result<T, E>,
) -> Result<T, StageError<E>> {
  let mut attempt = 1;
  loop {
    match call() {
      Ok(v) => return Ok(v),
      Err(e) if e.is_key_race() && attempt < policy.resolve_attempts => {
        tracing::warn!(%stage, attempt, error = %e, "unique key race; retrying call");
        attempt += 1;
      }
      Err(e) => return Err(StageError::new(stage, e)),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    cell::{Cell, RefCell},
    fmt,
  };

  use chrono::Utc;
  use serde_json::{Value, json};

  use super::*;
  use crate::refs::{SourceName, SourceRef};

  #[derive(Debug)]
  struct FakeError {
    race: bool,
  }

  impl fmt::Display for FakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "fake error (race = {})", self.race)
    }
  }

  impl std::error::Error for FakeError {}

  impl StoreError for FakeError {
    fn is_key_race(&self) -> bool { self.race }

    fn is_unavailable(&self) -> bool { false }
  }

  /// Records call order; can be told to fail the brand step a few times.
  #[derive(Default)]
  struct Recorder {
    calls:        RefCell<Vec<&'static str>>,
    brand_races:  Cell<u32>,
    fail_listing: bool,
  }

  impl CanonicalSession for Recorder {
    type Error = FakeError;

    fn resolve_brand(&self, _: &str, _: &SourceRef) -> Result<Uuid, FakeError> {
      self.calls.borrow_mut().push("brand");
      if self.brand_races.get() > 0 {
        self.brand_races.set(self.brand_races.get() - 1);
        return Err(FakeError { race: true });
      }
      Ok(Uuid::new_v4())
    }

    fn resolve_dispensary(
      &self,
      _: &str,
      _: Option<&Value>,
      _: &SourceRef,
    ) -> Result<Uuid, FakeError> {
      self.calls.borrow_mut().push("dispensary");
      Ok(Uuid::new_v4())
    }

    fn resolve_product(
      &self,
      _: &str,
      _: Uuid,
      _: &str,
      _: Option<&str>,
      _: &SourceRef,
    ) -> Result<Uuid, FakeError> {
      self.calls.borrow_mut().push("product");
      Ok(Uuid::new_v4())
    }

    fn upsert_listing(
      &self,
      _: Uuid,
      _: Uuid,
      _: Option<f64>,
      _: Option<f64>,
      _: &SourceRef,
    ) -> Result<Uuid, FakeError> {
      self.calls.borrow_mut().push("listing");
      if self.fail_listing {
        return Err(FakeError { race: false });
      }
      Ok(Uuid::new_v4())
    }

    fn write_score(&self, _: &ScoreWrite) -> Result<Uuid, FakeError> {
      self.calls.borrow_mut().push("score");
      Ok(Uuid::new_v4())
    }
  }

  fn record(payload: Value) -> StagingRecord {
    StagingRecord {
      staging_id: Uuid::new_v4(),
      source: SourceName::new("dutchie").unwrap(),
      payload,
      received_at: Utc::now(),
    }
  }

  #[test]
  fn steps_run_in_dependency_order() {
    let session = Recorder::default();
    let outcome =
      apply_record(&session, &record(json!({ "score": 88 })), ChainPolicy::default())
        .unwrap();

    assert_eq!(
      *session.calls.borrow(),
      ["brand", "dispensary", "product", "listing", "score"]
    );
    assert!(matches!(outcome.score, ScoreStep::Written(_)));
  }

  #[test]
  fn score_step_is_skipped_without_score_fields() {
    let session = Recorder::default();
    let outcome =
      apply_record(&session, &record(json!({ "brand": "Acme" })), ChainPolicy::default())
        .unwrap();

    assert_eq!(outcome.score, ScoreStep::Skipped);
    assert!(!session.calls.borrow().contains(&"score"));
  }

  #[test]
  fn key_race_retries_only_the_single_call() {
    let session = Recorder { brand_races: Cell::new(1), ..Default::default() };
    apply_record(&session, &record(json!({})), ChainPolicy::default()).unwrap();

    assert_eq!(
      *session.calls.borrow(),
      ["brand", "brand", "dispensary", "product", "listing"]
    );
  }

  #[test]
  fn key_race_gives_up_after_policy_attempts() {
    let session = Recorder { brand_races: Cell::new(5), ..Default::default() };
    let err = apply_record(&session, &record(json!({})), ChainPolicy { resolve_attempts: 3 })
      .unwrap_err();

    assert_eq!(err.stage, Stage::ResolveBrand);
    assert_eq!(session.calls.borrow().len(), 3);
  }

  #[test]
  fn failure_stops_the_chain_and_names_the_stage() {
    let session = Recorder { fail_listing: true, ..Default::default() };
    let err = apply_record(&session, &record(json!({ "score": 1 })), ChainPolicy::default())
      .unwrap_err();

    assert_eq!(err.stage, Stage::UpsertListing);
    assert_eq!(err.to_string(), "upsert_listing failed: fake error (race = false)");
    assert!(!session.calls.borrow().contains(&"score"));
  }
}
