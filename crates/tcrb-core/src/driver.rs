//! Batch drivers: normalization of a staged source and placeholder scoring.
//!
//! Both drivers isolate per-item failures (logged, counted, skipped) and only
//! abort the run when the store itself becomes unavailable.

use std::fmt;

use serde::Serialize;
use tracing::Instrument as _;
use uuid::Uuid;

use crate::{
  chain::{ChainPolicy, ScoreStep, Stage},
  entity::ScoreSubject,
  refs::SourceName,
  score::{ScoreKernel, ScoreWrite},
  store::{CanonicalStore, StoreError, TableCounts},
};

// ─── Reports ─────────────────────────────────────────────────────────────────

/// A record whose chain was rolled back.
#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
  pub staging_id: Uuid,
  pub stage:      Stage,
  pub message:    String,
}

/// Summary of one normalization run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
  pub source:        SourceName,
  pub staged:        usize,
  /// Records whose chain committed, with or without a score.
  pub processed:     usize,
  pub scored:        usize,
  pub skipped_score: usize,
  pub failed:        usize,
  pub failures:      Vec<RecordFailure>,
  pub counts:        TableCounts,
}

impl fmt::Display for RunReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "Normalized {} of {} {} records", self.processed, self.staged, self.source)?;
    writeln!(f, "  scored:        {}", self.scored)?;
    writeln!(f, "  skipped score: {}", self.skipped_score)?;
    writeln!(f, "  failed:        {}", self.failed)?;
    write!(f, "{}", self.counts)
  }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScoringReport {
  pub considered: usize,
  pub written:    usize,
  pub failed:     usize,
}

// ─── Normalization ───────────────────────────────────────────────────────────

/// Normalize every staged record of `source`.
///
/// Records are processed sequentially; each one commits or rolls back on its
/// own. Only [`StoreError::is_unavailable`] failures abort the run.
pub async fn normalize_source<S: CanonicalStore>(
  store: &S,
  source: &SourceName,
  policy: ChainPolicy,
) -> Result<RunReport, S::Error> {
  let records = store.staged_records(source.clone()).await?;
  tracing::info!(%source, records = records.len(), "starting normalization");

  let mut report = RunReport {
    source:        source.clone(),
    staged:        records.len(),
    processed:     0,
    scored:        0,
    skipped_score: 0,
    failed:        0,
    failures:      Vec::new(),
    counts:        TableCounts::default(),
  };

  for record in records {
    let staging_id = record.staging_id;
    let span = tracing::info_span!("record", %staging_id);

    match store.normalize_record(record, policy).instrument(span).await {
      Ok(outcome) => {
        report.processed += 1;
        match outcome.score {
          ScoreStep::Written(_) => report.scored += 1,
          ScoreStep::Skipped => report.skipped_score += 1,
        }
      }
      Err(e) if e.source.is_unavailable() => {
        tracing::error!(%staging_id, stage = %e.stage, error = %e.source, "store unavailable; aborting run");
        return Err(e.source);
      }
      Err(e) => {
        tracing::warn!(%staging_id, stage = %e.stage, error = %e.source, "record failed; continuing");
        report.failed += 1;
        report.failures.push(RecordFailure {
          staging_id,
          stage: e.stage,
          message: e.source.to_string(),
        });
      }
    }
  }

  report.counts = store.table_counts().await?;
  tracing::info!(
    %source,
    processed = report.processed,
    skipped_score = report.skipped_score,
    failed = report.failed,
    "normalization complete"
  );
  Ok(report)
}

// ─── Scoring ─────────────────────────────────────────────────────────────────

/// Score up to `limit` products with `kernel`, replacing their current score.
pub async fn score_products<S, K>(
  store: &S,
  kernel: &mut K,
  limit: usize,
) -> Result<ScoringReport, S::Error>
where
  S: CanonicalStore,
  K: ScoreKernel + Send,
{
  let product_ids = store.list_product_ids(limit).await?;
  let mut report = ScoringReport { considered: product_ids.len(), ..Default::default() };

  for product_id in product_ids {
    let subject = ScoreSubject::Product(product_id);
    let write = ScoreWrite::from_kernel(subject, kernel.score(subject));

    match store.write_score(write).await {
      Ok(_) => report.written += 1,
      Err(e) if e.is_unavailable() => {
        tracing::error!(%product_id, error = %e, "store unavailable; aborting scoring");
        return Err(e);
      }
      Err(e) => {
        tracing::warn!(%product_id, stage = %Stage::WriteScore, error = %e, "score write failed");
        report.failed += 1;
      }
    }
  }

  tracing::info!(written = report.written, failed = report.failed, "scoring complete");
  Ok(report)
}

#[cfg(test)]
mod tests {
  use std::{fmt, sync::Mutex};

  use chrono::Utc;
  use serde_json::{Value, json};

  use super::*;
  use crate::{
    chain::{RecordOutcome, StageError},
    entity::{Brand, Dispensary, Listing, Product, Score, StagingRecord},
    store::ScoreExport,
  };

  #[derive(Debug)]
  struct FakeError {
    unavailable: bool,
  }

  impl fmt::Display for FakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "fake error (unavailable = {})", self.unavailable)
    }
  }

  impl std::error::Error for FakeError {}

  impl StoreError for FakeError {
    fn is_key_race(&self) -> bool { false }

    fn is_unavailable(&self) -> bool { self.unavailable }
  }

  /// Serves a fixed batch. `failures[i]` decides the fate of the i-th
  /// attempted record: `None` commits, `Some(unavailable)` fails.
  struct FakeStore {
    records:   Vec<StagingRecord>,
    failures:  Vec<Option<bool>>,
    attempted: Mutex<Vec<Uuid>>,
    committed: Mutex<Vec<Uuid>>,
  }

  impl FakeStore {
    fn new(failures: Vec<Option<bool>>) -> Self {
      let records = failures
        .iter()
        .map(|_| StagingRecord {
          staging_id:  Uuid::new_v4(),
          source:      source(),
          payload:     json!({ "brand": "Acme" }),
          received_at: Utc::now(),
        })
        .collect();
      Self {
        records,
        failures,
        attempted: Mutex::new(Vec::new()),
        committed: Mutex::new(Vec::new()),
      }
    }

    fn ids(list: &Mutex<Vec<Uuid>>) -> Vec<Uuid> { list.lock().unwrap().clone() }
  }

  impl CanonicalStore for FakeStore {
    type Error = FakeError;

    async fn stage(&self, _: SourceName, _: Value) -> Result<StagingRecord, FakeError> {
      unimplemented!()
    }

    async fn staged_records(&self, _: SourceName) -> Result<Vec<StagingRecord>, FakeError> {
      Ok(self.records.clone())
    }

    async fn normalize_record(
      &self,
      record: StagingRecord,
      _: ChainPolicy,
    ) -> Result<RecordOutcome, StageError<FakeError>> {
      let index = {
        let mut attempted = self.attempted.lock().unwrap();
        attempted.push(record.staging_id);
        attempted.len() - 1
      };

      if let Some(unavailable) = self.failures[index] {
        return Err(StageError::new(Stage::Begin, FakeError { unavailable }));
      }

      self.committed.lock().unwrap().push(record.staging_id);
      Ok(RecordOutcome {
        staging_id:    record.staging_id,
        brand_id:      Uuid::new_v4(),
        dispensary_id: Uuid::new_v4(),
        product_id:    Uuid::new_v4(),
        listing_id:    Uuid::new_v4(),
        score:         ScoreStep::Skipped,
      })
    }

    async fn write_score(&self, _: ScoreWrite) -> Result<Uuid, FakeError> { unimplemented!() }

    async fn list_product_ids(&self, _: usize) -> Result<Vec<Uuid>, FakeError> { Ok(Vec::new()) }

    async fn table_counts(&self) -> Result<TableCounts, FakeError> {
      Ok(TableCounts { staged: self.records.len() as u64, ..Default::default() })
    }

    async fn export_scores(&self, _: usize) -> Result<Vec<ScoreExport>, FakeError> {
      Ok(Vec::new())
    }

    async fn find_brand(&self, _: String) -> Result<Option<Brand>, FakeError> { Ok(None) }

    async fn find_dispensary(&self, _: String) -> Result<Option<Dispensary>, FakeError> {
      Ok(None)
    }

    async fn find_product(&self, _: String, _: Uuid) -> Result<Option<Product>, FakeError> {
      Ok(None)
    }

    async fn find_listing(&self, _: Uuid, _: Uuid) -> Result<Option<Listing>, FakeError> {
      Ok(None)
    }

    async fn find_score(&self, _: ScoreSubject) -> Result<Option<Score>, FakeError> { Ok(None) }
  }

  fn source() -> SourceName { SourceName::new("dutchie").unwrap() }

  #[tokio::test]
  async fn store_lost_mid_run_aborts_and_keeps_earlier_commits() {
    let store = FakeStore::new(vec![None, Some(true), None]);

    let err = normalize_source(&store, &source(), ChainPolicy::default())
      .await
      .unwrap_err();
    assert!(err.is_unavailable());

    let attempted = FakeStore::ids(&store.attempted);
    assert_eq!(attempted, [store.records[0].staging_id, store.records[1].staging_id]);
    assert_eq!(FakeStore::ids(&store.committed), [store.records[0].staging_id]);
  }

  #[tokio::test]
  async fn record_failure_is_counted_and_the_run_continues() {
    let store = FakeStore::new(vec![Some(false), None, None]);

    let report = normalize_source(&store, &source(), ChainPolicy::default())
      .await
      .unwrap();
    assert_eq!(report.staged, 3);
    assert_eq!(report.processed, 2);
    assert_eq!(report.skipped_score, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].staging_id, store.records[0].staging_id);
    assert_eq!(report.failures[0].stage, Stage::Begin);
    assert_eq!(FakeStore::ids(&store.attempted).len(), 3);
    assert_eq!(report.counts.staged, 3);
  }
}
