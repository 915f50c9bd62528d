//! Store abstractions: the per-record write session and the canonical store.
//!
//! [`CanonicalSession`] is the synchronous, transaction-scoped surface the
//! resolution chain writes through. [`CanonicalStore`] is the async,
//! run-scoped surface the driver talks to. Backends (e.g.
//! `tcrb-store-sqlite`) implement both.

use std::{fmt, future::Future};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
  chain::{ChainPolicy, RecordOutcome, StageError},
  entity::{Brand, Dispensary, Listing, Product, Score, ScoreSubject, StagingRecord},
  refs::{SourceName, SourceRef},
  score::ScoreWrite,
};

// ─── Error classification ────────────────────────────────────────────────────

/// Classification every backend error must support so the chain and driver
/// can decide between retrying a call, failing a record, or aborting a run.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  /// The store rejected a write on a unique natural key. Re-issuing the same
  /// single call resolves to the row the competing writer created.
  fn is_key_race(&self) -> bool;

  /// Connection-level failure. Fatal to the whole run.
  fn is_unavailable(&self) -> bool;
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// Write operations executed inside one record's transaction.
///
/// Each method is a single atomic insert-or-merge against the store: it
/// either creates the row for the natural key or merges into the existing
/// one, and always returns the row's stable id.
pub trait CanonicalSession {
  type Error: StoreError;

  /// Natural key `name`. Merges `source_ref` into `external_refs`.
  fn resolve_brand(&self, name: &str, source_ref: &SourceRef) -> Result<Uuid, Self::Error>;

  /// Natural key `name`. A `Some` location replaces the stored one; `None`
  /// leaves it untouched, so a payload without a location never erases one
  /// recorded earlier (rather than resetting it to an empty object).
  fn resolve_dispensary(
    &self,
    name: &str,
    location: Option<&Value>,
    source_ref: &SourceRef,
  ) -> Result<Uuid, Self::Error>;

  /// Natural key `(name, brand_id)`. `category` and `subcategory` are
  /// overwritten on every call.
  fn resolve_product(
    &self,
    name: &str,
    brand_id: Uuid,
    category: &str,
    subcategory: Option<&str>,
    source_ref: &SourceRef,
  ) -> Result<Uuid, Self::Error>;

  /// Natural key `(product_id, dispensary_id)`. `price` and `weight` are
  /// overwritten on every call, including with `None`.
  fn upsert_listing(
    &self,
    product_id: Uuid,
    dispensary_id: Uuid,
    price: Option<f64>,
    weight: Option<f64>,
    source_ref: &SourceRef,
  ) -> Result<Uuid, Self::Error>;

  /// Natural key `score.subject`. Replaces the subject's current score.
  fn write_score(&self, score: &ScoreWrite) -> Result<Uuid, Self::Error>;
}

// ─── Read models ─────────────────────────────────────────────────────────────

/// Row counts per table, reported after every run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
  pub staged:       u64,
  pub brands:       u64,
  pub dispensaries: u64,
  pub products:     u64,
  pub listings:     u64,
  pub scores:       u64,
}

impl fmt::Display for TableCounts {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "Staged:       {}", self.staged)?;
    writeln!(f, "Brands:       {}", self.brands)?;
    writeln!(f, "Dispensaries: {}", self.dispensaries)?;
    writeln!(f, "Products:     {}", self.products)?;
    writeln!(f, "Listings:     {}", self.listings)?;
    write!(f, "Scores:       {}", self.scores)
  }
}

/// One row of the score export consumed by external sync jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreExport {
  pub product_id:    Uuid,
  pub product_name:  String,
  /// First source (alphabetically) recorded in the product's provenance.
  pub source:        Option<String>,
  /// Lowest known listing price for the product.
  pub price:         Option<f64>,
  pub score:         f64,
  pub confidence:    f64,
  pub computed_at:   DateTime<Utc>,
  pub listing_count: u64,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Abstraction over a canonical store backend.
///
/// All methods return `Send` futures so the trait can be driven from a
/// multi-threaded tokio runtime.
pub trait CanonicalStore: Send + Sync {
  type Error: StoreError;

  // ── Staging ───────────────────────────────────────────────────────────

  /// Append a raw payload to the staging table.
  fn stage(
    &self,
    source: SourceName,
    payload: Value,
  ) -> impl Future<Output = Result<StagingRecord, Self::Error>> + Send + '_;

  /// All staged records for `source`, in arrival order.
  fn staged_records(
    &self,
    source: SourceName,
  ) -> impl Future<Output = Result<Vec<StagingRecord>, Self::Error>> + Send + '_;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Run the full resolution chain for one record inside one transaction.
  /// Either every row the chain touches is committed, or none is.
  fn normalize_record(
    &self,
    record: StagingRecord,
    policy: ChainPolicy,
  ) -> impl Future<Output = Result<RecordOutcome, StageError<Self::Error>>> + Send + '_;

  /// Write a score outside of the normalization chain (scoring jobs).
  fn write_score(
    &self,
    score: ScoreWrite,
  ) -> impl Future<Output = Result<Uuid, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Up to `limit` product ids, oldest first.
  fn list_product_ids(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  fn table_counts(&self) -> impl Future<Output = Result<TableCounts, Self::Error>> + Send + '_;

  /// The newest `limit` scores joined with their product, newest first.
  fn export_scores(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<ScoreExport>, Self::Error>> + Send + '_;

  fn find_brand(
    &self,
    name: String,
  ) -> impl Future<Output = Result<Option<Brand>, Self::Error>> + Send + '_;

  fn find_dispensary(
    &self,
    name: String,
  ) -> impl Future<Output = Result<Option<Dispensary>, Self::Error>> + Send + '_;

  fn find_product(
    &self,
    name: String,
    brand_id: Uuid,
  ) -> impl Future<Output = Result<Option<Product>, Self::Error>> + Send + '_;

  fn find_listing(
    &self,
    product_id: Uuid,
    dispensary_id: Uuid,
  ) -> impl Future<Output = Result<Option<Listing>, Self::Error>> + Send + '_;

  fn find_score(
    &self,
    subject: ScoreSubject,
  ) -> impl Future<Output = Result<Option<Score>, Self::Error>> + Send + '_;
}
