//! [`SqliteSession`]: the transaction-scoped write surface of the store.
//!
//! Every method is one `INSERT … ON CONFLICT … DO UPDATE … RETURNING`
//! statement, so create-or-merge is decided by SQLite atomically rather than
//! by a read followed by a write.
//!
//! `external_refs` merging: on insert the column becomes
//! `{source: ids}`; on conflict `json_set` replaces exactly the `source` key
//! and leaves every other source's entry untouched.

use chrono::Utc;
use rusqlite::Connection;
use serde_json::Value;
use tcrb_core::{
  entity::ScoreSubject,
  refs::SourceRef,
  score::ScoreWrite,
  store::CanonicalSession,
};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{decode_uuid, encode_dt, encode_reason_codes, encode_uuid, source_path},
};

const RESOLVE_BRAND: &str = "
INSERT INTO brands (brand_id, name, external_refs, created_at, updated_at)
VALUES (?1, ?2, json_object(?3, json(?4)), ?5, ?5)
ON CONFLICT (name) DO UPDATE SET
    external_refs = json_set(brands.external_refs, ?6, json(?4)),
    updated_at    = excluded.updated_at
RETURNING brand_id";

const RESOLVE_DISPENSARY: &str = "
INSERT INTO dispensaries (dispensary_id, name, location, external_refs, created_at, updated_at)
VALUES (?1, ?2, json(?3), json_object(?4, json(?5)), ?6, ?6)
ON CONFLICT (name) DO UPDATE SET
    -- an absent location keeps the stored one instead of resetting it
    location      = COALESCE(excluded.location, dispensaries.location),
    external_refs = json_set(dispensaries.external_refs, ?7, json(?5)),
    updated_at    = excluded.updated_at
RETURNING dispensary_id";

const RESOLVE_PRODUCT: &str = "
INSERT INTO products (
    product_id, name, brand_id, category, subcategory,
    external_refs, created_at, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, json_object(?6, json(?7)), ?8, ?8)
ON CONFLICT (name, brand_id) DO UPDATE SET
    category      = excluded.category,
    subcategory   = excluded.subcategory,
    external_refs = json_set(products.external_refs, ?9, json(?7)),
    updated_at    = excluded.updated_at
RETURNING product_id";

const UPSERT_LISTING: &str = "
INSERT INTO listings (
    listing_id, product_id, dispensary_id, price, weight,
    external_refs, created_at, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, json_object(?6, json(?7)), ?8, ?8)
ON CONFLICT (product_id, dispensary_id) DO UPDATE SET
    price         = excluded.price,
    weight        = excluded.weight,
    external_refs = json_set(listings.external_refs, ?9, json(?7)),
    updated_at    = excluded.updated_at
RETURNING listing_id";

/// `{target}` is the subject column (`listing_id` or `product_id`). ?10/?12
/// are NULL when the write carries no provenance.
const WRITE_SCORE: &str = "
INSERT INTO scores (
    score_id, listing_id, product_id, value, confidence, reason_codes,
    feature_snapshot, version, computed_at, external_refs
) VALUES (
    ?1, ?2, ?3, ?4, ?5, ?6, json(?7), ?8, ?9,
    CASE WHEN ?10 IS NULL THEN '{}' ELSE json_object(?10, json(?11)) END
)
ON CONFLICT ({target}) DO UPDATE SET
    value            = excluded.value,
    confidence       = excluded.confidence,
    reason_codes     = excluded.reason_codes,
    feature_snapshot = excluded.feature_snapshot,
    version          = excluded.version,
    computed_at      = excluded.computed_at,
    external_refs    = CASE WHEN ?12 IS NULL THEN scores.external_refs
                            ELSE json_set(scores.external_refs, ?12, json(?11)) END
RETURNING score_id";

/// A write session over a borrowed connection or open transaction.
///
/// The session never begins or commits; whoever owns the transaction decides
/// its fate.
pub struct SqliteSession<'c> {
  conn: &'c Connection,
}

impl<'c> SqliteSession<'c> {
  pub fn new(conn: &'c Connection) -> Self { Self { conn } }

  fn returning_id(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Uuid> {
    let id: String = self
      .conn
      .prepare_cached(sql)?
      .query_row(params, |row| row.get(0))?;
    decode_uuid(&id)
  }
}

impl CanonicalSession for SqliteSession<'_> {
  type Error = Error;

  fn resolve_brand(&self, name: &str, source_ref: &SourceRef) -> Result<Uuid> {
    let new_id = encode_uuid(Uuid::new_v4());
    let now = encode_dt(Utc::now());
    let ids = source_ref.ids_json();
    let path = source_path(&source_ref.source);

    self.returning_id(
      RESOLVE_BRAND,
      rusqlite::params![new_id, name, source_ref.source.as_str(), ids, now, path],
    )
  }

  fn resolve_dispensary(
    &self,
    name: &str,
    location: Option<&Value>,
    source_ref: &SourceRef,
  ) -> Result<Uuid> {
    let new_id = encode_uuid(Uuid::new_v4());
    let now = encode_dt(Utc::now());
    let location = location.map(Value::to_string);
    let ids = source_ref.ids_json();
    let path = source_path(&source_ref.source);

    self.returning_id(
      RESOLVE_DISPENSARY,
      rusqlite::params![new_id, name, location, source_ref.source.as_str(), ids, now, path],
    )
  }

  fn resolve_product(
    &self,
    name: &str,
    brand_id: Uuid,
    category: &str,
    subcategory: Option<&str>,
    source_ref: &SourceRef,
  ) -> Result<Uuid> {
    let new_id = encode_uuid(Uuid::new_v4());
    let brand_id = encode_uuid(brand_id);
    let now = encode_dt(Utc::now());
    let ids = source_ref.ids_json();
    let path = source_path(&source_ref.source);

    self.returning_id(
      RESOLVE_PRODUCT,
      rusqlite::params![
        new_id,
        name,
        brand_id,
        category,
        subcategory,
        source_ref.source.as_str(),
        ids,
        now,
        path,
      ],
    )
  }

  fn upsert_listing(
    &self,
    product_id: Uuid,
    dispensary_id: Uuid,
    price: Option<f64>,
    weight: Option<f64>,
    source_ref: &SourceRef,
  ) -> Result<Uuid> {
    let new_id = encode_uuid(Uuid::new_v4());
    let product_id = encode_uuid(product_id);
    let dispensary_id = encode_uuid(dispensary_id);
    let now = encode_dt(Utc::now());
    let ids = source_ref.ids_json();
    let path = source_path(&source_ref.source);

    self.returning_id(
      UPSERT_LISTING,
      rusqlite::params![
        new_id,
        product_id,
        dispensary_id,
        price,
        weight,
        source_ref.source.as_str(),
        ids,
        now,
        path,
      ],
    )
  }

  fn write_score(&self, score: &ScoreWrite) -> Result<Uuid> {
    let (target, listing_id, product_id) = match score.subject {
      ScoreSubject::Listing(id) => ("listing_id", Some(encode_uuid(id)), None),
      ScoreSubject::Product(id) => ("product_id", None, Some(encode_uuid(id))),
    };
    let sql = WRITE_SCORE.replace("{target}", target);

    let new_id = encode_uuid(Uuid::new_v4());
    let reason_codes = encode_reason_codes(&score.reason_codes)?;
    let snapshot = score.feature_snapshot.to_string();
    let computed_at = encode_dt(Utc::now());
    let source = score.source_ref.as_ref().map(|r| r.source.as_str());
    let ids = score.source_ref.as_ref().map(SourceRef::ids_json);
    let path = score.source_ref.as_ref().map(|r| source_path(&r.source));

    self.returning_id(
      &sql,
      rusqlite::params![
        new_id,
        listing_id,
        product_id,
        score.value,
        score.confidence.value(),
        reason_codes,
        snapshot,
        score.version,
        computed_at,
        source,
        ids,
        path,
      ],
    )
  }
}
