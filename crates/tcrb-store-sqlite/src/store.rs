//! [`SqliteStore`]: the SQLite implementation of [`CanonicalStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use serde_json::Value;
use uuid::Uuid;

use tcrb_core::{
  chain::{ChainPolicy, RecordOutcome, Stage, StageError, apply_record},
  entity::{Brand, Dispensary, Listing, Product, Score, ScoreSubject, StagingRecord},
  refs::SourceName,
  score::ScoreWrite,
  store::{CanonicalSession, CanonicalStore, ScoreExport, TableCounts},
};

use crate::{
  Error, Result,
  encode::{
    RawBrand, RawDispensary, RawListing, RawProduct, RawScore, RawScoreExport,
    RawStagingRecord, decode_uuid, encode_dt, encode_uuid,
  },
  schema::SCHEMA,
  session::SqliteSession,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A canonical store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted. All calls
/// are serialised on the connection's thread, which makes the driver the sole
/// owner of the session for the duration of each record's transaction.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), "opening sqlite store");
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Close the underlying connection. Further calls fail as unavailable.
  pub async fn close(self) -> Result<()> {
    self.conn.close().await?;
    Ok(())
  }
}

// ─── CanonicalStore impl ─────────────────────────────────────────────────────

impl CanonicalStore for SqliteStore {
  type Error = Error;

  // ── Staging ───────────────────────────────────────────────────────────────

  async fn stage(&self, source: SourceName, payload: Value) -> Result<StagingRecord> {
    let record = StagingRecord {
      staging_id: Uuid::new_v4(),
      source,
      payload,
      received_at: Utc::now(),
    };

    let id_str      = encode_uuid(record.staging_id);
    let source_str  = record.source.to_string();
    let payload_str = record.payload.to_string();
    let at_str      = encode_dt(record.received_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO staging_sources (staging_id, source, payload, received_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, source_str, payload_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(record)
  }

  async fn staged_records(&self, source: SourceName) -> Result<Vec<StagingRecord>> {
    let source_str = source.to_string();

    let raws: Vec<RawStagingRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT staging_id, source, payload, received_at
           FROM staging_sources WHERE source = ?1
           ORDER BY received_at, rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![source_str], |row| {
            Ok(RawStagingRecord {
              staging_id:  row.get(0)?,
              source:      row.get(1)?,
              payload:     row.get(2)?,
              received_at: row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawStagingRecord::into_record).collect()
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  async fn normalize_record(
    &self,
    record: StagingRecord,
    policy: ChainPolicy,
  ) -> Result<RecordOutcome, StageError<Error>> {
    let result = self
      .conn
      .call(move |conn| {
        let tx = match conn.transaction() {
          Ok(tx) => tx,
          Err(e) => return Ok(Err(StageError::new(Stage::Begin, Error::from(e)))),
        };

        // Dropping `tx` without committing rolls the whole chain back.
        let outcome = match apply_record(&SqliteSession::new(&tx), &record, policy) {
          Ok(outcome) => outcome,
          Err(e) => return Ok(Err(e)),
        };

        Ok(
          tx.commit()
            .map(|()| outcome)
            .map_err(|e| StageError::new(Stage::Commit, Error::from(e))),
        )
      })
      .await;

    match result {
      Ok(inner) => inner,
      Err(e) => Err(StageError::new(Stage::Begin, Error::from(e))),
    }
  }

  async fn write_score(&self, score: ScoreWrite) -> Result<Uuid> {
    self
      .conn
      .call(move |conn| Ok(SqliteSession::new(conn).write_score(&score)))
      .await?
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn list_product_ids(&self, limit: usize) -> Result<Vec<Uuid>> {
    let limit_val = i64::try_from(limit).unwrap_or(i64::MAX);

    let ids: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT product_id FROM products ORDER BY created_at, product_id LIMIT ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![limit_val], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    ids.iter().map(|s| decode_uuid(s)).collect()
  }

  async fn table_counts(&self) -> Result<TableCounts> {
    let counts = self
      .conn
      .call(|conn| {
        Ok(conn.query_row(
          "SELECT
             (SELECT COUNT(*) FROM staging_sources),
             (SELECT COUNT(*) FROM brands),
             (SELECT COUNT(*) FROM dispensaries),
             (SELECT COUNT(*) FROM products),
             (SELECT COUNT(*) FROM listings),
             (SELECT COUNT(*) FROM scores)",
          [],
          |row| {
            Ok(TableCounts {
              staged:       row.get(0)?,
              brands:       row.get(1)?,
              dispensaries: row.get(2)?,
              products:     row.get(3)?,
              listings:     row.get(4)?,
              scores:       row.get(5)?,
            })
          },
        )?)
      })
      .await?;
    Ok(counts)
  }

  async fn export_scores(&self, limit: usize) -> Result<Vec<ScoreExport>> {
    let limit_val = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawScoreExport> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT
             p.product_id,
             p.name,
             (SELECT MIN(key) FROM json_each(p.external_refs))            AS source,
             (SELECT MIN(lp.price) FROM listings lp
               WHERE lp.product_id = p.product_id)                       AS price,
             s.value,
             s.confidence,
             s.computed_at,
             (SELECT COUNT(*) FROM listings lc
               WHERE lc.product_id = p.product_id)                       AS listing_count
           FROM scores s
           LEFT JOIN listings l ON l.listing_id = s.listing_id
           JOIN products p      ON p.product_id = COALESCE(s.product_id, l.product_id)
           ORDER BY s.computed_at DESC, s.score_id
           LIMIT ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![limit_val], |row| {
            Ok(RawScoreExport {
              product_id:    row.get(0)?,
              product_name:  row.get(1)?,
              source:        row.get(2)?,
              price:         row.get(3)?,
              score:         row.get(4)?,
              confidence:    row.get(5)?,
              computed_at:   row.get(6)?,
              listing_count: row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawScoreExport::into_export).collect()
  }

  async fn find_brand(&self, name: String) -> Result<Option<Brand>> {
    let raw: Option<RawBrand> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT brand_id, name, external_refs, created_at, updated_at
             FROM brands WHERE name = ?1",
            rusqlite::params![name],
            |row| {
              Ok(RawBrand {
                brand_id:      row.get(0)?,
                name:          row.get(1)?,
                external_refs: row.get(2)?,
                created_at:    row.get(3)?,
                updated_at:    row.get(4)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawBrand::into_brand).transpose()
  }

  async fn find_dispensary(&self, name: String) -> Result<Option<Dispensary>> {
    let raw: Option<RawDispensary> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT dispensary_id, name, location, external_refs, created_at, updated_at
             FROM dispensaries WHERE name = ?1",
            rusqlite::params![name],
            |row| {
              Ok(RawDispensary {
                dispensary_id: row.get(0)?,
                name:          row.get(1)?,
                location:      row.get(2)?,
                external_refs: row.get(3)?,
                created_at:    row.get(4)?,
                updated_at:    row.get(5)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawDispensary::into_dispensary).transpose()
  }

  async fn find_product(&self, name: String, brand_id: Uuid) -> Result<Option<Product>> {
    let brand_id_str = encode_uuid(brand_id);

    let raw: Option<RawProduct> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT product_id, name, brand_id, category, subcategory,
                    external_refs, created_at, updated_at
             FROM products WHERE name = ?1 AND brand_id = ?2",
            rusqlite::params![name, brand_id_str],
            |row| {
              Ok(RawProduct {
                product_id:    row.get(0)?,
                name:          row.get(1)?,
                brand_id:      row.get(2)?,
                category:      row.get(3)?,
                subcategory:   row.get(4)?,
                external_refs: row.get(5)?,
                created_at:    row.get(6)?,
                updated_at:    row.get(7)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawProduct::into_product).transpose()
  }

  async fn find_listing(
    &self,
    product_id: Uuid,
    dispensary_id: Uuid,
  ) -> Result<Option<Listing>> {
    let product_id_str = encode_uuid(product_id);
    let dispensary_id_str = encode_uuid(dispensary_id);

    let raw: Option<RawListing> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT listing_id, product_id, dispensary_id, price, weight,
                    external_refs, created_at, updated_at
             FROM listings WHERE product_id = ?1 AND dispensary_id = ?2",
            rusqlite::params![product_id_str, dispensary_id_str],
            |row| {
              Ok(RawListing {
                listing_id:    row.get(0)?,
                product_id:    row.get(1)?,
                dispensary_id: row.get(2)?,
                price:         row.get(3)?,
                weight:        row.get(4)?,
                external_refs: row.get(5)?,
                created_at:    row.get(6)?,
                updated_at:    row.get(7)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawListing::into_listing).transpose()
  }

  async fn find_score(&self, subject: ScoreSubject) -> Result<Option<Score>> {
    let column = match subject {
      ScoreSubject::Listing(_) => "listing_id",
      ScoreSubject::Product(_) => "product_id",
    };
    let subject_id_str = encode_uuid(subject.id());

    let raw: Option<RawScore> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT score_id, listing_id, product_id, value, confidence, reason_codes,
                  feature_snapshot, version, computed_at, external_refs
           FROM scores WHERE {column} = ?1"
        );
        Ok(conn
          .query_row(&sql, rusqlite::params![subject_id_str], |row| {
            Ok(RawScore {
              score_id:         row.get(0)?,
              listing_id:       row.get(1)?,
              product_id:       row.get(2)?,
              value:            row.get(3)?,
              confidence:       row.get(4)?,
              reason_codes:     row.get(5)?,
              feature_snapshot: row.get(6)?,
              version:          row.get(7)?,
              computed_at:      row.get(8)?,
              external_refs:    row.get(9)?,
            })
          })
          .optional()?)
      })
      .await?;

    raw.map(RawScore::into_score).transpose()
  }
}
