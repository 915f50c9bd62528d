//! SQL schema for the TCRB SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Raw provider payloads. Written by ingestion, read-only to the engine.
CREATE TABLE IF NOT EXISTS staging_sources (
    staging_id  TEXT PRIMARY KEY,
    source      TEXT NOT NULL,
    payload     TEXT NOT NULL,   -- provider JSON, verbatim
    received_at TEXT NOT NULL
);

-- external_refs columns hold {source: {native id fields}} JSON objects.

CREATE TABLE IF NOT EXISTS brands (
    brand_id      TEXT PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE,
    external_refs TEXT NOT NULL DEFAULT '{}',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dispensaries (
    dispensary_id TEXT PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE,
    location      TEXT,            -- provider-shaped JSON or NULL
    external_refs TEXT NOT NULL DEFAULT '{}',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS products (
    product_id    TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    brand_id      TEXT NOT NULL REFERENCES brands(brand_id),
    category      TEXT NOT NULL,
    subcategory   TEXT,
    external_refs TEXT NOT NULL DEFAULT '{}',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    UNIQUE (name, brand_id)
);

-- price/weight are NULL when the provider gave no usable figure.
CREATE TABLE IF NOT EXISTS listings (
    listing_id    TEXT PRIMARY KEY,
    product_id    TEXT NOT NULL REFERENCES products(product_id),
    dispensary_id TEXT NOT NULL REFERENCES dispensaries(dispensary_id),
    price         REAL,
    weight        REAL,
    external_refs TEXT NOT NULL DEFAULT '{}',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    UNIQUE (product_id, dispensary_id)
);

-- One current score per subject; exactly one of listing_id/product_id set.
CREATE TABLE IF NOT EXISTS scores (
    score_id         TEXT PRIMARY KEY,
    listing_id       TEXT UNIQUE REFERENCES listings(listing_id),
    product_id       TEXT UNIQUE REFERENCES products(product_id),
    value            REAL NOT NULL,
    confidence       REAL NOT NULL CHECK (confidence BETWEEN 0 AND 1),
    reason_codes     TEXT NOT NULL DEFAULT '[]',
    feature_snapshot TEXT NOT NULL DEFAULT '{}',
    version          TEXT NOT NULL,
    computed_at      TEXT NOT NULL,
    external_refs    TEXT NOT NULL DEFAULT '{}',
    CHECK ((listing_id IS NULL) <> (product_id IS NULL))
);

CREATE INDEX IF NOT EXISTS staging_source_idx    ON staging_sources(source);
CREATE INDEX IF NOT EXISTS listings_dispensary_idx ON listings(dispensary_id);
CREATE INDEX IF NOT EXISTS scores_computed_idx   ON scores(computed_at);

PRAGMA user_version = 1;
";
