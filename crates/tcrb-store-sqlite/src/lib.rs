//! SQLite backend for the TCRB canonical store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every resolve/upsert is a single
//! `INSERT … ON CONFLICT … DO UPDATE … RETURNING` statement, and each staged
//! record is normalized inside its own transaction.

mod encode;
mod schema;
mod session;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use session::SqliteSession;
pub use store::SqliteStore;
