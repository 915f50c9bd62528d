//! Error type for `tcrb-store-sqlite`.

use rusqlite::{ErrorCode, ffi};
use tcrb_core::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tcrb_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("corrupt {table} row: {reason}")]
  CorruptRow { table: &'static str, reason: &'static str },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  /// The SQLite result code behind this error, if it came from SQLite.
  fn sqlite_failure(&self) -> Option<&ffi::Error> {
    match self {
      Error::Sqlite(rusqlite::Error::SqliteFailure(e, _))
      | Error::Database(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))) => {
        Some(e)
      }
      _ => None,
    }
  }
}

impl StoreError for Error {
  fn is_key_race(&self) -> bool {
    self.sqlite_failure().is_some_and(|e| {
      matches!(
        e.extended_code,
        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
      )
    })
  }

  fn is_unavailable(&self) -> bool {
    if let Error::Database(
      tokio_rusqlite::Error::ConnectionClosed | tokio_rusqlite::Error::Close(_),
    ) = self
    {
      return true;
    }
    self.sqlite_failure().is_some_and(|e| {
      matches!(
        e.code,
        ErrorCode::CannotOpen
          | ErrorCode::DatabaseBusy
          | ErrorCode::DatabaseLocked
          | ErrorCode::DatabaseCorrupt
          | ErrorCode::NotADatabase
          | ErrorCode::SystemIoFailure
          | ErrorCode::DiskFull
          | ErrorCode::ReadOnly
          | ErrorCode::PermissionDenied
      )
    })
  }
}
