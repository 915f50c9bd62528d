//! Error types for `tcrb-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid source name: {0:?}")]
  InvalidSourceName(String),

  #[error("confidence {0} is outside [0, 1]")]
  ConfidenceOutOfRange(f64),

  #[error("unknown score subject kind: {0:?}")]
  UnknownSubjectKind(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
