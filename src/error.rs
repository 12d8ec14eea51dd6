//! Error types shared by the store, the transport and the coordinator.

use serde_json::Value;
use thiserror::Error;

/// Status reported by online-only calls issued while disconnected.
pub const SERVICE_UNAVAILABLE: u16 = 503;

/// Normalized failure of a remote call: `{message, status, body}`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} (status {status})")]
pub struct ApiError {
  pub message: String,
  pub status: u16,
  /// Raw error body returned by the service, if any
  pub body: Option<Value>,
}

impl ApiError {
  pub fn new(message: impl Into<String>, status: u16) -> Self {
    Self {
      message: message.into(),
      status,
      body: None,
    }
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  /// Failure with no response at all (connection refused, timeout, ...).
  pub fn transport(message: impl Into<String>) -> Self {
    Self::new(message, 500)
  }
}

#[derive(Debug, Error)]
pub enum SyncError {
  #[error("Service unavailable: not connected")]
  ServiceUnavailable,

  #[error("No cached data available offline for '{endpoint}'")]
  NotAvailableOffline { endpoint: String },

  #[error(transparent)]
  Api(#[from] ApiError),

  #[error("Unsupported method: {0}")]
  InvalidMethod(String),

  #[error("Invalid endpoint: {0}")]
  InvalidEndpoint(String),

  #[error("Storage error: {0}")]
  Storage(#[from] rusqlite::Error),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("JSON error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("Corrupt stored entry: {0}")]
  CorruptEntry(String),

  /// A queued row that can no longer be decoded. Carries the id so the drain
  /// can set the row aside instead of stalling on it.
  #[error("Corrupt pending request {id}: {reason}")]
  CorruptRequest { id: i64, reason: String },
}

impl SyncError {
  /// Uniform status code for the error, mirroring what an HTTP caller would see.
  pub fn status(&self) -> u16 {
    match self {
      SyncError::ServiceUnavailable => SERVICE_UNAVAILABLE,
      SyncError::NotAvailableOffline { .. } => 404,
      SyncError::Api(e) => e.status,
      SyncError::InvalidMethod(_) | SyncError::InvalidEndpoint(_) => 400,
      SyncError::Storage(_)
      | SyncError::Io(_)
      | SyncError::Serialization(_)
      | SyncError::CorruptEntry(_)
      | SyncError::CorruptRequest { .. } => 500,
    }
  }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
