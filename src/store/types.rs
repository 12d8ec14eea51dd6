//! Records kept by the local store.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// HTTP verb of a request, restricted to the ones the remote service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }

  /// Whether a payload is sent along with this verb.
  pub fn has_body(&self) -> bool {
    matches!(self, Method::Post | Method::Put)
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

impl FromStr for Method {
  type Err = SyncError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "DELETE" => Ok(Method::Delete),
      _ => Err(SyncError::InvalidMethod(s.to_string())),
    }
  }
}

/// A cached response body.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub key: String,
  pub value: Value,
  /// When the response was captured
  pub cached_at: DateTime<Utc>,
}

/// A write waiting for server acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
  /// Store-assigned ordinal, never reused
  pub id: i64,
  pub endpoint: String,
  pub method: Method,
  pub payload: Option<Value>,
  pub enqueued_at: DateTime<Utc>,
}

/// Convert a stored millisecond timestamp back into a `DateTime`.
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
  Utc
    .timestamp_millis_opt(ms)
    .single()
    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_method_parse_is_case_insensitive() {
    assert_eq!("post".parse::<Method>().unwrap(), Method::Post);
    assert_eq!(" Delete ".parse::<Method>().unwrap(), Method::Delete);
  }

  #[test]
  fn test_unknown_method_rejected() {
    let err = "PATCH".parse::<Method>().unwrap_err();
    assert!(matches!(err, SyncError::InvalidMethod(m) if m == "PATCH"));
  }

  #[test]
  fn test_has_body() {
    assert!(Method::Put.has_body());
    assert!(!Method::Delete.has_body());
  }
}
