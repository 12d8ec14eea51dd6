use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::store::{Method, QueryParams};

/// One call to the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  pub endpoint: String,
  pub query: QueryParams,
  pub payload: Option<Value>,
}

impl ApiRequest {
  pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
    Self {
      method,
      endpoint: endpoint.into(),
      query: QueryParams::new(),
      payload: None,
    }
  }

  pub fn with_query(mut self, query: QueryParams) -> Self {
    self.query = query;
    self
  }

  pub fn with_payload(mut self, payload: Option<Value>) -> Self {
    self.payload = payload;
    self
  }
}

/// Result handed back to callers of the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
  /// `data` field of the service envelope (`null` for queued writes)
  pub data: Value,
  pub status: u16,
  pub message: String,
  /// Where the data came from
  pub source: ResponseSource,
}

impl ApiResponse {
  pub fn from_network(data: Value) -> Self {
    Self {
      data,
      status: 200,
      message: "Success".to_string(),
      source: ResponseSource::Network,
    }
  }

  pub fn from_cache(data: Value, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      status: 200,
      message: "Success (Offline)".to_string(),
      source: ResponseSource::Cache { cached_at },
    }
  }

  pub fn queued(id: i64) -> Self {
    Self {
      data: Value::Null,
      status: 202,
      message: "Request queued for sync".to_string(),
      source: ResponseSource::Queued { id },
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from the network
  Network,
  /// Offline mode - served from the local cache
  Cache { cached_at: DateTime<Utc> },
  /// Write accepted into the pending queue under this id
  Queued { id: i64 },
}

/// Raw file returned by a download endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Download {
  pub bytes: Vec<u8>,
  /// From `Content-Disposition`, if the service sent one
  pub file_name: Option<String>,
  pub content_type: Option<String>,
}

impl Download {
  /// Write the file into `dir`, named after the service-provided file name or
  /// `fallback`. Returns the written path.
  pub fn save_to(&self, dir: &Path, fallback: &str) -> std::io::Result<PathBuf> {
    // Only the final component, so a hostile name cannot escape `dir`
    let name = self
      .file_name
      .as_deref()
      .and_then(|n| Path::new(n).file_name())
      .map(|n| n.to_os_string())
      .unwrap_or_else(|| fallback.into());

    let path = dir.join(name);
    std::fs::write(&path, &self.bytes)?;
    Ok(path)
  }
}

/// Extract the file name from a `Content-Disposition` header value.
pub fn parse_content_disposition(value: &str) -> Option<String> {
  value.split(';').map(str::trim).find_map(|part| {
    let (key, name) = part.split_once('=')?;
    if !key.trim().eq_ignore_ascii_case("filename") {
      return None;
    }
    let name = name.trim().trim_matches('"');
    (!name.is_empty()).then(|| name.to_string())
  })
}

/// Unwrap the `{data, message}` envelope of a successful response body.
///
/// An empty body yields `null`, a JSON body without `data` is returned whole,
/// and a body that is not JSON comes back as a string.
pub fn extract_data(body: &str) -> Value {
  if body.trim().is_empty() {
    return Value::Null;
  }

  match serde_json::from_str::<Value>(body) {
    Ok(Value::Object(mut envelope)) if envelope.contains_key("data") => {
      envelope.remove("data").unwrap_or(Value::Null)
    }
    Ok(other) => other,
    Err(_) => Value::String(body.to_string()),
  }
}
