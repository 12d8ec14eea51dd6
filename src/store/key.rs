//! Deterministic cache keys for read requests.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Query parameters of a read. Ordered so that the same set of parameters
/// always produces the same key.
pub type QueryParams = BTreeMap<String, String>;

/// Signature of an (endpoint, query parameters) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn new(endpoint: &str, params: &QueryParams) -> Self {
    let input = format!("{}|{}", endpoint.trim(), canonical_query(params));

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    Self(hex::encode(hasher.finalize()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl AsRef<str> for CacheKey {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

/// URL-encoded query string with parameters sorted by name.
pub fn canonical_query(params: &QueryParams) -> String {
  url::form_urlencoded::Serializer::new(String::new())
    .extend_pairs(params.iter())
    .finish()
}
