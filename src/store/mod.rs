//! Persistent local store for offline support.
//!
//! Two independent collections live in one SQLite database:
//! - `offline_data`: last successful response per read signature, never evicted
//! - `pending_requests`: writes not yet acknowledged by the server, in id order

mod key;
mod schema;
mod storage;
mod types;

pub use key::{canonical_query, CacheKey, QueryParams};
pub use schema::SCHEMA_VERSION;
pub use storage::LocalStore;
pub use types::{CacheEntry, Method, PendingRequest};
