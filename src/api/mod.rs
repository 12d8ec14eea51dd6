//! Remote service access.

mod client;
#[cfg(test)]
pub(crate) mod mock;
mod types;

pub use client::{HttpTransport, Transport};
pub use types::{
  extract_data, parse_content_disposition, ApiRequest, ApiResponse, Download, ResponseSource,
};
