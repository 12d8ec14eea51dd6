//! Scripted in-process transport for tests.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::client::Transport;
use super::types::{ApiRequest, Download};
use crate::error::ApiError;
use crate::store::{Method, QueryParams};

#[derive(Default)]
pub(crate) struct MockTransport {
  calls: Mutex<Vec<(Method, String)>>,
  /// endpoint -> number of upcoming calls that fail
  failures: Mutex<HashMap<String, usize>>,
  responses: Mutex<HashMap<String, Value>>,
  delay: Option<Duration>,
  in_flight: AtomicUsize,
  max_in_flight: AtomicUsize,
  token: Mutex<Option<String>>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_delay(delay: Duration) -> Self {
    Self {
      delay: Some(delay),
      ..Self::default()
    }
  }

  pub fn respond(&self, endpoint: &str, data: Value) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(endpoint.to_string(), data);
  }

  pub fn fail_next(&self, endpoint: &str, times: usize) {
    self
      .failures
      .lock()
      .unwrap()
      .insert(endpoint.to_string(), times);
  }

  pub fn calls(&self) -> Vec<(Method, String)> {
    self.calls.lock().unwrap().clone()
  }

  pub fn endpoints(&self) -> Vec<String> {
    self.calls().into_iter().map(|(_, e)| e).collect()
  }

  pub fn max_in_flight(&self) -> usize {
    self.max_in_flight.load(Ordering::SeqCst)
  }

  pub fn token(&self) -> Option<String> {
    self.token.lock().unwrap().clone()
  }

  async fn call(&self, method: Method, endpoint: &str) -> Result<Value, ApiError> {
    self
      .calls
      .lock()
      .unwrap()
      .push((method, endpoint.to_string()));

    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    self.in_flight.fetch_sub(1, Ordering::SeqCst);

    let fail = {
      let mut failures = self.failures.lock().unwrap();
      match failures.get_mut(endpoint) {
        Some(left) if *left > 0 => {
          *left -= 1;
          true
        }
        _ => false,
      }
    };
    if fail {
      return Err(ApiError::new("Internal Server Error", 500).with_body(json!({"endpoint": endpoint})));
    }

    Ok(
      self
        .responses
        .lock()
        .unwrap()
        .get(endpoint)
        .cloned()
        .unwrap_or_else(|| json!({"endpoint": endpoint})),
    )
  }
}

impl Transport for MockTransport {
  fn send<'a>(&'a self, request: &'a ApiRequest) -> BoxFuture<'a, Result<Value, ApiError>> {
    self.call(request.method, &request.endpoint).boxed()
  }

  fn download<'a>(
    &'a self,
    endpoint: &'a str,
    _query: &'a QueryParams,
  ) -> BoxFuture<'a, Result<Download, ApiError>> {
    async move {
      self.call(Method::Get, endpoint).await?;
      Ok(Download {
        bytes: b"file-contents".to_vec(),
        file_name: Some("report.pdf".to_string()),
        content_type: Some("application/pdf".to_string()),
      })
    }
    .boxed()
  }

  fn set_auth_token(&self, token: &str) {
    *self.token.lock().unwrap() = Some(token.to_string());
  }

  fn clear_auth_token(&self) {
    *self.token.lock().unwrap() = None;
  }
}
