//! Single entry point for reads and writes.
//!
//! Two families with different trade-offs:
//! - eventual (`get`, `post`, `put`, `delete`): reads fall back to the cache
//!   when disconnected; writes are always queued and delivered by the drain
//! - online-only (`fetch_online`, `create_online`, `update_online`,
//!   `remove_online`, `download_file`): straight to the service, failing fast
//!   with `ServiceUnavailable` when disconnected
//!
//! Use the eventual family for background writes the user does not wait on,
//! and the online-only family when the user needs the server's answer now.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::drain::DrainState;
use super::notify::{Notifier, Severity};
use super::status::{StatusBoard, SyncStatus};
use crate::api::{ApiRequest, ApiResponse, Download, Transport};
use crate::connectivity::{ConnectivityMonitor, Subscription};
use crate::error::{Result, SyncError};
use crate::store::{CacheKey, LocalStore, Method, QueryParams};

struct Shared {
  store: LocalStore,
  monitor: ConnectivityMonitor,
  transport: Arc<dyn Transport>,
  notifier: Arc<dyn Notifier>,
  drain: DrainState,
  status: StatusBoard,
  subscription: Mutex<Option<Subscription>>,
}

impl Drop for Shared {
  fn drop(&mut self) {
    if let Ok(mut slot) = self.subscription.lock() {
      if let Some(sub) = slot.take() {
        sub.unsubscribe();
      }
    }
  }
}

/// Offline-aware data access. Cloning yields another handle to the same
/// coordinator; construct one per process with [`SyncCoordinator::init`].
#[derive(Clone)]
pub struct SyncCoordinator {
  shared: Arc<Shared>,
}

impl SyncCoordinator {
  /// Wire the coordinator to its collaborators and start reacting to
  /// connectivity. If already connected, a drain starts right away so that
  /// writes left over from a previous run go out.
  pub fn init(
    store: LocalStore,
    monitor: ConnectivityMonitor,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
  ) -> Self {
    let online = monitor.get_status();
    let coordinator = Self {
      shared: Arc::new(Shared {
        store,
        monitor: monitor.clone(),
        transport,
        notifier,
        drain: DrainState::default(),
        status: StatusBoard::new(online),
        subscription: Mutex::new(None),
      }),
    };

    let weak = Arc::downgrade(&coordinator.shared);
    let subscription = monitor.subscribe(move |connected| {
      let Some(shared) = weak.upgrade() else {
        return;
      };
      let this = SyncCoordinator { shared };
      this.status().set_online(connected);
      if connected {
        this.trigger_drain();
      }
    });

    if let Ok(mut slot) = coordinator.shared.subscription.lock() {
      *slot = Some(subscription);
    }

    coordinator
  }

  /// Clear in-memory drain state. The queue and cache are untouched.
  pub fn reset(&self) {
    self.drain().reset();
    self.status().reset(self.is_online());
  }

  pub fn is_online(&self) -> bool {
    self.shared.monitor.get_status()
  }

  pub fn store(&self) -> &LocalStore {
    &self.shared.store
  }

  pub fn monitor(&self) -> &ConnectivityMonitor {
    &self.shared.monitor
  }

  pub fn status_snapshot(&self) -> SyncStatus {
    self.status().snapshot()
  }

  pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
    self.status().subscribe()
  }

  pub fn subscribe_pending_count(&self) -> watch::Receiver<usize> {
    self.shared.store.subscribe_pending_count()
  }

  pub fn set_auth_token(&self, token: &str) {
    self.shared.transport.set_auth_token(token);
  }

  pub fn clear_auth_token(&self) {
    self.shared.transport.clear_auth_token();
  }

  pub(super) fn transport(&self) -> &dyn Transport {
    self.shared.transport.as_ref()
  }

  pub(super) fn drain(&self) -> &DrainState {
    &self.shared.drain
  }

  pub(super) fn status(&self) -> &StatusBoard {
    &self.shared.status
  }

  // === Eventual family ===

  /// Read through the cache: network when connected (refreshing the cache),
  /// last cached response otherwise.
  pub async fn get(&self, endpoint: &str, params: &QueryParams) -> Result<ApiResponse> {
    validate_endpoint(endpoint)?;
    let key = CacheKey::new(endpoint, params);

    if !self.is_online() {
      return match self.shared.store.get_entry(key.as_str()).await? {
        Some(entry) => {
          debug!(endpoint, cached_at = %entry.cached_at, "Serving cached response");
          Ok(ApiResponse::from_cache(entry.value, entry.cached_at))
        }
        None => Err(SyncError::NotAvailableOffline {
          endpoint: endpoint.to_string(),
        }),
      };
    }

    let request = ApiRequest::new(Method::Get, endpoint).with_query(params.clone());
    let data = self.transport().send(&request).await?;
    self.shared.store.save_data(key.as_str(), &data).await?;
    Ok(ApiResponse::from_network(data))
  }

  pub async fn post(&self, endpoint: &str, payload: Value) -> Result<ApiResponse> {
    self.enqueue_write(Method::Post, endpoint, Some(payload)).await
  }

  pub async fn put(&self, endpoint: &str, payload: Value) -> Result<ApiResponse> {
    self.enqueue_write(Method::Put, endpoint, Some(payload)).await
  }

  pub async fn delete(&self, endpoint: &str) -> Result<ApiResponse> {
    self.enqueue_write(Method::Delete, endpoint, None).await
  }

  /// Queue a write given an untyped verb. Unknown verbs are rejected here,
  /// before anything reaches the queue.
  pub async fn enqueue(
    &self,
    method: &str,
    endpoint: &str,
    payload: Option<Value>,
  ) -> Result<ApiResponse> {
    let method: Method = method.parse()?;
    self.enqueue_write(method, endpoint, payload).await
  }

  async fn enqueue_write(
    &self,
    method: Method,
    endpoint: &str,
    payload: Option<Value>,
  ) -> Result<ApiResponse> {
    validate_endpoint(endpoint)?;

    let id = self
      .shared
      .store
      .store_pending_request(endpoint, method, payload.as_ref())
      .await?;
    info!(id, %method, endpoint, "Write queued");

    if self.is_online() {
      self.trigger_drain();
    }
    Ok(ApiResponse::queued(id))
  }

  // === Online-only family ===

  pub async fn fetch_online(&self, endpoint: &str, params: &QueryParams) -> Result<ApiResponse> {
    let request = ApiRequest::new(Method::Get, endpoint).with_query(params.clone());
    self.call_online(request).await
  }

  pub async fn create_online(&self, endpoint: &str, payload: Value) -> Result<ApiResponse> {
    let request = ApiRequest::new(Method::Post, endpoint).with_payload(Some(payload));
    self.call_online(request).await
  }

  pub async fn update_online(&self, endpoint: &str, payload: Value) -> Result<ApiResponse> {
    let request = ApiRequest::new(Method::Put, endpoint).with_payload(Some(payload));
    self.call_online(request).await
  }

  pub async fn remove_online(&self, endpoint: &str) -> Result<ApiResponse> {
    self.call_online(ApiRequest::new(Method::Delete, endpoint)).await
  }

  /// Fetch raw bytes (reports, exports) for the host to save.
  pub async fn download_file(&self, endpoint: &str, params: &QueryParams) -> Result<Download> {
    validate_endpoint(endpoint)?;
    self.ensure_connected(endpoint)?;

    let _busy = self.status().begin_call();
    self
      .transport()
      .download(endpoint, params)
      .await
      .map_err(|e| {
        warn!(endpoint, status = e.status, error = %e, "Download failed");
        SyncError::Api(e)
      })
  }

  async fn call_online(&self, request: ApiRequest) -> Result<ApiResponse> {
    validate_endpoint(&request.endpoint)?;
    self.ensure_connected(&request.endpoint)?;

    let _busy = self.status().begin_call();
    let data = self.transport().send(&request).await.map_err(|e| {
      warn!(
        method = %request.method,
        endpoint = %request.endpoint,
        status = e.status,
        error = %e,
        "Online request failed"
      );
      SyncError::Api(e)
    })?;
    Ok(ApiResponse::from_network(data))
  }

  fn ensure_connected(&self, endpoint: &str) -> Result<()> {
    if self.is_online() {
      return Ok(());
    }
    warn!(endpoint, "Online-only request while disconnected");
    self.shared.notifier.notify(
      "You are offline. This action needs a connection; try again once you are back online.",
      Severity::Warning,
    );
    Err(SyncError::ServiceUnavailable)
  }
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
  if endpoint.trim().is_empty() {
    return Err(SyncError::InvalidEndpoint("endpoint is empty".to_string()));
  }
  Ok(())
}
