//! Delivery of queued writes.
//!
//! A *step* sends the head of the queue (smallest id) and removes it only once
//! the service has acknowledged it. A *chain* repeats steps while connected
//! and while each step delivers. A failed or repeated head ends the chain; the
//! untouched remainder waits in the store for the next trigger. A head that
//! cannot be decoded is moved to `set_aside_requests` and the chain goes on.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::coordinator::SyncCoordinator;
use crate::api::ApiRequest;
use crate::error::SyncError;

/// In-memory guards. Never persisted: after a restart the queue alone says
/// what is left to send.
#[derive(Default)]
pub(crate) struct DrainState {
  sync_in_progress: AtomicBool,
  batch_active: AtomicBool,
  /// Ids attempted by the current chain
  attempted: Mutex<HashSet<i64>>,
}

impl DrainState {
  /// Claim the single step slot.
  fn try_begin_step(&self) -> Option<StepGuard<'_>> {
    self
      .sync_in_progress
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| StepGuard { state: self })
  }

  /// Claim the single chain slot.
  pub fn try_begin_batch(&self) -> bool {
    self
      .batch_active
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  pub fn end_batch(&self) {
    self.attempted().clear();
    self.batch_active.store(false, Ordering::Release);
  }

  pub fn is_batch_active(&self) -> bool {
    self.batch_active.load(Ordering::Acquire)
  }

  /// Record `id` for this chain. Returns false if it was already attempted.
  fn mark_attempted(&self, id: i64) -> bool {
    self.attempted().insert(id)
  }

  pub fn reset(&self) {
    self.attempted().clear();
    self.sync_in_progress.store(false, Ordering::Release);
    self.batch_active.store(false, Ordering::Release);
  }

  fn attempted(&self) -> MutexGuard<'_, HashSet<i64>> {
    self.attempted.lock().unwrap_or_else(|e| e.into_inner())
  }
}

struct StepGuard<'a> {
  state: &'a DrainState,
}

impl Drop for StepGuard<'_> {
  fn drop(&mut self) {
    self.state.sync_in_progress.store(false, Ordering::Release);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
  Delivered(i64),
  Failed(i64),
  /// Head was already attempted by this chain
  Repeated(i64),
  /// Head could not be decoded and was moved out of the queue
  SetAside(i64),
  Empty,
  /// Another step holds the slot
  Busy,
  /// Local storage failed; nothing was sent or the delivery was not dequeued
  StoreFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainEnd {
  Drained,
  Disconnected,
  Stopped,
}

/// What one call to [`SyncCoordinator::drain_now`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// False when disconnected or another chain was already running
  pub ran: bool,
  /// Ids delivered and removed, in delivery order
  pub delivered: Vec<i64>,
  /// Id whose delivery failed and ended the chain
  pub failed: Option<i64>,
  /// Undecodable ids moved out of the queue, in the order they were met
  pub set_aside: Vec<i64>,
  /// Queue depth when the chain ended
  pub remaining: usize,
}

impl SyncCoordinator {
  /// Start a drain chain in the background if connected and none is running.
  pub fn trigger_drain(&self) {
    if !self.is_online() {
      return;
    }
    if !self.drain().try_begin_batch() {
      debug!("Drain chain already active");
      return;
    }

    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        let this = self.clone();
        handle.spawn(async move {
          this.run_chain().await;
        });
      }
      Err(_) => {
        self.drain().end_batch();
        warn!("No async runtime; drain postponed to the next trigger");
      }
    }
  }

  /// Run a drain chain to completion on the current task.
  pub async fn drain_now(&self) -> DrainReport {
    if !self.is_online() || !self.drain().try_begin_batch() {
      return DrainReport::default();
    }
    self.run_chain().await
  }

  /// Whether a chain currently holds the batch slot.
  pub fn is_draining(&self) -> bool {
    self.drain().is_batch_active()
  }

  /// Caller must hold the batch slot.
  async fn run_chain(&self) -> DrainReport {
    let mut report = DrainReport {
      ran: true,
      ..DrainReport::default()
    };

    loop {
      let end = self.drive_chain(&mut report).await;
      self.drain().end_batch();

      if end != ChainEnd::Drained || !self.is_online() {
        break;
      }
      // A write queued after the final empty read saw the slot taken and
      // did not start its own chain
      match self.store().get_pending_request_count().await {
        Ok(n) if n > 0 => {}
        _ => break,
      }
      if !self.drain().try_begin_batch() {
        break;
      }
    }

    report.remaining = self.store().get_pending_request_count().await.unwrap_or(0);
    debug!(
      delivered = report.delivered.len(),
      remaining = report.remaining,
      "Drain chain finished"
    );
    report
  }

  async fn drive_chain(&self, report: &mut DrainReport) -> ChainEnd {
    loop {
      if !self.is_online() {
        return ChainEnd::Disconnected;
      }

      match self.drain_step().await {
        StepOutcome::Delivered(id) => report.delivered.push(id),
        StepOutcome::SetAside(id) => report.set_aside.push(id),
        StepOutcome::Empty => return ChainEnd::Drained,
        StepOutcome::Failed(id) => {
          report.failed = Some(id);
          return ChainEnd::Stopped;
        }
        StepOutcome::Repeated(id) => {
          debug!(id, "Head already attempted in this chain");
          return ChainEnd::Stopped;
        }
        StepOutcome::Busy | StepOutcome::StoreFailed => return ChainEnd::Stopped,
      }
    }
  }

  async fn drain_step(&self) -> StepOutcome {
    let Some(_step) = self.drain().try_begin_step() else {
      return StepOutcome::Busy;
    };

    self.status().set_syncing(true);
    let outcome = self.deliver_head().await;
    self.status().set_syncing(false);
    outcome
  }

  async fn deliver_head(&self) -> StepOutcome {
    let head = match self.store().get_pending_head().await {
      Ok(Some(head)) => head,
      Ok(None) => return StepOutcome::Empty,
      Err(SyncError::CorruptRequest { id, reason }) => return self.set_aside(id, &reason).await,
      Err(e) => {
        error!(error = %e, "Failed to read queue head");
        self.status().record_error(e.to_string());
        return StepOutcome::StoreFailed;
      }
    };

    if !self.drain().mark_attempted(head.id) {
      return StepOutcome::Repeated(head.id);
    }

    let request =
      ApiRequest::new(head.method, head.endpoint.as_str()).with_payload(head.payload.clone());

    match self.transport().send(&request).await {
      Ok(_) => {
        if let Err(e) = self.store().remove_pending_request(head.id).await {
          // Stays queued and will be sent again on a later trigger
          error!(id = head.id, error = %e, "Delivered request could not be dequeued");
          self.status().record_error(e.to_string());
          return StepOutcome::StoreFailed;
        }
        self.status().record_success(Utc::now());
        info!(id = head.id, method = %head.method, endpoint = %head.endpoint, "Synced queued request");
        StepOutcome::Delivered(head.id)
      }
      Err(e) => {
        warn!(
          id = head.id,
          status = e.status,
          error = %e,
          "Queued request failed, will retry on next trigger"
        );
        self.status().record_error(format!("{} {}: {}", head.method, head.endpoint, e));
        StepOutcome::Failed(head.id)
      }
    }
  }

  async fn set_aside(&self, id: i64, reason: &str) -> StepOutcome {
    warn!(id, reason, "Queued request cannot be decoded, setting it aside");
    match self.store().set_aside_pending_request(id, reason).await {
      Ok(_) => {
        self
          .status()
          .record_error(format!("pending request {} set aside: {}", id, reason));
        StepOutcome::SetAside(id)
      }
      Err(e) => {
        error!(id, error = %e, "Failed to set aside corrupt pending request");
        self.status().record_error(e.to_string());
        StepOutcome::StoreFailed
      }
    }
  }
}
