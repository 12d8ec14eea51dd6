//! Sync status published to observers.

use chrono::{DateTime, Utc};
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
  /// Fully connected, as last reported by the monitor
  pub online: bool,
  /// A drain step is talking to the service right now
  pub syncing: bool,
  /// Online-only calls currently awaiting the service
  pub in_flight: usize,
  pub last_synced_at: Option<DateTime<Utc>>,
  /// Most recent drain failure, cleared by the next delivery
  pub last_error: Option<String>,
}

pub(crate) struct StatusBoard {
  tx: watch::Sender<SyncStatus>,
}

impl StatusBoard {
  pub fn new(online: bool) -> Self {
    let (tx, _) = watch::channel(SyncStatus {
      online,
      ..SyncStatus::default()
    });
    Self { tx }
  }

  pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
    self.tx.subscribe()
  }

  pub fn snapshot(&self) -> SyncStatus {
    self.tx.borrow().clone()
  }

  pub fn set_online(&self, online: bool) {
    self.tx.send_if_modified(|s| {
      let changed = s.online != online;
      s.online = online;
      changed
    });
  }

  pub fn set_syncing(&self, syncing: bool) {
    self.tx.send_modify(|s| s.syncing = syncing);
  }

  pub fn record_success(&self, at: DateTime<Utc>) {
    self.tx.send_modify(|s| {
      s.last_synced_at = Some(at);
      s.last_error = None;
    });
  }

  pub fn record_error(&self, message: String) {
    self.tx.send_modify(|s| s.last_error = Some(message));
  }

  /// Count an online-only call until the guard drops.
  pub fn begin_call(&self) -> InFlight<'_> {
    self.tx.send_modify(|s| s.in_flight += 1);
    InFlight { board: self }
  }

  pub fn reset(&self, online: bool) {
    self.tx.send_replace(SyncStatus {
      online,
      ..SyncStatus::default()
    });
  }
}

pub(crate) struct InFlight<'a> {
  board: &'a StatusBoard,
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self
      .board
      .tx
      .send_modify(|s| s.in_flight = s.in_flight.saturating_sub(1));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_in_flight_guard() {
    let board = StatusBoard::new(true);
    {
      let _a = board.begin_call();
      let _b = board.begin_call();
      assert_eq!(board.snapshot().in_flight, 2);
    }
    assert_eq!(board.snapshot().in_flight, 0);
  }

  #[test]
  fn test_success_clears_error() {
    let board = StatusBoard::new(true);
    board.record_error("boom".into());
    assert_eq!(board.snapshot().last_error.as_deref(), Some("boom"));

    board.record_success(Utc::now());
    let status = board.snapshot();
    assert!(status.last_error.is_none());
    assert!(status.last_synced_at.is_some());
  }

  #[test]
  fn test_subscribers_see_latest_value() {
    let board = StatusBoard::new(false);
    let mut rx = board.subscribe();
    board.set_online(true);
    assert!(rx.has_changed().unwrap());
    assert!(rx.borrow_and_update().online);
  }
}
