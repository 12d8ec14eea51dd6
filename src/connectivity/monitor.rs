//! Fully-connected status with replay-on-subscribe broadcast.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info};

use crate::config::ConnectivityConfig;

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

/// Coarse connection class, as reported by browsers' network information API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveType {
  Slow2g,
  TwoG,
  ThreeG,
  FourG,
}

/// Observed link metrics. Any of them may be unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkQuality {
  pub effective_type: Option<EffectiveType>,
  pub downlink_mbps: Option<f64>,
  pub rtt_ms: Option<u64>,
}

impl LinkQuality {
  pub fn from_rtt(rtt_ms: u64) -> Self {
    Self {
      rtt_ms: Some(rtt_ms),
      ..Self::default()
    }
  }
}

/// Degradation thresholds for judging a link unstable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkThresholds {
  pub low_bandwidth_mbps: f64,
  pub high_latency_ms: u64,
}

impl Default for LinkThresholds {
  fn default() -> Self {
    Self {
      low_bandwidth_mbps: 0.5,
      high_latency_ms: 1500,
    }
  }
}

impl LinkThresholds {
  pub fn is_stable(&self, quality: &LinkQuality) -> bool {
    let slow_class = matches!(
      quality.effective_type,
      Some(EffectiveType::Slow2g | EffectiveType::TwoG)
    );
    let low_bandwidth = quality
      .downlink_mbps
      .is_some_and(|mbps| mbps < self.low_bandwidth_mbps);
    let high_latency = quality.rtt_ms.is_some_and(|rtt| rtt > self.high_latency_ms);

    !(slow_class || low_bandwidth || high_latency)
  }
}

struct State {
  online: bool,
  link_stable: bool,
  next_id: u64,
  subscribers: Vec<(u64, Callback)>,
}

impl State {
  fn status(&self) -> bool {
    self.online && self.link_stable
  }
}

struct Inner {
  state: Mutex<State>,
  /// Held from applying a signal until its callbacks return, so concurrent
  /// signals reach every subscriber in the order they were applied
  dispatch: Mutex<()>,
  initial_online: bool,
  thresholds: LinkThresholds,
}

impl Inner {
  fn lock(&self) -> MutexGuard<'_, State> {
    // Callbacks run outside the state lock, so a poisoned lock still holds consistent flags
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn dispatch(&self) -> MutexGuard<'_, ()> {
    self.dispatch.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Tracks whether the host is fully connected (online and on a stable link).
///
/// Cloning yields another handle to the same monitor.
#[derive(Clone)]
pub struct ConnectivityMonitor {
  inner: Arc<Inner>,
}

impl ConnectivityMonitor {
  pub fn new(initial_online: bool, thresholds: LinkThresholds) -> Self {
    Self {
      inner: Arc::new(Inner {
        state: Mutex::new(State {
          online: initial_online,
          link_stable: true,
          next_id: 0,
          subscribers: Vec::new(),
        }),
        dispatch: Mutex::new(()),
        initial_online,
        thresholds,
      }),
    }
  }

  pub fn from_config(config: &ConnectivityConfig) -> Self {
    Self::new(
      config.assume_online,
      LinkThresholds {
        low_bandwidth_mbps: config.low_bandwidth_mbps,
        high_latency_ms: config.high_latency_ms,
      },
    )
  }

  /// Last known fully-connected flag.
  pub fn get_status(&self) -> bool {
    self.inner.lock().status()
  }

  /// Register `callback`. It is called once right away with the current status,
  /// then on every status change, in subscription order.
  ///
  /// Callbacks must not feed signals back into the same monitor.
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(bool) + Send + Sync + 'static,
  {
    let callback: Callback = Arc::new(callback);
    let _dispatch = self.inner.dispatch();
    let (id, status) = {
      let mut state = self.inner.lock();
      let id = state.next_id;
      state.next_id += 1;
      state.subscribers.push((id, Arc::clone(&callback)));
      (id, state.status())
    };

    callback(status);

    Subscription {
      monitor: Arc::downgrade(&self.inner),
      id,
    }
  }

  /// Raw connectivity transition.
  pub fn set_online(&self, online: bool) {
    self.update(|state| state.online = online);
  }

  /// Link-quality observation; metrics that are `None` are not judged.
  pub fn report_link_quality(&self, quality: LinkQuality) {
    let stable = self.inner.thresholds.is_stable(&quality);
    self.update(|state| state.link_stable = stable);
  }

  /// Restore the initial flags without notifying anyone.
  pub fn reset(&self) {
    let mut state = self.inner.lock();
    state.online = self.inner.initial_online;
    state.link_stable = true;
  }

  pub fn subscriber_count(&self) -> usize {
    self.inner.lock().subscribers.len()
  }

  fn update(&self, apply: impl FnOnce(&mut State)) {
    let _dispatch = self.inner.dispatch();
    let notify = {
      let mut state = self.inner.lock();
      let before = state.status();
      apply(&mut state);
      let after = state.status();
      debug!(
        online = state.online,
        link_stable = state.link_stable,
        "Connectivity signal"
      );

      if before == after {
        None
      } else {
        let callbacks: Vec<Callback> = state
          .subscribers
          .iter()
          .map(|(_, cb)| Arc::clone(cb))
          .collect();
        Some((after, callbacks))
      }
    };

    if let Some((status, callbacks)) = notify {
      info!(connected = status, "Connectivity changed");
      for callback in callbacks {
        callback(status);
      }
    }
  }
}

/// Handle returned by [`ConnectivityMonitor::subscribe`].
pub struct Subscription {
  monitor: Weak<Inner>,
  id: u64,
}

impl Subscription {
  /// Stop receiving updates. Calling it again is a no-op.
  pub fn unsubscribe(&self) {
    if let Some(inner) = self.monitor.upgrade() {
      inner.lock().subscribers.retain(|(id, _)| *id != self.id);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn recorder(monitor: &ConnectivityMonitor) -> (Arc<Mutex<Vec<bool>>>, Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sub = monitor.subscribe(move |status| sink.lock().unwrap().push(status));
    (seen, sub)
  }

  #[test]
  fn test_subscribe_replays_current_status() {
    let monitor = ConnectivityMonitor::new(false, LinkThresholds::default());
    let (seen, _sub) = recorder(&monitor);
    assert_eq!(*seen.lock().unwrap(), vec![false]);
  }

  #[test]
  fn test_notifies_only_on_change() {
    let monitor = ConnectivityMonitor::new(false, LinkThresholds::default());
    let (seen, _sub) = recorder(&monitor);

    monitor.set_online(true);
    monitor.set_online(true);
    monitor.set_online(false);

    assert_eq!(*seen.lock().unwrap(), vec![false, true, false]);
  }

  #[test]
  fn test_subscribers_called_in_order() {
    let monitor = ConnectivityMonitor::new(true, LinkThresholds::default());
    let order = Arc::new(Mutex::new(Vec::new()));

    let subs: Vec<Subscription> = (0..3)
      .map(|n| {
        let order = Arc::clone(&order);
        monitor.subscribe(move |status| {
          if !status {
            order.lock().unwrap().push(n);
          }
        })
      })
      .collect();

    monitor.set_online(false);
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(subs.len(), 3);
  }

  #[test]
  fn test_unsubscribe_stops_updates() {
    let monitor = ConnectivityMonitor::new(true, LinkThresholds::default());
    let (seen, sub) = recorder(&monitor);

    sub.unsubscribe();
    sub.unsubscribe();
    monitor.set_online(false);

    assert_eq!(*seen.lock().unwrap(), vec![true]);
    assert_eq!(monitor.subscriber_count(), 0);
  }

  #[test]
  fn test_unstable_link_masks_online_flag() {
    let monitor = ConnectivityMonitor::new(true, LinkThresholds::default());
    let (seen, _sub) = recorder(&monitor);

    monitor.report_link_quality(LinkQuality::from_rtt(4000));
    assert!(!monitor.get_status());

    // Going offline and back while the link is still bad changes nothing
    monitor.set_online(false);
    monitor.set_online(true);

    monitor.report_link_quality(LinkQuality::from_rtt(80));
    assert!(monitor.get_status());
    assert_eq!(*seen.lock().unwrap(), vec![true, false, true]);
  }

  #[test]
  fn test_thresholds() {
    let t = LinkThresholds::default();
    assert!(t.is_stable(&LinkQuality::default()));
    assert!(!t.is_stable(&LinkQuality {
      downlink_mbps: Some(0.1),
      ..LinkQuality::default()
    }));
    assert!(!t.is_stable(&LinkQuality {
      effective_type: Some(EffectiveType::TwoG),
      ..LinkQuality::default()
    }));
    assert!(t.is_stable(&LinkQuality {
      effective_type: Some(EffectiveType::FourG),
      downlink_mbps: Some(10.0),
      rtt_ms: Some(50),
    }));
  }

  #[test]
  fn test_concurrent_signals_leave_subscribers_in_sync() {
    for _ in 0..200 {
      let monitor = ConnectivityMonitor::new(false, LinkThresholds::default());
      let last_seen = Arc::new(Mutex::new(None));
      let sink = Arc::clone(&last_seen);
      let _sub = monitor.subscribe(move |status| *sink.lock().unwrap() = Some(status));

      let up = monitor.clone();
      let down = monitor.clone();
      let a = std::thread::spawn(move || up.set_online(true));
      let b = std::thread::spawn(move || down.set_online(false));
      a.join().unwrap();
      b.join().unwrap();

      assert_eq!(*last_seen.lock().unwrap(), Some(monitor.get_status()));
    }
  }

  #[test]
  fn test_reset_restores_initial_state() {
    let monitor = ConnectivityMonitor::new(true, LinkThresholds::default());
    monitor.set_online(false);
    monitor.report_link_quality(LinkQuality::from_rtt(9000));
    monitor.reset();
    assert!(monitor.get_status());
  }
}
