//! Active reachability probe feeding the connectivity monitor.
//!
//! A browser gets `online`/`offline` events for free. Other hosts have to ask
//! the network, so the probe sends a `HEAD` to a health URL on an interval.
//! Any HTTP response counts as reachable. The round-trip time is reported as
//! link quality.

use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use super::monitor::{ConnectivityMonitor, LinkQuality};
use crate::error::{ApiError, Result};

pub struct ConnectivityProbe {
  monitor: ConnectivityMonitor,
  client: reqwest::Client,
  url: Url,
  interval: Duration,
}

impl ConnectivityProbe {
  pub fn new(
    monitor: ConnectivityMonitor,
    url: Url,
    interval: Duration,
    timeout: Duration,
  ) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| ApiError::transport(format!("Failed to create probe client: {}", e)))?;

    Ok(Self {
      monitor,
      client,
      url,
      interval,
    })
  }

  /// Probe once and feed the result to the monitor. Returns the raw reachability.
  pub async fn check_once(&self) -> bool {
    let started = Instant::now();

    match self.client.head(self.url.clone()).send().await {
      Ok(response) => {
        let rtt = started.elapsed().as_millis() as u64;
        debug!(status = %response.status(), rtt_ms = rtt, "Probe reached service");
        // Quality first, so a slow link never flashes a connected status
        self.monitor.report_link_quality(LinkQuality::from_rtt(rtt));
        self.monitor.set_online(true);
        true
      }
      Err(e) => {
        debug!(error = %e, "Probe failed");
        self.monitor.set_online(false);
        false
      }
    }
  }

  /// Probe on an interval until the returned task is aborted.
  pub fn spawn(self) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        self.check_once().await;
      }
    })
  }
}
