//! Offline-first data access for apps that must keep working without a network.
//!
//! - [`connectivity`] decides whether the service is reachable
//! - [`store`] keeps the last response per read and a durable queue of writes
//! - [`sync`] routes calls through both and drains the queue on reconnect
//!
//! ```no_run
//! use std::sync::Arc;
//! use offsync::{ConnectivityMonitor, HttpTransport, LocalStore, LogNotifier, SyncCoordinator};
//!
//! # async fn run() -> offsync::Result<()> {
//! let transport = HttpTransport::new(
//!   "https://api.example.com/v1/".parse().expect("valid url"),
//!   std::time::Duration::from_secs(30),
//! )?;
//! let coordinator = SyncCoordinator::init(
//!   LocalStore::new(LocalStore::default_path()?),
//!   ConnectivityMonitor::new(true, Default::default()),
//!   Arc::new(transport),
//!   Arc::new(LogNotifier),
//! );
//! coordinator.post("/attendance", serde_json::json!({"student": 7})).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod logging;
pub mod store;
pub mod sync;

pub use api::{ApiRequest, ApiResponse, Download, HttpTransport, ResponseSource, Transport};
pub use connectivity::{ConnectivityMonitor, ConnectivityProbe, LinkQuality, LinkThresholds};
pub use error::{ApiError, Result, SyncError as Error};
pub use store::{LocalStore, Method, PendingRequest, QueryParams};
pub use sync::{DrainReport, LogNotifier, Notifier, Severity, SyncCoordinator, SyncStatus};
