//! Offline-aware request coordination and queue draining.

mod coordinator;
mod drain;
mod notify;
mod status;

pub use coordinator::SyncCoordinator;
pub use drain::DrainReport;
pub use notify::{LogNotifier, Notifier, Severity};
pub use status::SyncStatus;
