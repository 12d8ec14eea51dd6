use tracing::{error, info, warn};

/// How prominently the host should present a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Info,
  Success,
  Warning,
  Error,
}

/// User-facing notification sink supplied by the host (toast, status line, ...).
pub trait Notifier: Send + Sync {
  fn notify(&self, message: &str, severity: Severity);
}

/// Notifier that only writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn notify(&self, message: &str, severity: Severity) {
    match severity {
      Severity::Info | Severity::Success => info!(notification = message),
      Severity::Warning => warn!(notification = message),
      Severity::Error => error!(notification = message),
    }
  }
}
