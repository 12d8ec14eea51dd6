//! Connectivity tracking.
//!
//! The observable status is `online && link_stable`. Link stability is an
//! optional refinement; hosts that never report link quality get plain
//! online/offline behavior.

mod monitor;
mod probe;

pub use monitor::{ConnectivityMonitor, EffectiveType, LinkQuality, LinkThresholds, Subscription};
pub use probe::ConnectivityProbe;
