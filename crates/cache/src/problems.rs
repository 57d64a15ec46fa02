//! Problem collection and the configuration-time barrier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::warn;

/// Collects problems observed while storing an entry and decides whether
/// the entry is worth keeping.
#[derive(Debug, Default)]
pub struct Problems {
    problems: Mutex<Vec<String>>,
    serialization_failed: AtomicBool,
}

impl Problems {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a problem observed during configuration or serialization.
    pub fn report(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(%message, "configuration cache problem");
        if let Ok(mut problems) = self.problems.lock() {
            problems.push(message);
        }
    }

    /// Record that serializing the state failed; the build will fail and
    /// the entry must be discarded.
    pub fn failing_build_due_to_serialization_error(&self, message: impl Into<String>) {
        self.serialization_failed.store(true, Ordering::SeqCst);
        self.report(message);
    }

    /// Whether serialization failed.
    #[must_use]
    pub fn has_serialization_error(&self) -> bool {
        self.serialization_failed.load(Ordering::SeqCst)
    }

    /// Whether the entry being stored should be discarded instead of
    /// committed.
    #[must_use]
    pub fn should_discard_entry(&self) -> bool {
        self.has_serialization_error()
            || self
                .problems
                .lock()
                .map(|p| !p.is_empty())
                .unwrap_or(true)
    }

    /// Number of recorded problems.
    #[must_use]
    pub fn count(&self) -> usize {
        self.problems.lock().map(|p| p.len()).unwrap_or(0)
    }
}

/// Marks the window in which configuration-time state may be captured.
///
/// Crossing the barrier ends the window; value sources obtained afterwards
/// are no longer recorded as configuration inputs.
#[derive(Debug, Default)]
pub struct ConfigurationTimeBarrier {
    at_configuration_time: AtomicBool,
}

impl ConfigurationTimeBarrier {
    /// Create a barrier that has not been prepared yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter configuration time.
    pub fn prepare(&self) {
        self.at_configuration_time.store(true, Ordering::SeqCst);
    }

    /// Leave configuration time.
    pub fn cross(&self) {
        self.at_configuration_time.store(false, Ordering::SeqCst);
    }

    /// Whether configuration time is still open.
    #[must_use]
    pub fn is_at_configuration_time(&self) -> bool {
        self.at_configuration_time.load(Ordering::SeqCst)
    }
}
