//! Global atomic counters for engine observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (the engine does so at the end of every run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters — no allocations, no locking.
pub struct Metrics {
    steps_executed: AtomicU64,
    steps_replayed: AtomicU64,
    tool_calls: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            steps_executed: AtomicU64::new(0),
            steps_replayed: AtomicU64::new(0),
            tool_calls: AtomicU64::new(0),
            runs_succeeded: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
        }
    }

    /// A step body ran (successfully or not).
    pub fn inc_steps_executed(&self) {
        self.steps_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "steps_executed", "counter incremented");
    }

    /// A step result was served from the ledger.
    pub fn inc_steps_replayed(&self) {
        self.steps_replayed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "steps_replayed", "counter incremented");
    }

    pub fn inc_tool_calls(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tool_calls", "counter incremented");
    }

    pub fn inc_runs_succeeded(&self) {
        self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_runs_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            steps_executed = self.steps_executed(),
            steps_replayed = self.steps_replayed(),
            tool_calls = self.tool_calls(),
            runs_succeeded = self.runs_succeeded(),
            runs_failed = self.runs_failed(),
        );
    }

    pub fn steps_executed(&self) -> u64 {
        self.steps_executed.load(Ordering::Relaxed)
    }

    pub fn steps_replayed(&self) -> u64 {
        self.steps_replayed.load(Ordering::Relaxed)
    }

    pub fn tool_calls(&self) -> u64 {
        self.tool_calls.load(Ordering::Relaxed)
    }

    pub fn runs_succeeded(&self) -> u64 {
        self.runs_succeeded.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.steps_executed.store(0, Ordering::Relaxed);
        self.steps_replayed.store(0, Ordering::Relaxed);
        self.tool_calls.store(0, Ordering::Relaxed);
        self.runs_succeeded.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_steps_executed();
        m.inc_steps_executed();
        m.inc_steps_replayed();
        m.inc_tool_calls();
        m.inc_runs_failed();
        assert_eq!(m.steps_executed(), 2);
        assert_eq!(m.steps_replayed(), 1);
        assert_eq!(m.tool_calls(), 1);
        assert_eq!(m.runs_succeeded(), 0);
        assert_eq!(m.runs_failed(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_steps_executed();
        m.inc_runs_succeeded();
        m.reset();
        assert_eq!(m.steps_executed(), 0);
        assert_eq!(m.runs_succeeded(), 0);
    }
}
