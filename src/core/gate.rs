//! Single-Flight Gate
//!
//! Admission control with capacity one. A second caller is rejected
//! immediately instead of being queued. The permit is an RAII guard, so the
//! slot is released on every exit path, including errors and panics.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tokio::sync::{Semaphore, SemaphorePermit};

/// The tool execution currently holding the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub tool_name: String,
    pub start_time: SystemTime,
}

impl ExecutionRecord {
    /// Status-endpoint view of the record.
    pub fn to_status(&self) -> Value {
        let started = self
            .start_time
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        let elapsed = self.start_time.elapsed().unwrap_or(Duration::ZERO);
        json!({
            "tool": self.tool_name,
            "started_at": started.as_secs_f64(),
            "elapsed_ms": elapsed.as_millis() as u64,
        })
    }
}

struct GateInner {
    slot: Semaphore,
    current: Mutex<Option<ExecutionRecord>>,
}

#[derive(Clone)]
pub struct SingleFlightGate {
    inner: Arc<GateInner>,
}

impl Default for SingleFlightGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SingleFlightGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GateInner {
                slot: Semaphore::new(1),
                current: Mutex::new(None),
            }),
        }
    }

    /// Take the slot for `tool_name` if it is free. Never waits.
    pub fn try_acquire(&self, tool_name: &str) -> Option<GatePermit<'_>> {
        let permit = self.inner.slot.try_acquire().ok()?;
        *self.lock_current() = Some(ExecutionRecord {
            tool_name: tool_name.to_string(),
            start_time: SystemTime::now(),
        });
        Some(GatePermit {
            gate: &self.inner,
            _permit: permit,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.inner.slot.available_permits() == 0
    }

    pub fn current(&self) -> Option<ExecutionRecord> {
        self.lock_current().clone()
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<ExecutionRecord>> {
        self.inner.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of admission. Dropping it clears the record, then frees the slot.
pub struct GatePermit<'a> {
    gate: &'a GateInner,
    _permit: SemaphorePermit<'a>,
}

impl GatePermit<'_> {
    /// Release explicitly. Equivalent to dropping the permit.
    pub fn release(self) {}
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        *self.gate.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_caller_is_rejected_not_queued() {
        let gate = SingleFlightGate::new();
        let first = gate.try_acquire("build").expect("slot is free");
        assert!(gate.is_busy());
        assert!(gate.try_acquire("test").is_none());
        first.release();
        assert!(!gate.is_busy());
        assert!(gate.try_acquire("test").is_some());
    }

    #[test]
    fn record_tracks_the_holder() {
        let gate = SingleFlightGate::new();
        assert!(gate.current().is_none());
        {
            let _permit = gate.try_acquire("deploy").unwrap();
            let record = gate.current().unwrap();
            assert_eq!(record.tool_name, "deploy");
            assert_eq!(record.to_status()["tool"], "deploy");
            assert!(gate.try_acquire("other").is_none());
            assert_eq!(gate.current().unwrap().tool_name, "deploy");
        }
        assert!(gate.current().is_none());
    }

    #[test]
    fn slot_is_released_when_the_holder_panics() {
        let gate = SingleFlightGate::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _permit = gate.try_acquire("flaky").unwrap();
            panic!("tool blew up");
        }));
        assert!(result.is_err());
        assert!(!gate.is_busy());
        assert!(gate.current().is_none());
    }

    #[test]
    fn clones_share_one_slot() {
        let gate = SingleFlightGate::new();
        let other = gate.clone();
        let _permit = gate.try_acquire("a").unwrap();
        assert!(other.try_acquire("b").is_none());
        assert!(other.is_busy());
    }
}
