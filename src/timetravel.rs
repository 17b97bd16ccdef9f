//! The pending time-travel signal: a designated tool registers a jump target,
//! and the step loop consumes it with fetch-and-clear after tool results are
//! processed. Never observed outside the step loop.

use std::sync::{Arc, Mutex};

use crate::error::TimeTravelError;

/// A scheduled jump to an earlier checkpoint, with the payload the model
/// wants delivered to its past self.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeTravelSignal {
    pub checkpoint_id: usize,
    pub payload: String,
}

#[derive(Debug, Default)]
struct Inner {
    n_checkpoints: usize,
    pending: Option<TimeTravelSignal>,
}

/// Shared between the step loop (publisher of `n_checkpoints`, consumer of
/// the signal) and the signal-producing tool.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    inner: Arc<Mutex<Inner>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Published by the loop right after each checkpoint so schedule targets
    /// can be validated at registration time.
    pub fn set_n_checkpoints(&self, n: usize) {
        self.lock().n_checkpoints = n;
    }

    pub fn n_checkpoints(&self) -> usize {
        self.lock().n_checkpoints
    }

    /// Register a pending signal. At most one per step; the target must be
    /// an existing checkpoint.
    pub fn schedule(
        &self,
        checkpoint_id: usize,
        payload: impl Into<String>,
    ) -> Result<(), TimeTravelError> {
        let mut inner = self.lock();
        if checkpoint_id >= inner.n_checkpoints {
            return Err(TimeTravelError::OutOfRange {
                checkpoint_id,
                n_checkpoints: inner.n_checkpoints,
            });
        }
        if inner.pending.is_some() {
            return Err(TimeTravelError::AlreadyPending);
        }
        inner.pending = Some(TimeTravelSignal {
            checkpoint_id,
            payload: payload.into(),
        });
        Ok(())
    }

    /// Fetch-and-clear the pending signal.
    pub fn fetch_pending(&self) -> Option<TimeTravelSignal> {
        self.lock().pending.take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // The mutex is never held across an await; poisoning would mean a
        // panic mid-update, which aborts the run anyway.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_and_fetch_clears_pending() {
        let scheduler = Scheduler::new();
        scheduler.set_n_checkpoints(3);
        scheduler.schedule(1, "note").unwrap();

        let signal = scheduler.fetch_pending().unwrap();
        assert_eq!(signal.checkpoint_id, 1);
        assert_eq!(signal.payload, "note");
        assert!(scheduler.fetch_pending().is_none());
    }

    #[test]
    fn schedule_rejects_out_of_range_target() {
        let scheduler = Scheduler::new();
        scheduler.set_n_checkpoints(2);
        let err = scheduler.schedule(2, "too far").unwrap_err();
        assert!(matches!(
            err,
            TimeTravelError::OutOfRange {
                checkpoint_id: 2,
                n_checkpoints: 2
            }
        ));
    }

    #[test]
    fn schedule_rejects_second_signal_in_same_step() {
        let scheduler = Scheduler::new();
        scheduler.set_n_checkpoints(5);
        scheduler.schedule(0, "first").unwrap();
        let err = scheduler.schedule(1, "second").unwrap_err();
        assert!(matches!(err, TimeTravelError::AlreadyPending));
    }

    #[test]
    fn clones_share_state() {
        let scheduler = Scheduler::new();
        let tool_side = scheduler.clone();
        scheduler.set_n_checkpoints(1);
        tool_side.schedule(0, "shared").unwrap();
        assert!(scheduler.fetch_pending().is_some());
    }
}
