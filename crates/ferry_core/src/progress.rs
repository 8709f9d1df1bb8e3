use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Hundredths of a percent.
const COMPLETE: u32 = 10_000;

/// Writer side of a session's progress, owned by the [`crate::Uploader`].
#[derive(Clone, Default)]
pub(crate) struct Progress {
    basis_points: Arc<AtomicU32>,
}

impl Progress {
    pub(crate) fn reporter(&self) -> ProgressReporter {
        ProgressReporter {
            basis_points: self.basis_points.clone(),
        }
    }

    pub(crate) fn reset(&self) {
        self.basis_points.store(0, Ordering::Release);
    }

    /// Record `uploaded` of `total` bytes staged. Stays below 100% until [`Self::complete`] and
    /// never moves backwards.
    pub(crate) fn update(&self, uploaded: u64, total: u64) {
        let value = if total == 0 {
            0
        } else {
            ((uploaded as u128 * COMPLETE as u128) / total as u128) as u32
        };
        let value = value.min(COMPLETE - 1);
        self.basis_points.fetch_max(value, Ordering::AcqRel);
    }

    pub(crate) fn complete(&self) {
        self.basis_points.store(COMPLETE, Ordering::Release);
    }
}

/// Read-only view of an upload's completion percentage.
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    basis_points: Arc<AtomicU32>,
}

impl ProgressReporter {
    /// Current completion in percent, `0.0..=100.0`.
    pub fn percentage(&self) -> f64 {
        self.basis_points.load(Ordering::Acquire) as f64 / 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.basis_points.load(Ordering::Acquire) == COMPLETE
    }
}
