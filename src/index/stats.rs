//! Structural statistics for an index.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the tree mutator, the iterators and write-back.
///
/// All counters use `Ordering::Relaxed`: they are independent tallies
/// read for diagnostics only.
#[derive(Debug, Default)]
pub struct IndexStats {
    pub leaf_splits: AtomicU64,
    pub inner_splits: AtomicU64,
    pub leaf_merges: AtomicU64,
    pub inner_merges: AtomicU64,
    /// Single entries moved between siblings to repair an underflow.
    pub redistributions: AtomicU64,
    pub root_growths: AtomicU64,
    pub root_demotions: AtomicU64,
    /// Leaf pages copied because an iterator was still reading them.
    pub cow_snapshots: AtomicU64,
    pub pages_read: AtomicU64,
    pub pages_written: AtomicU64,
}

impl IndexStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            leaf_splits: self.leaf_splits.load(Ordering::Relaxed),
            inner_splits: self.inner_splits.load(Ordering::Relaxed),
            leaf_merges: self.leaf_merges.load(Ordering::Relaxed),
            inner_merges: self.inner_merges.load(Ordering::Relaxed),
            redistributions: self.redistributions.load(Ordering::Relaxed),
            root_growths: self.root_growths.load(Ordering::Relaxed),
            root_demotions: self.root_demotions.load(Ordering::Relaxed),
            cow_snapshots: self.cow_snapshots.load(Ordering::Relaxed),
            pages_read: self.pages_read.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.leaf_splits,
            &self.inner_splits,
            &self.leaf_merges,
            &self.inner_merges,
            &self.redistributions,
            &self.root_growths,
            &self.root_demotions,
            &self.cow_snapshots,
            &self.pages_read,
            &self.pages_written,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time snapshot of [`IndexStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub leaf_splits: u64,
    pub inner_splits: u64,
    pub leaf_merges: u64,
    pub inner_merges: u64,
    pub redistributions: u64,
    pub root_growths: u64,
    pub root_demotions: u64,
    pub cow_snapshots: u64,
    pub pages_read: u64,
    pub pages_written: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats {{ splits: {}/{}, merges: {}/{}, redistributions: {}, root: +{}/-{}, cow: {}, io: {}r/{}w }}",
            self.leaf_splits,
            self.inner_splits,
            self.leaf_merges,
            self.inner_merges,
            self.redistributions,
            self.root_growths,
            self.root_demotions,
            self.cow_snapshots,
            self.pages_read,
            self.pages_written,
        )
    }
}
