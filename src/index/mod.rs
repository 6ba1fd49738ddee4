//! Index layer.
//!
//! - [`btree`] - paged B+tree with snapshot-safe iterators
//! - [`IndexConfig`] - page fill bounds
//! - [`IndexStats`] - structural counters

pub mod btree;
mod config;
mod stats;

pub use btree::{Entry, Index, IndexIterator};
pub use config::IndexConfig;
pub use stats::{IndexStats, StatsSnapshot};
