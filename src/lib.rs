//! pagedindex - the paged B+tree index engine of an embedded object database.
//!
//! Maps `i64` keys to `i64` values. The database uses it to allocate
//! object identifiers and to look up indexed fields.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          pagedindex                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                 Index Layer (index/)                     │   │
//! │  │   Index ── insert / delete / lookup / write              │   │
//! │  │     │                                                    │   │
//! │  │     ├── Tree Mutator: split, merge, copy-on-write        │   │
//! │  │     └── Ascending / Descending iterators                 │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Page Store (storage/)                       │   │
//! │  │   PageStore trait: DiskManager | MemoryPageStore         │   │
//! │  │   Page + PageHeader (type tag, CRC32)                    │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, NodeId, Error, config)
//! - [`storage`] - Page stores and page format
//! - [`index`] - The B+tree and its iterators
//!
//! # Quick Start
//! ```no_run
//! use pagedindex::{DiskManager, Index, IndexConfig};
//!
//! let dm = DiskManager::create("objects.db").unwrap();
//! let mut index = Index::create(dm, IndexConfig::default()).unwrap();
//! index.insert(1, 4711).unwrap();
//!
//! let root = index.write().unwrap();
//! # let _ = root;
//! ```
//!
//! # Logging
//! Structural events are reported through [`tracing`]; the crate never
//! installs a subscriber.

pub mod common;
pub mod index;
pub mod storage;

pub use common::config::PAGE_SIZE;
pub use common::{Error, NodeId, PageId, Result};

pub use index::{Entry, Index, IndexConfig, IndexIterator, IndexStats, StatsSnapshot};
pub use storage::page::{Page, PageHeader, PageType};
pub use storage::{DiskManager, MemoryPageStore, PageStore, SharedPageStore};
