//! Storage layer - page stores and page formats.
//!
//! - [`PageStore`] - The interface the index reads and writes through
//! - [`DiskManager`] - Single-file store
//! - [`MemoryPageStore`] / [`SharedPageStore`] - In-memory and shared adapters
//! - [`page`] - Page container and header

mod disk_manager;
pub mod page;
mod page_store;

pub use disk_manager::DiskManager;
pub use page_store::{MemoryPageStore, PageStore, SharedPageStore};
