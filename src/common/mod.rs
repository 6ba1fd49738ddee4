//! Common types shared across the crate.
//!
//! - Layout constants
//! - Error types
//! - Identifiers (PageId for stored pages, NodeId for loaded pages)

pub mod config;
pub mod error;
mod node_id;
mod page_id;

pub use error::{Error, Result};
pub use node_id::NodeId;
pub use page_id::PageId;
