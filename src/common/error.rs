//! Error types for the paged index.

use thiserror::Error;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors raised by the page store and the index engine.
///
/// Structural variants (`KeyNotFound`, `Corruption`, `CorruptPage`) mean the
/// tree no longer matches what its callers were promised. They are surfaced
/// immediately and never retried.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the page store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page does not exist in the store.
    #[error("Page {0} not found")]
    PageNotFound(u32),

    /// The page id is outside what the store can address or was already freed.
    #[error("Invalid page ID: {0}")]
    InvalidPageId(u32),

    /// Stored CRC32 does not match the page contents.
    #[error("Checksum mismatch on page {0}")]
    ChecksumMismatch(u32),

    /// A page decoded from the store does not describe a valid index page.
    #[error("Corrupt page {page_id}: {reason}")]
    CorruptPage {
        /// The offending page.
        page_id: u32,
        /// What failed to decode.
        reason: String,
    },

    /// A key the caller guaranteed to exist is missing.
    ///
    /// Treated as an internal-consistency failure, not as "absent".
    #[error("Key {key} not found in leaf {leaf}")]
    KeyNotFound {
        /// The key being removed.
        key: i64,
        /// Dump of the leaf the search ended in.
        leaf: String,
    },

    /// `next` was called on an iterator with no remaining entries.
    #[error("Iterator is exhausted")]
    IteratorExhausted,

    /// `next` was called on an iterator after `close`.
    #[error("Iterator is closed")]
    IteratorClosed,

    /// The operation is not offered by this engine.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// The in-memory tree violates one of its structural invariants.
    #[error("Index corruption: {0}")]
    Corruption(String),

    /// Capacity parameters rejected at construction.
    #[error("Invalid index configuration: {0}")]
    InvalidConfig(String),
}
