//! The crate's single error type.
//!
//! Every fallible public operation returns `Result<T, Error>`. Transient CAS
//! losses are normal control flow and are never represented here; the same
//! goes for a point that can't be placed within the configured depth range
//! (`Registry::add_point` returns `Ok(false)` for that, not an `Err`).

use thiserror::Error;

/// Errors raised by the insertion engine and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// A bounded [`Pool`](crate::pool::Pool) had no free slots and no room to grow.
    #[error("pool exhausted")]
    Exhausted,

    /// A chunk's bytes did not parse as a sequence of fixed-width records, or
    /// a tube tried to install the same tick twice during deserialization.
    #[error("corrupt chunk: {0}")]
    CorruptChunk(String),

    /// A hierarchy slice's bytes did not parse (bad bitmap, truncated count).
    #[error("corrupt hierarchy: {0}")]
    CorruptHierarchy(String),

    /// A chunk or hierarchy store operation failed.
    #[error("store I/O failure: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Plain I/O failure, used by in-process store implementations.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// A precondition was violated, e.g. using a [`Registry`](crate::registry::Registry)
    /// after `save()` has already released its base chunk.
    #[error("precondition violated: {0}")]
    Precondition(&'static str),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
