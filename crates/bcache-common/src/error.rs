//! Error types shared by the block cache and its backends.

use thiserror::Error;

/// Result alias used at the cache's external boundaries.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can cross the boundary between the cache and the rest of the
/// system. Bugs internal to the cache (double-dirty insert, a backend that
/// reports a short write, removing a file that still has cached blocks) are
/// not represented here — they are fatal assertions, not recoverable errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid cache configuration: {0}")]
    Configuration(String),

    #[error("backend I/O error: {0}")]
    Backend(#[from] std::io::Error),
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
