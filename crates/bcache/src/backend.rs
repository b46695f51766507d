//! The file-manager abstraction the cache writes through.
//!
//! The backend is an external collaborator: it owns the real file descriptor
//! and performs the actual positional I/O. The cache never touches a
//! descriptor directly, and never re-derives a back-pointer into its own
//! registry from the backend side — callers always pass the handle they
//! already hold, and the cache resolves it through [`crate::registry::FileRegistry`]
//! itself rather than trusting a pointer embedded in the handle.

use bcache_common::Result;

/// A single logical file the cache can hold blocks for.
pub trait FileHandle: Send + Sync {
    /// Bytes identifying the file. Two handles with byte-for-byte equal
    /// (length included) filenames name the same cache entry, even if they
    /// are distinct opens of the same path.
    fn filename(&self) -> &[u8];

    /// Positional write of `buf` at `offset`. Called only during coalesced
    /// writeback, with `offset = start_bid * blocksize` and `buf.len()` a
    /// multiple of `blocksize`. A short write (`Ok(n)` with `n < buf.len()`)
    /// is treated as fatal by the caller, not retried here.
    fn pwrite(&self, buf: &[u8], offset: u64) -> Result<usize>;
}
