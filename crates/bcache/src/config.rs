//! Typed, validated construction arguments for [`crate::cache::BCache`].

use bcache_common::{Error, Result};

/// Parameters fixed for the lifetime of a cache instance.
#[derive(Clone, Copy, Debug)]
pub struct BCacheConfig {
    /// Number of slots in the pool; the cache never holds more than this
    /// many blocks across all files combined.
    pub nblock: usize,
    /// Size in bytes of every block and every slot buffer.
    pub blocksize: usize,
    /// Maximum bytes written by a single coalesced writeback.
    pub flush_unit: usize,
}

impl Default for BCacheConfig {
    fn default() -> Self {
        Self {
            nblock: 4096,
            blocksize: 4096,
            flush_unit: 64 * 1024,
        }
    }
}

impl BCacheConfig {
    pub fn with_nblock(mut self, nblock: usize) -> Self {
        self.nblock = nblock;
        self
    }

    pub fn with_blocksize(mut self, blocksize: usize) -> Self {
        self.blocksize = blocksize;
        self
    }

    pub fn with_flush_unit(mut self, flush_unit: usize) -> Self {
        self.flush_unit = flush_unit;
        self
    }

    /// Checks the three fields are internally consistent. This is the one
    /// recoverable error path in the crate — everything past construction
    /// is a fatal assertion, since by then cache state exists that an `Err`
    /// return could leave half-mutated.
    pub fn validate(&self) -> Result<()> {
        if self.nblock == 0 {
            return Err(Error::configuration("nblock must be greater than zero"));
        }
        if self.blocksize == 0 {
            return Err(Error::configuration("blocksize must be greater than zero"));
        }
        if self.flush_unit < self.blocksize {
            return Err(Error::configuration(
                "flush_unit must be at least one blocksize",
            ));
        }
        Ok(())
    }
}
