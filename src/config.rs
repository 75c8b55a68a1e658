//! Configuration options for the block cache stage.

use serde::{Deserialize, Serialize};

/// Construction-time options for a [`BlockCache`](crate::cache::BlockCache).
///
/// All values are fixed for the lifetime of the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Total memory budget for cached blocks (in bytes).
    /// Default: 8MB
    pub cache_size: u64,

    /// Size of a single cache block (in bytes).
    /// Must be a power of two and a multiple of `alignment`.
    /// Default: 64KB
    pub block_size: u64,

    /// Memory and offset alignment required by the storage device (in bytes).
    /// Default: 4KB
    pub alignment: u64,

    /// Only allow epilogs to populate the cache.
    /// Forced on when the cache holds a single block.
    /// Default: false
    pub only_epilog_writes: bool,

    /// Name of the stage, used in statistics and reports.
    /// Default: "Block cache"
    pub name: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            cache_size: 8 * 1024 * 1024, // 8MB
            block_size: 64 * 1024,       // 64KB
            alignment: 4 * 1024,         // 4KB
            only_epilog_writes: false,
            name: "Block cache".to_string(),
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total cache size.
    pub fn cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    /// Sets the block size.
    pub fn block_size(mut self, size: u64) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the device alignment.
    pub fn alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    /// Enables or disables epilog-only cache writes.
    pub fn only_epilog_writes(mut self, value: bool) -> Self {
        self.only_epilog_writes = value;
        self
    }

    /// Sets the stage name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of blocks that fit in the cache budget.
    pub fn num_blocks(&self) -> u64 {
        if self.block_size == 0 {
            0
        } else {
            self.cache_size / self.block_size
        }
    }

    /// Whether epilog-only writes are in effect, including the single-block case.
    pub fn effective_only_epilog_writes(&self) -> bool {
        self.only_epilog_writes || self.num_blocks() == 1
    }

    /// Parses options from a JSON document. Missing fields use defaults.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let options: Options = serde_json::from_str(json)
            .map_err(|e| crate::Error::invalid_argument(format!("invalid options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Serializes the options to a JSON document.
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| crate::Error::internal(e.to_string()))
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.alignment == 0 || !self.alignment.is_power_of_two() {
            return Err(crate::Error::invalid_argument("alignment must be a power of two"));
        }
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(crate::Error::invalid_argument("block_size must be a power of two"));
        }
        if self.block_size % self.alignment != 0 {
            return Err(crate::Error::invalid_argument(
                "block_size must be a multiple of alignment",
            ));
        }
        if self.cache_size < self.block_size {
            return Err(crate::Error::invalid_argument(
                "cache_size must hold at least one block",
            ));
        }
        let pool_bytes = self.num_blocks() * self.block_size;
        if usize::try_from(pool_bytes).is_err() || usize::try_from(self.block_size).is_err() {
            return Err(crate::Error::invalid_argument("cache_size does not fit in memory"));
        }
        Ok(())
    }
}
