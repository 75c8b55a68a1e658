//! # streamcache - A Block Read Cache for Layered File Streaming
//!
//! streamcache provides the block cache stage of a file-streaming pipeline.
//! A pipeline is a stack of stages. Each stage receives read and control
//! requests from the stage above and passes work to the stage below, until
//! a storage drive at the bottom services it.
//!
//! ## Architecture
//!
//! - **Context**: owns every request, tracks parent/child dependencies and
//!   runs completion callbacks
//! - **Block Cache**: splits reads into block-aligned sections and serves
//!   unaligned heads and tails from a fixed pool of cache blocks
//! - **Storage Drive**: terminal stage backed by memory or the file system
//! - **Streamer**: owns the context and the stack and drives it tick by tick
//!
//! ## Example Usage
//!
//! ```rust
//! use streamcache::{BlockCache, MemoryBackend, Options, StorageDrive, Streamer};
//!
//! # fn main() -> Result<(), streamcache::Error> {
//! let backend = MemoryBackend::new();
//! backend.insert("assets/level1.pak", vec![7u8; 1 << 20]);
//!
//! // 1 MiB of 64 KiB blocks in front of the drive
//! let options = Options::new().cache_size(1 << 20).block_size(64 * 1024);
//! let cache = BlockCache::new(options)?.with_next(Box::new(StorageDrive::new(backend)));
//! let mut streamer = Streamer::new(Box::new(cache));
//!
//! // Unaligned reads are served through the cache
//! let (request, buffer) = streamer.read("assets/level1.pak", 100, 200_000);
//! streamer.run_until_complete(request, 1000)?;
//! assert_eq!(buffer.len(), 200_000);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod drive;
pub mod error;
pub mod memory;
pub mod request;
pub mod stack;
pub mod stats;
pub mod streamer;

// Re-exports
pub use cache::{BlockCache, CacheResult};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Options;
pub use context::StreamerContext;
pub use drive::{FileSystemBackend, MemoryBackend, StorageBackend, StorageDrive};
pub use error::{Error, Result};
pub use memory::{BlockAllocator, BoundedAllocator, HeapAllocator, OutputTarget, SharedBuffer};
pub use request::{
    Command, FileExistsCheckData, FileMetaDataRetrievalData, FlushData, ReadData, ReportData,
    ReportType, RequestId, RequestPath, RequestStatus,
};
pub use stack::{Status, StreamStackEntry};
pub use stats::{Statistic, StatisticValue};
pub use streamer::Streamer;
