//! Block cache stage.
//!
//! Sits between the request scheduler and the storage device. Reads are
//! split into block-aware sections (see [`section`]). Unaligned leading and
//! trailing parts go through a fixed pool of cache blocks ([`pool`]), and the
//! aligned middle is read directly into the caller's buffer.
//!
//! ## Section outcomes
//!
//! - **Read from cache**: the block is present and settled; bytes are copied
//!   immediately.
//! - **Queued**: the block is being read, either by this section or by an
//!   earlier one. The section is registered against that read and filled in
//!   when it completes.
//! - **Delayed**: every block has a read in flight. The section is parked and
//!   retried at the start of every [`execute_requests`](StreamStackEntry::execute_requests).
//!
//! A caller's request completes inline only if every section was a hit.
//! Otherwise it completes when its last sub-request does.

mod pool;
mod section;

pub use pool::{BlockPool, CacheBlock};
pub use section::{split_request, Section, SplitSections};

use crate::clock::{Clock, SystemClock};
use crate::config::Options;
use crate::context::StreamerContext;
use crate::error::{Error, Result};
use crate::memory::{BlockAllocator, HeapAllocator};
use crate::request::{Command, ReadData, ReportData, ReportType, RequestId, RequestPath, RequestStatus};
use crate::stack::{fail_request, forward_request, Status, StreamStackEntry};
use crate::stats::{AverageWindow, Statistic, STATISTICS_WINDOW_SIZE};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// How a cacheable section was serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheResult {
    /// Copied from a settled block.
    ReadFromCache,
    /// Waiting on a read in flight.
    Queued,
    /// Waiting for a block to become available.
    Delayed,
}

/// Fixed-capacity block read cache.
///
/// The stage's state sits behind a mutex so completion callbacks registered
/// with the context can reach it. All calls are expected from the thread
/// driving the stack.
pub struct BlockCache {
    name: String,
    inner: Arc<Mutex<CacheInner>>,
}

struct CacheInner {
    this: Weak<Mutex<CacheInner>>,
    name: String,
    options: Options,
    pool: BlockPool,
    allocator: Arc<dyn BlockAllocator>,
    pool_bytes: usize,
    next: Option<Box<dyn StreamStackEntry>>,
    /// Sections waiting on each in-flight cache read.
    pending_requests: HashMap<RequestId, Vec<Section>>,
    /// Sections waiting for a free block, oldest first.
    delayed_sections: VecDeque<Section>,
    num_in_flight_requests: usize,
    num_metadata_retrievals_in_progress: usize,
    only_epilog_writes: bool,
    hit_rate: AverageWindow<STATISTICS_WINDOW_SIZE>,
    cacheable_rate: AverageWindow<STATISTICS_WINDOW_SIZE>,
}

impl BlockCache {
    /// Create a cache using the system clock and heap memory.
    ///
    /// # Examples
    ///
    /// ```
    /// use streamcache::{BlockCache, Options};
    ///
    /// let options = Options::new().cache_size(64 * 1024).block_size(16 * 1024);
    /// let cache = BlockCache::new(options).unwrap();
    /// assert_eq!(cache.num_blocks(), 4);
    /// ```
    pub fn new(options: Options) -> Result<Self> {
        Self::with_dependencies(options, Arc::new(SystemClock), Arc::new(HeapAllocator))
    }

    /// Create a cache with an explicit clock and allocator.
    pub fn with_dependencies(
        options: Options,
        clock: Arc<dyn Clock>,
        allocator: Arc<dyn BlockAllocator>,
    ) -> Result<Self> {
        options.validate()?;

        let num_blocks = usize::try_from(options.num_blocks())
            .map_err(|_| Error::invalid_argument("block count overflows usize"))?;
        let block_size = usize::try_from(options.block_size)
            .map_err(|_| Error::invalid_argument("block size overflows usize"))?;
        let alignment = usize::try_from(options.alignment)
            .map_err(|_| Error::invalid_argument("alignment overflows usize"))?;
        let pool_bytes = num_blocks
            .checked_mul(block_size)
            .ok_or_else(|| Error::invalid_argument("cache size overflows usize"))?;

        let memory = allocator.allocate(pool_bytes, alignment)?;
        let pool = match BlockPool::new(num_blocks, options.block_size, memory, clock) {
            Ok(pool) => pool,
            Err(e) => {
                allocator.release(pool_bytes);
                return Err(e);
            }
        };

        let only_epilog_writes = options.effective_only_epilog_writes();
        log::info!(
            "{} created: {} blocks of {} bytes, alignment {}{}",
            options.name,
            num_blocks,
            block_size,
            alignment,
            if only_epilog_writes { ", epilog-only writes" } else { "" }
        );

        let name = options.name.clone();
        let inner = Arc::new_cyclic(|this| {
            Mutex::new(CacheInner {
                this: this.clone(),
                name: name.clone(),
                options,
                pool,
                allocator,
                pool_bytes,
                next: None,
                pending_requests: HashMap::new(),
                delayed_sections: VecDeque::new(),
                num_in_flight_requests: 0,
                num_metadata_retrievals_in_progress: 0,
                only_epilog_writes,
                hit_rate: AverageWindow::new(),
                cacheable_rate: AverageWindow::new(),
            })
        });
        Ok(Self { name, inner })
    }

    /// Attach the next stage and return the cache, for building stacks.
    pub fn with_next(mut self, next: Box<dyn StreamStackEntry>) -> Self {
        self.set_next(Some(next));
        self
    }

    /// Number of blocks in the pool.
    pub fn num_blocks(&self) -> usize {
        self.inner.lock().pool.num_blocks()
    }

    /// Size of one block in bytes.
    pub fn block_size(&self) -> u64 {
        self.inner.lock().pool.block_size()
    }

    /// Whether only epilogs may populate the cache.
    pub fn only_epilog_writes(&self) -> bool {
        self.inner.lock().only_epilog_writes
    }

    /// Number of cache reads currently issued downstream.
    pub fn num_in_flight_requests(&self) -> usize {
        self.inner.lock().num_in_flight_requests
    }

    /// Number of sections waiting for a free block.
    pub fn num_delayed_sections(&self) -> usize {
        self.inner.lock().delayed_sections.len()
    }

    /// Number of file size queries outstanding.
    pub fn num_metadata_retrievals_in_progress(&self) -> usize {
        self.inner.lock().num_metadata_retrievals_in_progress
    }

    /// Slots available for new work. Negative when oversubscribed.
    pub fn available_slots(&self) -> i64 {
        self.inner.lock().calculate_available_slots()
    }

    /// Snapshot of one block's metadata.
    pub fn block(&self, index: usize) -> Option<CacheBlock> {
        self.inner.lock().pool.block(index).cloned()
    }

    /// Slot holding `(path, offset)`, if any.
    pub fn find_in_cache(&self, path: &RequestPath, offset: u64) -> Result<Option<usize>> {
        self.inner.lock().pool.find_in_cache(path, offset)
    }

    /// Most recent hit sample and the windowed average hit rate.
    pub fn hit_rate(&self) -> (f64, f64) {
        let inner = self.inner.lock();
        (inner.hit_rate.most_recent_sample(), inner.hit_rate.average())
    }

    /// Windowed fraction of reads that had a cacheable section.
    pub fn cacheable_rate(&self) -> f64 {
        self.inner.lock().cacheable_rate.average()
    }

    /// Drop all cached blocks of `path`.
    pub fn flush_cache(&self, path: &RequestPath) {
        self.inner.lock().flush_cache(path);
    }

    /// Drop all cached blocks.
    pub fn flush_entire_cache(&self) {
        self.inner.lock().flush_entire_cache();
    }
}

impl fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BlockCache")
            .field("name", &self.name)
            .field("num_blocks", &inner.pool.num_blocks())
            .field("block_size", &inner.pool.block_size())
            .field("in_flight", &inner.num_in_flight_requests)
            .field("delayed", &inner.delayed_sections.len())
            .finish()
    }
}

impl StreamStackEntry for BlockCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_next(&mut self, next: Option<Box<dyn StreamStackEntry>>) {
        self.inner.lock().next = next;
    }

    fn next_name(&self) -> Option<String> {
        self.inner.lock().next.as_ref().map(|n| n.name().to_string())
    }

    fn queue_request(&mut self, ctx: &mut StreamerContext, request: RequestId) {
        self.inner.lock().queue_request(ctx, request);
    }

    fn execute_requests(&mut self, ctx: &mut StreamerContext) -> bool {
        let mut inner = self.inner.lock();
        let has_worked = inner.service_delayed_sections(ctx);
        let next_worked = inner.next.as_mut().is_some_and(|next| next.execute_requests(ctx));
        has_worked || next_worked
    }

    fn update_status(&self, status: &mut Status) {
        let inner = self.inner.lock();
        if let Some(next) = &inner.next {
            next.update_status(status);
        }
        let available = inner.calculate_available_slots();
        status.num_available_slots = status.num_available_slots.min(available);
        status.is_idle = status.is_idle
            && available == inner.pool.num_blocks() as i64
            && inner.delayed_sections.is_empty();
    }

    fn update_completion_estimates(
        &mut self,
        ctx: &mut StreamerContext,
        now: Instant,
        internal_pending: &mut Vec<RequestId>,
    ) {
        let mut inner = self.inner.lock();
        internal_pending.extend(inner.delayed_sections.iter().filter_map(|s| s.parent));
        if let Some(next) = inner.next.as_mut() {
            next.update_completion_estimates(ctx, now, internal_pending);
        }

        // A section waiting on another request's read finishes no earlier
        // than that read or its own parent.
        for (read, sections) in &inner.pending_requests {
            let read_estimate = ctx.estimated_completion(*read);
            for section in sections {
                let Some(wait) = section.wait else {
                    continue;
                };
                let parent_estimate = section.parent.and_then(|p| ctx.estimated_completion(p));
                if let Some(estimate) = parent_estimate.max(read_estimate) {
                    ctx.set_estimated_completion(wait, estimate);
                }
            }
        }
    }

    fn collect_statistics(&self, statistics: &mut Vec<Statistic>) {
        let inner = self.inner.lock();
        statistics.push(Statistic::percentage(&inner.name, "Cache hit rate", &inner.hit_rate));
        statistics.push(Statistic::percentage(&inner.name, "Cacheable", &inner.cacheable_rate));
        statistics.push(Statistic::integer(
            &inner.name,
            "Available slots",
            inner.calculate_available_slots(),
        ));
        if let Some(next) = &inner.next {
            next.collect_statistics(statistics);
        }
    }
}

impl CacheInner {
    fn calculate_available_slots(&self) -> i64 {
        self.pool.num_blocks() as i64
            - self.num_in_flight_requests as i64
            - self.num_metadata_retrievals_in_progress as i64
            - self.delayed_sections.len() as i64
    }

    fn queue_request(&mut self, ctx: &mut StreamerContext, request: RequestId) {
        let Some(command) = ctx.command(request) else {
            log::warn!("{} received unknown request {}", self.name, request);
            return;
        };

        match command {
            Command::Read(data) => {
                let path = data.path.clone();
                if self.next.is_none() {
                    log::warn!("{} has no next stage to read {} from", self.name, path);
                    fail_request(ctx, request);
                    return;
                }
                ctx.set_status(request, RequestStatus::Processing);
                self.request_file_length(ctx, request, path);
                return;
            }
            Command::Flush(data) => {
                let path = data.path.clone();
                self.flush_cache(&path);
            }
            Command::FlushAll => self.flush_entire_cache(),
            Command::Report(data) => {
                let data = data.clone();
                self.report(&data);
            }
            Command::None
            | Command::FileMetaDataRetrieval(_)
            | Command::FileExistsCheck(_)
            | Command::Wait => {}
        }
        forward_request(&mut self.next, ctx, request);
    }

    fn request_file_length(&mut self, ctx: &mut StreamerContext, request: RequestId, path: RequestPath) {
        let metadata = ctx.get_new_internal_request();
        if let Err(e) = ctx.create_file_metadata_retrieval(metadata, None, path) {
            log::error!("{} could not create file size query: {}", self.name, e);
            ctx.release_request(metadata);
            fail_request(ctx, request);
            return;
        }

        let this = self.this.clone();
        ctx.set_completion_callback(
            metadata,
            Box::new(move |ctx, metadata| match this.upgrade() {
                Some(inner) => inner.lock().complete_file_metadata(ctx, metadata, request),
                None => fail_request(ctx, request),
            }),
        );
        self.num_metadata_retrievals_in_progress += 1;
        forward_request(&mut self.next, ctx, metadata);
    }

    fn complete_file_metadata(&mut self, ctx: &mut StreamerContext, metadata: RequestId, request: RequestId) {
        self.num_metadata_retrievals_in_progress =
            self.num_metadata_retrievals_in_progress.saturating_sub(1);

        let file_length = match (ctx.status(metadata), ctx.command(metadata)) {
            (Some(RequestStatus::Completed), Some(Command::FileMetaDataRetrieval(data)))
                if data.found =>
            {
                Some(data.file_size)
            }
            _ => None,
        };

        match file_length {
            Some(file_length) => self.read_file(ctx, request, file_length),
            None => {
                log::warn!(
                    "{} could not determine the file size for request {}, reading uncached",
                    self.name,
                    request
                );
                forward_request(&mut self.next, ctx, request);
            }
        }
    }

    fn read_file(&mut self, ctx: &mut StreamerContext, request: RequestId, file_length: u64) {
        if let Err(e) = self.try_read_file(ctx, request, file_length) {
            log::warn!("{} failed read request {}: {}", self.name, request, e);
            ctx.set_status(request, RequestStatus::Failed);
            // Outstanding sub-requests complete the request when they finish.
            if ctx.request(request).is_some_and(|r| r.dependencies() == 0) {
                ctx.mark_request_as_completed(request);
            }
        }
    }

    fn try_read_file(&mut self, ctx: &mut StreamerContext, request: RequestId, file_length: u64) -> Result<()> {
        let data = match ctx.command(request) {
            Some(Command::Read(data)) => data.clone(),
            _ => return Err(Error::invalid_argument(format!("request {} is not a read", request))),
        };
        if data.output_size < data.size || (data.output.capacity() as u64) < data.size {
            return Err(Error::invalid_argument(format!(
                "output buffer of {} bytes is too small for a {} byte read",
                data.output_size.min(data.output.capacity() as u64),
                data.size
            )));
        }
        if data.size == 0 {
            ctx.mark_request_as_completed(request);
            return Ok(());
        }

        let split = split_request(
            self.pool.block_size(),
            &data.path,
            file_length,
            data.offset,
            data.size,
            &data.output,
        )?;
        if !split.is_cacheable() {
            self.cacheable_rate.push_sample(0.0);
            forward_request(&mut self.next, ctx, request);
            return Ok(());
        }
        self.cacheable_rate.push_sample(1.0);

        let SplitSections { mut prolog, mut main, mut epilog } = split;
        for section in [&mut prolog, &mut main, &mut epilog].into_iter().flatten() {
            section.bind(request, data.shared_read);
        }
        log::debug!(
            "{} split {}@{}+{}: prolog {}, main {}, epilog {}",
            self.name,
            data.path,
            data.offset,
            data.size,
            prolog.is_some(),
            main.is_some(),
            epilog.is_some()
        );

        let mut fully_cached = true;
        if let Some(prolog) = prolog {
            if self.only_epilog_writes && (main.is_some() || epilog.is_some()) {
                fully_cached &= self.service_prolog_read_only(ctx, prolog, &mut main)?;
            } else {
                let result = self.service_from_cache(ctx, prolog)?;
                self.record_hit(result);
                fully_cached &= result == CacheResult::ReadFromCache;
            }
        }
        if let Some(main) = main {
            self.issue_direct_read(ctx, request, &main)?;
            fully_cached = false;
        }
        if let Some(epilog) = epilog {
            let result = self.service_from_cache(ctx, epilog)?;
            self.record_hit(result);
            fully_cached &= result == CacheResult::ReadFromCache;
        }

        if fully_cached {
            ctx.mark_request_as_completed(request);
        }
        Ok(())
    }

    fn record_hit(&mut self, result: CacheResult) {
        let sample = if result == CacheResult::ReadFromCache { 1.0 } else { 0.0 };
        self.hit_rate.push_sample(sample);
    }

    /// Use a cached prolog if there is one, otherwise fold it into the
    /// direct read so it never claims a block. Returns true on a hit.
    fn service_prolog_read_only(
        &mut self,
        ctx: &mut StreamerContext,
        prolog: Section,
        main: &mut Option<Section>,
    ) -> Result<bool> {
        if let Some(index) = self.pool.find_in_cache(&prolog.path, prolog.read_offset)? {
            let result = self.read_from_block(ctx, prolog, index)?;
            self.record_hit(result);
            return Ok(result == CacheResult::ReadFromCache);
        }

        self.hit_rate.push_sample(0.0);
        match main {
            Some(main) => main.prefix(&prolog)?,
            None => *main = Some(prolog.into_plain_read()?),
        }
        Ok(false)
    }

    fn service_from_cache(&mut self, ctx: &mut StreamerContext, mut section: Section) -> Result<CacheResult> {
        if let Some(index) = self.pool.find_in_cache(&section.path, section.read_offset)? {
            return self.read_from_block(ctx, section, index);
        }

        match self.pool.recycle_oldest_block(&section.path, section.read_offset)? {
            Some(index) => {
                self.issue_cache_read(ctx, section, index)?;
                Ok(CacheResult::Queued)
            }
            None => {
                self.ensure_wait(ctx, &mut section)?;
                log::debug!(
                    "{} delaying {}@{}: all {} blocks in flight",
                    self.name,
                    section.path,
                    section.read_offset,
                    self.pool.num_blocks()
                );
                self.delayed_sections.push_back(section);
                Ok(CacheResult::Delayed)
            }
        }
    }

    fn read_from_block(&mut self, ctx: &mut StreamerContext, mut section: Section, index: usize) -> Result<CacheResult> {
        let in_flight = self
            .pool
            .block(index)
            .ok_or_else(|| Error::internal(format!("block {} disappeared", index)))?
            .in_flight();

        match in_flight {
            None => {
                self.pool.touch_block(index)?;
                self.pool.copy_to(index, section.block_offset, &section.output, section.copy_size)?;
                if let Some(wait) = section.wait.take() {
                    ctx.mark_request_as_completed(wait);
                }
                log::trace!("{} hit {}@{} in block {}", self.name, section.path, section.read_offset, index);
                Ok(CacheResult::ReadFromCache)
            }
            Some(read) => {
                self.ensure_wait(ctx, &mut section)?;
                section.cache_block_index = Some(index);
                self.pending_requests.entry(read).or_default().push(section);
                Ok(CacheResult::Queued)
            }
        }
    }

    fn ensure_wait(&self, ctx: &mut StreamerContext, section: &mut Section) -> Result<()> {
        if section.wait.is_some() {
            return Ok(());
        }
        let parent = section
            .parent
            .ok_or_else(|| Error::internal("section is not bound to a request"))?;
        let wait = ctx.get_new_internal_request();
        if let Err(e) = ctx.create_wait(wait, parent) {
            ctx.release_request(wait);
            return Err(e);
        }
        section.wait = Some(wait);
        Ok(())
    }

    fn issue_cache_read(&mut self, ctx: &mut StreamerContext, mut section: Section, index: usize) -> Result<()> {
        let parent = section
            .parent
            .ok_or_else(|| Error::internal("section is not bound to a request"))?;
        let data = ReadData {
            output: self.pool.block_target(index)?,
            output_size: section.read_size,
            path: section.path.clone(),
            offset: section.read_offset,
            size: section.read_size,
            shared_read: section.shared_read,
        };

        let read = ctx.get_new_internal_request();
        if let Err(e) = ctx.create_read(read, Some(parent), data) {
            ctx.release_request(read);
            self.pool.reset_block(index)?;
            return Err(e);
        }
        let this = self.this.clone();
        ctx.set_completion_callback(
            read,
            Box::new(move |ctx, read| match this.upgrade() {
                Some(inner) => inner.lock().complete_cache_read(ctx, read),
                None => log::warn!("Cache read {} completed after its cache was dropped", read),
            }),
        );
        self.pool.set_in_flight(index, Some(read))?;

        // The read itself now keeps the parent open.
        section.cache_block_index = Some(index);
        if let Some(wait) = section.wait.take() {
            ctx.mark_request_as_completed(wait);
        }
        log::trace!(
            "{} reading {}@{} into block {}",
            self.name,
            section.path,
            section.read_offset,
            index
        );
        self.pending_requests.insert(read, vec![section]);
        self.num_in_flight_requests += 1;
        forward_request(&mut self.next, ctx, read);
        Ok(())
    }

    fn issue_direct_read(&mut self, ctx: &mut StreamerContext, request: RequestId, main: &Section) -> Result<()> {
        let read = ctx.get_new_internal_request();
        let data = ReadData {
            output: main.output.clone(),
            output_size: main.read_size,
            path: main.path.clone(),
            offset: main.read_offset,
            size: main.read_size,
            shared_read: main.shared_read,
        };
        if let Err(e) = ctx.create_read(read, Some(request), data) {
            ctx.release_request(read);
            return Err(e);
        }
        forward_request(&mut self.next, ctx, read);
        Ok(())
    }

    fn complete_cache_read(&mut self, ctx: &mut StreamerContext, read: RequestId) {
        let Some(sections) = self.pending_requests.remove(&read) else {
            log::error!("{} has no sections waiting on cache read {}", self.name, read);
            return;
        };
        let status = ctx.status(read).unwrap_or(RequestStatus::Failed);
        let success = status == RequestStatus::Completed;
        let index = sections.first().and_then(|s| s.cache_block_index);

        for section in &sections {
            if let Some(wait) = section.wait {
                ctx.set_status(wait, status);
                ctx.mark_request_as_completed(wait);
            }
            let Some(index) = index.filter(|_| success) else {
                continue;
            };
            if let Err(e) =
                self.pool.copy_to(index, section.block_offset, &section.output, section.copy_size)
            {
                log::error!("{} could not copy block {}: {}", self.name, index, e);
                if let Some(parent) = section.parent {
                    ctx.set_status(parent, RequestStatus::Failed);
                }
            }
        }

        if let Some(index) = index {
            let invalidated = self.pool.block(index).is_some_and(|b| b.is_invalidated());
            let settled = if success && !invalidated {
                self.pool.touch_block(index).and_then(|_| self.pool.set_in_flight(index, None))
            } else {
                if !success {
                    log::warn!("{} cache read {} failed, dropping block {}", self.name, read, index);
                }
                self.pool.reset_block(index)
            };
            if let Err(e) = settled {
                log::error!("{} could not settle block {}: {}", self.name, index, e);
            }
        }
        self.num_in_flight_requests = self.num_in_flight_requests.saturating_sub(1);
    }

    /// Retry every section that was delayed before this call, once, oldest
    /// first. Sections that are delayed again go to the back of the queue.
    fn service_delayed_sections(&mut self, ctx: &mut StreamerContext) -> bool {
        let mut has_worked = false;
        for _ in 0..self.delayed_sections.len() {
            let Some(section) = self.delayed_sections.pop_front() else {
                break;
            };
            let wait = section.wait;
            match self.service_from_cache(ctx, section) {
                Ok(CacheResult::Delayed) => {}
                Ok(_) => has_worked = true,
                Err(e) => {
                    log::warn!("{} dropped a delayed section: {}", self.name, e);
                    if let Some(wait) = wait {
                        ctx.set_status(wait, RequestStatus::Failed);
                        ctx.mark_request_as_completed(wait);
                    }
                    has_worked = true;
                }
            }
        }
        has_worked
    }

    fn flush_cache(&mut self, path: &RequestPath) {
        let flushed = self.pool.flush_path(path);
        log::info!("{} flushed {} blocks of {}", self.name, flushed, path);
    }

    fn flush_entire_cache(&mut self) {
        let flushed = self.pool.flush_all();
        log::info!("{} flushed all {} cached blocks", self.name, flushed);
    }

    fn report(&self, data: &ReportData) {
        let mut output = data.output.lock();
        match data.report_type {
            ReportType::Config => {
                output.push(Statistic::byte_size(&self.name, "Cache size", self.options.cache_size));
                output.push(Statistic::byte_size(&self.name, "Block size", self.pool.block_size()));
                output.push(Statistic::integer(&self.name, "Blocks", self.pool.num_blocks() as i64));
                output.push(Statistic::byte_size(&self.name, "Alignment", self.options.alignment));
                output.push(Statistic::boolean(&self.name, "Only epilog writes", self.only_epilog_writes));
                let next = self.next.as_ref().map_or("<None>", |n| n.name());
                output.push(Statistic::text(&self.name, "Next node", next));
            }
            ReportType::CachedFiles => {
                for path in self.pool.cached_paths() {
                    output.push(Statistic::text(&self.name, "Cached file", path.as_str()));
                }
            }
        }
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        self.allocator.release(self.pool_bytes);
    }
}

#[cfg(test)]
mod tests;
