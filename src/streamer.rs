//! Driver that owns a stream stack and its context.
//!
//! # Examples
//!
//! ```
//! use streamcache::{BlockCache, MemoryBackend, Options, RequestStatus, StorageDrive, Streamer};
//!
//! # fn main() -> streamcache::Result<()> {
//! let backend = MemoryBackend::new();
//! backend.insert("data.bin", vec![42u8; 100_000]);
//!
//! let options = Options::new().cache_size(256 * 1024).block_size(64 * 1024);
//! let cache = BlockCache::new(options)?.with_next(Box::new(StorageDrive::new(backend)));
//! let mut streamer = Streamer::new(Box::new(cache));
//!
//! let (request, buffer) = streamer.read("data.bin", 1000, 500);
//! assert_eq!(streamer.run_until_complete(request, 100)?, RequestStatus::Completed);
//! assert_eq!(buffer.to_vec(), vec![42u8; 500]);
//! # Ok(())
//! # }
//! ```

use crate::context::StreamerContext;
use crate::error::{Error, Result};
use crate::memory::{OutputTarget, SharedBuffer};
use crate::request::{Command, ReadData, ReportData, ReportType, RequestId, RequestPath, RequestStatus};
use crate::stack::{Status, StreamStackEntry};
use crate::stats::Statistic;

/// Owns a [`StreamerContext`] and the top of a stream stack.
pub struct Streamer {
    ctx: StreamerContext,
    stack: Box<dyn StreamStackEntry>,
}

impl Streamer {
    /// Drive `stack` with a context using the system clock.
    pub fn new(stack: Box<dyn StreamStackEntry>) -> Self {
        Self::with_context(StreamerContext::new(), stack)
    }

    /// Drive `stack` with an existing context.
    pub fn with_context(ctx: StreamerContext, stack: Box<dyn StreamStackEntry>) -> Self {
        Self { ctx, stack }
    }

    /// The request context.
    pub fn context(&self) -> &StreamerContext {
        &self.ctx
    }

    /// The top stage.
    pub fn stack(&self) -> &dyn StreamStackEntry {
        self.stack.as_ref()
    }

    /// Submit a request to the top of the stack.
    pub fn queue(&mut self, command: Command) -> RequestId {
        let request = self.ctx.create_external_request(command);
        log::debug!("Queueing {} request {}", self.ctx.command(request).map_or("?", |c| c.kind()), request);
        self.stack.queue_request(&mut self.ctx, request);
        request
    }

    /// Submit a read of `size` bytes at `offset` of `path` into a new buffer.
    pub fn read(&mut self, path: impl Into<RequestPath>, offset: u64, size: u64) -> (RequestId, SharedBuffer) {
        let buffer = SharedBuffer::new(size as usize);
        let request = self.queue(Command::Read(ReadData {
            output: OutputTarget::new(buffer.clone()),
            output_size: size,
            path: path.into(),
            offset,
            size,
            shared_read: false,
        }));
        (request, buffer)
    }

    /// Run one scheduling step: let every stage work, then process the
    /// completions that produced. Returns whether anything happened.
    pub fn tick(&mut self) -> bool {
        let has_worked = self.stack.execute_requests(&mut self.ctx);
        let has_finalized = self.ctx.finalize_completed_requests();
        has_worked || has_finalized
    }

    /// Status of a request, if it is still tracked.
    pub fn status_of(&self, request: RequestId) -> Option<RequestStatus> {
        self.ctx.status(request)
    }

    /// Tick until `request` reaches a terminal status.
    pub fn run_until_complete(&mut self, request: RequestId, max_ticks: usize) -> Result<RequestStatus> {
        for _ in 0..=max_ticks {
            match self.ctx.request(request) {
                // A failed request can turn terminal while sub-requests are
                // still writing into its buffer.
                Some(r)
                    if r.status().is_terminal()
                        && r.dependencies() == 0
                        && !self.ctx.has_completed_requests() =>
                {
                    return Ok(r.status())
                }
                Some(_) => {}
                None => return Err(Error::not_found(format!("request {}", request))),
            }
            self.tick();
        }
        Err(Error::invalid_state(format!(
            "request {} did not complete within {} ticks",
            request, max_ticks
        )))
    }

    /// Tick until the stack reports idle and no completions are pending.
    /// Returns the number of ticks taken.
    pub fn run_until_idle(&mut self, max_ticks: usize) -> Result<usize> {
        for ticks in 0..=max_ticks {
            if self.status().is_idle && !self.ctx.has_completed_requests() {
                return Ok(ticks);
            }
            self.tick();
        }
        Err(Error::invalid_state(format!("stack did not settle within {} ticks", max_ticks)))
    }

    /// Drop a finished request from the context.
    pub fn release(&mut self, request: RequestId) {
        self.ctx.release_request(request);
    }

    /// Load of the whole stack.
    pub fn status(&self) -> Status {
        let mut status = Status::default();
        self.stack.update_status(&mut status);
        status
    }

    /// Statistics of every stage, top first.
    pub fn collect_statistics(&self) -> Vec<Statistic> {
        let mut statistics = Vec::new();
        self.stack.collect_statistics(&mut statistics);
        statistics
    }

    /// Refresh the estimated completion time of every outstanding request.
    pub fn update_completion_estimates(&mut self) {
        let now = self.ctx.now();
        let mut internal_pending = Vec::new();
        self.stack.update_completion_estimates(&mut self.ctx, now, &mut internal_pending);
    }

    /// Gather a report from every stage.
    pub fn report(&mut self, report_type: ReportType, max_ticks: usize) -> Result<Vec<Statistic>> {
        let data = ReportData::new(report_type);
        let request = self.queue(Command::Report(data.clone()));
        let status = self.run_until_complete(request, max_ticks)?;
        self.release(request);
        if status != RequestStatus::Completed {
            return Err(Error::invalid_state(format!("report request {} failed", request)));
        }
        let statistics = data.output.lock().clone();
        Ok(statistics)
    }
}
