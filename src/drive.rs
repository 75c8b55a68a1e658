//! Terminal stage that services requests from a storage backend.
//!
//! Reads and file queries are queued and serviced in arrival order, at most
//! `max_requests_per_tick` per call to `execute_requests`. Flushes and
//! reports have nothing to wait for and complete as soon as they arrive.

use crate::context::StreamerContext;
use crate::error::{Error, Result};
use crate::request::{Command, ReportData, ReportType, RequestId, RequestPath, RequestStatus};
use crate::stack::{fail_request, Status, StreamStackEntry};
use crate::stats::Statistic;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default number of requests serviced per tick.
pub const DEFAULT_MAX_REQUESTS_PER_TICK: usize = 8;

/// Default estimated cost of servicing one request.
pub const DEFAULT_ESTIMATED_REQUEST_TIME: Duration = Duration::from_micros(250);

/// Source of file bytes for a [`StorageDrive`].
pub trait StorageBackend: Send {
    /// Size of `path` in bytes, or `None` if it does not exist.
    fn file_size(&self, path: &RequestPath) -> Result<Option<u64>>;

    /// Read exactly `len` bytes at `offset` of `path`.
    fn read_at(&self, path: &RequestPath, offset: u64, len: u64) -> Result<Bytes>;

    /// Short description used in reports.
    fn describe(&self) -> String;
}

#[derive(Debug, Default)]
struct MemoryFiles {
    files: HashMap<RequestPath, Bytes>,
    failing: HashSet<RequestPath>,
}

/// Backend holding files in memory.
///
/// Clones share the same files, so a test can keep a handle to change
/// contents or inject faults after the backend has been moved into a drive.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<RwLock<MemoryFiles>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file.
    pub fn insert(&self, path: impl Into<RequestPath>, contents: impl Into<Bytes>) {
        self.inner.write().files.insert(path.into(), contents.into());
    }

    /// Remove a file. Returns whether it existed.
    pub fn remove(&self, path: &RequestPath) -> bool {
        self.inner.write().files.remove(path).is_some()
    }

    /// Make reads of `path` fail until cleared.
    pub fn set_failing(&self, path: impl Into<RequestPath>, failing: bool) {
        let path = path.into();
        let mut inner = self.inner.write();
        if failing {
            inner.failing.insert(path);
        } else {
            inner.failing.remove(&path);
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn file_size(&self, path: &RequestPath) -> Result<Option<u64>> {
        Ok(self.inner.read().files.get(path).map(|f| f.len() as u64))
    }

    fn read_at(&self, path: &RequestPath, offset: u64, len: u64) -> Result<Bytes> {
        let inner = self.inner.read();
        if inner.failing.contains(path) {
            return Err(Error::Io(io::Error::other(format!("injected read failure on {}", path))));
        }
        let file = inner
            .files
            .get(path)
            .ok_or_else(|| Error::not_found(format!("file {}", path)))?;
        let file_length = file.len() as u64;
        let end = offset.checked_add(len).filter(|&end| end <= file_length).ok_or(
            Error::OutOfRange { offset, size: len, file_length },
        )?;
        Ok(file.slice(offset as usize..end as usize))
    }

    fn describe(&self) -> String {
        format!("memory ({} files)", self.inner.read().files.len())
    }
}

/// Backend reading files below a root directory.
#[derive(Debug, Clone)]
pub struct FileSystemBackend {
    root: PathBuf,
}

impl FileSystemBackend {
    /// Serve files relative to `root`.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &RequestPath) -> Result<PathBuf> {
        let relative = Path::new(path.as_str());
        if relative.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
            return Err(Error::invalid_argument(format!(
                "path {} escapes the backend root",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl StorageBackend for FileSystemBackend {
    fn file_size(&self, path: &RequestPath) -> Result<Option<u64>> {
        match std::fs::metadata(self.resolve(path)?) {
            Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_at(&self, path: &RequestPath, offset: u64, len: u64) -> Result<Bytes> {
        let len = usize::try_from(len)
            .map_err(|_| Error::invalid_argument("read size overflows usize"))?;
        let mut file = File::open(self.resolve(path)?)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut data = vec![0u8; len];
        file.read_exact(&mut data)?;
        Ok(Bytes::from(data))
    }

    fn describe(&self) -> String {
        format!("file system ({})", self.root.display())
    }
}

/// Bottom of a stream stack.
pub struct StorageDrive<B: StorageBackend> {
    name: String,
    backend: B,
    pending: VecDeque<RequestId>,
    max_requests_per_tick: usize,
    estimated_request_time: Duration,
    reads_serviced: u64,
    bytes_read: u64,
    metadata_retrievals: u64,
    failures: u64,
}

impl<B: StorageBackend> StorageDrive<B> {
    /// Create a drive with default limits.
    pub fn new(backend: B) -> Self {
        Self {
            name: "Storage drive".to_string(),
            backend,
            pending: VecDeque::new(),
            max_requests_per_tick: DEFAULT_MAX_REQUESTS_PER_TICK,
            estimated_request_time: DEFAULT_ESTIMATED_REQUEST_TIME,
            reads_serviced: 0,
            bytes_read: 0,
            metadata_retrievals: 0,
            failures: 0,
        }
    }

    /// Set the stage name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the number of requests serviced per tick. At least one.
    pub fn with_max_requests_per_tick(mut self, max: usize) -> Self {
        self.max_requests_per_tick = max.max(1);
        self
    }

    /// Set the estimated cost of one request.
    pub fn with_estimated_request_time(mut self, time: Duration) -> Self {
        self.estimated_request_time = time;
        self
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of requests waiting to be serviced.
    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    fn service(&mut self, ctx: &mut StreamerContext, request: RequestId) {
        match self.try_service(ctx, request) {
            Ok(()) => ctx.mark_request_as_completed(request),
            Err(e) => {
                log::warn!("{} failed request {}: {}", self.name, request, e);
                self.failures += 1;
                fail_request(ctx, request);
            }
        }
    }

    fn try_service(&mut self, ctx: &mut StreamerContext, request: RequestId) -> Result<()> {
        match ctx.command_mut(request) {
            Some(Command::Read(data)) => {
                let bytes = self.backend.read_at(&data.path, data.offset, data.size)?;
                data.output.write(&bytes)?;
                self.reads_serviced += 1;
                self.bytes_read += data.size;
                log::trace!("{} read {}@{}+{}", self.name, data.path, data.offset, data.size);
                Ok(())
            }
            Some(Command::FileMetaDataRetrieval(data)) => {
                self.metadata_retrievals += 1;
                match self.backend.file_size(&data.path)? {
                    Some(size) => {
                        data.file_size = size;
                        data.found = true;
                    }
                    None => data.found = false,
                }
                Ok(())
            }
            Some(Command::FileExistsCheck(data)) => {
                data.found = self.backend.file_size(&data.path)?.is_some();
                Ok(())
            }
            Some(other) => Err(Error::invalid_state(format!(
                "{} cannot service {} requests",
                self.name,
                other.kind()
            ))),
            None => Err(Error::not_found(format!("request {}", request))),
        }
    }

    fn report(&self, data: &ReportData) {
        if data.report_type != ReportType::Config {
            return;
        }
        let mut output = data.output.lock();
        output.push(Statistic::text(&self.name, "Backend", self.backend.describe()));
        output.push(Statistic::integer(
            &self.name,
            "Max requests per tick",
            self.max_requests_per_tick as i64,
        ));
    }
}

impl<B: StorageBackend> StreamStackEntry for StorageDrive<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_next(&mut self, next: Option<Box<dyn StreamStackEntry>>) {
        if let Some(next) = next {
            log::warn!("{} is a terminal stage, ignoring next stage {}", self.name, next.name());
        }
    }

    fn next_name(&self) -> Option<String> {
        None
    }

    fn queue_request(&mut self, ctx: &mut StreamerContext, request: RequestId) {
        match ctx.command(request) {
            Some(Command::Read(_) | Command::FileMetaDataRetrieval(_) | Command::FileExistsCheck(_)) => {
                ctx.set_status(request, RequestStatus::Processing);
                self.pending.push_back(request);
            }
            Some(Command::Flush(_) | Command::FlushAll) => ctx.mark_request_as_completed(request),
            Some(Command::Report(data)) => {
                let data = data.clone();
                self.report(&data);
                ctx.mark_request_as_completed(request);
            }
            Some(other) => {
                log::warn!("{} received unsupported {} request {}", self.name, other.kind(), request);
                fail_request(ctx, request);
            }
            None => log::warn!("{} received unknown request {}", self.name, request),
        }
    }

    fn execute_requests(&mut self, ctx: &mut StreamerContext) -> bool {
        let mut has_worked = false;
        for _ in 0..self.max_requests_per_tick {
            let Some(request) = self.pending.pop_front() else {
                break;
            };
            self.service(ctx, request);
            has_worked = true;
        }
        has_worked
    }

    fn update_status(&self, status: &mut Status) {
        let available = self.max_requests_per_tick as i64 - self.pending.len() as i64;
        status.num_available_slots = status.num_available_slots.min(available);
        status.is_idle = status.is_idle && self.pending.is_empty();
    }

    fn update_completion_estimates(
        &mut self,
        ctx: &mut StreamerContext,
        now: Instant,
        internal_pending: &mut Vec<RequestId>,
    ) {
        let mut estimate = now;
        for &request in &self.pending {
            estimate += self.estimated_request_time;
            ctx.set_estimated_completion(request, estimate);
        }
        // Requests parked above us run after everything already queued here.
        for &request in internal_pending.iter().rev() {
            estimate += self.estimated_request_time;
            ctx.set_estimated_completion(request, estimate);
        }
    }

    fn collect_statistics(&self, statistics: &mut Vec<Statistic>) {
        statistics.push(Statistic::integer(&self.name, "Reads", self.reads_serviced as i64));
        statistics.push(Statistic::byte_size(&self.name, "Bytes read", self.bytes_read));
        statistics.push(Statistic::integer(
            &self.name,
            "Metadata retrievals",
            self.metadata_retrievals as i64,
        ));
        statistics.push(Statistic::integer(&self.name, "Failures", self.failures as i64));
        statistics.push(Statistic::integer(
            &self.name,
            "Available slots",
            self.max_requests_per_tick as i64 - self.pending.len() as i64,
        ));
    }
}
