//! File requests and the commands they carry.
//!
//! A request is owned by the [`StreamerContext`](crate::context::StreamerContext)
//! and referenced everywhere else through its [`RequestId`]. Stages never
//! free requests; they only signal completion.

use crate::memory::OutputTarget;
use crate::stats::Statistic;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Handle to a request held by the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl RequestId {
    /// Raw value of the handle.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a file. Cheap to clone, compared by path text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestPath(Arc<str>);

impl RequestPath {
    /// Create a path identity.
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(Arc::from(path.as_ref()))
    }

    /// The path text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for RequestPath {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Created but not yet picked up.
    Pending,
    /// Being worked on by a stage.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl RequestStatus {
    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }
}

/// Read `size` bytes at `offset` of `path` into `output`.
#[derive(Debug, Clone)]
pub struct ReadData {
    /// Where the bytes go.
    pub output: OutputTarget,
    /// Space available at `output`.
    pub output_size: u64,
    /// File to read from.
    pub path: RequestPath,
    /// Start offset in the file.
    pub offset: u64,
    /// Number of bytes to read.
    pub size: u64,
    /// Whether other readers may share the underlying file handle.
    pub shared_read: bool,
}

/// Query the size of a file. `file_size` and `found` are filled in by the
/// stage that services it.
#[derive(Debug, Clone)]
pub struct FileMetaDataRetrievalData {
    /// File to query.
    pub path: RequestPath,
    /// Size of the file in bytes.
    pub file_size: u64,
    /// Whether the file exists.
    pub found: bool,
}

/// Check whether a file exists.
#[derive(Debug, Clone)]
pub struct FileExistsCheckData {
    /// File to check.
    pub path: RequestPath,
    /// Result of the check.
    pub found: bool,
}

/// Drop all cached data for a file.
#[derive(Debug, Clone)]
pub struct FlushData {
    /// File to flush.
    pub path: RequestPath,
}

/// Kind of report a stage should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportType {
    /// Construction settings of each stage.
    Config,
    /// Files each stage currently holds data for.
    CachedFiles,
}

/// Ask every stage to describe itself.
#[derive(Debug, Clone)]
pub struct ReportData {
    /// What to report.
    pub report_type: ReportType,
    /// Collected entries.
    pub output: Arc<Mutex<Vec<Statistic>>>,
}

impl ReportData {
    /// Create a report request with an empty output list.
    pub fn new(report_type: ReportType) -> Self {
        Self { report_type, output: Arc::new(Mutex::new(Vec::new())) }
    }
}

/// The work a request describes.
#[derive(Debug, Clone)]
pub enum Command {
    /// Nothing assigned yet.
    None,
    /// Read file data.
    Read(ReadData),
    /// Retrieve file size.
    FileMetaDataRetrieval(FileMetaDataRetrievalData),
    /// Check file existence.
    FileExistsCheck(FileExistsCheckData),
    /// Placeholder that keeps a parent request open.
    Wait,
    /// Drop cached data for one file.
    Flush(FlushData),
    /// Drop all cached data.
    FlushAll,
    /// Describe the stages.
    Report(ReportData),
}

impl Command {
    /// Short name of the command kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::None => "none",
            Command::Read(_) => "read",
            Command::FileMetaDataRetrieval(_) => "file metadata retrieval",
            Command::FileExistsCheck(_) => "file exists check",
            Command::Wait => "wait",
            Command::Flush(_) => "flush",
            Command::FlushAll => "flush all",
            Command::Report(_) => "report",
        }
    }
}

/// Invoked exactly once when a request reaches a terminal state.
pub type CompletionCallback =
    Box<dyn FnOnce(&mut crate::context::StreamerContext, RequestId) + Send>;

/// A request tracked by the context.
pub struct FileRequest {
    pub(crate) command: Command,
    pub(crate) status: RequestStatus,
    pub(crate) parent: Option<RequestId>,
    pub(crate) dependencies: usize,
    pub(crate) estimated_completion: Option<Instant>,
    pub(crate) callback: Option<CompletionCallback>,
    pub(crate) internal: bool,
    pub(crate) completion_signaled: bool,
}

impl FileRequest {
    pub(crate) fn new(command: Command, internal: bool) -> Self {
        Self {
            command,
            status: RequestStatus::Pending,
            parent: None,
            dependencies: 0,
            estimated_completion: None,
            callback: None,
            internal,
            completion_signaled: false,
        }
    }

    /// The command this request carries.
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Current status.
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Request this one is a sub-request of.
    pub fn parent(&self) -> Option<RequestId> {
        self.parent
    }

    /// Number of unfinished sub-requests.
    pub fn dependencies(&self) -> usize {
        self.dependencies
    }
}

impl fmt::Debug for FileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRequest")
            .field("command", &self.command.kind())
            .field("status", &self.status)
            .field("parent", &self.parent)
            .field("dependencies", &self.dependencies)
            .field("internal", &self.internal)
            .finish()
    }
}
