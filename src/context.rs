//! Shared scheduling services for the stages of a stream stack.
//!
//! The context owns every request. Stages hold [`RequestId`]s, create
//! sub-requests with `create_*`, and signal completion with
//! [`StreamerContext::mark_request_as_completed`]. Completion is processed
//! later by [`StreamerContext::finalize_completed_requests`], which runs
//! each request's completion callback and then resolves its parent.
//!
//! Finalization must not be started from inside a stage call: completion
//! callbacks re-enter the stage that registered them.

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::request::{
    Command, CompletionCallback, FileMetaDataRetrievalData, FileRequest, ReadData, RequestId,
    RequestPath, RequestStatus,
};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Request arena and completion queue shared by all stages.
pub struct StreamerContext {
    requests: HashMap<RequestId, FileRequest>,
    next_id: u64,
    completed: VecDeque<RequestId>,
    clock: Arc<dyn Clock>,
}

impl StreamerContext {
    /// Create a context using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a context using `clock` for estimates.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { requests: HashMap::new(), next_id: 1, completed: VecDeque::new(), clock }
    }

    /// Clock shared with the stages.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current time according to the context's clock.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    fn insert(&mut self, command: Command, internal: bool) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.requests.insert(id, FileRequest::new(command, internal));
        id
    }

    /// Allocate a request for use inside the stack. It is released
    /// automatically once it has been finalized.
    pub fn get_new_internal_request(&mut self) -> RequestId {
        self.insert(Command::None, true)
    }

    /// Allocate a request on behalf of a caller outside the stack. It stays
    /// available after completion until [`release_request`](Self::release_request).
    pub fn create_external_request(&mut self, command: Command) -> RequestId {
        self.insert(command, false)
    }

    fn assign(&mut self, id: RequestId, parent: Option<RequestId>, command: Command) -> Result<()> {
        match self.requests.get(&id) {
            None => return Err(Error::not_found(format!("request {}", id))),
            Some(request) if request.parent.is_some() => {
                return Err(Error::invalid_state(format!("request {} already has a parent", id)));
            }
            Some(_) => {}
        }
        if let Some(parent) = parent {
            let parent_request = self
                .requests
                .get_mut(&parent)
                .ok_or_else(|| Error::not_found(format!("parent request {}", parent)))?;
            parent_request.dependencies += 1;
        }
        if let Some(request) = self.requests.get_mut(&id) {
            request.parent = parent;
            request.command = command;
        }
        Ok(())
    }

    /// Turn `id` into a read, optionally as a sub-request of `parent`.
    pub fn create_read(&mut self, id: RequestId, parent: Option<RequestId>, data: ReadData) -> Result<()> {
        self.assign(id, parent, Command::Read(data))
    }

    /// Turn `id` into a wait that keeps `parent` open until it completes.
    pub fn create_wait(&mut self, id: RequestId, parent: RequestId) -> Result<()> {
        self.assign(id, Some(parent), Command::Wait)
    }

    /// Turn `id` into a file size query.
    pub fn create_file_metadata_retrieval(
        &mut self,
        id: RequestId,
        parent: Option<RequestId>,
        path: RequestPath,
    ) -> Result<()> {
        let data = FileMetaDataRetrievalData { path, file_size: 0, found: false };
        self.assign(id, parent, Command::FileMetaDataRetrieval(data))
    }

    /// Look up a request.
    pub fn request(&self, id: RequestId) -> Option<&FileRequest> {
        self.requests.get(&id)
    }

    /// Command carried by a request.
    pub fn command(&self, id: RequestId) -> Option<&Command> {
        self.requests.get(&id).map(|r| &r.command)
    }

    /// Mutable access to a request's command, for stages filling in results.
    pub fn command_mut(&mut self, id: RequestId) -> Option<&mut Command> {
        self.requests.get_mut(&id).map(|r| &mut r.command)
    }

    /// Status of a request, or `None` if it has been released.
    pub fn status(&self, id: RequestId) -> Option<RequestStatus> {
        self.requests.get(&id).map(|r| r.status)
    }

    /// Set the status of a request.
    pub fn set_status(&mut self, id: RequestId, status: RequestStatus) {
        if let Some(request) = self.requests.get_mut(&id) {
            request.status = status;
        }
    }

    /// Register the callback run when `id` is finalized.
    pub fn set_completion_callback(&mut self, id: RequestId, callback: CompletionCallback) {
        if let Some(request) = self.requests.get_mut(&id) {
            request.callback = Some(callback);
        }
    }

    /// Estimated time at which `id` completes.
    pub fn estimated_completion(&self, id: RequestId) -> Option<Instant> {
        self.requests.get(&id).and_then(|r| r.estimated_completion)
    }

    /// Record the estimated completion time of `id`.
    pub fn set_estimated_completion(&mut self, id: RequestId, at: Instant) {
        if let Some(request) = self.requests.get_mut(&id) {
            request.estimated_completion = Some(at);
        }
    }

    /// Signal that `id` is done. A non-terminal status becomes `Completed`.
    /// Signals after the first are ignored.
    pub fn mark_request_as_completed(&mut self, id: RequestId) {
        match self.requests.get_mut(&id) {
            Some(request) if !request.completion_signaled => {
                if !request.status.is_terminal() {
                    request.status = RequestStatus::Completed;
                }
                request.completion_signaled = true;
                self.completed.push_back(id);
            }
            Some(_) => log::debug!("Request {} was already marked as completed", id),
            None => log::warn!("Completion signaled for unknown request {}", id),
        }
    }

    /// Whether completions are waiting to be finalized.
    pub fn has_completed_requests(&self) -> bool {
        !self.completed.is_empty()
    }

    /// Process all signaled completions, including those signaled by the
    /// callbacks run along the way. Returns true if anything was finalized.
    pub fn finalize_completed_requests(&mut self) -> bool {
        let mut has_finalized = false;
        while let Some(id) = self.completed.pop_front() {
            has_finalized = true;

            let callback = self.requests.get_mut(&id).and_then(|r| r.callback.take());
            if let Some(callback) = callback {
                callback(self, id);
            }

            let Some(request) = self.requests.get(&id) else {
                continue;
            };
            let (parent, status, internal) = (request.parent, request.status, request.internal);

            if let Some(parent_id) = parent {
                if let Some(parent) = self.requests.get_mut(&parent_id) {
                    if status == RequestStatus::Failed {
                        parent.status = RequestStatus::Failed;
                    }
                    parent.dependencies = parent.dependencies.saturating_sub(1);
                    if parent.dependencies == 0 {
                        self.mark_request_as_completed(parent_id);
                    }
                }
            }

            if internal {
                self.requests.remove(&id);
            }
        }
        has_finalized
    }

    /// Remove a request from the arena.
    pub fn release_request(&mut self, id: RequestId) -> Option<FileRequest> {
        self.requests.remove(&id)
    }

    /// Number of requests currently tracked.
    pub fn num_requests(&self) -> usize {
        self.requests.len()
    }
}

impl Default for StreamerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StreamerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamerContext")
            .field("requests", &self.requests.len())
            .field("completed", &self.completed.len())
            .finish()
    }
}
