//! The contract between neighbouring stages of a stream stack.

use crate::context::StreamerContext;
use crate::request::{RequestId, RequestStatus};
use crate::stats::Statistic;
use std::time::Instant;

/// Load reported by a stack of stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Number of additional requests the stack can take. Negative when
    /// oversubscribed.
    pub num_available_slots: i64,
    /// Whether no stage has outstanding work.
    pub is_idle: bool,
}

impl Default for Status {
    fn default() -> Self {
        Self { num_available_slots: i64::MAX, is_idle: true }
    }
}

/// One stage in a stream stack.
///
/// Requests travel from the top of the stack towards the device. A stage
/// either services a request itself, splits it into sub-requests, or
/// forwards it to the next stage.
pub trait StreamStackEntry: Send {
    /// Name used in logs, statistics and reports.
    fn name(&self) -> &str;

    /// Attach the stage requests are forwarded to.
    fn set_next(&mut self, next: Option<Box<dyn StreamStackEntry>>);

    /// Name of the attached next stage, if any.
    fn next_name(&self) -> Option<String>;

    /// Accept a request.
    fn queue_request(&mut self, ctx: &mut StreamerContext, request: RequestId);

    /// Make progress on queued work. Returns true if anything was done.
    fn execute_requests(&mut self, ctx: &mut StreamerContext) -> bool;

    /// Fold this stage's load into `status`.
    fn update_status(&self, status: &mut Status);

    /// Assign estimated completion times to the requests this stage holds.
    /// `internal_pending` collects requests parked in stages above that
    /// still need an estimate.
    fn update_completion_estimates(
        &mut self,
        ctx: &mut StreamerContext,
        now: Instant,
        internal_pending: &mut Vec<RequestId>,
    );

    /// Publish this stage's statistics.
    fn collect_statistics(&self, statistics: &mut Vec<Statistic>);
}

/// Fail a request that cannot be handed on.
pub(crate) fn fail_request(ctx: &mut StreamerContext, request: RequestId) {
    ctx.set_status(request, RequestStatus::Failed);
    ctx.mark_request_as_completed(request);
}

/// Hand `request` to `next`, or fail it when there is no next stage.
pub(crate) fn forward_request(
    next: &mut Option<Box<dyn StreamStackEntry>>,
    ctx: &mut StreamerContext,
    request: RequestId,
) {
    match next {
        Some(next) => next.queue_request(ctx, request),
        None => {
            log::warn!("No next stage to forward request {} to", request);
            fail_request(ctx, request);
        }
    }
}
