//! Event type names published on the event bus for job and batch
//! lifecycle changes.

use crate::job::JobStatus;

pub const EVENT_JOB_SUBMITTED: &str = "job.submitted";
pub const EVENT_JOB_PROCESSING: &str = "job.processing";
pub const EVENT_JOB_COMPLETED: &str = "job.completed";
pub const EVENT_JOB_FAILED: &str = "job.failed";
pub const EVENT_JOB_CANCELLED: &str = "job.cancelled";
/// A failed job was reopened by an explicit retry.
pub const EVENT_JOB_RETRIED: &str = "job.retried";

pub const EVENT_BATCH_STARTED: &str = "batch.started";
pub const EVENT_BATCH_PAUSED: &str = "batch.paused";
pub const EVENT_BATCH_RESUMED: &str = "batch.resumed";
pub const EVENT_BATCH_CANCELLED: &str = "batch.cancelled";

/// Event type emitted when a job enters `status`, if any.
pub fn event_for_status(status: JobStatus) -> Option<&'static str> {
    match status {
        JobStatus::Pending => None,
        JobStatus::Submitted => Some(EVENT_JOB_SUBMITTED),
        JobStatus::Processing => Some(EVENT_JOB_PROCESSING),
        JobStatus::Completed => Some(EVENT_JOB_COMPLETED),
        JobStatus::Failed => Some(EVENT_JOB_FAILED),
        JobStatus::Cancelled => Some(EVENT_JOB_CANCELLED),
    }
}
