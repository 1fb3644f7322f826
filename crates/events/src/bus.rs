//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans [`BatchEvent`]s out to UI listeners. It is shared via
//! `Arc<EventBus>` between the orchestrator and the HTTP layer.

use chrono::{DateTime, Utc};
use reelforge_core::job::JobStatus;
use reelforge_core::types::{BatchId, JobId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// BatchEvent
// ---------------------------------------------------------------------------

/// A job or batch lifecycle change.
///
/// Constructed via [`BatchEvent::new`] and enriched with
/// [`with_job`](BatchEvent::with_job), [`with_status`](BatchEvent::with_status)
/// and [`with_payload`](BatchEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEvent {
    /// Dot-separated event name, e.g. `"job.completed"`.
    pub event_type: String,

    pub batch_id: BatchId,

    /// Set for job-level events.
    pub job_id: Option<JobId>,

    /// Job status after the change, for job-level events.
    pub status: Option<JobStatus>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl BatchEvent {
    pub fn new(event_type: impl Into<String>, batch_id: BatchId) -> Self {
        Self {
            event_type: event_type.into(),
            batch_id,
            job_id: None,
            status: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use reelforge_events::bus::{BatchEvent, EventBus};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(BatchEvent::new("batch.started", uuid::Uuid::now_v7()));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<BatchEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed messages are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Dropped silently when nobody is listening.
    pub fn publish(&self, event: BatchEvent) {
        tracing::trace!(
            event_type = %event.event_type,
            batch_id = %event.batch_id,
            "Publishing event",
        );
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
