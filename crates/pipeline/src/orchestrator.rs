//! Job orchestrator.
//!
//! [`JobOrchestrator`] owns every live batch, submits jobs to render
//! backends, applies poll results and exposes the batch controls
//! (start / refresh / pause / resume / cancel / retry).
//!
//! Each job has two locks: an operation guard held across every backend
//! call (submit, poll or cancel), and a record lock that is only ever held
//! briefly. Snapshots and local cancellation take the record locks alone,
//! so they never wait on the network.
//!
//! Saves of one batch are serialized, and each save snapshots the batch
//! after taking its turn, so storage never regresses to an older state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use reelforge_core::batch::{BatchRecord, BatchStatus};
use reelforge_core::error::CoreError;
use reelforge_core::job::{FailureKind, JobRecord, JobStatus};
use reelforge_core::job_events::{
    event_for_status, EVENT_BATCH_CANCELLED, EVENT_BATCH_PAUSED, EVENT_BATCH_RESUMED,
    EVENT_BATCH_STARTED, EVENT_JOB_RETRIED,
};
use reelforge_core::progress::{self, ProgressSummary};
use reelforge_core::types::{BatchId, DbId, JobId, Timestamp};
use reelforge_core::variation::VariationRequest;
use reelforge_db::repositories::BatchRepository;
use reelforge_events::{BatchEvent, EventBus};
use reelforge_render::{
    BackendError, BackendRegistry, CancelOutcome, PollStatus, RenderBackend, SubmitResult,
};
use tokio::sync::{Mutex, RwLock};

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;

// ---------------------------------------------------------------------------
// Public result types
// ---------------------------------------------------------------------------

/// What one refresh cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub submitted: usize,
    pub polled: usize,
    /// Status changes applied, counting each intermediate step.
    pub transitions: usize,
    pub transient_errors: usize,
    /// The batch was already being refreshed; nothing was done.
    pub skipped: bool,
}

impl RefreshReport {
    fn absorb(&mut self, step: JobStep) {
        self.submitted += usize::from(step.submitted);
        self.polled += usize::from(step.polled);
        self.transitions += step.transitions;
        self.transient_errors += usize::from(step.transient_error);
    }

    fn changed_anything(&self) -> bool {
        self.transitions > 0 || self.transient_errors > 0
    }
}

/// A batch that still has outstanding work, as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPlan {
    pub batch_id: BatchId,
    /// Smallest poll interval among the backends its in-flight jobs use.
    /// `None` when only immediate backends or pending jobs are involved.
    pub min_interval: Option<Duration>,
    /// A refresh of this batch is currently running.
    pub refreshing: bool,
}

// ---------------------------------------------------------------------------
// Live batch state
// ---------------------------------------------------------------------------

struct BatchHeader {
    id: BatchId,
    owner_id: DbId,
    name: String,
    request: VariationRequest,
    created_at: Timestamp,
}

#[derive(Debug, Clone, Copy, Default)]
struct BatchControl {
    started_at: Option<Timestamp>,
    paused: bool,
    cancelled_at: Option<Timestamp>,
}

impl BatchControl {
    fn accepts_work(&self) -> bool {
        self.started_at.is_some() && !self.paused && self.cancelled_at.is_none()
    }
}

struct JobSlot {
    id: JobId,
    /// Held across backend calls for this job.
    op: Mutex<()>,
    record: Mutex<JobRecord>,
}

struct BatchHandle {
    header: BatchHeader,
    control: Mutex<BatchControl>,
    jobs: Vec<Arc<JobSlot>>,
    /// Held for the whole of a submit or refresh sweep.
    sweep: Mutex<()>,
    /// Held across snapshot and save.
    saving: Mutex<()>,
    /// Set once the batch is deleted; later saves are dropped.
    removed: AtomicBool,
}

impl BatchHandle {
    fn from_record(batch: BatchRecord) -> Self {
        Self {
            header: BatchHeader {
                id: batch.id,
                owner_id: batch.owner_id,
                name: batch.name,
                request: batch.request,
                created_at: batch.created_at,
            },
            control: Mutex::new(BatchControl {
                started_at: batch.started_at,
                paused: batch.paused,
                cancelled_at: batch.cancelled_at,
            }),
            jobs: batch
                .jobs
                .into_iter()
                .map(|record| {
                    Arc::new(JobSlot {
                        id: record.id,
                        op: Mutex::new(()),
                        record: Mutex::new(record),
                    })
                })
                .collect(),
            sweep: Mutex::new(()),
            saving: Mutex::new(()),
            removed: AtomicBool::new(false),
        }
    }

    async fn control(&self) -> BatchControl {
        *self.control.lock().await
    }

    async fn snapshot(&self) -> BatchRecord {
        let control = self.control().await;
        let mut jobs = Vec::with_capacity(self.jobs.len());
        for slot in &self.jobs {
            jobs.push(slot.record.lock().await.clone());
        }
        BatchRecord {
            id: self.header.id,
            owner_id: self.header.owner_id,
            name: self.header.name.clone(),
            request: self.header.request.clone(),
            jobs,
            created_at: self.header.created_at,
            started_at: control.started_at,
            paused: control.paused,
            cancelled_at: control.cancelled_at,
        }
    }
}

/// Which pass [`JobOrchestrator::drive`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sweep {
    /// Submit pending jobs. Waits for a running refresh to finish.
    Submit,
    /// Submit pending jobs and poll in-flight ones. Skipped while another
    /// sweep of the batch is running.
    Refresh,
}

/// A backend cancellation for a job whose handle is already known.
struct RemoteCancel {
    slot: Arc<JobSlot>,
    backend: Arc<dyn RenderBackend>,
    backend_job_id: String,
}

#[derive(Debug, Clone, Copy, Default)]
struct JobStep {
    submitted: bool,
    polled: bool,
    transitions: usize,
    transient_error: bool,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Owns all live batches and drives their jobs through the lifecycle.
///
/// Shared as `Arc<JobOrchestrator>` between the HTTP layer and the
/// [`PollingScheduler`](crate::PollingScheduler).
pub struct JobOrchestrator {
    batches: RwLock<HashMap<BatchId, Arc<BatchHandle>>>,
    /// Job id -> owning batch, for job-level operations.
    job_index: RwLock<HashMap<JobId, BatchId>>,
    registry: BackendRegistry,
    repo: Arc<dyn BatchRepository>,
    events: Arc<EventBus>,
    config: OrchestratorConfig,
}

impl JobOrchestrator {
    pub fn new(
        registry: BackendRegistry,
        repo: Arc<dyn BatchRepository>,
        events: Arc<EventBus>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            batches: RwLock::new(HashMap::new()),
            job_index: RwLock::new(HashMap::new()),
            registry,
            repo,
            events,
            config,
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ---- batch lifecycle ----

    /// Expand `request` into a new draft batch and persist it.
    ///
    /// Nothing is created if the request fails validation.
    pub async fn create(
        &self,
        owner_id: DbId,
        name: impl Into<String>,
        request: VariationRequest,
    ) -> Result<BatchRecord, OrchestratorError> {
        let mut batch = BatchRecord::create(owner_id, name, request)?;
        for job in &mut batch.jobs {
            if let Ok(backend) = self.registry.resolve(&job.spec) {
                job.estimated_cost = backend.estimate_cost(&job.spec);
            }
        }

        self.repo.save(&batch).await?;
        tracing::info!(
            batch_id = %batch.id,
            owner_id,
            jobs = batch.jobs.len(),
            "Batch created",
        );
        self.adopt(batch.clone()).await;
        Ok(batch)
    }

    /// Take ownership of an existing batch record. A batch that is already
    /// live is left untouched.
    pub async fn adopt(&self, batch: BatchRecord) {
        let id = batch.id;
        let job_ids: Vec<JobId> = batch.jobs.iter().map(|j| j.id).collect();

        let mut batches = self.batches.write().await;
        if batches.contains_key(&id) {
            return;
        }
        batches.insert(id, Arc::new(BatchHandle::from_record(batch)));
        drop(batches);

        let mut index = self.job_index.write().await;
        for job_id in job_ids {
            index.insert(job_id, id);
        }
    }

    /// Re-adopt every started, uncancelled batch from the repository.
    /// Called once at startup; in-flight jobs resume polling on the next
    /// scheduler tick.
    pub async fn restore(&self) -> Result<usize, OrchestratorError> {
        let batches = self.repo.list_active().await?;
        let count = batches.len();
        for batch in batches {
            self.adopt(batch).await;
        }
        tracing::info!(batches = count, "Restored active batches");
        Ok(count)
    }

    /// Start a draft batch and submit every pending job, waiting for all
    /// submissions to return.
    pub async fn start(&self, batch_id: BatchId) -> Result<BatchRecord, OrchestratorError> {
        let batch = self.begin(batch_id).await?;
        let report = self.drive(&batch, Sweep::Submit).await;
        tracing::info!(
            batch_id = %batch_id,
            submitted = report.submitted,
            transient_errors = report.transient_errors,
            "Batch submission sweep finished",
        );
        self.persist(&batch).await
    }

    /// Like [`start`](Self::start), but returns as soon as the batch is
    /// marked started and runs the submission sweep in the background.
    pub async fn launch(self: &Arc<Self>, batch_id: BatchId) -> Result<BatchRecord, OrchestratorError> {
        let batch = self.begin(batch_id).await?;
        let snapshot = self.persist(&batch).await?;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let report = this.drive(&batch, Sweep::Submit).await;
            tracing::info!(
                batch_id = %batch_id,
                submitted = report.submitted,
                transient_errors = report.transient_errors,
                "Batch submission sweep finished",
            );
            if let Err(e) = this.persist(&batch).await {
                tracing::error!(batch_id = %batch_id, error = %e, "Failed to persist batch after submission");
            }
        });

        Ok(snapshot)
    }

    async fn begin(&self, batch_id: BatchId) -> Result<Arc<BatchHandle>, OrchestratorError> {
        let batch = self.handle(batch_id).await?;
        {
            let mut control = batch.control.lock().await;
            if control.cancelled_at.is_some() {
                return Err(OrchestratorError::Conflict(format!(
                    "Batch {batch_id} is cancelled"
                )));
            }
            if control.paused {
                return Err(OrchestratorError::Conflict(format!(
                    "Batch {batch_id} is paused; resume it before starting"
                )));
            }
            if control.started_at.is_some() {
                return Err(OrchestratorError::Conflict(format!(
                    "Batch {batch_id} has already been started"
                )));
            }
            control.started_at = Some(Utc::now());
        }

        tracing::info!(batch_id = %batch_id, jobs = batch.jobs.len(), "Batch started");
        self.events.publish(
            BatchEvent::new(EVENT_BATCH_STARTED, batch_id)
                .with_payload(serde_json::json!({ "jobs": batch.jobs.len() })),
        );
        Ok(batch)
    }

    /// Poll every in-flight job and resubmit pending ones.
    ///
    /// A no-op for batches that are not started, paused or cancelled, and
    /// reports `skipped` if another refresh of the batch is still running.
    pub async fn refresh(&self, batch_id: BatchId) -> Result<RefreshReport, OrchestratorError> {
        let batch = self.handle(batch_id).await?;
        if !batch.control().await.accepts_work() {
            return Ok(RefreshReport::default());
        }

        let report = self.drive(&batch, Sweep::Refresh).await;
        if report.changed_anything() {
            self.persist(&batch).await?;
        }
        tracing::debug!(
            batch_id = %batch_id,
            submitted = report.submitted,
            polled = report.polled,
            transitions = report.transitions,
            transient_errors = report.transient_errors,
            skipped = report.skipped,
            "Batch refreshed",
        );
        Ok(report)
    }

    /// Stop submitting and polling. Idempotent; makes no backend calls.
    pub async fn pause(&self, batch_id: BatchId) -> Result<BatchRecord, OrchestratorError> {
        let batch = self.handle(batch_id).await?;
        let status = batch.snapshot().await.status();
        if status.is_terminal() {
            return Err(OrchestratorError::Conflict(format!(
                "Batch {batch_id} is {status} and cannot be paused"
            )));
        }

        let changed = {
            let mut control = batch.control.lock().await;
            let changed = !control.paused;
            control.paused = true;
            changed
        };
        if changed {
            tracing::info!(batch_id = %batch_id, "Batch paused");
            self.events
                .publish(BatchEvent::new(EVENT_BATCH_PAUSED, batch_id));
        }
        self.persist(&batch).await
    }

    /// Clear the pause flag. Idempotent; pending jobs are resubmitted by the
    /// next refresh, not here.
    pub async fn resume(&self, batch_id: BatchId) -> Result<BatchRecord, OrchestratorError> {
        let batch = self.handle(batch_id).await?;
        let changed = {
            let mut control = batch.control.lock().await;
            if control.cancelled_at.is_some() {
                return Err(OrchestratorError::Conflict(format!(
                    "Batch {batch_id} is cancelled"
                )));
            }
            let changed = control.paused;
            control.paused = false;
            changed
        };
        if changed {
            tracing::info!(batch_id = %batch_id, "Batch resumed");
            self.events
                .publish(BatchEvent::new(EVENT_BATCH_RESUMED, batch_id));
        }
        self.persist(&batch).await
    }

    /// Cancel every unresolved job at once. Backend cancellation requests
    /// are sent in the background and never awaited here.
    pub async fn cancel(&self, batch_id: BatchId) -> Result<BatchRecord, OrchestratorError> {
        let batch = self.handle(batch_id).await?;
        let status = batch.snapshot().await.status();
        if status == BatchStatus::Cancelled {
            return self.persist(&batch).await;
        }
        if status.is_terminal() {
            return Err(OrchestratorError::Conflict(format!(
                "Batch {batch_id} is already {status}"
            )));
        }

        {
            let mut control = batch.control.lock().await;
            if control.cancelled_at.is_some() {
                drop(control);
                return self.persist(&batch).await;
            }
            control.cancelled_at = Some(Utc::now());
        }

        let mut remote = Vec::new();
        let mut cancelled = 0usize;
        for slot in &batch.jobs {
            let mut record = slot.record.lock().await;
            if record.status.is_terminal() {
                continue;
            }
            if record.status.is_in_flight() {
                if let Some(backend) = record.backend.as_deref().and_then(|n| self.registry.get(n)) {
                    if let Some(backend_job_id) = record.backend_job_id.clone() {
                        remote.push(RemoteCancel {
                            slot: Arc::clone(slot),
                            backend,
                            backend_job_id,
                        });
                    }
                }
            }
            match record.cancel() {
                Ok(()) => {
                    cancelled += 1;
                    self.publish_job(batch_id, &record, &[JobStatus::Cancelled]);
                }
                Err(e) => {
                    tracing::error!(batch_id = %batch_id, job_id = %slot.id, error = %e, "Failed to cancel job");
                }
            }
        }

        tracing::info!(
            batch_id = %batch_id,
            cancelled,
            backend_requests = remote.len(),
            "Batch cancelled",
        );
        self.cancel_remote(batch_id, remote);
        self.events.publish(
            BatchEvent::new(EVENT_BATCH_CANCELLED, batch_id)
                .with_payload(serde_json::json!({ "cancelled_jobs": cancelled })),
        );
        self.persist(&batch).await
    }

    /// Reopen a failed job. It is resubmitted by the batch's next refresh.
    pub async fn retry(&self, job_id: JobId) -> Result<JobRecord, OrchestratorError> {
        let batch_id = self
            .job_index
            .read()
            .await
            .get(&job_id)
            .copied()
            .ok_or_else(|| OrchestratorError::NotFound {
                entity: "Job",
                id: job_id.to_string(),
            })?;
        let batch = self.handle(batch_id).await?;
        if batch.control().await.cancelled_at.is_some() {
            return Err(OrchestratorError::Conflict(format!(
                "Batch {batch_id} is cancelled; its jobs cannot be retried"
            )));
        }

        let slot = batch
            .jobs
            .iter()
            .find(|s| s.id == job_id)
            .ok_or_else(|| OrchestratorError::NotFound {
                entity: "Job",
                id: job_id.to_string(),
            })?;

        let record = {
            let mut record = slot.record.lock().await;
            record.reset_for_retry(self.config.max_attempts)?;
            self.events.publish(
                BatchEvent::new(EVENT_JOB_RETRIED, batch_id)
                    .with_job(job_id)
                    .with_status(record.status)
                    .with_payload(serde_json::json!({
                        "index": record.spec.index,
                        "attempts": record.attempts,
                    })),
            );
            record.clone()
        };

        tracing::info!(
            batch_id = %batch_id,
            job_id = %job_id,
            attempts = record.attempts,
            "Job queued for retry",
        );
        self.persist(&batch).await?;
        Ok(record)
    }

    /// Forget a batch and remove it from storage. A batch with work still
    /// outstanding must be cancelled first.
    pub async fn delete(&self, batch_id: BatchId) -> Result<(), OrchestratorError> {
        let batch = self.handle(batch_id).await?;
        let snapshot = batch.snapshot().await;
        let busy = snapshot.started_at.is_some()
            && snapshot.cancelled_at.is_none()
            && snapshot.jobs.iter().any(|j| !j.status.is_terminal());
        if busy {
            return Err(OrchestratorError::Conflict(format!(
                "Batch {batch_id} still has work outstanding; cancel it before deleting"
            )));
        }

        let _saving = batch.saving.lock().await;
        batch.removed.store(true, Ordering::Release);
        self.batches.write().await.remove(&batch_id);
        {
            let mut index = self.job_index.write().await;
            for job in &snapshot.jobs {
                index.remove(&job.id);
            }
        }
        self.repo.delete(batch_id).await?;
        tracing::info!(batch_id = %batch_id, "Batch deleted");
        Ok(())
    }

    // ---- queries ----

    pub async fn get(&self, batch_id: BatchId) -> Result<BatchRecord, OrchestratorError> {
        Ok(self.handle(batch_id).await?.snapshot().await)
    }

    pub async fn summarize(&self, batch_id: BatchId) -> Result<ProgressSummary, OrchestratorError> {
        Ok(progress::summarize(&self.get(batch_id).await?))
    }

    /// All batches of an owner, newest first. Live state wins over the
    /// stored copy.
    pub async fn list(&self, owner_id: DbId) -> Result<Vec<BatchRecord>, OrchestratorError> {
        let stored = self.repo.list(owner_id).await?;
        let mut batches = Vec::with_capacity(stored.len());
        for batch in stored {
            let live = self.batches.read().await.get(&batch.id).cloned();
            match live {
                Some(handle) => batches.push(handle.snapshot().await),
                None => batches.push(batch),
            }
        }
        Ok(batches)
    }

    /// Batches the scheduler should consider: started, not paused or
    /// cancelled, with pending or in-flight jobs.
    pub async fn poll_plan(&self) -> Vec<PollPlan> {
        let batches: Vec<Arc<BatchHandle>> = self.batches.read().await.values().cloned().collect();
        let mut plans = Vec::new();

        for batch in batches {
            if !batch.control().await.accepts_work() {
                continue;
            }
            let mut outstanding = false;
            let mut min_interval: Option<Duration> = None;
            for slot in &batch.jobs {
                let record = slot.record.lock().await;
                if record.status == JobStatus::Pending {
                    outstanding = true;
                } else if record.status.is_in_flight() {
                    outstanding = true;
                    let interval = record
                        .backend
                        .as_deref()
                        .and_then(|name| self.registry.poll_interval(name));
                    if let Some(interval) = interval {
                        min_interval = Some(min_interval.map_or(interval, |m| m.min(interval)));
                    }
                }
            }
            if outstanding {
                plans.push(PollPlan {
                    batch_id: batch.header.id,
                    min_interval,
                    refreshing: batch.sweep.try_lock().is_err(),
                });
            }
        }
        plans
    }

    // ---- internals ----

    async fn handle(&self, batch_id: BatchId) -> Result<Arc<BatchHandle>, OrchestratorError> {
        if let Some(handle) = self.batches.read().await.get(&batch_id) {
            return Ok(Arc::clone(handle));
        }
        let batch = self
            .repo
            .load(batch_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound {
                entity: "Batch",
                id: batch_id.to_string(),
            })?;
        self.adopt(batch).await;
        self.batches
            .read()
            .await
            .get(&batch_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::Internal(format!("Batch {batch_id} vanished on adopt")))
    }

    /// Save the batch's current state. The snapshot is taken only once no
    /// other save of the batch is in progress.
    async fn persist(&self, batch: &BatchHandle) -> Result<BatchRecord, OrchestratorError> {
        let _saving = batch.saving.lock().await;
        let snapshot = batch.snapshot().await;
        if !batch.removed.load(Ordering::Acquire) {
            self.repo.save(&snapshot).await?;
        }
        Ok(snapshot)
    }

    /// Run one pass over the batch's jobs: submit pending jobs and, for a
    /// refresh, poll in-flight ones.
    async fn drive(&self, batch: &BatchHandle, sweep: Sweep) -> RefreshReport {
        let _sweeping = match sweep {
            Sweep::Submit => batch.sweep.lock().await,
            Sweep::Refresh => match batch.sweep.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    return RefreshReport {
                        skipped: true,
                        ..Default::default()
                    }
                }
            },
        };
        let poll = sweep == Sweep::Refresh;

        let slots: Vec<Arc<JobSlot>> = batch.jobs.clone();
        let steps: Vec<JobStep> = stream::iter(slots)
            .map(move |slot| async move {
                let status = slot.record.lock().await.status;
                match status {
                    JobStatus::Pending => self.submit_job(batch, &slot).await,
                    s if poll && s.is_in_flight() => self.poll_job(batch, &slot).await,
                    _ => JobStep::default(),
                }
            })
            .buffer_unordered(self.config.submit_concurrency.max(1))
            .collect()
            .await;

        let mut report = RefreshReport::default();
        for step in steps {
            report.absorb(step);
        }
        report
    }

    async fn submit_job(&self, batch: &BatchHandle, slot: &Arc<JobSlot>) -> JobStep {
        let batch_id = batch.header.id;
        let _op = slot.op.lock().await;
        let spec = {
            let record = slot.record.lock().await;
            if record.status != JobStatus::Pending {
                return JobStep::default();
            }
            record.spec.clone()
        };
        if !batch.control().await.accepts_work() {
            return JobStep::default();
        }

        let backend = match self.registry.resolve(&spec) {
            Ok(backend) => backend,
            Err(e) => {
                let mut record = slot.record.lock().await;
                if record.status != JobStatus::Pending {
                    return JobStep::default();
                }
                tracing::warn!(batch_id = %batch_id, job_id = %slot.id, error = %e, "Job cannot be routed to a render backend");
                let mut entered = Vec::new();
                self.log_transition_error(
                    batch_id,
                    slot.id,
                    record.fail(FailureKind::Unroutable, e.to_string()).map(|()| entered.push(JobStatus::Failed)),
                );
                self.publish_job(batch_id, &record, &entered);
                return JobStep {
                    transitions: entered.len(),
                    ..Default::default()
                };
            }
        };

        let result = backend.submit(&spec).await;

        let mut record = slot.record.lock().await;
        let mut step = JobStep {
            submitted: true,
            ..Default::default()
        };
        if record.status != JobStatus::Pending {
            // Cancelled while the submission was in flight. The cancel
            // request runs once this call releases the operation guard.
            if let Ok(accepted) = &result {
                if accepted.immediate.is_none() {
                    self.cancel_remote(
                        batch_id,
                        vec![RemoteCancel {
                            slot: Arc::clone(slot),
                            backend: Arc::clone(&backend),
                            backend_job_id: accepted.backend_job_id.clone(),
                        }],
                    );
                }
            }
            return step;
        }

        let mut entered = Vec::new();
        let applied = match result {
            Ok(accepted) => apply_submission(&mut record, backend.name(), accepted, &mut entered),
            Err(err) => {
                tracing::warn!(
                    batch_id = %batch_id,
                    job_id = %slot.id,
                    backend = %backend.name(),
                    transient = err.is_transient(),
                    error = %err,
                    "Render submission failed",
                );
                step.transient_error = err.is_transient();
                self.apply_backend_error(&mut record, err, &mut entered)
            }
        };
        self.log_transition_error(batch_id, slot.id, applied);

        step.transitions = entered.len();
        self.publish_job(batch_id, &record, &entered);
        step
    }

    async fn poll_job(&self, batch: &BatchHandle, slot: &Arc<JobSlot>) -> JobStep {
        let batch_id = batch.header.id;
        let _op = slot.op.lock().await;
        let (backend_name, backend_job_id) = {
            let record = slot.record.lock().await;
            if !record.status.is_in_flight() {
                return JobStep::default();
            }
            (record.backend.clone(), record.backend_job_id.clone())
        };

        let backend = backend_name.as_deref().and_then(|name| self.registry.get(name));
        let (Some(backend), Some(backend_job_id)) = (backend, backend_job_id) else {
            let mut record = slot.record.lock().await;
            if !record.status.is_in_flight() {
                return JobStep::default();
            }
            let message = format!(
                "Render backend '{}' is not registered",
                backend_name.as_deref().unwrap_or("<none>")
            );
            tracing::warn!(batch_id = %batch_id, job_id = %slot.id, "{message}");
            let mut entered = Vec::new();
            self.log_transition_error(
                batch_id,
                slot.id,
                record.fail(FailureKind::Unroutable, message).map(|()| entered.push(JobStatus::Failed)),
            );
            self.publish_job(batch_id, &record, &entered);
            return JobStep {
                transitions: entered.len(),
                ..Default::default()
            };
        };

        let result = backend.poll_status(&backend_job_id).await;

        let mut record = slot.record.lock().await;
        let mut step = JobStep {
            polled: true,
            ..Default::default()
        };
        if !record.status.is_in_flight() {
            // Cancelled while the poll was in flight; its result is stale.
            return step;
        }

        let mut entered = Vec::new();
        let applied = match result {
            Ok(status) => apply_poll_status(&mut record, status, &mut entered),
            Err(err) => {
                tracing::warn!(
                    batch_id = %batch_id,
                    job_id = %slot.id,
                    backend = %backend.name(),
                    backend_job_id = %backend_job_id,
                    transient = err.is_transient(),
                    error = %err,
                    "Render status poll failed",
                );
                step.transient_error = err.is_transient();
                self.apply_backend_error(&mut record, err, &mut entered)
            }
        };
        self.log_transition_error(batch_id, slot.id, applied);

        step.transitions = entered.len();
        self.publish_job(batch_id, &record, &entered);
        step
    }

    fn apply_backend_error(
        &self,
        record: &mut JobRecord,
        err: BackendError,
        entered: &mut Vec<JobStatus>,
    ) -> Result<(), CoreError> {
        match err {
            BackendError::Transient(message) => {
                if record.record_transient_error(&message, self.config.max_transient_errors)? {
                    entered.push(JobStatus::Failed);
                }
            }
            BackendError::Terminal(message) => {
                record.fail(FailureKind::Terminal, message)?;
                entered.push(JobStatus::Failed);
            }
        }
        Ok(())
    }

    /// Fire best-effort cancellation requests without waiting for them.
    /// Each request takes its job's operation guard first, so it never
    /// overlaps a submit or poll of the same job.
    fn cancel_remote(&self, batch_id: BatchId, requests: Vec<RemoteCancel>) {
        if requests.is_empty() {
            return;
        }
        tokio::spawn(async move {
            let requests = requests.into_iter().map(|request| async move {
                let RemoteCancel {
                    slot,
                    backend,
                    backend_job_id: handle,
                } = request;
                let _op = slot.op.lock().await;
                match backend.cancel(&handle).await {
                    Ok(CancelOutcome::Cancelled) => {
                        tracing::debug!(batch_id = %batch_id, backend = %backend.name(), backend_job_id = %handle, "Backend job cancelled");
                    }
                    Ok(CancelOutcome::Unsupported) => {
                        tracing::debug!(batch_id = %batch_id, backend = %backend.name(), backend_job_id = %handle, "Backend cannot cancel; result will be ignored");
                    }
                    Err(e) => {
                        tracing::warn!(batch_id = %batch_id, backend = %backend.name(), backend_job_id = %handle, error = %e, "Backend cancel request failed");
                    }
                }
            });
            futures::future::join_all(requests).await;
        });
    }

    fn publish_job(&self, batch_id: BatchId, record: &JobRecord, entered: &[JobStatus]) {
        for &status in entered {
            let Some(event_type) = event_for_status(status) else {
                continue;
            };
            self.events.publish(
                BatchEvent::new(event_type, batch_id)
                    .with_job(record.id)
                    .with_status(status)
                    .with_payload(serde_json::json!({
                        "index": record.spec.index,
                        "backend": record.backend,
                        "backend_job_id": record.backend_job_id,
                        "result_url": record.result_url,
                        "error": record.error_message,
                        "failure_kind": record.failure_kind,
                    })),
            );
        }
    }

    fn log_transition_error(&self, batch_id: BatchId, job_id: JobId, result: Result<(), CoreError>) {
        if let Err(e) = result {
            tracing::error!(batch_id = %batch_id, job_id = %job_id, error = %e, "Rejected job transition");
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome application
// ---------------------------------------------------------------------------

/// Apply a successful submission to a pending job.
fn apply_submission(
    record: &mut JobRecord,
    backend_name: &str,
    accepted: SubmitResult,
    entered: &mut Vec<JobStatus>,
) -> Result<(), CoreError> {
    record.backend = Some(backend_name.to_string());
    match accepted.immediate {
        None => {
            record.mark_submitted(accepted.backend_job_id)?;
            entered.push(JobStatus::Submitted);
        }
        Some(PollStatus::Processing) => {
            record.mark_submitted(accepted.backend_job_id)?;
            entered.push(JobStatus::Submitted);
            apply_poll_status(record, PollStatus::Processing, entered)?;
        }
        Some(outcome) => {
            record.backend_job_id = Some(accepted.backend_job_id);
            record.submitted_at = Some(Utc::now());
            apply_poll_status(record, outcome, entered)?;
        }
    }
    Ok(())
}

/// Apply a backend-reported status. The first answer for a submitted job
/// confirms acceptance, so it always passes through `Processing`.
fn apply_poll_status(
    record: &mut JobRecord,
    status: PollStatus,
    entered: &mut Vec<JobStatus>,
) -> Result<(), CoreError> {
    if record.status == JobStatus::Submitted {
        record.mark_processing()?;
        entered.push(JobStatus::Processing);
    }

    match status {
        PollStatus::Processing => {
            record.transient_errors = 0;
        }
        PollStatus::Completed {
            result_url,
            thumbnail_url,
        } => {
            let outcome = record.complete(result_url, thumbnail_url)?;
            if outcome == JobStatus::Failed {
                tracing::warn!(
                    job_id = %record.id,
                    backend = record.backend.as_deref().unwrap_or_default(),
                    failure_kind = FailureKind::ResultIntegrity.as_str(),
                    "Backend reported completion without a result URL",
                );
            }
            entered.push(outcome);
        }
        PollStatus::Failed { error } => {
            record.fail(FailureKind::Terminal, error)?;
            entered.push(JobStatus::Failed);
        }
    }
    Ok(())
}
