//! End-to-end batch scenarios against the orchestrator.

mod common;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reelforge_core::batch::{BatchRecord, BatchStatus};
use reelforge_core::job::{FailureKind, JobStatus};
use reelforge_core::job_events::{EVENT_BATCH_STARTED, EVENT_JOB_COMPLETED, EVENT_JOB_RETRIED};
use reelforge_core::types::{BatchId, DbId};
use reelforge_core::variation::{
    Dimension, VariationRequest, DIM_ENGINE, DIM_HOOK_STYLE, DIM_PACING,
};
use reelforge_db::repositories::{BatchRepository, InMemoryBatchRepo, RepoError};
use reelforge_events::EventBus;
use reelforge_pipeline::{OrchestratorConfig, OrchestratorError};
use reelforge_render::{BackendError, PollStatus, RenderBackend, SimulatedBackend, SubmitResult};

use common::{
    build_orchestrator, completed, eventually, handle, harness, harness_with_config,
    ScriptedBackend,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn request(count: u32) -> VariationRequest {
    VariationRequest::new("sku-42", count)
        .with_dimension(Dimension::new(DIM_HOOK_STYLE, ["question", "stat", "story"]))
}

fn farm() -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::new("farm", Duration::from_secs(2)))
}

/// Every status reachable from `from` along lifecycle edges, `from` included.
fn reachable(from: JobStatus) -> HashSet<JobStatus> {
    let mut seen = HashSet::from([from]);
    let mut queue = VecDeque::from([from]);
    while let Some(status) = queue.pop_front() {
        for &next in status.valid_transitions() {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ten_job_batch_on_immediate_backend_completes() {
    let h = harness(vec![Arc::new(SimulatedBackend::instant())]);
    let mut events = h.events.subscribe();

    let request = VariationRequest::new("sku-42", 10)
        .with_dimension(Dimension::new(DIM_HOOK_STYLE, ["question", "stat"]))
        .with_dimension(Dimension::new(DIM_PACING, ["fast"]));
    let batch = h.orchestrator.create(1, "sync", request).await.unwrap();
    assert_eq!(batch.status(), BatchStatus::Draft);
    assert_eq!(batch.jobs.len(), 10);
    assert!(batch.jobs.iter().all(|j| j.spec.dimensions[DIM_PACING] == "fast"));
    let hooks: HashSet<&str> = batch
        .jobs
        .iter()
        .map(|j| j.spec.dimensions[DIM_HOOK_STYLE].as_str())
        .collect();
    assert_eq!(hooks, HashSet::from(["question", "stat"]));

    let batch = h.orchestrator.start(batch.id).await.unwrap();
    assert!(batch.jobs.iter().all(|j| j.status == JobStatus::Completed));
    assert!(batch.jobs.iter().all(|j| j.result_url.is_some()));
    assert_eq!(batch.status(), BatchStatus::Completed);

    let summary = h.orchestrator.summarize(batch.id).await.unwrap();
    assert_eq!(summary.total, 10);
    assert_eq!(summary.percent_complete, 100.0);
    assert_eq!(summary.success_rate, 100.0);
    assert_eq!(summary.by_status[&JobStatus::Completed], 10);

    assert_eq!(events.recv().await.unwrap().event_type, EVENT_BATCH_STARTED);
    let mut completed_events = 0;
    while let Ok(event) = events.try_recv() {
        if event.event_type == EVENT_JOB_COMPLETED {
            completed_events += 1;
        }
    }
    assert_eq!(completed_events, 10);
}

#[tokio::test]
async fn five_job_async_batch_with_third_job_failing() {
    let backend = farm();
    backend.script_poll(
        2,
        vec![Ok(PollStatus::Failed {
            error: "encoder crashed".into(),
        })],
    );
    let h = harness(vec![backend.clone()]);

    let batch = h.orchestrator.create(1, "async", request(5)).await.unwrap();
    let batch = h.orchestrator.start(batch.id).await.unwrap();
    assert!(batch.jobs.iter().all(|j| j.status == JobStatus::Submitted));
    assert!(batch.jobs.iter().all(|j| j.backend_job_id.is_some()));
    assert_eq!(batch.status(), BatchStatus::Running);

    let report = h.orchestrator.refresh(batch.id).await.unwrap();
    assert_eq!(report.polled, 5);

    let batch = h.orchestrator.get(batch.id).await.unwrap();
    let third = &batch.jobs[2];
    assert_eq!(third.status, JobStatus::Failed);
    assert_eq!(third.error_message.as_deref(), Some("encoder crashed"));
    assert_eq!(third.failure_kind, Some(FailureKind::Terminal));
    assert_eq!(batch.count(JobStatus::Completed), 4);
    assert_eq!(batch.status(), BatchStatus::Failed);
    assert_eq!(batch.failure_summary().as_deref(), Some("1 of 5 failed"));

    let summary = h.orchestrator.summarize(batch.id).await.unwrap();
    assert_eq!(summary.percent_complete, 100.0);
    assert_eq!(summary.success_rate, 80.0);

    // Retry the failed job; the default poll answer completes it.
    let mut events = h.events.subscribe();
    let retried = h.orchestrator.retry(third.id).await.unwrap();
    let event = events.recv().await.unwrap();
    assert_eq!(event.event_type, EVENT_JOB_RETRIED);
    assert_eq!(event.job_id, Some(third.id));
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.attempts, 1);
    assert!(retried.backend_job_id.is_none());

    let report = h.orchestrator.refresh(batch.id).await.unwrap();
    assert_eq!(report.submitted, 1);
    h.orchestrator.refresh(batch.id).await.unwrap();

    let batch = h.orchestrator.get(batch.id).await.unwrap();
    assert_eq!(batch.jobs[2].status, JobStatus::Completed);
    assert_eq!(batch.status(), BatchStatus::Completed);
}

#[tokio::test]
async fn five_job_async_batch_keeps_running_while_others_process() {
    let backend = Arc::new(
        ScriptedBackend::new("farm", Duration::from_secs(2)).with_default_poll(PollStatus::Processing),
    );
    backend.script_poll(
        2,
        vec![Ok(PollStatus::Failed {
            error: "encoder crashed".into(),
        })],
    );
    let h = harness(vec![backend.clone()]);

    let batch = h.orchestrator.create(1, "async", request(5)).await.unwrap();
    h.orchestrator.start(batch.id).await.unwrap();
    let report = h.orchestrator.refresh(batch.id).await.unwrap();
    assert_eq!(report.polled, 5);

    let batch = h.orchestrator.get(batch.id).await.unwrap();
    assert_eq!(batch.jobs[2].status, JobStatus::Failed);
    for (index, job) in batch.jobs.iter().enumerate().filter(|(i, _)| *i != 2) {
        assert_eq!(job.status, JobStatus::Processing, "job {index}");
    }
    assert_eq!(batch.status(), BatchStatus::Running);

    let summary = h.orchestrator.summarize(batch.id).await.unwrap();
    assert_eq!(summary.percent_complete, 20.0);
    assert_eq!(summary.success_rate, 0.0);
}

#[tokio::test]
async fn retrying_a_completed_job_is_rejected() {
    let h = harness(vec![Arc::new(SimulatedBackend::instant())]);
    let batch = h.orchestrator.create(1, "b", request(2)).await.unwrap();
    let batch = h.orchestrator.start(batch.id).await.unwrap();
    let job = batch.jobs[0].clone();

    let err = h.orchestrator.retry(job.id).await.unwrap_err();
    assert_matches!(err, OrchestratorError::Conflict(_));

    let after = h.orchestrator.get(batch.id).await.unwrap();
    assert_eq!(after.jobs[0], job);
}

#[tokio::test]
async fn retry_is_bounded_by_max_attempts() {
    let backend = Arc::new(
        ScriptedBackend::new("farm", Duration::from_secs(1)).with_default_poll(PollStatus::Failed {
            error: "always".into(),
        }),
    );
    let config = OrchestratorConfig {
        max_attempts: 2,
        ..Default::default()
    };
    let h = harness_with_config(vec![backend.clone()], config);
    let batch = h.orchestrator.create(1, "b", request(1)).await.unwrap();
    h.orchestrator.start(batch.id).await.unwrap();
    let job_id = batch.jobs[0].id;

    for _ in 0..2 {
        h.orchestrator.refresh(batch.id).await.unwrap();
        h.orchestrator.retry(job_id).await.unwrap();
        h.orchestrator.refresh(batch.id).await.unwrap();
    }
    h.orchestrator.refresh(batch.id).await.unwrap();

    let err = h.orchestrator.retry(job_id).await.unwrap_err();
    assert!(err.to_string().contains("exhausted"));
    let job = h.orchestrator.get(batch.id).await.unwrap().jobs[0].clone();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 2);
}

#[tokio::test]
async fn retry_of_unknown_job_is_not_found() {
    let h = harness(vec![Arc::new(SimulatedBackend::instant())]);
    assert_matches!(
        h.orchestrator.retry(uuid::Uuid::now_v7()).await,
        Err(OrchestratorError::NotFound { entity: "Job", .. })
    );
}

#[tokio::test]
async fn pause_and_resume_are_idempotent_and_block_polling() {
    let backend = Arc::new(
        ScriptedBackend::new("farm", Duration::from_secs(1)).with_default_poll(PollStatus::Processing),
    );
    let h = harness(vec![backend.clone()]);
    let batch = h.orchestrator.create(1, "b", request(3)).await.unwrap();
    h.orchestrator.start(batch.id).await.unwrap();
    h.orchestrator.refresh(batch.id).await.unwrap();
    let polls_before = backend.poll_count();

    let once = h.orchestrator.pause(batch.id).await.unwrap();
    let twice = h.orchestrator.pause(batch.id).await.unwrap();
    assert_eq!(once.status(), BatchStatus::Paused);
    assert_eq!(once.jobs, twice.jobs);
    assert_eq!(twice.status(), BatchStatus::Paused);

    let report = h.orchestrator.refresh(batch.id).await.unwrap();
    assert_eq!(report.polled, 0);
    assert_eq!(backend.poll_count(), polls_before);
    assert!(h.orchestrator.poll_plan().await.is_empty());

    let resumed = h.orchestrator.resume(batch.id).await.unwrap();
    let again = h.orchestrator.resume(batch.id).await.unwrap();
    assert_eq!(resumed.status(), BatchStatus::Running);
    assert_eq!(resumed.jobs, again.jobs);
    assert!(resumed.jobs.iter().all(|j| j.status == JobStatus::Processing));

    h.orchestrator.refresh(batch.id).await.unwrap();
    assert_eq!(backend.poll_count(), polls_before + 3);
}

#[tokio::test]
async fn start_is_rejected_while_paused_or_twice() {
    let h = harness(vec![Arc::new(SimulatedBackend::instant())]);
    let batch = h.orchestrator.create(1, "b", request(1)).await.unwrap();

    h.orchestrator.pause(batch.id).await.unwrap();
    assert_matches!(
        h.orchestrator.start(batch.id).await,
        Err(OrchestratorError::Conflict(_))
    );

    h.orchestrator.resume(batch.id).await.unwrap();
    h.orchestrator.start(batch.id).await.unwrap();
    assert_matches!(
        h.orchestrator.start(batch.id).await,
        Err(OrchestratorError::Conflict(_))
    );
}

#[tokio::test]
async fn cancel_marks_jobs_locally_and_asks_backend() {
    let backend = Arc::new(
        ScriptedBackend::new("farm", Duration::from_secs(1)).with_default_poll(PollStatus::Processing),
    );
    let h = harness(vec![backend.clone()]);
    let batch = h.orchestrator.create(1, "b", request(3)).await.unwrap();
    h.orchestrator.start(batch.id).await.unwrap();

    let batch = h.orchestrator.cancel(batch.id).await.unwrap();
    assert!(batch.jobs.iter().all(|j| j.status == JobStatus::Cancelled));
    assert_eq!(batch.status(), BatchStatus::Cancelled);

    eventually(|| backend.cancelled_handles().len() == 3).await;
    let mut handles = backend.cancelled_handles();
    handles.sort();
    assert_eq!(handles, vec![handle(0), handle(1), handle(2)]);

    // Cancelled batches are never polled again and reject further control.
    let report = h.orchestrator.refresh(batch.id).await.unwrap();
    assert_eq!(report.polled, 0);
    assert_matches!(
        h.orchestrator.resume(batch.id).await,
        Err(OrchestratorError::Conflict(_))
    );
    assert!(h.orchestrator.cancel(batch.id).await.is_ok());
}

#[tokio::test]
async fn cancel_after_partial_output_reports_failed() {
    let backend = Arc::new(
        ScriptedBackend::new("farm", Duration::from_secs(1)).with_default_poll(PollStatus::Processing),
    );
    backend.script_poll(0, vec![Ok(completed("first"))]);
    let h = harness(vec![backend.clone()]);
    let batch = h.orchestrator.create(1, "b", request(3)).await.unwrap();
    h.orchestrator.start(batch.id).await.unwrap();
    h.orchestrator.refresh(batch.id).await.unwrap();

    let batch = h.orchestrator.cancel(batch.id).await.unwrap();
    assert_eq!(batch.jobs[0].status, JobStatus::Completed);
    assert_eq!(batch.count(JobStatus::Cancelled), 2);
    assert_eq!(batch.status(), BatchStatus::Failed);
}

#[tokio::test]
async fn cancelling_a_finished_batch_is_rejected() {
    let h = harness(vec![Arc::new(SimulatedBackend::instant())]);
    let batch = h.orchestrator.create(1, "b", request(2)).await.unwrap();
    h.orchestrator.start(batch.id).await.unwrap();
    assert_matches!(
        h.orchestrator.cancel(batch.id).await,
        Err(OrchestratorError::Conflict(_))
    );
}

#[tokio::test(start_paused = true)]
async fn submission_returning_after_cancel_is_discarded() {
    let backend = Arc::new(
        ScriptedBackend::new("farm", Duration::from_secs(1)).with_submit_delay(Duration::from_secs(5)),
    );
    let h = harness(vec![backend.clone()]);
    let batch = h.orchestrator.create(1, "b", request(1)).await.unwrap();

    let orchestrator = Arc::clone(&h.orchestrator);
    let starting = tokio::spawn(async move { orchestrator.start(batch.id).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    let cancelled = h.orchestrator.cancel(batch.id).await.unwrap();
    assert_eq!(cancelled.jobs[0].status, JobStatus::Cancelled);

    let finished = starting.await.unwrap().unwrap();
    assert_eq!(finished.jobs[0].status, JobStatus::Cancelled);
    assert!(finished.jobs[0].backend_job_id.is_none());

    eventually(|| backend.cancelled_handles() == vec![handle(0)]).await;
}

#[tokio::test]
async fn poll_result_arriving_after_cancel_is_ignored() {
    let backend = Arc::new(
        ScriptedBackend::new("farm", Duration::from_secs(1)).with_poll_delay(Duration::from_millis(200)),
    );
    let h = harness(vec![backend.clone()]);
    let batch = h.orchestrator.create(1, "b", request(1)).await.unwrap();
    h.orchestrator.start(batch.id).await.unwrap();

    let orchestrator = Arc::clone(&h.orchestrator);
    let refreshing = tokio::spawn(async move { orchestrator.refresh(batch.id).await });
    eventually(|| backend.poll_count() == 1).await;

    h.orchestrator.cancel(batch.id).await.unwrap();
    refreshing.await.unwrap().unwrap();

    let batch = h.orchestrator.get(batch.id).await.unwrap();
    assert_eq!(batch.jobs[0].status, JobStatus::Cancelled);
    assert!(batch.jobs[0].result_url.is_none());
}

#[tokio::test(start_paused = true)]
async fn backend_cancel_waits_for_in_flight_poll() {
    let backend = Arc::new(
        ScriptedBackend::new("farm", Duration::from_secs(1))
            .with_poll_delay(Duration::from_secs(5))
            .with_default_poll(PollStatus::Processing),
    );
    let h = harness(vec![backend.clone()]);
    let batch = h.orchestrator.create(1, "b", request(1)).await.unwrap();
    h.orchestrator.start(batch.id).await.unwrap();

    let orchestrator = Arc::clone(&h.orchestrator);
    let refreshing = tokio::spawn(async move { orchestrator.refresh(batch.id).await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(backend.poll_count(), 1);

    let cancelled = h.orchestrator.cancel(batch.id).await.unwrap();
    assert_eq!(cancelled.status(), BatchStatus::Cancelled);

    refreshing.await.unwrap().unwrap();
    eventually(|| backend.cancelled_handles() == vec![handle(0)]).await;
    assert_eq!(backend.max_concurrent_ops(), 1);
}

/// Holds back saves of uncancelled snapshots, so an older save can still
/// be running when a cancel is stored.
struct SlowSaveRepo {
    inner: InMemoryBatchRepo,
    delay: Duration,
}

#[async_trait]
impl BatchRepository for SlowSaveRepo {
    async fn save(&self, batch: &BatchRecord) -> Result<(), RepoError> {
        if batch.cancelled_at.is_none() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.save(batch).await
    }

    async fn load(&self, id: BatchId) -> Result<Option<BatchRecord>, RepoError> {
        self.inner.load(id).await
    }

    async fn list(&self, owner_id: DbId) -> Result<Vec<BatchRecord>, RepoError> {
        self.inner.list(owner_id).await
    }

    async fn list_active(&self) -> Result<Vec<BatchRecord>, RepoError> {
        self.inner.list_active().await
    }

    async fn delete(&self, id: BatchId) -> Result<bool, RepoError> {
        self.inner.delete(id).await
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_is_not_overwritten_by_an_earlier_save() {
    let backend = Arc::new(
        ScriptedBackend::new("farm", Duration::from_secs(1)).with_default_poll(PollStatus::Processing),
    );
    let repo = Arc::new(SlowSaveRepo {
        inner: InMemoryBatchRepo::new(),
        delay: Duration::from_secs(5),
    });
    let orchestrator = build_orchestrator(
        vec![backend],
        Arc::clone(&repo) as Arc<dyn BatchRepository>,
        Arc::new(EventBus::default()),
        OrchestratorConfig::default(),
    );
    let batch = orchestrator.create(1, "b", request(2)).await.unwrap();
    orchestrator.start(batch.id).await.unwrap();

    // The refresh moves both jobs to Processing and starts a slow save.
    let refreshing = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.refresh(batch.id).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    let cancelled = orchestrator.cancel(batch.id).await.unwrap();
    assert!(cancelled.cancelled_at.is_some());
    refreshing.await.unwrap().unwrap();

    let stored = repo.load(batch.id).await.unwrap().unwrap();
    assert!(stored.cancelled_at.is_some());
    assert!(stored.jobs.iter().all(|j| j.status == JobStatus::Cancelled));
    assert!(repo.list_active().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_submit_errors_keep_job_pending_until_limit() {
    let backend = farm();
    backend.script_submit(
        0,
        vec![
            Err(BackendError::Transient("timeout".into())),
            Err(BackendError::Transient("timeout".into())),
            Err(BackendError::Transient("timeout".into())),
        ],
    );
    let config = OrchestratorConfig {
        max_transient_errors: 3,
        ..Default::default()
    };
    let h = harness_with_config(vec![backend.clone()], config);
    let batch = h.orchestrator.create(1, "b", request(1)).await.unwrap();

    let after_start = h.orchestrator.start(batch.id).await.unwrap();
    assert_eq!(after_start.jobs[0].status, JobStatus::Pending);
    assert_eq!(after_start.jobs[0].transient_errors, 1);
    assert_eq!(after_start.status(), BatchStatus::Running);

    let report = h.orchestrator.refresh(batch.id).await.unwrap();
    assert_eq!(report.transient_errors, 1);
    h.orchestrator.refresh(batch.id).await.unwrap();

    let batch = h.orchestrator.get(batch.id).await.unwrap();
    assert_eq!(batch.jobs[0].status, JobStatus::Failed);
    assert_eq!(batch.jobs[0].failure_kind, Some(FailureKind::TransientExhausted));
    assert_eq!(backend.submit_count(), 3);
}

#[tokio::test]
async fn transient_poll_error_then_recovery_resets_counter() {
    let backend = farm();
    backend.script_poll(
        0,
        vec![
            Err(BackendError::Transient("502".into())),
            Ok(PollStatus::Processing),
        ],
    );
    let h = harness(vec![backend.clone()]);
    let batch = h.orchestrator.create(1, "b", request(1)).await.unwrap();
    h.orchestrator.start(batch.id).await.unwrap();

    h.orchestrator.refresh(batch.id).await.unwrap();
    let job = h.orchestrator.get(batch.id).await.unwrap().jobs[0].clone();
    assert_eq!(job.status, JobStatus::Submitted);
    assert_eq!(job.transient_errors, 1);

    h.orchestrator.refresh(batch.id).await.unwrap();
    let job = h.orchestrator.get(batch.id).await.unwrap().jobs[0].clone();
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.transient_errors, 0);
}

#[tokio::test]
async fn terminal_submit_error_fails_job_immediately() {
    let backend = farm();
    backend.script_submit(1, vec![Err(BackendError::Terminal("bad script".into()))]);
    let h = harness(vec![backend.clone()]);
    let batch = h.orchestrator.create(1, "b", request(3)).await.unwrap();

    let batch = h.orchestrator.start(batch.id).await.unwrap();
    assert_eq!(batch.jobs[1].status, JobStatus::Failed);
    assert_eq!(batch.jobs[1].failure_kind, Some(FailureKind::Terminal));
    assert!(batch.jobs[1].backend_job_id.is_none());
    assert_eq!(batch.count(JobStatus::Submitted), 2);
}

#[tokio::test]
async fn completion_without_url_is_result_integrity_failure() {
    let backend = farm();
    backend.script_poll(
        0,
        vec![Ok(PollStatus::Completed {
            result_url: None,
            thumbnail_url: None,
        })],
    );
    let h = harness(vec![backend.clone()]);
    let batch = h.orchestrator.create(1, "b", request(1)).await.unwrap();
    h.orchestrator.start(batch.id).await.unwrap();
    h.orchestrator.refresh(batch.id).await.unwrap();

    let job = h.orchestrator.get(batch.id).await.unwrap().jobs[0].clone();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failure_kind, Some(FailureKind::ResultIntegrity));
}

#[tokio::test]
async fn immediate_submit_result_is_applied_without_polling() {
    let backend = farm();
    backend.script_submit(
        0,
        vec![Ok(SubmitResult {
            backend_job_id: "instant-0".into(),
            immediate: Some(completed("instant")),
        })],
    );
    let h = harness(vec![backend.clone()]);
    let batch = h.orchestrator.create(1, "b", request(1)).await.unwrap();
    let batch = h.orchestrator.start(batch.id).await.unwrap();
    assert_eq!(batch.jobs[0].status, JobStatus::Completed);
    assert_eq!(batch.jobs[0].backend_job_id.as_deref(), Some("instant-0"));
    assert_eq!(backend.poll_count(), 0);
}

#[tokio::test]
async fn unknown_engine_fails_job_as_unroutable() {
    let h = harness(vec![Arc::new(SimulatedBackend::instant())]);
    let request = VariationRequest::new("sku", 2)
        .with_dimension(Dimension::new(DIM_ENGINE, ["preview", "hologram"]));
    let batch = h.orchestrator.create(1, "b", request).await.unwrap();

    let batch = h.orchestrator.start(batch.id).await.unwrap();
    assert_eq!(batch.jobs[0].status, JobStatus::Completed);
    assert_eq!(batch.jobs[1].status, JobStatus::Failed);
    assert_eq!(batch.jobs[1].failure_kind, Some(FailureKind::Unroutable));
    assert_eq!(batch.failure_summary().as_deref(), Some("1 of 2 failed"));
}

#[tokio::test]
async fn invalid_request_creates_nothing() {
    let h = harness(vec![Arc::new(SimulatedBackend::instant())]);
    let request = VariationRequest::new("sku", 2)
        .with_dimension(Dimension::new(DIM_HOOK_STYLE, Vec::<String>::new()).required());
    assert_matches!(
        h.orchestrator.create(1, "bad", request).await,
        Err(OrchestratorError::Validation(_))
    );
    assert!(h.repo.list(1).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_control_operation_is_persisted() {
    let backend = farm();
    let h = harness(vec![backend.clone()]);
    let batch = h.orchestrator.create(1, "b", request(2)).await.unwrap();
    h.orchestrator.start(batch.id).await.unwrap();
    h.orchestrator.pause(batch.id).await.unwrap();

    let stored = h.repo.load(batch.id).await.unwrap().unwrap();
    assert_eq!(stored, h.orchestrator.get(batch.id).await.unwrap());
    assert!(stored.paused);
    assert!(stored.jobs.iter().all(|j| j.status == JobStatus::Submitted));
}

#[tokio::test]
async fn restore_resumes_polling_of_stored_batches() {
    let backend = farm();
    let first = harness(vec![backend.clone()]);
    let batch = first.orchestrator.create(1, "b", request(2)).await.unwrap();
    first.orchestrator.start(batch.id).await.unwrap();

    // A fresh orchestrator sharing the same store, as after a restart.
    let registry = reelforge_render::BackendRegistry::new()
        .register(backend.clone() as Arc<dyn RenderBackend>);
    let restarted = reelforge_pipeline::JobOrchestrator::new(
        registry,
        first.repo.clone(),
        first.events.clone(),
        OrchestratorConfig::default(),
    );
    assert_eq!(restarted.restore().await.unwrap(), 1);
    assert_eq!(restarted.poll_plan().await.len(), 1);

    restarted.refresh(batch.id).await.unwrap();
    let batch = restarted.get(batch.id).await.unwrap();
    assert_eq!(batch.status(), BatchStatus::Completed);
}

#[tokio::test]
async fn delete_requires_finished_or_cancelled_batch() {
    let h = harness(vec![farm()]);
    let batch = h.orchestrator.create(1, "b", request(2)).await.unwrap();
    h.orchestrator.start(batch.id).await.unwrap();

    assert_matches!(
        h.orchestrator.delete(batch.id).await,
        Err(OrchestratorError::Conflict(_))
    );

    h.orchestrator.cancel(batch.id).await.unwrap();
    h.orchestrator.delete(batch.id).await.unwrap();
    assert!(h.repo.load(batch.id).await.unwrap().is_none());
    assert_matches!(
        h.orchestrator.get(batch.id).await,
        Err(OrchestratorError::NotFound { .. })
    );
}

#[tokio::test]
async fn list_returns_live_state() {
    let h = harness(vec![Arc::new(SimulatedBackend::instant())]);
    let a = h.orchestrator.create(7, "a", request(1)).await.unwrap();
    h.orchestrator.create(7, "b", request(1)).await.unwrap();
    h.orchestrator.create(8, "c", request(1)).await.unwrap();
    h.orchestrator.start(a.id).await.unwrap();

    let listed = h.orchestrator.list(7).await.unwrap();
    assert_eq!(listed.len(), 2);
    let a = listed.iter().find(|b| b.id == a.id).unwrap();
    assert_eq!(a.status(), BatchStatus::Completed);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// Random control sequences never move a job along an illegal edge and
/// never make sweep progress go backwards.
#[tokio::test]
async fn random_operations_respect_lifecycle_and_monotone_progress() {
    for seed in 0..8u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let backend = farm();
        for index in 0..6 {
            let answer = match rng.random_range(0..4) {
                0 => Ok(PollStatus::Failed { error: "x".into() }),
                1 => Err(BackendError::Transient("blip".into())),
                2 => Ok(PollStatus::Processing),
                _ => Ok(completed("ok")),
            };
            backend.script_poll(index, vec![answer]);
        }
        let h = harness(vec![backend.clone()]);
        let batch = h.orchestrator.create(1, "prop", request(6)).await.unwrap();
        h.orchestrator.start(batch.id).await.unwrap();

        let mut previous = h.orchestrator.get(batch.id).await.unwrap();
        let mut previous_percent = h.orchestrator.summarize(batch.id).await.unwrap().percent_complete;

        for _ in 0..25 {
            let result = match rng.random_range(0..5) {
                0 => h.orchestrator.pause(batch.id).await.map(|_| ()),
                1 => h.orchestrator.resume(batch.id).await.map(|_| ()),
                2 => {
                    let job = &previous.jobs[rng.random_range(0..previous.jobs.len())];
                    h.orchestrator.retry(job.id).await.map(|_| ())
                }
                _ => h.orchestrator.refresh(batch.id).await.map(|_| ()),
            };
            // Rejections (e.g. retrying a completed job) are expected.
            if let Err(e) = result {
                assert_matches!(e, OrchestratorError::Conflict(_));
            }

            let current = h.orchestrator.get(batch.id).await.unwrap();
            for (before, after) in previous.jobs.iter().zip(&current.jobs) {
                assert!(
                    reachable(before.status).contains(&after.status),
                    "seed {seed}: illegal move {} -> {}",
                    before.status,
                    after.status
                );
            }
            let percent = h.orchestrator.summarize(batch.id).await.unwrap().percent_complete;
            assert!(percent >= previous_percent, "seed {seed}: progress went backwards");

            previous = current;
            previous_percent = percent;
        }
    }
}
