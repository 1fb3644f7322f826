#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reelforge_core::variation::JobSpec;
use reelforge_db::repositories::{BatchRepository, InMemoryBatchRepo};
use reelforge_events::EventBus;
use reelforge_pipeline::{JobOrchestrator, OrchestratorConfig};
use reelforge_render::{
    BackendError, BackendRegistry, CancelOutcome, CompletionModel, PollStatus, RenderBackend,
    SubmitResult,
};

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

/// Polled backend whose answers are scripted per job index.
///
/// Submissions return the handle `job-{index}` unless a submit script says
/// otherwise. Polls pop the next scripted answer for the handle and fall
/// back to the default answer once the script runs out.
pub struct ScriptedBackend {
    name: String,
    interval: Duration,
    submit_script: Mutex<HashMap<u32, VecDeque<Result<SubmitResult, BackendError>>>>,
    poll_script: Mutex<HashMap<String, VecDeque<Result<PollStatus, BackendError>>>>,
    default_poll: Mutex<PollStatus>,
    submit_delay: Duration,
    poll_delay: Duration,
    pub submits: AtomicUsize,
    pub polls: AtomicUsize,
    pub cancels: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(name: &str, interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            interval,
            submit_script: Mutex::new(HashMap::new()),
            poll_script: Mutex::new(HashMap::new()),
            default_poll: Mutex::new(completed("default")),
            submit_delay: Duration::ZERO,
            poll_delay: Duration::ZERO,
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            cancels: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    pub fn with_default_poll(self, status: PollStatus) -> Self {
        *self.default_poll.lock().unwrap() = status;
        self
    }

    pub fn script_submit(&self, index: u32, answers: Vec<Result<SubmitResult, BackendError>>) {
        self.submit_script
            .lock()
            .unwrap()
            .insert(index, answers.into());
    }

    pub fn script_poll(&self, index: u32, answers: Vec<Result<PollStatus, BackendError>>) {
        self.poll_script
            .lock()
            .unwrap()
            .insert(handle(index), answers.into());
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn cancelled_handles(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }

    /// Most backend calls (of any kind) that were ever running at once.
    pub fn max_concurrent_ops(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn begin_op(&self) -> OpGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        OpGuard(&self.in_flight)
    }
}

struct OpGuard<'a>(&'a AtomicUsize);

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn handle(index: u32) -> String {
    format!("job-{index}")
}

pub fn completed(tag: &str) -> PollStatus {
    PollStatus::Completed {
        result_url: Some(format!("https://cdn.test/{tag}.mp4")),
        thumbnail_url: Some(format!("https://cdn.test/{tag}.jpg")),
    }
}

#[async_trait]
impl RenderBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn completion_model(&self) -> CompletionModel {
        CompletionModel::Polled {
            interval: self.interval,
        }
    }

    async fn submit(&self, spec: &JobSpec) -> Result<SubmitResult, BackendError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        let _op = self.begin_op();
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        let scripted = self
            .submit_script
            .lock()
            .unwrap()
            .get_mut(&spec.index)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(SubmitResult::pending(handle(spec.index))))
    }

    async fn poll_status(&self, backend_job_id: &str) -> Result<PollStatus, BackendError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let _op = self.begin_op();
        if !self.poll_delay.is_zero() {
            tokio::time::sleep(self.poll_delay).await;
        }
        let scripted = self
            .poll_script
            .lock()
            .unwrap()
            .get_mut(backend_job_id)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(self.default_poll.lock().unwrap().clone()))
    }

    async fn cancel(&self, backend_job_id: &str) -> Result<CancelOutcome, BackendError> {
        let _op = self.begin_op();
        tokio::task::yield_now().await;
        self.cancels
            .lock()
            .unwrap()
            .push(backend_job_id.to_string());
        Ok(CancelOutcome::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub orchestrator: Arc<JobOrchestrator>,
    pub repo: Arc<InMemoryBatchRepo>,
    pub events: Arc<EventBus>,
}

pub fn harness(backends: Vec<Arc<dyn RenderBackend>>) -> Harness {
    harness_with_config(backends, OrchestratorConfig::default())
}

pub fn harness_with_config(
    backends: Vec<Arc<dyn RenderBackend>>,
    config: OrchestratorConfig,
) -> Harness {
    let repo = Arc::new(InMemoryBatchRepo::new());
    let events = Arc::new(EventBus::default());
    let orchestrator = build_orchestrator(
        backends,
        Arc::clone(&repo) as Arc<dyn BatchRepository>,
        Arc::clone(&events),
        config,
    );
    Harness {
        orchestrator,
        repo,
        events,
    }
}

/// Orchestrator over the given backends and storage.
pub fn build_orchestrator(
    backends: Vec<Arc<dyn RenderBackend>>,
    repo: Arc<dyn BatchRepository>,
    events: Arc<EventBus>,
    config: OrchestratorConfig,
) -> Arc<JobOrchestrator> {
    let registry = backends
        .into_iter()
        .fold(BackendRegistry::new(), |registry, backend| registry.register(backend));
    Arc::new(JobOrchestrator::new(registry, repo, events, config))
}

/// Wait (in real or paused time) until `check` holds, up to ~1s of polling.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(check(), "condition not met in time");
}
