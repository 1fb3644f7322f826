//! Batch execution: the job orchestrator and the polling scheduler that
//! drives it.
//!
//! [`JobOrchestrator`] owns every live batch and applies lifecycle
//! transitions; [`PollingScheduler`] periodically refreshes the batches
//! that still have work outstanding.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod scheduler;

pub use config::{OrchestratorConfig, SchedulerConfig};
pub use error::OrchestratorError;
pub use orchestrator::{JobOrchestrator, PollPlan, RefreshReport};
pub use scheduler::PollingScheduler;
