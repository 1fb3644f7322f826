//! Render backend adapters.
//!
//! Every backend implements [`RenderBackend`], a uniform submit / poll /
//! cancel contract over engines with different completion models:
//!
//! - [`SimulatedBackend`] resolves jobs on submit after a delay, with no
//!   external call (previews and tests).
//! - [`RenderFarmBackend`] queues jobs on an external render farm over
//!   HTTP and must be polled until they finish.
//!
//! [`BackendRegistry`] routes each job to a backend by its `engine`
//! dimension.

pub mod backend;
pub mod backoff;
pub mod registry;
pub mod render_farm;
pub mod simulated;

pub use backend::{
    BackendError, CancelOutcome, CompletionModel, PollStatus, RenderBackend, SubmitResult,
};
pub use registry::{BackendRegistry, RegistryError};
pub use render_farm::{RenderFarmBackend, RenderFarmConfig};
pub use simulated::{SimulatedBackend, SimulatedConfig, SimulatedDelay};
