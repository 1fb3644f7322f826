//! Domain model and pure logic for batch video generation.
//!
//! Zero internal dependencies: everything here is usable from the
//! repository layer, the orchestrator, and the HTTP surface alike.

pub mod batch;
pub mod error;
pub mod estimation;
pub mod job;
pub mod job_events;
pub mod progress;
pub mod types;
pub mod variation;
