//! ReelForge event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`BatchEvent`]: the envelope for job and batch lifecycle changes.

pub mod bus;

pub use bus::{BatchEvent, EventBus};
