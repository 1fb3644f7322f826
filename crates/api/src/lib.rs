//! ReelForge control API library.
//!
//! Exposes config, state, error handling, the router and the backend
//! wiring so integration tests and the binary entrypoint share them.

pub mod backends;
pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
