//! Generation job lifecycle and status synchronization engine.
//!
//! Submits generation jobs to a remote service and keeps a consistent
//! local view of their state by merging three imperfectly synchronized
//! inputs: the creation response, a WebSocket push channel, and a
//! periodic full-listing poll. All three write through the job store's
//! monotone merge, so stale, duplicated or post-deletion messages cannot
//! move a job backwards.

pub mod api;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod messages;
pub mod poller;
pub mod processor;
pub mod push;
pub mod reconnect;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use engine::GenerationEngine;
pub use error::{EngineError, EngineResult};
pub use store::{JobStore, UpsertOutcome};
