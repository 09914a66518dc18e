//! Domain types for the cadenza generation engine.
//!
//! Holds the job record model, the monotone-merge rule that decides
//! whether an update may be applied, generation request parameters with
//! their validators, and the shared [`error::CoreError`].

pub mod error;
pub mod job;
pub mod request;
pub mod types;
