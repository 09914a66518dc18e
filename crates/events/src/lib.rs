//! Change notifications for the cadenza job store.
//!
//! The job store publishes a [`JobChanged`] on an [`EventBus`] for every
//! mutation it accepts; consumers subscribe to follow progress without
//! polling the store.

pub mod bus;

pub use bus::{EventBus, JobChanged};
