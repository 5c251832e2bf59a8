//! Shared domain types for the docpipe job pipeline.
//!
//! Everything in this crate is pure (no database, no network) so it can be
//! used by the store, the executor and the delivery layer alike.

pub mod error;
pub mod job;
pub mod job_events;
pub mod outputs;
pub mod progress;
pub mod types;
