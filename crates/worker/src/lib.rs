//! Job execution for docpipe.
//!
//! [`Executor`] runs a fixed pool of worker slots that claim queued jobs from
//! the store, launch each job's external process under supervision, turn its
//! output into progress events and record the terminal outcome.

pub mod config;
pub mod executor;
pub mod process;

pub use config::WorkerConfig;
pub use executor::Executor;
pub use process::ExecutionError;
