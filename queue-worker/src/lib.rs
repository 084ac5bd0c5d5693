//! The worker side of queuectl: a single-process loop that leases jobs from
//! the shared store, runs their shell commands, and records the outcomes.

pub mod config;
pub mod error;
pub mod executor;
pub mod worker;

pub use config::WorkerSettings;
pub use error::WorkerError;
pub use worker::{shutdown_on_signal, Worker};
