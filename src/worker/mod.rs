//! Per-repo worker system for running reviews.
//!
//! Each repository gets a dedicated worker that runs its reviews serially,
//! so two reviews never share a clone directory, while different
//! repositories are reviewed concurrently.
//!
//! # Module Structure
//!
//! - [`dispatch`]: trigger filtering and routing to workers
//! - [`worker`]: the per-repo event loop and unit supervision
//! - [`message`]: worker message types

pub mod dispatch;
pub mod message;
pub mod worker;

pub use dispatch::{DispatchError, Disposition, ReviewDispatcher, SkipReason, classify};
pub use message::{ReviewJob, WorkerMessage};
pub use worker::{RepoWorker, UnitOutcome};
