//! The review path on the internal node.
//!
//! A review is one orchestration unit: produce a working directory holding
//! the pull request's head commit ([`materialize`]), then run the external
//! review tool in it ([`invoke`]). [`pipeline`] chains the two. Every
//! process goes through the [`command::CommandRunner`] seam.

pub mod command;
pub mod invoke;
pub mod materialize;
pub mod pipeline;
pub mod prompt;

pub use command::{CommandError, CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use invoke::{InvocationOutcome, ReviewInvoker};
pub use materialize::{
    CheckoutState, MaterializeError, RepoMaterializer, RepoWorkspace, WorkspaceOrigin,
};
pub use pipeline::{ReviewError, ReviewPipeline};
pub use prompt::{PromptError, PromptTemplate, PromptValues};
