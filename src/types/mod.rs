//! Core domain types shared by the edge and internal nodes.

pub mod ids;

pub use ids::{PrNumber, RepoName, Sha};
