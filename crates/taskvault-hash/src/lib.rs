//! TaskVault Hash Engine
//!
//! This crate computes the content digests that key the TaskVault cache,
//! for byte buffers, single files and whole directory trees.

pub mod engine;
pub mod error;

pub use engine::{HashAlgorithm, HashEngine};
pub use error::HashError;
