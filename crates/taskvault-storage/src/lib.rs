//! TaskVault Blob Storage Layer
//!
//! This crate stores cached task outputs as content-addressed blobs,
//! one file per digest, with staged writes that are placed atomically.

pub mod backend;
pub mod error;
pub mod local;

pub use backend::{BlobStore, validate_digest};
pub use error::StorageError;
pub use local::LocalStorage;
