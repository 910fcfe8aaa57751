//! TaskVault Index Layer
//!
//! This crate provides the persisted index of cache entries,
//! using SQLite via sqlx.

pub mod error;
pub mod models;
pub mod repository;
pub mod utils;

pub use error::DbError;
pub use models::*;
pub use repository::{Database, IndexStats};

/// Re-export sqlx types for convenience
pub use sqlx::SqlitePool;
