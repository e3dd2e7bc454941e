//! # Database Layer
//!
//! Connection pooling, transaction execution, and embedded migrations for
//! the loyalty schema.

pub mod pool;

pub use pool::{ConnectionPool, DatabasePoolConfig, PoolHealth, PoolStats};

/// Embedded migrations for the loyalty schema (`migrations/`).
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
