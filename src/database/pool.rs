//! # Connection Pool
//!
//! Bounded Postgres connection pool for single statements and
//! multi-statement transactions, with health and utilization reporting for
//! the degradation layer to consume.
//!
//! [`ConnectionPool::run_in_transaction`] is the only place a connection is
//! held across multiple statements; all loyalty balance mutations go through
//! it so concurrent requests serialize on database row locks, never in
//! application memory.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, info, warn};

use crate::error::DatabaseError;

/// Pool construction and timeout settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabasePoolConfig {
    /// Postgres connection URL
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default)]
    pub min_connections: u32,

    /// How long to wait for a free connection before failing
    #[serde(default = "default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,

    /// Per-statement timeout
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Whole-transaction timeout (BEGIN through COMMIT)
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_seconds() -> u64 {
    30
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

fn default_transaction_timeout_ms() -> u64 {
    15_000
}

/// Pool utilization counters for the health/status surface.
///
/// sqlx exposes no count of tasks waiting on acquire, so there is no
/// `waiting` counter here; `utilization` approaching 1.0 is the saturation
/// signal instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections currently open (idle + active)
    pub size: u32,
    pub idle: u32,
    pub active: u32,
    pub max_connections: u32,
    /// Active connections as a fraction of the maximum (0.0 to 1.0)
    pub utilization: f64,
}

/// Result of a pool health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolHealth {
    pub healthy: bool,
    pub stats: PoolStats,
    pub check_duration_ms: u64,
    pub error: Option<String>,
}

/// Bounded Postgres pool with timed statements and atomic transactions.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    pool: PgPool,
    max_connections: u32,
    query_timeout: Duration,
    transaction_timeout: Duration,
}

impl ConnectionPool {
    /// Open a pool against the configured database.
    pub async fn connect(config: &DatabasePoolConfig) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            acquire_timeout_s = config.acquire_timeout_seconds,
            "Database connection pool established"
        );

        Ok(Self::from_pool(pool, config))
    }

    /// Wrap an existing pool (test fixtures, shared application pools).
    pub fn from_pool(pool: PgPool, config: &DatabasePoolConfig) -> Self {
        Self {
            pool,
            max_connections: config.max_connections,
            query_timeout: Duration::from_millis(config.query_timeout_ms),
            transaction_timeout: Duration::from_millis(config.transaction_timeout_ms),
        }
    }

    /// The underlying sqlx pool, for collaborators that manage their own
    /// statement lifecycle.
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    /// Execute a single statement with the pool's statement timeout,
    /// returning the number of affected rows. Driver and timeout failures
    /// surface to the caller; nothing is swallowed here.
    pub async fn execute(
        &self,
        query: Query<'_, Postgres, PgArguments>,
    ) -> Result<u64, DatabaseError> {
        match tokio::time::timeout(self.query_timeout, query.execute(&self.pool)).await {
            Ok(result) => Ok(result?.rows_affected()),
            Err(_) => Err(self.query_timeout_error()),
        }
    }

    /// Fetch exactly one row with the pool's statement timeout.
    pub async fn fetch_one(
        &self,
        query: Query<'_, Postgres, PgArguments>,
    ) -> Result<PgRow, DatabaseError> {
        match tokio::time::timeout(self.query_timeout, query.fetch_one(&self.pool)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(self.query_timeout_error()),
        }
    }

    /// Fetch all rows with the pool's statement timeout.
    pub async fn fetch_all(
        &self,
        query: Query<'_, Postgres, PgArguments>,
    ) -> Result<Vec<PgRow>, DatabaseError> {
        match tokio::time::timeout(self.query_timeout, query.fetch_all(&self.pool)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(self.query_timeout_error()),
        }
    }

    /// Fetch at most one row with the pool's statement timeout.
    pub async fn fetch_optional(
        &self,
        query: Query<'_, Postgres, PgArguments>,
    ) -> Result<Option<PgRow>, DatabaseError> {
        match tokio::time::timeout(self.query_timeout, query.fetch_optional(&self.pool)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(self.query_timeout_error()),
        }
    }

    /// Run `f` inside a database transaction: BEGIN, invoke the closure,
    /// COMMIT on success, ROLLBACK on any error. The whole unit is bounded by
    /// the transaction timeout; a timed-out transaction is rolled back when
    /// the connection drops.
    pub async fn run_in_transaction<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        T: Send,
        F: for<'t> FnOnce(
                &'t mut Transaction<'static, Postgres>,
            ) -> BoxFuture<'t, Result<T, DatabaseError>>
            + Send,
    {
        let run = async {
            let mut tx = self.pool.begin().await?;
            match f(&mut tx).await {
                Ok(value) => {
                    tx.commit().await?;
                    Ok(value)
                }
                Err(e) => {
                    debug!(error = %e, "Rolling back transaction");
                    if let Err(rollback_error) = tx.rollback().await {
                        warn!(error = %rollback_error, "Transaction rollback failed");
                    }
                    Err(e)
                }
            }
        };

        match tokio::time::timeout(self.transaction_timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = self.transaction_timeout.as_millis() as u64,
                    "Transaction timed out; connection dropped for rollback"
                );
                Err(DatabaseError::TransactionTimeout {
                    timeout_ms: self.transaction_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Current pool utilization counters.
    pub fn stats(&self) -> PoolStats {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        let active = size.saturating_sub(idle);
        PoolStats {
            size,
            idle,
            active,
            max_connections: self.max_connections,
            utilization: if self.max_connections > 0 {
                f64::from(active) / f64::from(self.max_connections)
            } else {
                0.0
            },
        }
    }

    /// Lightweight connectivity check (`SELECT 1`) combined with pool
    /// utilization. Used by degradation wiring and health endpoints to judge
    /// database health independent of breaker state.
    pub async fn health_check(&self) -> PoolHealth {
        let start = Instant::now();
        let result =
            tokio::time::timeout(self.query_timeout, sqlx::query("SELECT 1").execute(&self.pool))
                .await;
        let check_duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_)) => {
                debug!(duration_ms = check_duration_ms, "Database health check successful");
                PoolHealth {
                    healthy: true,
                    stats: self.stats(),
                    check_duration_ms,
                    error: None,
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, duration_ms = check_duration_ms, "Database health check failed");
                PoolHealth {
                    healthy: false,
                    stats: self.stats(),
                    check_duration_ms,
                    error: Some(e.to_string()),
                }
            }
            Err(_) => {
                error!(
                    timeout_ms = self.query_timeout.as_millis() as u64,
                    "Database health check timed out"
                );
                PoolHealth {
                    healthy: false,
                    stats: self.stats(),
                    check_duration_ms,
                    error: Some(format!(
                        "health check timed out after {}ms",
                        self.query_timeout.as_millis()
                    )),
                }
            }
        }
    }

    fn query_timeout_error(&self) -> DatabaseError {
        DatabaseError::QueryTimeout {
            timeout_ms: self.query_timeout.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DatabasePoolConfig {
        toml::from_str(r#"url = "postgres://localhost/retail""#).expect("minimal config")
    }

    #[test]
    fn test_config_defaults() {
        let config = config();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 0);
        assert_eq!(config.acquire_timeout_seconds, 30);
        assert_eq!(config.query_timeout_ms, 5_000);
        assert_eq!(config.transaction_timeout_ms, 15_000);
    }

    #[test]
    fn test_pool_stats_utilization() {
        let stats = PoolStats {
            size: 8,
            idle: 3,
            active: 5,
            max_connections: 10,
            utilization: 0.5,
        };
        assert_eq!(stats.active, stats.size - stats.idle);
        assert!((stats.utilization - 0.5).abs() < f64::EPSILON);
    }
}
