//! PostgreSQL backend for cartcore.
//!
//! [`PostgresCartStore`] implements every cartcore repository trait on top of
//! a `sqlx` connection pool. Each trait call runs in its own transaction:
//!
//! - cart writes take a `FOR SHARE` lock on the referenced products, so a
//!   product cannot disappear between the existence check and the commit
//! - a product removal takes `FOR UPDATE` on the product and on every planned
//!   order before re-checking the plan, then applies the whole cascade
//! - the one-cart-per-user rule is a partial unique index, surfaced as
//!   [`StoreError::UniqueViolation`]
//!
//! Run [`PostgresCartStore::migrate`] once before first use.

mod rows;
mod store;

use std::time::Duration;

use cartcore::StoreError;
use nutype::nutype;
use sqlx::{postgres::PgPoolOptions, query, Pool, Postgres};
use thiserror::Error;
use tracing::{error, warn};

/// Errors raised while setting up a [`PostgresCartStore`].
#[derive(Debug, Error)]
pub enum PostgresError {
    /// The connection pool could not be created.
    #[error("failed to create postgres connection pool")]
    ConnectionFailed(#[source] sqlx::Error),

    /// The schema migrations failed.
    #[error("failed to run cartcore migrations")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    /// The database did not answer a ping.
    #[error("postgres ping failed")]
    PingFailed(#[source] sqlx::Error),
}

/// Maximum number of database connections in the pool.
///
/// Must be at least 1, enforced by using `NonZeroU32` as the underlying type.
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(std::num::NonZeroU32);

/// Configuration for the [`PostgresCartStore`] connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 30 seconds)
    pub acquire_timeout: Duration,
    /// Idle timeout for connections in the pool (default: 10 minutes)
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: std::num::NonZeroU32 = match std::num::NonZeroU32::new(10) {
            Some(v) => v,
            None => unreachable!(),
        };

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Cart store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresCartStore {
    pool: Pool<Postgres>,
}

impl PostgresCartStore {
    /// Connects with the default configuration.
    pub async fn new<S: Into<String>>(connection_string: S) -> Result<Self, PostgresError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Connects with a custom pool configuration.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresError> {
        let connection_string = connection_string.into();
        let max_connections: std::num::NonZeroU32 = config.max_connections.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&connection_string)
            .await
            .map_err(PostgresError::ConnectionFailed)?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    ///
    /// Use this to share a pool with other components.
    pub const fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Checks that the database answers.
    pub async fn ping(&self) -> Result<(), PostgresError> {
        query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(PostgresError::PingFailed)
    }

    /// Creates or upgrades the cartcore tables.
    pub async fn migrate(&self) -> Result<(), PostgresError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(PostgresError::MigrationFailed)
    }
}

/// Postgres error codes that mean "try again".
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

/// Translates a driver error into the store taxonomy.
///
/// Unique violations keep the constraint message; serialization failures,
/// deadlocks and connection-level failures become retryable
/// [`StoreError::StoreFailure`]s.
pub(crate) fn map_sqlx_error(error: sqlx::Error, operation: &'static str) -> StoreError {
    match &error {
        sqlx::Error::Database(db_error) => match db_error.code().as_deref() {
            Some(UNIQUE_VIOLATION) => {
                warn!(
                    error = %db_error,
                    operation,
                    "[postgres.unique_violation] constraint rejected write"
                );
                return StoreError::UniqueViolation(db_error.message().to_string());
            }
            Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED) => {
                warn!(
                    error = %db_error,
                    operation,
                    "[postgres.transient] transaction aborted by the database"
                );
                return StoreError::StoreFailure { operation };
            }
            _ => {}
        },
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            warn!(error = %error, operation, "[postgres.connection] connection failure");
            return StoreError::StoreFailure { operation };
        }
        _ => {}
    }

    error!(
        error = %error,
        operation,
        "[postgres.database_error] database operation failed"
    );
    StoreError::Database(error.to_string())
}
