use std::sync::Arc;

use deadpool_postgres::Config as PgConfig;
use tokio_postgres::{Client, NoTls};
use tracing::warn;

use super::adapter::{PooledPostgres, SinglePostgres};
use crate::driver::Driver;
use crate::error::UnitOfWorkError;

/// Build a pooled Postgres driver from a deadpool configuration.
///
/// # Errors
/// Returns `UnitOfWorkError::ConfigError` if required config fields are
/// missing, or `UnitOfWorkError::ConnectionError` if pool creation fails.
/// Never panics on bad configuration.
#[allow(clippy::unused_async)]
pub async fn open_pool(pg_config: PgConfig) -> Result<Driver<PooledPostgres>, UnitOfWorkError> {
    // Validate all required config fields are present
    if pg_config.dbname.is_none() {
        return Err(UnitOfWorkError::ConfigError("dbname is required".to_string()));
    }
    if pg_config.host.is_none() {
        return Err(UnitOfWorkError::ConfigError("host is required".to_string()));
    }
    if pg_config.port.is_none() {
        return Err(UnitOfWorkError::ConfigError("port is required".to_string()));
    }
    if pg_config.user.is_none() {
        return Err(UnitOfWorkError::ConfigError("user is required".to_string()));
    }
    if pg_config.password.is_none() {
        return Err(UnitOfWorkError::ConfigError(
            "password is required".to_string(),
        ));
    }

    let pool = pg_config
        .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
        .map_err(|e| {
            UnitOfWorkError::ConnectionError(format!("failed to create Postgres pool: {e}"))
        })?;

    Ok(Driver::new(PooledPostgres::new(pool)))
}

/// Build a single-connection Postgres driver from a connection string.
///
/// The tokio-postgres connection task is spawned onto the current runtime;
/// it logs at warn level if it exits with an error.
///
/// # Errors
/// Surfaces the tokio-postgres connect error unchanged.
pub async fn open(dsn: &str) -> Result<Driver<SinglePostgres>, UnitOfWorkError> {
    let (client, connection) = tokio_postgres::connect(dsn, NoTls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            warn!(error = %err, "postgres connection task exited with error");
        }
    });

    Ok(Driver::new(SinglePostgres::new(Arc::new(client))))
}

/// Build a single-connection driver over a pre-existing client.
///
/// # Errors
/// Returns `UnitOfWorkError::ConnectionError` if the client is already
/// closed; an unusable connection is an error, never a panic.
pub fn open_with_client(client: Arc<Client>) -> Result<Driver<SinglePostgres>, UnitOfWorkError> {
    if client.is_closed() {
        return Err(UnitOfWorkError::ConnectionError(
            "connection is closed".to_string(),
        ));
    }
    Ok(Driver::new(SinglePostgres::new(client)))
}
