use std::sync::Arc;

use async_trait::async_trait;
use tokio_postgres::Client;

use super::params::Params;
use super::query::{row_from_postgres, rows_from_postgres};
use crate::backend::{Backend, SessionHandle};
use crate::driver::{SessionConfig, TxSettings};
use crate::error::UnitOfWorkError;
use crate::value::{Row, Value};

enum PgConn {
    Single(Arc<Client>),
    Pooled(deadpool_postgres::Object),
}

impl PgConn {
    fn client(&self) -> &Client {
        match self {
            PgConn::Single(client) => client,
            PgConn::Pooled(object) => object,
        }
    }
}

/// Session handle over one Postgres connection, transactional or not.
///
/// Transactions are driven with explicit `BEGIN`/`COMMIT`/`ROLLBACK`
/// statements so the handle can own its connection for the whole session.
pub struct PostgresHandle {
    conn: PgConn,
    in_tx: bool,
}

impl PostgresHandle {
    async fn begin_if_requested(
        conn: PgConn,
        cfg: &SessionConfig,
    ) -> Result<Self, UnitOfWorkError> {
        let mut handle = Self { conn, in_tx: false };
        if let Some(tx) = &cfg.transaction {
            handle
                .conn
                .client()
                .batch_execute(&begin_statement(tx))
                .await?;
            handle.in_tx = true;
        }
        Ok(handle)
    }
}

fn begin_statement(tx: &TxSettings) -> String {
    let mut stmt = String::from("BEGIN");
    if let Some(level) = tx.isolation {
        stmt.push_str(" ISOLATION LEVEL ");
        stmt.push_str(level.as_sql());
    }
    if tx.read_only {
        stmt.push_str(" READ ONLY");
    }
    if tx.deferrable {
        stmt.push_str(" DEFERRABLE");
    }
    stmt
}

#[async_trait]
impl SessionHandle for PostgresHandle {
    async fn exec(&mut self, query: &str, params: &[Value]) -> Result<u64, UnitOfWorkError> {
        let converted = Params::convert(params)?;
        let rows = self
            .conn
            .client()
            .execute(query, converted.as_refs())
            .await?;
        Ok(rows)
    }

    async fn query_row(&mut self, query: &str, params: &[Value]) -> Result<Row, UnitOfWorkError> {
        let converted = Params::convert(params)?;
        let row = self
            .conn
            .client()
            .query_one(query, converted.as_refs())
            .await?;
        row_from_postgres(&row)
    }

    async fn query(
        &mut self,
        query: &str,
        params: &[Value],
    ) -> Result<Vec<Row>, UnitOfWorkError> {
        let converted = Params::convert(params)?;
        let rows = self.conn.client().query(query, converted.as_refs()).await?;
        rows_from_postgres(&rows)
    }

    async fn commit(&mut self) -> Result<(), UnitOfWorkError> {
        if !self.in_tx {
            return Err(UnitOfWorkError::WithoutTransaction {
                operation: "commit",
            });
        }
        self.conn.client().batch_execute("COMMIT").await?;
        self.in_tx = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), UnitOfWorkError> {
        if !self.in_tx {
            return Err(UnitOfWorkError::WithoutTransaction {
                operation: "rollback",
            });
        }
        self.conn.client().batch_execute("ROLLBACK").await?;
        self.in_tx = false;
        Ok(())
    }
}

/// Single-connection relational variant. Sessions share the one connection,
/// so only one transactional session should be active at a time.
pub struct SinglePostgres {
    client: Arc<Client>,
}

impl SinglePostgres {
    pub(crate) fn new(client: Arc<Client>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Backend for SinglePostgres {
    type Handle = PostgresHandle;

    async fn begin(&self, cfg: &SessionConfig) -> Result<Self::Handle, UnitOfWorkError> {
        PostgresHandle::begin_if_requested(PgConn::Single(Arc::clone(&self.client)), cfg).await
    }

    async fn ping(&self) -> Result<(), UnitOfWorkError> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }

    // The connection closes when the last clone of the client drops; there
    // is no explicit close call in tokio-postgres.
    async fn close(&self) -> Result<(), UnitOfWorkError> {
        Ok(())
    }
}

/// Pooled relational variant over deadpool-postgres. Each session checks a
/// connection out of the pool for its lifetime; the pool itself is the
/// concurrency-safe object.
pub struct PooledPostgres {
    pool: deadpool_postgres::Pool,
}

impl PooledPostgres {
    pub(crate) fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Backend for PooledPostgres {
    type Handle = PostgresHandle;

    async fn begin(&self, cfg: &SessionConfig) -> Result<Self::Handle, UnitOfWorkError> {
        let object = self.pool.get().await?;
        PostgresHandle::begin_if_requested(PgConn::Pooled(object), cfg).await
    }

    async fn ping(&self) -> Result<(), UnitOfWorkError> {
        let object = self.pool.get().await?;
        object.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), UnitOfWorkError> {
        self.pool.close();
        Ok(())
    }
}
