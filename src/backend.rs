use async_trait::async_trait;

use crate::driver::SessionConfig;
use crate::error::UnitOfWorkError;
use crate::value::{Row, Value};

/// How a backend's commit behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitProfile {
    /// Lock-based stores: one commit call, succeed or fail, never retried
    /// at this layer.
    Terminal,
    /// Optimistic-concurrency stores: commit may report
    /// [`UnitOfWorkError::Aborted`] on conflict and is retried with the same
    /// transaction identity.
    OptimisticRetry,
}

/// The contract a backend adapter offers to this crate.
///
/// A backend owns the shared connection object (a pool, a single connection,
/// or a store client). It is the only thing safe for concurrent acquisition;
/// the handles it produces are used sequentially by one session each.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Handle: SessionHandle + 'static;

    /// Establish a handle for one unit of work. If `cfg` requests a
    /// transaction, the handle must have an open transaction when this
    /// returns; on failure no handle is produced and the error is surfaced
    /// verbatim.
    async fn begin(&self, cfg: &SessionConfig) -> Result<Self::Handle, UnitOfWorkError>;

    /// Verify connectivity.
    async fn ping(&self) -> Result<(), UnitOfWorkError>;

    /// Release the underlying connection object.
    async fn close(&self) -> Result<(), UnitOfWorkError>;
}

/// Execution surface of one session's backend handle.
///
/// All statement ordering within a session is the order of calls on this
/// handle. `commit` and `rollback` are only invoked by the session after its
/// own transactional/committed guards have passed.
#[async_trait]
pub trait SessionHandle: Send {
    /// Run a statement and return the affected count. Buffered-write
    /// backends stage the write instead of performing I/O.
    async fn exec(&mut self, query: &str, params: &[Value]) -> Result<u64, UnitOfWorkError>;

    /// Run a query expected to produce exactly one row.
    async fn query_row(&mut self, query: &str, params: &[Value]) -> Result<Row, UnitOfWorkError>;

    /// Run a query and return all rows.
    async fn query(&mut self, query: &str, params: &[Value])
    -> Result<Vec<Row>, UnitOfWorkError>;

    /// Commit the open transaction. Optimistic backends report conflicts as
    /// [`UnitOfWorkError::Aborted`]; everything else is terminal.
    async fn commit(&mut self) -> Result<(), UnitOfWorkError>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<(), UnitOfWorkError>;

    /// Commit behavior of this handle; [`CommitProfile::Terminal`] unless the
    /// backend overrides it.
    fn commit_profile(&self) -> CommitProfile {
        CommitProfile::Terminal
    }

    /// Prepare the handle for another commit attempt after an abort: set up
    /// the retry linkage on the first retry and discard writes staged for the
    /// aborted attempt. No-op for terminal backends.
    async fn prepare_retry(&mut self) -> Result<(), UnitOfWorkError> {
        Ok(())
    }
}
