//! Convenient imports for common functionality.
//!
//! Re-exports the types and functions most callers need to get started.

pub use crate::backend::{Backend, CommitProfile, SessionHandle};
pub use crate::driver::{
    Driver, IsolationLevel, SessionConfig, SessionOption, TxSettings, commit_backoff, isolation,
    max_commit_attempts, read_only, with_transaction, with_tx_settings, without_transaction,
};
pub use crate::error::{ErrorChain, ErrorKind, UnitOfWorkError};
pub use crate::handler::{BoxedHandler, execute, execute_many, handler};
pub use crate::segment::{Segment, SegmentBuilder};
pub use crate::session::Session;
pub use crate::value::{Row, Value};

pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "postgres")]
pub use crate::postgres::{PooledPostgres, SinglePostgres};

pub use crate::document::{DocumentBackend, DocumentStore, StagedWrite, TransactionId};
