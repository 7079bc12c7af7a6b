//! Optimistic-concurrency document-store backend.
//!
//! The store itself is an external collaborator behind [`DocumentStore`];
//! this module contributes the session semantics layered on top: staged
//! writes that flush exactly once at commit, the abort/retry commit profile,
//! and the retry linkage that lets the store recognize a repeated attempt.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::backend::{Backend, CommitProfile, SessionHandle};
use crate::driver::{Driver, SessionConfig};
use crate::error::UnitOfWorkError;
use crate::value::{Row, Value};

/// Opaque transaction identity issued by the store.
pub type TransactionId = Vec<u8>;

/// A write staged in the session's buffer until commit.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedWrite {
    Put {
        collection: String,
        id: String,
        document: JsonValue,
    },
    Delete {
        collection: String,
        id: String,
    },
}

/// Contract required from a document-store adapter.
///
/// `commit` may fail with [`UnitOfWorkError::Aborted`] when a conflicting
/// concurrent transaction won; the session retries such commits with the
/// same transaction identity, passing `retry_of` from the second attempt on
/// so the store's conflict resolution can recognize the repeat.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn begin_transaction(
        &self,
        read_only: bool,
    ) -> Result<TransactionId, UnitOfWorkError>;

    async fn commit(
        &self,
        txn: &TransactionId,
        retry_of: Option<&TransactionId>,
        writes: &[StagedWrite],
    ) -> Result<(), UnitOfWorkError>;

    async fn rollback(&self, txn: &TransactionId) -> Result<(), UnitOfWorkError>;

    /// Fetch one document by id, inside the transaction when given.
    async fn get(
        &self,
        txn: Option<&TransactionId>,
        collection: &str,
        id: &str,
    ) -> Result<Row, UnitOfWorkError>;

    /// Run a filtered scan over a collection.
    async fn query(
        &self,
        txn: Option<&TransactionId>,
        collection: &str,
        filter: &[Value],
    ) -> Result<Vec<Row>, UnitOfWorkError>;

    /// Apply writes immediately, outside any transaction.
    async fn apply(&self, writes: &[StagedWrite]) -> Result<(), UnitOfWorkError>;

    async fn ping(&self) -> Result<(), UnitOfWorkError>;

    async fn close(&self) -> Result<(), UnitOfWorkError>;
}

/// Build a driver over a document store.
pub fn open<S: DocumentStore>(store: S) -> Driver<DocumentBackend<S>> {
    Driver::new(DocumentBackend {
        store: Arc::new(store),
    })
}

/// Optimistic document-store variant of the backend contract.
pub struct DocumentBackend<S: DocumentStore> {
    store: Arc<S>,
}

#[async_trait]
impl<S: DocumentStore> Backend for DocumentBackend<S> {
    type Handle = DocumentHandle<S>;

    async fn begin(&self, cfg: &SessionConfig) -> Result<Self::Handle, UnitOfWorkError> {
        let mut handle = DocumentHandle {
            store: Arc::clone(&self.store),
            txn: None,
            retry_of: None,
            staged: Vec::new(),
        };
        if let Some(tx) = &cfg.transaction {
            handle.txn = Some(self.store.begin_transaction(tx.read_only).await?);
        }
        Ok(handle)
    }

    async fn ping(&self) -> Result<(), UnitOfWorkError> {
        self.store.ping().await
    }

    async fn close(&self) -> Result<(), UnitOfWorkError> {
        self.store.close().await
    }
}

/// Session handle over one document-store transaction.
///
/// Transactional writes are staged in order and flushed exactly once at
/// commit; non-transactional writes apply immediately. Reads map the segment
/// query text to a collection name: `query_row` takes a document id
/// argument, `query` passes its arguments through as the store's filter.
pub struct DocumentHandle<S: DocumentStore> {
    store: Arc<S>,
    txn: Option<TransactionId>,
    retry_of: Option<TransactionId>,
    staged: Vec<StagedWrite>,
}

impl<S: DocumentStore> DocumentHandle<S> {
    fn staged_write(collection: &str, params: &[Value]) -> Result<StagedWrite, UnitOfWorkError> {
        let id = params
            .first()
            .and_then(Value::as_text)
            .ok_or_else(|| {
                UnitOfWorkError::ParameterError(
                    "document write requires a text id as its first argument".to_string(),
                )
            })?
            .to_string();

        match params.get(1) {
            Some(Value::Json(document)) => Ok(StagedWrite::Put {
                collection: collection.to_string(),
                id,
                document: document.clone(),
            }),
            None => Ok(StagedWrite::Delete {
                collection: collection.to_string(),
                id,
            }),
            Some(other) => Err(UnitOfWorkError::ParameterError(format!(
                "document write payload must be a JSON value, got {other:?}"
            ))),
        }
    }
}

#[async_trait]
impl<S: DocumentStore> SessionHandle for DocumentHandle<S> {
    async fn exec(&mut self, query: &str, params: &[Value]) -> Result<u64, UnitOfWorkError> {
        let write = Self::staged_write(query, params)?;
        if self.txn.is_some() {
            self.staged.push(write);
        } else {
            self.store.apply(std::slice::from_ref(&write)).await?;
        }
        Ok(1)
    }

    async fn query_row(&mut self, query: &str, params: &[Value]) -> Result<Row, UnitOfWorkError> {
        let id = params.first().and_then(Value::as_text).ok_or_else(|| {
            UnitOfWorkError::ParameterError(
                "document lookup requires a text id as its first argument".to_string(),
            )
        })?;
        self.store.get(self.txn.as_ref(), query, id).await
    }

    async fn query(
        &mut self,
        query: &str,
        params: &[Value],
    ) -> Result<Vec<Row>, UnitOfWorkError> {
        self.store.query(self.txn.as_ref(), query, params).await
    }

    async fn commit(&mut self) -> Result<(), UnitOfWorkError> {
        let txn = self.txn.as_ref().ok_or(UnitOfWorkError::WithoutTransaction {
            operation: "commit",
        })?;
        self.store
            .commit(txn, self.retry_of.as_ref(), &self.staged)
            .await?;
        self.staged.clear();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), UnitOfWorkError> {
        let txn = self.txn.as_ref().ok_or(UnitOfWorkError::WithoutTransaction {
            operation: "rollback",
        })?;
        self.store.rollback(txn).await
    }

    fn commit_profile(&self) -> CommitProfile {
        CommitProfile::OptimisticRetry
    }

    // The linkage is created on the first retry only and reused afterwards,
    // so every attempt after the first references the original identity.
    async fn prepare_retry(&mut self) -> Result<(), UnitOfWorkError> {
        if self.retry_of.is_none() {
            self.retry_of = self.txn.clone();
        }
        self.staged.clear();
        Ok(())
    }
}
