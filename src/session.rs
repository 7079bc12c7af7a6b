use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{Backend, CommitProfile, SessionHandle};
use crate::driver::SessionConfig;
use crate::error::{UnitOfWorkError, combine};
use crate::retry::{RetryController, RetryDecision, RetrySettings};
use crate::segment::SegmentBuilder;
use crate::value::{Row, Value};

/// One unit of work bound to a backend handle.
///
/// A session is a series of related queries, optionally inside a
/// transaction. Transactional sessions enforce commit/rollback; calling
/// either on a non-transactional session fails fast. A session is meant for
/// one logical flow at a time; concurrent work should open independent
/// sessions through the driver.
///
/// Cloning a session is cheap and yields another handle onto the same unit
/// of work, which is how [`crate::Driver::run_transaction`] hands the session
/// to the body while retaining commit/rollback control.
pub struct Session<B: Backend> {
    inner: Arc<SessionInner<B>>,
}

impl<B: Backend> Clone for Session<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<B: Backend> {
    state: Mutex<SessionState<B::Handle>>,
    transactional: bool,
    read_only: bool,
    retry: RetrySettings,
    cancel: CancellationToken,
}

struct SessionState<H> {
    handle: H,
    committed: bool,
}

impl<B: Backend> Session<B> {
    pub(crate) fn new(handle: B::Handle, cfg: SessionConfig, cancel: CancellationToken) -> Self {
        let read_only = cfg.transaction.as_ref().is_some_and(|tx| tx.read_only);
        Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(SessionState {
                    handle,
                    committed: false,
                }),
                transactional: cfg.transaction.is_some(),
                read_only,
                retry: cfg.retry,
                cancel,
            }),
        }
    }

    /// Factory for segments scoped to this session's handle. May be called
    /// any number of times; every builder stamps out segments over the same
    /// handle.
    #[must_use]
    pub fn builder(&self) -> SegmentBuilder<B> {
        SegmentBuilder::new(self.clone())
    }

    #[must_use]
    pub fn is_transactional(&self) -> bool {
        self.inner.transactional
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    pub async fn is_committed(&self) -> bool {
        self.inner.state.lock().await.committed
    }

    /// Commit the unit of work.
    ///
    /// For lock-based backends this is a single commit call. For optimistic
    /// backends an aborted read-write commit is retried with the same
    /// transaction identity, bounded by the configured attempt budget with a
    /// strictly increasing backoff between attempts; the backoff sleep
    /// observes the session's cancellation token.
    ///
    /// # Errors
    /// - [`UnitOfWorkError::WithoutTransaction`] for non-transactional sessions.
    /// - [`UnitOfWorkError::AlreadyCommitted`] on a second commit.
    /// - [`UnitOfWorkError::Cancelled`] if cancellation fires during a backoff.
    /// - The backend's error otherwise, unchanged.
    pub async fn commit(&self) -> Result<(), UnitOfWorkError> {
        if !self.inner.transactional {
            return Err(UnitOfWorkError::WithoutTransaction {
                operation: "commit",
            });
        }

        let mut state = self.inner.state.lock().await;
        if state.committed {
            return Err(UnitOfWorkError::AlreadyCommitted);
        }
        self.check_cancelled()?;

        match state.handle.commit_profile() {
            CommitProfile::Terminal => {
                state.handle.commit().await?;
                state.committed = true;
                Ok(())
            }
            CommitProfile::OptimisticRetry => self.commit_with_retry(&mut state).await,
        }
    }

    async fn commit_with_retry(
        &self,
        state: &mut SessionState<B::Handle>,
    ) -> Result<(), UnitOfWorkError> {
        let mut controller = RetryController::new(self.inner.retry);
        loop {
            let err = match state.handle.commit().await {
                Ok(()) => {
                    state.committed = true;
                    return Ok(());
                }
                Err(err) => err,
            };

            // Read-only transactions never enter the retry loop.
            let decision = if self.inner.read_only {
                RetryDecision::Stop
            } else {
                controller.decide(&err)
            };

            match decision {
                RetryDecision::Retry { backoff } => {
                    debug!(
                        failed_attempts = controller.failed_attempts(),
                        backoff_ms = backoff.as_millis() as u64,
                        "commit aborted by contention, backing off before retry"
                    );
                    self.sleep(backoff).await?;
                    state.handle.prepare_retry().await?;
                }
                RetryDecision::Stop => {
                    // Policy: best-effort rollback, then return the original
                    // cause; the rollback's own failure is only logged.
                    if let Err(rollback_err) = state.handle.rollback().await {
                        warn!(
                            error = %rollback_err,
                            "rollback after failed commit also failed"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Roll back the unit of work.
    ///
    /// # Errors
    /// - [`UnitOfWorkError::WithoutTransaction`] for non-transactional sessions.
    /// - [`UnitOfWorkError::AlreadyCommitted`] after a successful commit, so a
    ///   stray rollback is observable instead of silently ignored.
    /// - The backend's error otherwise, unchanged.
    pub async fn rollback(&self) -> Result<(), UnitOfWorkError> {
        if !self.inner.transactional {
            return Err(UnitOfWorkError::WithoutTransaction {
                operation: "rollback",
            });
        }

        let mut state = self.inner.state.lock().await;
        if state.committed {
            return Err(UnitOfWorkError::AlreadyCommitted);
        }
        state.handle.rollback().await
    }

    /// Scoped-cleanup helper for deferred invocation at the end of a unit of
    /// work.
    ///
    /// If the session was never committed, the transaction is rolled back and
    /// the rollback's own error (if any) is returned. If the session was
    /// committed, `outcome` is consulted: a clean outcome skips rollback; an
    /// error triggers a best-effort rollback whose failure is chained onto
    /// the triggering error rather than discarded.
    ///
    /// # Errors
    /// The rollback error, the triggering error, or a chain of both.
    pub async fn watch_rollback<F>(&self, outcome: F) -> Result<(), UnitOfWorkError>
    where
        F: FnOnce() -> Result<(), UnitOfWorkError>,
    {
        let mut state = self.inner.state.lock().await;

        if !state.committed {
            if self.inner.transactional {
                return state.handle.rollback().await;
            }
            return Ok(());
        }

        match outcome() {
            Ok(()) => Ok(()),
            Err(cause) => {
                if !self.inner.transactional {
                    return Err(cause);
                }
                match state.handle.rollback().await {
                    Ok(()) => Err(cause),
                    Err(rollback_err) => Err(combine(cause, rollback_err)),
                }
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), UnitOfWorkError> {
        if self.inner.cancel.is_cancelled() {
            return Err(UnitOfWorkError::Cancelled);
        }
        Ok(())
    }

    async fn sleep(&self, backoff: Duration) -> Result<(), UnitOfWorkError> {
        tokio::select! {
            () = self.inner.cancel.cancelled() => Err(UnitOfWorkError::Cancelled),
            () = tokio::time::sleep(backoff) => Ok(()),
        }
    }

    pub(crate) async fn run_exec(
        &self,
        query: &str,
        params: &[Value],
    ) -> Result<u64, UnitOfWorkError> {
        self.check_cancelled()?;
        let mut state = self.inner.state.lock().await;
        state.handle.exec(query, params).await
    }

    pub(crate) async fn run_query_row(
        &self,
        query: &str,
        params: &[Value],
    ) -> Result<Row, UnitOfWorkError> {
        self.check_cancelled()?;
        let mut state = self.inner.state.lock().await;
        state.handle.query_row(query, params).await
    }

    pub(crate) async fn run_query(
        &self,
        query: &str,
        params: &[Value],
    ) -> Result<Vec<Row>, UnitOfWorkError> {
        self.check_cancelled()?;
        let mut state = self.inner.state.lock().await;
        state.handle.query(query, params).await
    }
}
