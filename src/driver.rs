use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::backend::Backend;
use crate::error::UnitOfWorkError;
use crate::retry::RetrySettings;
use crate::session::Session;

/// Transaction settings for a session, the lock-based analogue of pgx-style
/// begin options. For optimistic backends only `read_only` is meaningful.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxSettings {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
    pub deferrable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Effective configuration snapshot for one session.
///
/// Driver defaults are cloned and the per-call options are applied on top, so
/// options layered onto `begin` never mutate the driver.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// `Some` makes the session transactional and enforces commit/rollback.
    pub transaction: Option<TxSettings>,
    /// Bounds for the optimistic commit retry loop.
    pub retry: RetrySettings,
}

/// A small configuration mutator. Options are applied in order, so a later
/// option overrides an earlier one.
pub struct SessionOption(Box<dyn FnOnce(&mut SessionConfig) + Send>);

impl SessionOption {
    pub fn apply(self, cfg: &mut SessionConfig) {
        (self.0)(cfg);
    }

    fn new(f: impl FnOnce(&mut SessionConfig) + Send + 'static) -> Self {
        Self(Box::new(f))
    }
}

impl std::fmt::Debug for SessionOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionOption").finish()
    }
}

/// Make the session transactional with default settings.
#[must_use]
pub fn with_transaction() -> SessionOption {
    SessionOption::new(|cfg| cfg.transaction = Some(TxSettings::default()))
}

/// Make the session transactional with explicit settings.
#[must_use]
pub fn with_tx_settings(settings: TxSettings) -> SessionOption {
    SessionOption::new(move |cfg| cfg.transaction = Some(settings))
}

/// Make the session non-transactional; commit and rollback will fail fast.
#[must_use]
pub fn without_transaction() -> SessionOption {
    SessionOption::new(|cfg| cfg.transaction = None)
}

/// Mark the transaction read-only. Implies a transaction.
#[must_use]
pub fn read_only() -> SessionOption {
    SessionOption::new(|cfg| {
        cfg.transaction.get_or_insert_with(TxSettings::default).read_only = true;
    })
}

/// Set the transaction isolation level. Implies a transaction.
#[must_use]
pub fn isolation(level: IsolationLevel) -> SessionOption {
    SessionOption::new(move |cfg| {
        cfg.transaction.get_or_insert_with(TxSettings::default).isolation = Some(level);
    })
}

/// Cap the optimistic commit attempt budget (minimum one attempt).
#[must_use]
pub fn max_commit_attempts(attempts: u32) -> SessionOption {
    SessionOption::new(move |cfg| cfg.retry.max_attempts = attempts.max(1))
}

/// Tune the commit retry backoff window. A zero `initial` is clamped to one
/// millisecond; the backoff must keep growing attempt over attempt, and zero
/// never grows under a multiplier.
#[must_use]
pub fn commit_backoff(initial: Duration, max: Duration) -> SessionOption {
    SessionOption::new(move |cfg| {
        let initial = initial.max(Duration::from_millis(1));
        cfg.retry.initial_backoff = initial;
        cfg.retry.max_backoff = max.max(initial);
    })
}

/// Factory and capability surface over one backend.
///
/// The driver holds the shared connection object (pool, connection, or store
/// client) and the default session configuration. It is cheap to clone and
/// safe to share; the sessions it produces are not.
#[derive(Debug)]
pub struct Driver<B: Backend> {
    backend: Arc<B>,
    defaults: SessionConfig,
}

impl<B: Backend> Clone for Driver<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            defaults: self.defaults.clone(),
        }
    }
}

impl<B: Backend> Driver<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            defaults: SessionConfig::default(),
        }
    }

    /// Construct a driver with default options applied to every session
    /// unless overridden per `begin` call.
    pub fn with_defaults(
        backend: B,
        opts: impl IntoIterator<Item = SessionOption>,
    ) -> Self {
        let mut defaults = SessionConfig::default();
        for opt in opts {
            opt.apply(&mut defaults);
        }
        Self {
            backend: Arc::new(backend),
            defaults,
        }
    }

    fn effective_config(&self, opts: impl IntoIterator<Item = SessionOption>) -> SessionConfig {
        let mut cfg = self.defaults.clone();
        for opt in opts {
            opt.apply(&mut cfg);
        }
        cfg
    }

    /// Start a new session.
    ///
    /// The cancellation token governs every backend call made through the
    /// session, including retry backoff sleeps.
    ///
    /// # Errors
    /// If transaction establishment fails, no session is returned and the
    /// backend error is surfaced verbatim.
    pub async fn begin(
        &self,
        cancel: CancellationToken,
        opts: impl IntoIterator<Item = SessionOption>,
    ) -> Result<Session<B>, UnitOfWorkError> {
        let cfg = self.effective_config(opts);
        let handle = self.backend.begin(&cfg).await?;
        Ok(Session::new(handle, cfg, cancel))
    }

    /// Verify backend connectivity.
    ///
    /// # Errors
    /// Surfaces the backend error unchanged.
    pub async fn ping(&self) -> Result<(), UnitOfWorkError> {
        self.backend.ping().await
    }

    /// Release the underlying backend.
    ///
    /// # Errors
    /// Surfaces the backend error unchanged.
    pub async fn close(&self) -> Result<(), UnitOfWorkError> {
        self.backend.close().await
    }

    /// Run `body` inside a transaction, committing on success and rolling
    /// back on error or panic.
    ///
    /// A transaction is requested by default; `opts` are applied afterwards
    /// and can still override settings. On a body panic the rollback runs on
    /// the unwind path and the panic payload is re-raised, never converted
    /// into an error value.
    ///
    /// # Errors
    /// Returns the body's error after rolling back, or the commit error.
    pub async fn run_transaction<T, F, Fut>(
        &self,
        cancel: CancellationToken,
        opts: impl IntoIterator<Item = SessionOption>,
        body: F,
    ) -> Result<T, UnitOfWorkError>
    where
        F: FnOnce(Session<B>) -> Fut,
        Fut: Future<Output = Result<T, UnitOfWorkError>>,
    {
        let opts = std::iter::once(with_transaction()).chain(opts);
        let session = self.begin(cancel, opts).await?;

        let outcome = AssertUnwindSafe(body(session.clone())).catch_unwind().await;
        match outcome {
            Ok(Ok(value)) => {
                session.commit().await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed transaction body also failed");
                }
                Err(err)
            }
            Err(payload) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!(error = %rollback_err, "rollback after panicking transaction body failed");
                }
                std::panic::resume_unwind(payload)
            }
        }
    }
}
