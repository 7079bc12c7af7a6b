use std::fmt;

use thiserror::Error;

/// Crate-wide error type.
///
/// Usage errors (misuse of a session or segment) are dedicated variants so
/// callers can branch on them instead of comparing sentinel values. Backend
/// errors pass through unchanged; the only condition this crate inspects is
/// [`UnitOfWorkError::Aborted`], which feeds the optimistic commit retry loop.
#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    /// The segment has already executed; segments run at most once.
    #[error("segment has already been executed; create a new segment for additional queries")]
    AlreadyUsed,

    /// The session has already been committed.
    #[error("cannot commit a session that has already been committed")]
    AlreadyCommitted,

    /// Commit or rollback was called on a non-transactional session.
    #[error("cannot {operation} without transaction")]
    WithoutTransaction { operation: &'static str },

    /// A handler in `execute_many` failed; `index` is its position.
    #[error("handler {index} failed")]
    HandlerFailed {
        index: usize,
        source: Box<UnitOfWorkError>,
    },

    /// The session's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// An optimistic backend rejected the commit due to a conflicting
    /// concurrent transaction.
    #[error("commit aborted by concurrent transaction: {0}")]
    Aborted(String),

    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PoolError(#[from] deadpool_postgres::PoolError),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("parameter error: {0}")]
    ParameterError(String),

    #[error("backend error: {0}")]
    BackendError(String),

    /// Ordered list of underlying errors, e.g. a failure plus the rollback
    /// error it triggered.
    #[error(transparent)]
    Chain(ErrorChain),
}

/// Coarse classification used for structural matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Programmer mistake: re-used segment, double commit, commit/rollback
    /// without a transaction.
    Usage,
    /// Optimistic-concurrency abort, retryable at commit time.
    Aborted,
    /// Cancellation or deadline.
    Cancelled,
    /// Anything reported by the backend or adapter.
    Backend,
    /// Invalid or missing configuration.
    Config,
}

impl UnitOfWorkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyUsed | Self::AlreadyCommitted | Self::WithoutTransaction { .. } => {
                ErrorKind::Usage
            }
            Self::HandlerFailed { source, .. } => source.kind(),
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Aborted(_) => ErrorKind::Aborted,
            Self::ConfigError(_) => ErrorKind::Config,
            Self::Chain(chain) => chain.first_kind(),
            _ => ErrorKind::Backend,
        }
    }

    /// Whether this error, or any error in a chain, is of the given kind.
    pub fn matches(&self, kind: ErrorKind) -> bool {
        match self {
            Self::Chain(chain) => chain.matches(kind),
            Self::HandlerFailed { source, .. } => source.matches(kind),
            other => other.kind() == kind,
        }
    }

    #[must_use]
    pub fn is_usage(&self) -> bool {
        self.matches(ErrorKind::Usage)
    }

    #[must_use]
    pub fn is_abort(&self) -> bool {
        self.matches(ErrorKind::Aborted)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.matches(ErrorKind::Cancelled)
    }
}

/// An ordered list of underlying errors with structural queries.
///
/// Display joins every member with a trailing period so the full story reads
/// as one message, while `matches` lets tests assert on a specific cause
/// without string inspection.
#[derive(Debug, Default)]
pub struct ErrorChain {
    errors: Vec<UnitOfWorkError>,
}

impl ErrorChain {
    #[must_use]
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn push(&mut self, err: UnitOfWorkError) {
        self.errors.push(err);
    }

    #[must_use]
    pub fn errors(&self) -> &[UnitOfWorkError] {
        &self.errors
    }

    pub fn matches(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.matches(kind))
    }

    fn first_kind(&self) -> ErrorKind {
        self.errors
            .first()
            .map_or(ErrorKind::Backend, UnitOfWorkError::kind)
    }
}

impl fmt::Display for ErrorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(|e| format!("{e}."))
            .collect::<Vec<_>>()
            .join(" ");
        write!(f, "{joined}")
    }
}

impl std::error::Error for ErrorChain {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Combine a triggering error with a follow-up failure (typically a rollback
/// error) so that neither is discarded.
#[must_use]
pub fn combine(cause: UnitOfWorkError, follow_up: UnitOfWorkError) -> UnitOfWorkError {
    let mut chain = ErrorChain::new();
    match cause {
        UnitOfWorkError::Chain(inner) => chain.errors.extend(inner.errors),
        other => chain.push(other),
    }
    match follow_up {
        UnitOfWorkError::Chain(inner) => chain.errors.extend(inner.errors),
        other => chain.push(other),
    }
    UnitOfWorkError::Chain(chain)
}
