use crate::backend::Backend;
use crate::error::UnitOfWorkError;
use crate::session::Session;
use crate::value::{Row, Value};

/// Factory for [`Segment`]s scoped to one session.
///
/// Builders are cheap to clone; every segment they produce executes against
/// the same backend handle, so statement ordering within a session is the
/// order in which the caller runs its segments.
pub struct SegmentBuilder<B: Backend> {
    session: Session<B>,
}

impl<B: Backend> Clone for SegmentBuilder<B> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
        }
    }
}

impl<B: Backend> SegmentBuilder<B> {
    pub(crate) fn new(session: Session<B>) -> Self {
        Self { session }
    }

    /// Stamp out a new single-use segment for `query`.
    #[must_use]
    pub fn segment(&self, query: impl Into<String>) -> Segment<B> {
        Segment {
            query: query.into(),
            args: Vec::new(),
            used: false,
            session: self.session.clone(),
        }
    }
}

/// A single-use query unit: one query, its positional arguments, and at most
/// one execution.
///
/// The first call to any execution method marks the segment used, even when
/// that execution fails, so a failed query can never be retried through the
/// same segment. Build a new segment to run the query again.
pub struct Segment<B: Backend> {
    query: String,
    args: Vec<Value>,
    used: bool,
    session: Session<B>,
}

impl<B: Backend> Segment<B> {
    /// Set positional arguments for the query. Has no effect once the
    /// segment has executed.
    #[must_use]
    pub fn arguments(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    /// Execute the query and return the affected count. Used for inserts and
    /// updates.
    ///
    /// # Errors
    /// [`UnitOfWorkError::AlreadyUsed`] on a second execution attempt,
    /// without touching the backend; otherwise the backend's error unchanged.
    pub async fn exec(&mut self) -> Result<u64, UnitOfWorkError> {
        self.use_once()?;
        self.session.run_exec(&self.query, &self.args).await
    }

    /// Execute the query and return its single row.
    ///
    /// # Errors
    /// [`UnitOfWorkError::AlreadyUsed`] on a second execution attempt;
    /// otherwise the backend's error unchanged.
    pub async fn query_row(&mut self) -> Result<Row, UnitOfWorkError> {
        self.use_once()?;
        self.session.run_query_row(&self.query, &self.args).await
    }

    /// Execute the query and invoke `cb` for each returned row.
    ///
    /// # Errors
    /// [`UnitOfWorkError::AlreadyUsed`] on a second execution attempt; the
    /// backend's error, or the first error returned by `cb`.
    pub async fn query<F>(&mut self, mut cb: F) -> Result<(), UnitOfWorkError>
    where
        F: FnMut(&Row) -> Result<(), UnitOfWorkError>,
    {
        self.use_once()?;
        let rows = self.session.run_query(&self.query, &self.args).await?;
        for row in &rows {
            cb(row)?;
        }
        Ok(())
    }

    // Marks the segment used before any backend I/O happens.
    fn use_once(&mut self) -> Result<(), UnitOfWorkError> {
        if self.used {
            return Err(UnitOfWorkError::AlreadyUsed);
        }
        self.used = true;
        Ok(())
    }
}
