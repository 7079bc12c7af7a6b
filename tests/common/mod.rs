#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use txn_middleware::backend::{Backend, CommitProfile, SessionHandle};
use txn_middleware::driver::SessionConfig;
use txn_middleware::error::UnitOfWorkError;
use txn_middleware::value::{Row, Value};

/// Every backend call the mock observed, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Begin,
    Exec(String),
    QueryRow(String),
    Query(String),
    Commit,
    Rollback,
    PrepareRetry,
    Ping,
    Close,
}

/// Scripted outcome for one commit attempt.
#[derive(Debug, Clone)]
pub enum CommitScript {
    Ok,
    Abort,
    Fail(String),
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<Call>>,
    commit_script: Mutex<VecDeque<CommitScript>>,
    always_abort: Mutex<bool>,
    exec_failures: Mutex<VecDeque<String>>,
    query_rows: Mutex<VecDeque<Row>>,
    rollback_fails: Mutex<bool>,
}

/// Recording backend test double.
///
/// Records every call it receives and plays back scripted commit and exec
/// outcomes, so tests can assert both on results and on exactly which
/// backend calls were issued.
#[derive(Clone)]
pub struct MockBackend {
    shared: Arc<Shared>,
    profile: CommitProfile,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            profile: CommitProfile::Terminal,
        }
    }

    pub fn optimistic() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            profile: CommitProfile::OptimisticRetry,
        }
    }

    /// Outcomes for upcoming commit attempts, first to last; once the script
    /// is exhausted, commits succeed.
    pub fn script_commits(&self, outcomes: impl IntoIterator<Item = CommitScript>) {
        self.shared
            .commit_script
            .lock()
            .unwrap()
            .extend(outcomes);
    }

    /// Every commit attempt aborts, regardless of scripts.
    pub fn always_abort_commits(&self) {
        *self.shared.always_abort.lock().unwrap() = true;
    }

    /// The next exec call fails with a backend error carrying `message`.
    pub fn fail_next_exec(&self, message: impl Into<String>) {
        self.shared
            .exec_failures
            .lock()
            .unwrap()
            .push_back(message.into());
    }

    /// Queue a row to be returned by the next `query_row`.
    pub fn push_query_row(&self, row: Row) {
        self.shared.query_rows.lock().unwrap().push_back(row);
    }

    pub fn fail_rollbacks(&self) {
        *self.shared.rollback_fails.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matching: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matching(c)).count()
    }

    pub fn commits(&self) -> usize {
        self.count(|c| matches!(c, Call::Commit))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|c| matches!(c, Call::Rollback))
    }
}

pub struct MockHandle {
    shared: Arc<Shared>,
    profile: CommitProfile,
}

impl MockHandle {
    fn record(&self, call: Call) {
        self.shared.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Backend for MockBackend {
    type Handle = MockHandle;

    async fn begin(&self, _cfg: &SessionConfig) -> Result<Self::Handle, UnitOfWorkError> {
        self.shared.calls.lock().unwrap().push(Call::Begin);
        Ok(MockHandle {
            shared: Arc::clone(&self.shared),
            profile: self.profile,
        })
    }

    async fn ping(&self) -> Result<(), UnitOfWorkError> {
        self.shared.calls.lock().unwrap().push(Call::Ping);
        Ok(())
    }

    async fn close(&self) -> Result<(), UnitOfWorkError> {
        self.shared.calls.lock().unwrap().push(Call::Close);
        Ok(())
    }
}

#[async_trait]
impl SessionHandle for MockHandle {
    async fn exec(&mut self, query: &str, _params: &[Value]) -> Result<u64, UnitOfWorkError> {
        self.record(Call::Exec(query.to_string()));
        if let Some(message) = self.shared.exec_failures.lock().unwrap().pop_front() {
            return Err(UnitOfWorkError::BackendError(message));
        }
        Ok(1)
    }

    async fn query_row(&mut self, query: &str, _params: &[Value]) -> Result<Row, UnitOfWorkError> {
        self.record(Call::QueryRow(query.to_string()));
        self.shared
            .query_rows
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| UnitOfWorkError::BackendError("no row scripted".to_string()))
    }

    async fn query(&mut self, query: &str, _params: &[Value]) -> Result<Vec<Row>, UnitOfWorkError> {
        self.record(Call::Query(query.to_string()));
        Ok(Vec::new())
    }

    async fn commit(&mut self) -> Result<(), UnitOfWorkError> {
        self.record(Call::Commit);
        if *self.shared.always_abort.lock().unwrap() {
            return Err(UnitOfWorkError::Aborted("scripted conflict".to_string()));
        }
        match self.shared.commit_script.lock().unwrap().pop_front() {
            Some(CommitScript::Abort) => {
                Err(UnitOfWorkError::Aborted("scripted conflict".to_string()))
            }
            Some(CommitScript::Fail(message)) => Err(UnitOfWorkError::BackendError(message)),
            Some(CommitScript::Ok) | None => Ok(()),
        }
    }

    async fn rollback(&mut self) -> Result<(), UnitOfWorkError> {
        self.record(Call::Rollback);
        if *self.shared.rollback_fails.lock().unwrap() {
            return Err(UnitOfWorkError::BackendError(
                "rollback failed".to_string(),
            ));
        }
        Ok(())
    }

    fn commit_profile(&self) -> CommitProfile {
        self.profile
    }

    async fn prepare_retry(&mut self) -> Result<(), UnitOfWorkError> {
        self.record(Call::PrepareRetry);
        Ok(())
    }
}

/// Build a one-column row for scripting query results.
pub fn row(column: &str, value: Value) -> Row {
    Row::new(Arc::new(vec![column.to_string()]), vec![value])
}

/// Build a multi-column row for scripting query results.
pub fn row_with(columns: &[&str], values: Vec<Value>) -> Row {
    Row::new(
        Arc::new(columns.iter().map(|c| (*c).to_string()).collect()),
        values,
    )
}
