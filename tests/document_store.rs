use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use txn_middleware::document::{self, DocumentStore, StagedWrite, TransactionId};
use txn_middleware::value::{Row, Value};
use txn_middleware::{
    UnitOfWorkError, commit_backoff, max_commit_attempts, with_transaction,
};

/// One observed commit attempt: the retry linkage it carried and the writes
/// it flushed.
#[derive(Debug, Clone)]
struct CommitAttempt {
    retry_of: Option<TransactionId>,
    writes: Vec<StagedWrite>,
}

#[derive(Default)]
struct Recorded {
    commit_attempts: Vec<CommitAttempt>,
    applied: Vec<StagedWrite>,
    gets: Vec<(String, String)>,
    rollbacks: usize,
}

/// In-memory document store double with scriptable commit conflicts.
#[derive(Clone, Default)]
struct StubStore {
    recorded: Arc<Mutex<Recorded>>,
    aborts_remaining: Arc<Mutex<u32>>,
}

impl StubStore {
    fn aborting(times: u32) -> Self {
        let store = Self::default();
        *store.aborts_remaining.lock().unwrap() = times;
        store
    }

    fn recorded(&self) -> Recorded {
        let recorded = self.recorded.lock().unwrap();
        Recorded {
            commit_attempts: recorded.commit_attempts.clone(),
            applied: recorded.applied.clone(),
            gets: recorded.gets.clone(),
            rollbacks: recorded.rollbacks,
        }
    }
}

#[async_trait]
impl DocumentStore for StubStore {
    async fn begin_transaction(
        &self,
        _read_only: bool,
    ) -> Result<TransactionId, UnitOfWorkError> {
        Ok(vec![0xab])
    }

    async fn commit(
        &self,
        _txn: &TransactionId,
        retry_of: Option<&TransactionId>,
        writes: &[StagedWrite],
    ) -> Result<(), UnitOfWorkError> {
        self.recorded
            .lock()
            .unwrap()
            .commit_attempts
            .push(CommitAttempt {
                retry_of: retry_of.cloned(),
                writes: writes.to_vec(),
            });

        let mut aborts = self.aborts_remaining.lock().unwrap();
        if *aborts > 0 {
            *aborts -= 1;
            return Err(UnitOfWorkError::Aborted("document contention".to_string()));
        }
        Ok(())
    }

    async fn rollback(&self, _txn: &TransactionId) -> Result<(), UnitOfWorkError> {
        self.recorded.lock().unwrap().rollbacks += 1;
        Ok(())
    }

    async fn get(
        &self,
        _txn: Option<&TransactionId>,
        collection: &str,
        id: &str,
    ) -> Result<Row, UnitOfWorkError> {
        self.recorded
            .lock()
            .unwrap()
            .gets
            .push((collection.to_string(), id.to_string()));
        Ok(Row::new(
            Arc::new(vec!["id".to_string()]),
            vec![Value::Text(id.to_string())],
        ))
    }

    async fn query(
        &self,
        _txn: Option<&TransactionId>,
        _collection: &str,
        _filter: &[Value],
    ) -> Result<Vec<Row>, UnitOfWorkError> {
        Ok(Vec::new())
    }

    async fn apply(&self, writes: &[StagedWrite]) -> Result<(), UnitOfWorkError> {
        self.recorded
            .lock()
            .unwrap()
            .applied
            .extend(writes.iter().cloned());
        Ok(())
    }

    async fn ping(&self) -> Result<(), UnitOfWorkError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), UnitOfWorkError> {
        Ok(())
    }
}

fn put_segment_args() -> [Value; 2] {
    [
        Value::Text("p1".to_string()),
        Value::Json(json!({"name": "widget", "price": 5})),
    ]
}

#[tokio::test]
async fn transactional_writes_stage_until_commit() {
    let store = StubStore::default();
    let driver = document::open(store.clone());
    let session = driver
        .begin(CancellationToken::new(), [with_transaction()])
        .await
        .unwrap();

    let mut put = session
        .builder()
        .segment("products")
        .arguments(put_segment_args());
    put.exec().await.unwrap();

    // Nothing reaches the store before commit.
    assert!(store.recorded().commit_attempts.is_empty());
    assert!(store.recorded().applied.is_empty());

    session.commit().await.unwrap();

    let recorded = store.recorded();
    assert_eq!(recorded.commit_attempts.len(), 1);
    assert_eq!(recorded.commit_attempts[0].writes.len(), 1);
    assert!(matches!(
        recorded.commit_attempts[0].writes[0],
        StagedWrite::Put { ref id, .. } if id == "p1"
    ));
}

#[tokio::test(start_paused = true)]
async fn retry_linkage_references_original_identity_once() {
    let store = StubStore::aborting(2);
    let driver = document::open(store.clone());
    let session = driver
        .begin(
            CancellationToken::new(),
            [
                with_transaction(),
                max_commit_attempts(5),
                commit_backoff(Duration::from_millis(1), Duration::from_millis(10)),
            ],
        )
        .await
        .unwrap();

    let mut put = session
        .builder()
        .segment("products")
        .arguments(put_segment_args());
    put.exec().await.unwrap();

    session.commit().await.unwrap();

    let recorded = store.recorded();
    assert_eq!(recorded.commit_attempts.len(), 3);

    // First attempt carries no linkage and the staged write.
    assert!(recorded.commit_attempts[0].retry_of.is_none());
    assert_eq!(recorded.commit_attempts[0].writes.len(), 1);

    // Retries carry the original identity and no duplicated writes.
    for attempt in &recorded.commit_attempts[1..] {
        assert_eq!(attempt.retry_of.as_deref(), Some(&[0xab][..]));
        assert!(attempt.writes.is_empty());
    }
}

#[tokio::test]
async fn non_transactional_writes_apply_immediately() {
    let store = StubStore::default();
    let driver = document::open(store.clone());
    let session = driver.begin(CancellationToken::new(), []).await.unwrap();

    let mut put = session
        .builder()
        .segment("products")
        .arguments(put_segment_args());
    put.exec().await.unwrap();

    let recorded = store.recorded();
    assert_eq!(recorded.applied.len(), 1);
    assert!(recorded.commit_attempts.is_empty());
}

#[tokio::test]
async fn query_row_maps_to_document_lookup() {
    let store = StubStore::default();
    let driver = document::open(store.clone());
    let session = driver.begin(CancellationToken::new(), []).await.unwrap();

    let row = session
        .builder()
        .segment("products")
        .arguments([Value::Text("p1".to_string())])
        .query_row()
        .await
        .unwrap();

    assert_eq!(row.get("id").and_then(Value::as_text), Some("p1"));
    assert_eq!(
        store.recorded().gets,
        vec![("products".to_string(), "p1".to_string())]
    );
}

#[tokio::test]
async fn delete_requires_only_an_id() {
    let store = StubStore::default();
    let driver = document::open(store.clone());
    let session = driver
        .begin(CancellationToken::new(), [with_transaction()])
        .await
        .unwrap();

    let mut delete = session
        .builder()
        .segment("products")
        .arguments([Value::Text("p1".to_string())]);
    delete.exec().await.unwrap();
    session.commit().await.unwrap();

    let recorded = store.recorded();
    assert!(matches!(
        recorded.commit_attempts[0].writes[0],
        StagedWrite::Delete { ref id, .. } if id == "p1"
    ));
}

#[tokio::test]
async fn write_without_id_is_a_parameter_error() {
    let store = StubStore::default();
    let driver = document::open(store.clone());
    let session = driver
        .begin(CancellationToken::new(), [with_transaction()])
        .await
        .unwrap();

    let mut bad = session.builder().segment("products");
    let err = bad.exec().await.unwrap_err();
    assert!(matches!(err, UnitOfWorkError::ParameterError(_)));
}
