//! Transaction manager

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use mergeflow_core::OrchestrationError;

use super::operation::Operation;
use super::TransactionStatus;

/// Errors from transaction operations
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// Transaction not found
    #[error("transaction not found: {0}")]
    NotFound(Uuid),

    /// Operation attempted in a state that does not allow it
    #[error("transaction {id} is {status}")]
    InvalidState {
        id: Uuid,
        status: TransactionStatus,
    },

    /// Commit failed and the transaction was rolled back; carries the
    /// original cause
    #[error("transaction rolled back: {cause}")]
    Aborted { cause: String },
}

impl From<TransactionError> for OrchestrationError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::NotFound(id) => {
                OrchestrationError::not_found("transaction", id)
            }
            TransactionError::InvalidState { id, status } => OrchestrationError::Validation(
                format!("transaction {id} is {status}"),
            ),
            TransactionError::Aborted { cause } => OrchestrationError::TransactionAborted(cause),
        }
    }
}

/// A logical transaction grouping related mutations
pub struct Transaction {
    pub id: Uuid,
    pub workstreams: Vec<String>,
    pub status: TransactionStatus,

    /// Per-operation timeout applied during commit; `None` = unbounded
    pub timeout: Option<Duration>,

    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,

    operations: Vec<Operation>,
}

impl Transaction {
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }
}

/// Read-only view of a transaction for observers
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub id: Uuid,
    pub workstreams: Vec<String>,
    pub status: TransactionStatus,
    pub operation_count: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl From<&Transaction> for TransactionInfo {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id,
            workstreams: tx.workstreams.clone(),
            status: tx.status,
            operation_count: tx.operations.len(),
            started_at: tx.started_at,
            ended_at: tx.ended_at,
            error: tx.error.clone(),
        }
    }
}

/// Registry and runner for compensating transactions
///
/// # Example
///
/// ```ignore
/// let manager = TransactionManager::new();
/// let tx_id = manager.begin(vec!["tasks".into()], None);
///
/// manager.add_operation(tx_id, Operation::new(
///     "cancel", "task-1", json!({}),
///     move || async move { /* cancel */ Ok(json!(null)) },
///     move || async move { /* restore */ Ok(json!(null)) },
/// )).await?;
///
/// manager.commit(tx_id).await?;
/// ```
pub struct TransactionManager {
    transactions: DashMap<Uuid, Arc<Mutex<Transaction>>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            transactions: DashMap::new(),
        }
    }

    /// Open a transaction attached to the given workstreams
    pub fn begin(&self, workstreams: Vec<String>, timeout: Option<Duration>) -> Uuid {
        let id = Uuid::now_v7();
        let tx = Transaction {
            id,
            workstreams,
            status: TransactionStatus::Pending,
            timeout,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
            operations: vec![],
        };
        self.transactions.insert(id, Arc::new(Mutex::new(tx)));
        debug!(%id, "transaction opened");
        id
    }

    fn entry(&self, id: Uuid) -> Result<Arc<Mutex<Transaction>>, TransactionError> {
        self.transactions
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(TransactionError::NotFound(id))
    }

    /// Append an operation; allowed while pending or active, and
    /// transitions pending → active
    pub async fn add_operation(
        &self,
        id: Uuid,
        operation: Operation,
    ) -> Result<(), TransactionError> {
        let entry = self.entry(id)?;
        let mut tx = entry.lock().await;

        if !tx.status.accepts_operations() {
            return Err(TransactionError::InvalidState {
                id,
                status: tx.status,
            });
        }

        if tx.status == TransactionStatus::Pending {
            tx.status = TransactionStatus::Active;
        }
        tx.operations.push(operation);
        Ok(())
    }

    /// Execute the operations in insertion order
    ///
    /// Each call is wrapped with the transaction's per-operation timeout.
    /// On the first failure every previously executed operation is undone
    /// in reverse insertion order, the transaction ends `rolled_back`
    /// (`timed_out` when the trigger was a timeout), and the original
    /// error is surfaced as [`TransactionError::Aborted`].
    #[instrument(skip(self))]
    pub async fn commit(&self, id: Uuid) -> Result<Vec<serde_json::Value>, TransactionError> {
        let entry = self.entry(id)?;
        let mut tx = entry.lock().await;

        if !tx.status.accepts_operations() {
            return Err(TransactionError::InvalidState {
                id,
                status: tx.status,
            });
        }

        tx.status = TransactionStatus::Committing;
        let timeout = tx.timeout;
        let mut results = Vec::with_capacity(tx.operations.len());

        for index in 0..tx.operations.len() {
            let outcome = run_operation(&tx.operations[index], timeout).await;

            match outcome {
                Ok(value) => results.push(value),
                Err((cause, timed_out)) => {
                    warn!(%id, operation = %tx.operations[index].op_type, %cause, "operation failed; rolling back");
                    tx.status = TransactionStatus::RollingBack;

                    // Undo in reverse insertion order; undo failures are
                    // logged and do not stop the sequence
                    for undone in tx.operations[..index].iter().rev() {
                        if let Err(undo_err) = undone.run_undo().await {
                            warn!(
                                %id,
                                operation = %undone.op_type,
                                error = %undo_err,
                                "undo failed during rollback"
                            );
                        }
                    }

                    tx.status = if timed_out {
                        TransactionStatus::TimedOut
                    } else {
                        TransactionStatus::RolledBack
                    };
                    tx.ended_at = Some(Utc::now());
                    tx.error = Some(cause.clone());
                    return Err(TransactionError::Aborted { cause });
                }
            }
        }

        tx.status = TransactionStatus::Committed;
        tx.ended_at = Some(Utc::now());
        info!(%id, operations = results.len(), "transaction committed");
        Ok(results)
    }

    /// Explicit rollback, allowed while pending or active
    ///
    /// Operations only execute during commit, so there is nothing to
    /// undo here; the transaction simply ends `rolled_back`.
    pub async fn rollback(&self, id: Uuid) -> Result<(), TransactionError> {
        let entry = self.entry(id)?;
        let mut tx = entry.lock().await;

        if !tx.status.accepts_operations() {
            return Err(TransactionError::InvalidState {
                id,
                status: tx.status,
            });
        }

        tx.status = TransactionStatus::RolledBack;
        tx.ended_at = Some(Utc::now());
        debug!(%id, "transaction rolled back");
        Ok(())
    }

    /// Current status, if the transaction exists
    pub async fn status(&self, id: Uuid) -> Option<TransactionStatus> {
        let entry = self.entry(id).ok()?;
        let tx = entry.lock().await;
        Some(tx.status)
    }

    /// Snapshot for observers
    pub async fn info(&self, id: Uuid) -> Option<TransactionInfo> {
        let entry = self.entry(id).ok()?;
        let tx = entry.lock().await;
        Some(TransactionInfo::from(&*tx))
    }

    /// Ids of non-terminal transactions attached to a workstream
    pub async fn find_active(&self, workstream: &str) -> Vec<Uuid> {
        let entries: Vec<Arc<Mutex<Transaction>>> = self
            .transactions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut active = vec![];
        for entry in entries {
            let tx = entry.lock().await;
            if !tx.status.is_terminal() && tx.workstreams.iter().any(|w| w == workstream) {
                active.push(tx.id);
            }
        }
        active
    }

    /// Ids of transactions currently in the given status
    pub async fn find_by_status(&self, status: TransactionStatus) -> Vec<Uuid> {
        let entries: Vec<Arc<Mutex<Transaction>>> = self
            .transactions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut found = vec![];
        for entry in entries {
            let tx = entry.lock().await;
            if tx.status == status {
                found.push(tx.id);
            }
        }
        found
    }

    /// Drop every terminal transaction; returns how many were removed
    pub async fn cleanup_completed(&self) -> usize {
        let mut terminal = vec![];
        let entries: Vec<(Uuid, Arc<Mutex<Transaction>>)> = self
            .transactions
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();

        for (id, entry) in entries {
            let tx = entry.lock().await;
            if tx.status.is_terminal() {
                terminal.push(id);
            }
        }

        for id in &terminal {
            self.transactions.remove(id);
        }
        terminal.len()
    }

    /// Roll back every still-active transaction attached to a
    /// workstream (used during subsystem teardown)
    pub async fn cleanup_workstream(&self, workstream: &str) -> usize {
        let active = self.find_active(workstream).await;
        let mut rolled_back = 0;
        for id in active {
            match self.rollback(id).await {
                Ok(()) => rolled_back += 1,
                Err(error) => warn!(%id, %error, "workstream cleanup could not roll back"),
            }
        }
        rolled_back
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("transactions", &self.transactions.len())
            .finish()
    }
}

/// Run one operation, bounding it with the per-operation timeout
///
/// Returns `Err((cause, timed_out))` on failure.
async fn run_operation(
    operation: &Operation,
    timeout: Option<Duration>,
) -> Result<serde_json::Value, (String, bool)> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, operation.run_execute()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err((error.to_string(), false)),
            Err(_) => Err((
                format!(
                    "operation '{}' on '{}' timed out after {limit:?}",
                    operation.op_type, operation.target
                ),
                true,
            )),
        },
        None => operation
            .run_execute()
            .await
            .map_err(|e| (e.to_string(), false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording_op(
        name: &str,
        log: Arc<parking_lot::Mutex<Vec<String>>>,
        fail_execute: bool,
    ) -> Operation {
        let exec_log = Arc::clone(&log);
        let undo_log = log;
        let exec_name = name.to_string();
        let undo_name = name.to_string();

        Operation::new(
            name,
            "test",
            serde_json::Value::Null,
            move || {
                let log = Arc::clone(&exec_log);
                let name = exec_name.clone();
                async move {
                    if fail_execute {
                        anyhow::bail!("{name} exploded");
                    }
                    log.lock().push(format!("exec:{name}"));
                    Ok(serde_json::json!(name))
                }
            },
            move || {
                let log = Arc::clone(&undo_log);
                let name = undo_name.clone();
                async move {
                    log.lock().push(format!("undo:{name}"));
                    Ok(serde_json::Value::Null)
                }
            },
        )
    }

    #[tokio::test]
    async fn test_commit_runs_in_insertion_order() {
        let manager = TransactionManager::new();
        let log = Arc::new(parking_lot::Mutex::new(vec![]));
        let tx_id = manager.begin(vec!["ws".to_string()], None);

        for name in ["o1", "o2", "o3"] {
            manager
                .add_operation(tx_id, recording_op(name, Arc::clone(&log), false))
                .await
                .unwrap();
        }

        let results = manager.commit(tx_id).await.unwrap();
        assert_eq!(results, vec!["o1", "o2", "o3"]);
        assert_eq!(*log.lock(), vec!["exec:o1", "exec:o2", "exec:o3"]);
        assert_eq!(
            manager.status(tx_id).await,
            Some(TransactionStatus::Committed)
        );
    }

    #[tokio::test]
    async fn test_failure_rolls_back_in_reverse_order() {
        // o3 rejects -> o2.undo then o1.undo, exactly once each; final
        // status rolled_back; the original error is surfaced
        let manager = TransactionManager::new();
        let log = Arc::new(parking_lot::Mutex::new(vec![]));
        let tx_id = manager.begin(vec!["ws".to_string()], None);

        manager
            .add_operation(tx_id, recording_op("o1", Arc::clone(&log), false))
            .await
            .unwrap();
        manager
            .add_operation(tx_id, recording_op("o2", Arc::clone(&log), false))
            .await
            .unwrap();
        manager
            .add_operation(tx_id, recording_op("o3", Arc::clone(&log), true))
            .await
            .unwrap();

        let error = manager.commit(tx_id).await.unwrap_err();
        assert!(matches!(&error, TransactionError::Aborted { cause } if cause.contains("o3 exploded")));

        assert_eq!(
            *log.lock(),
            vec!["exec:o1", "exec:o2", "undo:o2", "undo:o1"]
        );
        assert_eq!(
            manager.status(tx_id).await,
            Some(TransactionStatus::RolledBack)
        );
    }

    #[tokio::test]
    async fn test_undo_failure_does_not_stop_rollback() {
        let manager = TransactionManager::new();
        let undone = Arc::new(AtomicUsize::new(0));
        let tx_id = manager.begin(vec![], None);

        // First operation's undo fails; second operation's undo must
        // still run (rollback order is o2-undo then o1-undo)
        manager
            .add_operation(
                tx_id,
                Operation::new(
                    "o1",
                    "t",
                    serde_json::Value::Null,
                    || async { Ok(serde_json::Value::Null) },
                    || async { anyhow::bail!("undo refused") },
                ),
            )
            .await
            .unwrap();

        let counter = Arc::clone(&undone);
        manager
            .add_operation(
                tx_id,
                Operation::new(
                    "o2",
                    "t",
                    serde_json::Value::Null,
                    || async { Ok(serde_json::Value::Null) },
                    move || {
                        let counter = Arc::clone(&counter);
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok(serde_json::Value::Null)
                        }
                    },
                ),
            )
            .await
            .unwrap();

        manager
            .add_operation(
                tx_id,
                Operation::new(
                    "o3",
                    "t",
                    serde_json::Value::Null,
                    || async { anyhow::bail!("nope") },
                    || async { Ok(serde_json::Value::Null) },
                ),
            )
            .await
            .unwrap();

        let result = manager.commit(tx_id).await;
        assert!(result.is_err());
        assert_eq!(undone.load(Ordering::SeqCst), 1);
        assert_eq!(
            manager.status(tx_id).await,
            Some(TransactionStatus::RolledBack)
        );
    }

    #[tokio::test]
    async fn test_operation_timeout_aborts_and_marks_timed_out() {
        let manager = TransactionManager::new();
        let tx_id = manager.begin(vec![], Some(Duration::from_millis(50)));

        manager
            .add_operation(
                tx_id,
                Operation::new(
                    "slow",
                    "t",
                    serde_json::Value::Null,
                    || async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(serde_json::Value::Null)
                    },
                    || async { Ok(serde_json::Value::Null) },
                ),
            )
            .await
            .unwrap();

        let error = manager.commit(tx_id).await.unwrap_err();
        assert!(matches!(&error, TransactionError::Aborted { cause } if cause.contains("timed out")));
        assert_eq!(
            manager.status(tx_id).await,
            Some(TransactionStatus::TimedOut)
        );
    }

    #[tokio::test]
    async fn test_add_operation_after_terminal_is_rejected() {
        let manager = TransactionManager::new();
        let tx_id = manager.begin(vec![], None);
        manager.commit(tx_id).await.unwrap();

        let rejected = manager
            .add_operation(
                tx_id,
                Operation::new(
                    "late",
                    "t",
                    serde_json::Value::Null,
                    || async { Ok(serde_json::Value::Null) },
                    || async { Ok(serde_json::Value::Null) },
                ),
            )
            .await;
        assert!(matches!(
            rejected,
            Err(TransactionError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_explicit_rollback_and_queries() {
        let manager = TransactionManager::new();
        let tx_id = manager.begin(vec!["linear".to_string()], None);

        manager
            .add_operation(
                tx_id,
                Operation::new(
                    "op",
                    "t",
                    serde_json::Value::Null,
                    || async { Ok(serde_json::Value::Null) },
                    || async { Ok(serde_json::Value::Null) },
                ),
            )
            .await
            .unwrap();

        assert_eq!(manager.find_active("linear").await, vec![tx_id]);
        assert_eq!(
            manager.find_by_status(TransactionStatus::Active).await,
            vec![tx_id]
        );

        manager.rollback(tx_id).await.unwrap();
        assert!(manager.find_active("linear").await.is_empty());
        assert_eq!(
            manager.status(tx_id).await,
            Some(TransactionStatus::RolledBack)
        );
    }

    #[tokio::test]
    async fn test_cleanup_workstream_rolls_back_active() {
        let manager = TransactionManager::new();
        let keep = manager.begin(vec!["other".to_string()], None);
        let drop_1 = manager.begin(vec!["linear".to_string()], None);
        let drop_2 = manager.begin(vec!["linear".to_string(), "tasks".to_string()], None);

        let rolled_back = manager.cleanup_workstream("linear").await;
        assert_eq!(rolled_back, 2);
        assert_eq!(
            manager.status(drop_1).await,
            Some(TransactionStatus::RolledBack)
        );
        assert_eq!(
            manager.status(drop_2).await,
            Some(TransactionStatus::RolledBack)
        );
        assert_eq!(manager.status(keep).await, Some(TransactionStatus::Pending));
    }

    #[tokio::test]
    async fn test_cleanup_completed_removes_terminal() {
        let manager = TransactionManager::new();
        let done = manager.begin(vec![], None);
        let open = manager.begin(vec![], None);
        manager.commit(done).await.unwrap();

        let removed = manager.cleanup_completed().await;
        assert_eq!(removed, 1);
        assert_eq!(manager.status(done).await, None);
        assert!(manager.status(open).await.is_some());
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let manager = TransactionManager::new();
        let missing = Uuid::now_v7();
        assert!(matches!(
            manager.commit(missing).await,
            Err(TransactionError::NotFound(_))
        ));
    }
}
