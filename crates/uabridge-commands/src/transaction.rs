//! Transaction table.
//!
//! Tracks every in-flight command invocation: the sub-operation ids issued
//! for it, the ids completed so far, the readings they produced and the
//! failures they recorded. A transaction is finished when every issued id
//! has completed, which holds trivially for a transaction that issued none.
//!
//! All mutations go through one table-wide lock. Each transaction carries
//! its own `watch` channel, so a completion only wakes the callers waiting
//! on that transaction.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use uabridge_core::{OpId, Reading, TransactionId};
use uabridge_devices::StatusCode;

use crate::error::{CommandError, Result};

/// Why a sub-operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No response within the transport timeout or the command deadline
    TransportTimeout,
    /// The transport or the server reported an error
    TransportError,
}

impl FailureKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::BadTimeout => Self::TransportTimeout,
            _ => Self::TransportError,
        }
    }
}

/// Failure record of one sub-operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpFailure {
    pub op_id: OpId,
    pub kind: FailureKind,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    pub message: String,
}

impl OpFailure {
    pub fn new(op_id: OpId, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            op_id,
            kind: FailureKind::from_status(status),
            status,
            object: None,
            message: message.into(),
        }
    }

    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }
}

/// Accumulated result of a transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    /// Readings in completion order
    pub readings: Vec<Reading>,
    pub failures: Vec<OpFailure>,
}

/// Issued and completed counts of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub issued: usize,
    pub completed: usize,
}

impl Progress {
    pub fn is_finished(&self) -> bool {
        self.issued == self.completed
    }
}

struct Transaction {
    issued: HashSet<OpId>,
    completed: HashSet<OpId>,
    outcome: TransactionOutcome,
    finished: watch::Sender<bool>,
}

impl Transaction {
    fn new() -> Self {
        let (finished, _) = watch::channel(true);
        Self {
            issued: HashSet::new(),
            completed: HashSet::new(),
            outcome: TransactionOutcome::default(),
            finished,
        }
    }

    fn check_completion(&self, tx: TransactionId, op: OpId) -> Result<()> {
        if !self.issued.contains(&op) {
            return Err(CommandError::UnknownOperation {
                transaction_id: tx,
                op_id: op,
            });
        }
        if self.completed.contains(&op) {
            return Err(CommandError::DuplicateCompletion {
                transaction_id: tx,
                op_id: op,
            });
        }
        Ok(())
    }

    fn mark_completed(&mut self, op: OpId) {
        self.completed.insert(op);
        if self.completed.len() == self.issued.len() {
            self.finished.send_replace(true);
        }
    }

    fn progress(&self) -> Progress {
        Progress {
            issued: self.issued.len(),
            completed: self.completed.len(),
        }
    }
}

/// Registry of in-flight transactions.
pub struct TransactionTable {
    transactions: Mutex<HashMap<TransactionId, Transaction>>,
    next_op_id: AtomicU64,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self {
            transactions: Mutex::new(HashMap::new()),
            next_op_id: AtomicU64::new(1),
        }
    }

    /// Register a new, empty transaction.
    pub fn begin(&self) -> TransactionId {
        let id = TransactionId::new();
        self.transactions.lock().insert(id, Transaction::new());
        tracing::trace!(transaction_id = %id, "Transaction started");
        id
    }

    /// Allocate a sub-operation id for `tx`.
    pub fn new_op_id(&self, tx: TransactionId) -> Result<OpId> {
        let mut transactions = self.transactions.lock();
        let transaction = transactions
            .get_mut(&tx)
            .ok_or(CommandError::TransactionNotFound(tx))?;

        let op = OpId(self.next_op_id.fetch_add(1, Ordering::Relaxed));
        transaction.issued.insert(op);
        transaction.finished.send_replace(false);
        Ok(op)
    }

    /// Record a successful completion of `op`.
    pub fn complete(&self, tx: TransactionId, op: OpId, readings: Vec<Reading>) -> Result<()> {
        let mut transactions = self.transactions.lock();
        let transaction = transactions
            .get_mut(&tx)
            .ok_or(CommandError::TransactionNotFound(tx))?;

        transaction.check_completion(tx, op)?;
        transaction.outcome.readings.extend(readings);
        transaction.mark_completed(op);
        tracing::trace!(transaction_id = %tx, op_id = %op, "Operation completed");
        Ok(())
    }

    /// Record a failed completion of `failure.op_id`.
    pub fn fail(&self, tx: TransactionId, failure: OpFailure) -> Result<()> {
        let mut transactions = self.transactions.lock();
        let transaction = transactions
            .get_mut(&tx)
            .ok_or(CommandError::TransactionNotFound(tx))?;

        let op = failure.op_id;
        transaction.check_completion(tx, op)?;
        tracing::debug!(
            transaction_id = %tx,
            op_id = %op,
            kind = ?failure.kind,
            message = %failure.message,
            "Operation failed"
        );
        transaction.outcome.failures.push(failure);
        transaction.mark_completed(op);
        Ok(())
    }

    pub fn is_finished(&self, tx: TransactionId) -> Result<bool> {
        self.progress(tx)
            .map(|p| p.is_finished())
            .ok_or(CommandError::TransactionNotFound(tx))
    }

    pub fn progress(&self, tx: TransactionId) -> Option<Progress> {
        self.transactions.lock().get(&tx).map(Transaction::progress)
    }

    /// Wait until `tx` is finished or `deadline` elapses.
    ///
    /// On expiry every outstanding op id is completed with a timeout failure
    /// before returning. Returns how many op ids were force-completed.
    pub async fn await_finished(&self, tx: TransactionId, deadline: Duration) -> Result<usize> {
        let mut finished = {
            let transactions = self.transactions.lock();
            transactions
                .get(&tx)
                .ok_or(CommandError::TransactionNotFound(tx))?
                .finished
                .subscribe()
        };

        let wait = async { finished.wait_for(|done| *done).await.map(|_| ()) };
        match tokio::time::timeout(deadline, wait).await {
            Ok(Ok(())) => Ok(0),
            // Sender dropped: the transaction was removed while waiting
            Ok(Err(_)) => Err(CommandError::TransactionNotFound(tx)),
            Err(_) => self.force_complete(tx, deadline),
        }
    }

    fn force_complete(&self, tx: TransactionId, deadline: Duration) -> Result<usize> {
        let mut transactions = self.transactions.lock();
        let transaction = transactions
            .get_mut(&tx)
            .ok_or(CommandError::TransactionNotFound(tx))?;

        let mut outstanding: Vec<OpId> = transaction
            .issued
            .difference(&transaction.completed)
            .copied()
            .collect();
        outstanding.sort();

        for op in &outstanding {
            transaction.outcome.failures.push(OpFailure::new(
                *op,
                StatusCode::BadTimeout,
                format!("deadline of {}ms expired", deadline.as_millis()),
            ));
            transaction.mark_completed(*op);
        }

        if !outstanding.is_empty() {
            tracing::warn!(
                transaction_id = %tx,
                forced = outstanding.len(),
                "Transaction deadline expired, outstanding operations force-completed"
            );
        }
        Ok(outstanding.len())
    }

    /// Remove `tx` and hand back what it accumulated.
    pub fn take_outcome(&self, tx: TransactionId) -> Result<TransactionOutcome> {
        self.transactions
            .lock()
            .remove(&tx)
            .map(|t| t.outcome)
            .ok_or(CommandError::TransactionNotFound(tx))
    }

    pub fn remove(&self, tx: TransactionId) -> bool {
        self.transactions.lock().remove(&tx).is_some()
    }

    /// Number of registered transactions.
    pub fn len(&self) -> usize {
        self.transactions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TransactionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_transaction_is_finished() {
        let table = TransactionTable::new();
        let tx = table.begin();
        assert!(table.is_finished(tx).unwrap());
    }

    #[test]
    fn test_complete_until_finished() {
        let table = TransactionTable::new();
        let tx = table.begin();
        let a = table.new_op_id(tx).unwrap();
        let b = table.new_op_id(tx).unwrap();
        assert_ne!(a, b);
        assert!(!table.is_finished(tx).unwrap());

        table
            .complete(tx, b, vec![Reading::new("D1", "humidity", 40.0)])
            .unwrap();
        assert!(!table.is_finished(tx).unwrap());
        table
            .complete(tx, a, vec![Reading::new("D1", "temp", 21.5)])
            .unwrap();
        assert!(table.is_finished(tx).unwrap());

        let outcome = table.take_outcome(tx).unwrap();
        // completion order, not issue order
        assert_eq!(outcome.readings[0].resource_name, "humidity");
        assert_eq!(outcome.readings[1].resource_name, "temp");
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_completion_rejected() {
        let table = TransactionTable::new();
        let tx = table.begin();
        let a = table.new_op_id(tx).unwrap();
        let _b = table.new_op_id(tx).unwrap();

        table.complete(tx, a, vec![Reading::new("D1", "temp", 1.0)]).unwrap();
        let err = table
            .complete(tx, a, vec![Reading::new("D1", "temp", 1.0)])
            .unwrap_err();
        assert!(matches!(err, CommandError::DuplicateCompletion { .. }));

        let err = table
            .fail(tx, OpFailure::new(a, StatusCode::BadTimeout, "late"))
            .unwrap_err();
        assert!(matches!(err, CommandError::DuplicateCompletion { .. }));

        assert_eq!(
            table.progress(tx),
            Some(Progress {
                issued: 2,
                completed: 1
            })
        );
        assert!(!table.is_finished(tx).unwrap());
        assert_eq!(table.take_outcome(tx).unwrap().readings.len(), 1);
    }

    #[test]
    fn test_unknown_operation_rejected() {
        let table = TransactionTable::new();
        let tx = table.begin();
        let other = table.begin();
        let op = table.new_op_id(other).unwrap();

        assert!(matches!(
            table.complete(tx, op, Vec::new()),
            Err(CommandError::UnknownOperation { .. })
        ));
        assert_eq!(table.progress(tx).unwrap().completed, 0);
    }

    #[test]
    fn test_unknown_transaction() {
        let table = TransactionTable::new();
        let tx = TransactionId::new();
        assert_eq!(
            table.new_op_id(tx),
            Err(CommandError::TransactionNotFound(tx))
        );
        assert!(!table.remove(tx));
    }

    #[tokio::test]
    async fn test_await_finished_wakes_on_completion() {
        let table = Arc::new(TransactionTable::new());
        let tx = table.begin();
        let op = table.new_op_id(tx).unwrap();

        let completer = {
            let table = table.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                table.complete(tx, op, vec![Reading::new("D1", "temp", 21.5)])
            })
        };

        let forced = table
            .await_finished(tx, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(forced, 0);
        tokio_test::assert_ok!(completer.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_force_completes_outstanding() {
        let table = TransactionTable::new();
        let tx = table.begin();
        let done = table.new_op_id(tx).unwrap();
        let stuck = table.new_op_id(tx).unwrap();
        table.complete(tx, done, vec![Reading::new("D1", "temp", 21.5)]).unwrap();

        let forced = table
            .await_finished(tx, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(forced, 1);
        assert!(table.is_finished(tx).unwrap());

        // a late answer cannot complete the op a second time
        assert!(table.complete(tx, stuck, Vec::new()).is_err());

        let outcome = table.take_outcome(tx).unwrap();
        assert_eq!(outcome.readings.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].op_id, stuck);
        assert_eq!(outcome.failures[0].kind, FailureKind::TransportTimeout);
    }

    #[tokio::test]
    async fn test_await_removed_transaction() {
        let table = Arc::new(TransactionTable::new());
        let tx = table.begin();
        table.new_op_id(tx).unwrap();

        let remover = {
            let table = table.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                table.remove(tx)
            })
        };

        let result = table.await_finished(tx, Duration::from_secs(5)).await;
        assert_eq!(result, Err(CommandError::TransactionNotFound(tx)));
        assert!(remover.await.unwrap());
    }
}
