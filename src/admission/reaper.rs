/// Queue removal with cleanup of orphaned unverified ledger rows
use super::engine::AdmissionEngine;
use crate::error::{AdmissionError, ChainError};
use crate::transaction::TxHash;
use tracing::error;

impl AdmissionEngine {
    /// Removes `hash` from the queue. A ledger row left unverified and unused
    /// by an earlier failed attempt is deleted too; verified rows are kept.
    pub fn remove_from_queue(&self, hash: &TxHash) -> Result<(), AdmissionError> {
        let _guard = self.locks.acquire(*hash);
        self.remove_from_queue_locked(hash)
            .map_err(AdmissionError::Persistence)
    }

    pub(super) fn remove_from_queue_locked(&self, hash: &TxHash) -> Result<(), ChainError> {
        self.queue.dequeue(hash).map_err(|e| {
            error!(hash = %hex::encode(hash), error = %e, "deleting transaction from queue");
            e
        })?;

        self.ledger.delete_transaction_if_unused(hash).map_err(|e| {
            error!(hash = %hex::encode(hash), error = %e, "deleting transaction if unused");
            e
        })
    }
}
