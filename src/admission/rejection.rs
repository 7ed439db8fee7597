/// Rejection of transactions that failed validation
use super::engine::AdmissionEngine;
use crate::error::AdmissionError;
use crate::transaction::TxHash;
use tracing::{error, warn};

/// Cuts `message` to at most `max_chars` characters.
pub fn truncate_error(message: &str, max_chars: usize) -> &str {
    match message.char_indices().nth(max_chars) {
        Some((end, _)) => &message[..end],
        None => message,
    }
}

impl AdmissionEngine {
    /// Records `message` as the terminal status of `hash`, unless it came
    /// through a bridge, then drops it from the queue.
    ///
    /// Safe to repeat: a second call finds no queue entry and overwrites the
    /// same status record.
    pub fn reject(&self, hash: &TxHash, message: &str) -> Result<(), AdmissionError> {
        let _guard = self.locks.acquire(*hash);
        let _span = tracing::debug_span!("reject", hash = %hex::encode(hash)).entered();
        self.reject_locked(hash, message)
    }

    pub(super) fn reject_locked(
        &self,
        hash: &TxHash,
        message: &str,
    ) -> Result<(), AdmissionError> {
        let message = truncate_error(message, self.config.max_error_len);

        // The entry may already be gone after a partial earlier attempt.
        let from_gate = match self.queue.get_queued(hash) {
            Ok(Some(entry)) => entry.from_gate,
            Ok(None) => {
                warn!("rejected transaction is not in the queue");
                false
            }
            Err(e) => {
                error!(error = %e, "getting tx by hash from queue");
                false
            }
        };

        // Status goes first: if it fails the entry is still queued for a later pass.
        if !from_gate {
            self.status.set_error(hash, message).map_err(|e| {
                error!(error = %e, "setting transaction status error");
                AdmissionError::Persistence(e)
            })?;
        }

        self.remove_from_queue_locked(hash).map_err(|e| {
            error!(error = %e, "deleting rejected transaction from queue");
            AdmissionError::Persistence(e)
        })
    }
}
