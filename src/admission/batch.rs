/// Sequential admission of everything currently queued
use super::engine::AdmissionEngine;
use crate::error::AdmissionError;
use tracing::{debug, error, info};

impl AdmissionEngine {
    /// Admits every pending entry in intake order and returns how many were admitted.
    ///
    /// Stops at the first failure; entries after it stay queued for the next pass.
    pub fn drain_pending(&self) -> Result<usize, AdmissionError> {
        let pending = self.queue.list_pending_unused().map_err(|e| {
            error!(error = %e, "getting all unverified and unused transactions");
            AdmissionError::Persistence(e)
        })?;

        let total = pending.len();
        let mut admitted = 0;
        for entry in pending {
            if let Err(e) = self.admit(&entry.hash, &entry.data, false) {
                error!(
                    hash = %hex::encode(entry.hash),
                    error = %e,
                    admitted,
                    remaining = total - admitted - 1,
                    "batch stopped"
                );
                return Err(e);
            }
            debug!(hash = %hex::encode(entry.hash), "transaction parsed successfully");
            admitted += 1;
        }

        if total > 0 {
            info!(admitted, "drained pending queue");
        }
        Ok(admitted)
    }
}
