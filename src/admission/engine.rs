/// Admission of queued transactions into the verified ledger
use crate::config::AdmissionConfig;
use crate::error::AdmissionError;
use crate::locks::HashLockTable;
use crate::persistence::{LedgerStore, QueueStore, StatusStore};
use crate::transaction::{LedgerRow, TxDecoder, TxHash};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Moves transactions from the intake queue into the ledger, or rejects them.
///
/// Clones share the stores and the per-hash lock table, so a clone can be
/// handed to each worker thread.
#[derive(Clone)]
pub struct AdmissionEngine {
    pub(super) queue: Arc<dyn QueueStore>,
    pub(super) ledger: Arc<dyn LedgerStore>,
    pub(super) status: Arc<dyn StatusStore>,
    pub(super) decoder: Arc<dyn TxDecoder>,
    pub(super) locks: Arc<HashLockTable>,
    pub(super) config: AdmissionConfig,
}

impl AdmissionEngine {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        ledger: Arc<dyn LedgerStore>,
        status: Arc<dyn StatusStore>,
        decoder: Arc<dyn TxDecoder>,
        config: AdmissionConfig,
    ) -> Self {
        AdmissionEngine {
            queue,
            ledger,
            status,
            decoder,
            locks: Arc::new(HashLockTable::new()),
            config,
        }
    }

    /// Builds an engine over a single backend that holds all three tables.
    pub fn with_store<S>(
        store: Arc<S>,
        decoder: Arc<dyn TxDecoder>,
        config: AdmissionConfig,
    ) -> Self
    where
        S: QueueStore + LedgerStore + StatusStore + 'static,
    {
        Self::new(store.clone(), store.clone(), store, decoder, config)
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    pub fn locks(&self) -> &HashLockTable {
        &self.locks
    }

    /// Admits `raw` under `hash`.
    ///
    /// Validation-class failures consume the queue entry through [`Self::reject`].
    /// `Persistence` leaves the entry queued. `Cleanup` means the ledger row was
    /// committed but the entry could not be removed.
    pub fn admit(&self, hash: &TxHash, raw: &[u8], is_local: bool) -> Result<(), AdmissionError> {
        let _guard = self.locks.acquire(*hash);
        let _span =
            tracing::debug_span!("admit", hash = %hex::encode(hash), local = is_local).entered();
        self.admit_locked(hash, raw)
    }

    pub(super) fn admit_locked(&self, hash: &TxHash, raw: &[u8]) -> Result<(), AdmissionError> {
        let decoded = match self.decoder.decode(raw) {
            Ok(decoded) => decoded,
            Err(e) => return Err(self.refuse(hash, AdmissionError::Validation(e.to_string()))),
        };

        let key_id = if self.decoder.is_privileged(decoded.tx_type) {
            decoded.key_id
        } else {
            match &decoded.header {
                Some(header) => header.key_id,
                None => {
                    error!(tx_type = decoded.tx_type, "tx header is nil");
                    return Err(self.refuse(hash, AdmissionError::MissingHeader));
                }
            }
        };

        if key_id == 0 {
            return Err(self.refuse(hash, AdmissionError::UndefinedOwner));
        }

        // Usually a miss; a hit means this hash was admitted before and is being replayed.
        let previous = self.ledger.get_transaction(hash).map_err(|e| {
            error!(error = %e, "getting transaction by hash");
            AdmissionError::Persistence(e)
        })?;
        let counter = previous.map_or(0, |row| row.counter) + 1;

        let row = LedgerRow {
            hash: *hash,
            data: raw.to_vec(),
            tx_type: decoded.tx_type,
            key_id,
            counter,
            verified: true,
            used: false,
        };
        self.ledger.rewrite_transaction(&row).map_err(|e| {
            error!(error = %e, "writing verified transaction");
            AdmissionError::Persistence(e)
        })?;

        self.clear_queue_after_commit(hash)?;

        debug!(key_id, counter, "transaction admitted");
        Ok(())
    }

    /// Records `err` through the rejection path and returns what the caller should see.
    fn refuse(&self, hash: &TxHash, err: AdmissionError) -> AdmissionError {
        warn!(error = %err, "rejecting transaction");
        match self.reject_locked(hash, &err.to_string()) {
            Ok(()) => err,
            Err(reject_err) => {
                error!(error = %reject_err, cause = %err, "recording rejection");
                reject_err
            }
        }
    }

    fn clear_queue_after_commit(&self, hash: &TxHash) -> Result<(), AdmissionError> {
        let attempts = self.config.cleanup_attempts.max(1);
        let delay = Duration::from_millis(self.config.cleanup_retry_delay_ms);

        let mut attempt = 1;
        loop {
            match self.remove_from_queue_locked(hash) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(attempt, error = %e, "queue cleanup failed, retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    error!(attempts, error = %e, "deleting transaction from queue");
                    return Err(AdmissionError::Cleanup(e));
                }
            }
        }
    }
}
