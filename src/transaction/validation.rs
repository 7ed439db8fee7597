/// Structural and signature validation of transaction envelopes
use crate::config::AdmissionConfig;
use crate::crypto::{key_id_from_public_key, verify_signature};
use crate::error::ChainError;
use crate::transaction::types::{
    DecodedTx, TxEnvelope, MAX_TRANSACTION_SIZE, TX_TYPE_FIRST_BLOCK, TX_TYPE_STOP_NETWORK,
};
use std::collections::HashSet;

/// Turns raw queued bytes into the fields needed for admission.
pub trait TxDecoder: Send + Sync {
    /// Decodes and validates an envelope. The error message is what a local
    /// submitter will see in the transaction status.
    fn decode(&self, raw: &[u8]) -> Result<DecodedTx, ChainError>;

    /// System types take their owner from the envelope instead of a header.
    fn is_privileged(&self, tx_type: u8) -> bool;
}

/// Decoder for bincode [`TxEnvelope`]s signed with secp256k1.
#[derive(Debug, Clone)]
pub struct EnvelopeDecoder {
    privileged_types: HashSet<u8>,
    max_tx_size: usize,
    max_future_secs: i64,
}

impl Default for EnvelopeDecoder {
    fn default() -> Self {
        EnvelopeDecoder {
            privileged_types: [TX_TYPE_FIRST_BLOCK, TX_TYPE_STOP_NETWORK].into_iter().collect(),
            max_tx_size: MAX_TRANSACTION_SIZE,
            max_future_secs: 600,
        }
    }
}

impl EnvelopeDecoder {
    pub fn from_config(config: &AdmissionConfig) -> Self {
        EnvelopeDecoder {
            privileged_types: config.privileged_types.iter().copied().collect(),
            max_tx_size: config.max_tx_size,
            max_future_secs: config.max_future_secs,
        }
    }

    fn check_size(&self, raw: &[u8]) -> Result<(), ChainError> {
        if raw.is_empty() {
            return Err(ChainError::InvalidTransaction(
                "Empty transaction".to_string(),
            ));
        }
        if raw.len() > self.max_tx_size {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction too large: {} bytes (max: {})",
                raw.len(),
                self.max_tx_size
            )));
        }
        Ok(())
    }

    fn check_header(&self, envelope: &TxEnvelope) -> Result<(), ChainError> {
        let header = match &envelope.header {
            Some(header) => header,
            None => return Ok(()),
        };

        let message = envelope.signable_message(header.key_id, header.time);
        verify_signature(&header.public_key, &message, &header.signature)?;

        // Zero is left for the engine to classify as an undefined owner.
        if header.key_id != 0 && header.key_id != key_id_from_public_key(&header.public_key) {
            return Err(ChainError::InvalidTransaction(format!(
                "Header keyID {} does not match public key",
                header.key_id
            )));
        }

        let now = chrono::Utc::now().timestamp();
        if header.time > now.saturating_add(self.max_future_secs) {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction time {} is too far in the future (now: {})",
                header.time, now
            )));
        }

        Ok(())
    }
}

impl TxDecoder for EnvelopeDecoder {
    fn decode(&self, raw: &[u8]) -> Result<DecodedTx, ChainError> {
        self.check_size(raw)?;
        let envelope = TxEnvelope::from_bytes(raw)?;
        self.check_header(&envelope)?;

        Ok(DecodedTx {
            tx_type: envelope.tx_type,
            key_id: envelope.key_id,
            header: envelope.header,
        })
    }

    fn is_privileged(&self, tx_type: u8) -> bool {
        self.privileged_types.contains(&tx_type)
    }
}
