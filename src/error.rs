//! Error types for Ledgergate

use thiserror::Error;

/// Failures reported by collaborators: storage, decoding, crypto.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Cryptographic error: {0}")]
    CryptoError(String),
    #[error("Bincode error: {0}")]
    BincodeError(String),
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::BincodeError(err.to_string())
    }
}

/// Outcome classification of a single admission attempt.
///
/// The first three variants mean the submitted bytes are unacceptable: the
/// transaction has been consumed from the queue and will not be retried.
/// `Persistence` means the attempt failed but the queue entry is intact.
/// `Cleanup` means the ledger commit succeeded and only the queue removal failed.
#[derive(Debug, Clone, Error)]
pub enum AdmissionError {
    #[error("{0}")]
    Validation(String),
    #[error("transaction header is missing")]
    MissingHeader,
    #[error("undefined keyID")]
    UndefinedOwner,
    #[error("persistence failure: {0}")]
    Persistence(ChainError),
    #[error("queue cleanup failed after ledger commit: {0}")]
    Cleanup(ChainError),
}

impl AdmissionError {
    /// True for errors that are routed through the rejection handler.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AdmissionError::Validation(_)
                | AdmissionError::MissingHeader
                | AdmissionError::UndefinedOwner
        )
    }

    /// True when the transaction is still queued and a later pass may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdmissionError::Persistence(_))
    }

    /// True when the ledger row was durably committed despite the error.
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionError::Cleanup(_))
    }
}

impl From<ChainError> for AdmissionError {
    fn from(err: ChainError) -> Self {
        AdmissionError::Persistence(err)
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let db = ChainError::DatabaseError("disk full".to_string());

        assert!(AdmissionError::Validation("bad".into()).is_rejection());
        assert!(AdmissionError::MissingHeader.is_rejection());
        assert!(AdmissionError::UndefinedOwner.is_rejection());
        assert!(!AdmissionError::Persistence(db.clone()).is_rejection());

        assert!(AdmissionError::Persistence(db.clone()).is_retryable());
        assert!(!AdmissionError::UndefinedOwner.is_retryable());

        assert!(AdmissionError::Cleanup(db.clone()).is_admitted());
        assert!(!AdmissionError::Persistence(db).is_admitted());
    }

    #[test]
    fn test_display() {
        assert_eq!(AdmissionError::UndefinedOwner.to_string(), "undefined keyID");
        let err = AdmissionError::Persistence(ChainError::DatabaseError("locked".into()));
        assert_eq!(err.to_string(), "persistence failure: Database error: locked");
    }
}
