//! Integration tests for the admission pipeline over an on-disk SQLite database
//!
//! These tests drive real signed envelopes through the default decoder and the
//! rusqlite-backed stores.

use ledgergate::admission::AdmissionEngine;
use ledgergate::config::AdmissionConfig;
use ledgergate::crypto::KeyPair;
use ledgergate::persistence::{Database, LedgerStore, QueueStore, StatusStore};
use ledgergate::transaction::{
    EnvelopeDecoder, QueueEntry, TxEnvelope, TX_TYPE_CONTRACT, TX_TYPE_FIRST_BLOCK,
};
use ledgergate::transaction::{StatusRecord, TxHash};
use ledgergate::{AdmissionError, ChainError};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Helper to open a fresh database with an engine over it
fn setup() -> Result<(TempDir, Arc<Database>, AdmissionEngine), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = dir.path().join("ledger.db");
    let db = Arc::new(Database::open(path.to_str().ok_or("non-utf8 temp path")?)?);
    let config = AdmissionConfig::default();
    let decoder = Arc::new(EnvelopeDecoder::from_config(&config));
    let engine = AdmissionEngine::with_store(db.clone(), decoder, config);
    Ok((dir, db, engine))
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn signed_tx(keypair: &KeyPair, payload: &[u8]) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    Ok(TxEnvelope::new(TX_TYPE_CONTRACT, payload.to_vec())
        .sign(keypair, now())?
        .to_bytes()?)
}

fn enqueue(
    db: &Database,
    raw: Vec<u8>,
    from_gate: bool,
) -> Result<QueueEntry, Box<dyn std::error::Error>> {
    let entry = QueueEntry::new(raw, from_gate);
    db.enqueue(&entry)?;
    Ok(entry)
}

/// Status table that refuses every write, as a full disk would.
struct ReadOnlyStatus {
    db: Arc<Database>,
}

impl StatusStore for ReadOnlyStatus {
    fn set_error(&self, _hash: &TxHash, _message: &str) -> Result<(), ChainError> {
        Err(ChainError::DatabaseError("disk full".to_string()))
    }

    fn get_status(&self, hash: &TxHash) -> Result<Option<StatusRecord>, ChainError> {
        self.db.get_status(hash)
    }
}

#[test]
fn test_signed_transaction_is_admitted() -> TestResult {
    let (_dir, db, engine) = setup()?;
    let keypair = KeyPair::generate()?;
    let entry = enqueue(&db, signed_tx(&keypair, b"pay 5")?, false)?;

    engine.admit(&entry.hash, &entry.data, true)?;

    let row = db.get_transaction(&entry.hash)?.ok_or("ledger row missing")?;
    assert_eq!(row.key_id, keypair.key_id());
    assert_eq!(row.counter, 1);
    assert!(row.verified);
    assert_eq!(row.data, entry.data);
    assert!(db.get_queued(&entry.hash)?.is_none());
    assert!(db.get_status(&entry.hash)?.is_none());
    Ok(())
}

#[test]
fn test_readmission_bumps_counter() -> TestResult {
    let (_dir, db, engine) = setup()?;
    let keypair = KeyPair::generate()?;
    let entry = enqueue(&db, signed_tx(&keypair, b"retry me")?, false)?;

    engine.admit(&entry.hash, &entry.data, false)?;
    db.enqueue(&entry)?;
    engine.admit(&entry.hash, &entry.data, false)?;

    let row = db.get_transaction(&entry.hash)?.ok_or("ledger row missing")?;
    assert_eq!(row.counter, 2);
    Ok(())
}

#[test]
fn test_forged_signature_is_rejected_with_status() -> TestResult {
    let (_dir, db, engine) = setup()?;
    let keypair = KeyPair::generate()?;
    let mut envelope = TxEnvelope::new(TX_TYPE_CONTRACT, b"pay 5".to_vec()).sign(&keypair, now())?;
    envelope.payload = b"pay 500".to_vec();
    let entry = enqueue(&db, envelope.to_bytes()?, false)?;

    let err = engine.admit(&entry.hash, &entry.data, true).unwrap_err();
    assert!(matches!(err, AdmissionError::Validation(_)));

    let status = db.get_status(&entry.hash)?.ok_or("status missing")?;
    assert!(status.error.contains("Signature verification failed"));
    assert!(db.get_queued(&entry.hash)?.is_none());
    assert!(db.get_transaction(&entry.hash)?.is_none());
    Ok(())
}

#[test]
fn test_bridge_failure_leaves_no_status() -> TestResult {
    let (_dir, db, engine) = setup()?;
    let entry = enqueue(&db, b"not an envelope".to_vec(), true)?;

    let err = engine.admit(&entry.hash, &entry.data, false).unwrap_err();
    assert!(err.is_rejection());
    assert!(db.get_queued(&entry.hash)?.is_none());
    assert!(db.get_status(&entry.hash)?.is_none());
    Ok(())
}

#[test]
fn test_unsigned_contract_call_is_missing_header() -> TestResult {
    let (_dir, db, engine) = setup()?;
    let raw = TxEnvelope::new(TX_TYPE_CONTRACT, b"no header".to_vec())
        .with_key_id(42)
        .to_bytes()?;
    let entry = enqueue(&db, raw, false)?;

    let err = engine.admit(&entry.hash, &entry.data, true).unwrap_err();
    assert!(matches!(err, AdmissionError::MissingHeader));
    assert!(db.get_transaction(&entry.hash)?.is_none());
    assert!(db.get_queued(&entry.hash)?.is_none());
    Ok(())
}

#[test]
fn test_zero_owner_is_undefined() -> TestResult {
    let (_dir, db, engine) = setup()?;
    let keypair = KeyPair::generate()?;
    let raw = TxEnvelope::new(TX_TYPE_CONTRACT, b"anonymous".to_vec())
        .sign_as(&keypair, 0, now())?
        .to_bytes()?;
    let entry = enqueue(&db, raw, false)?;

    let err = engine.admit(&entry.hash, &entry.data, true).unwrap_err();
    assert!(matches!(err, AdmissionError::UndefinedOwner));
    assert!(db.get_transaction(&entry.hash)?.is_none());
    assert!(db.get_queued(&entry.hash)?.is_none());
    assert_eq!(
        db.get_status(&entry.hash)?.ok_or("status missing")?.error,
        "undefined keyID"
    );
    Ok(())
}

#[test]
fn test_system_transaction_without_header() -> TestResult {
    let (_dir, db, engine) = setup()?;
    let raw = TxEnvelope::new(TX_TYPE_FIRST_BLOCK, b"genesis".to_vec())
        .with_key_id(1001)
        .to_bytes()?;
    let entry = enqueue(&db, raw, false)?;

    engine.admit(&entry.hash, &entry.data, false)?;
    let row = db.get_transaction(&entry.hash)?.ok_or("ledger row missing")?;
    assert_eq!(row.key_id, 1001);
    assert_eq!(row.tx_type, TX_TYPE_FIRST_BLOCK);
    Ok(())
}

#[test]
fn test_reject_is_idempotent_and_truncates() -> TestResult {
    let (_dir, db, engine) = setup()?;
    let entry = enqueue(&db, b"whatever".to_vec(), false)?;
    let message: String = std::iter::repeat('x').take(300).collect();

    engine.reject(&entry.hash, &message)?;
    engine.reject(&entry.hash, &message)?;

    let status = db.get_status(&entry.hash)?.ok_or("status missing")?;
    assert_eq!(status.error.len(), 255);
    assert_eq!(status.error, message[..255]);
    assert!(db.get_queued(&entry.hash)?.is_none());
    Ok(())
}

#[test]
fn test_drain_admits_in_order_and_skips_used() -> TestResult {
    let (_dir, db, engine) = setup()?;
    let keypair = KeyPair::generate()?;
    let entries = (0..3)
        .map(|i| enqueue(&db, signed_tx(&keypair, format!("pay {}", i).as_bytes())?, false))
        .collect::<Result<Vec<_>, _>>()?;

    assert_eq!(engine.drain_pending()?, 3);
    for entry in &entries {
        assert!(db.get_transaction(&entry.hash)?.is_some());
    }
    assert!(db.list_pending_unused()?.is_empty());

    // A block consumed the first one; a stale requeue must not be admitted again.
    db.mark_used(&[entries[0].hash])?;
    db.enqueue(&entries[0])?;
    assert_eq!(engine.drain_pending()?, 0);
    Ok(())
}

#[test]
fn test_drain_stops_at_first_rejection() -> TestResult {
    let (_dir, db, engine) = setup()?;
    let keypair = KeyPair::generate()?;
    let first = enqueue(&db, signed_tx(&keypair, b"one")?, false)?;
    let bad = enqueue(&db, b"garbage".to_vec(), false)?;
    let third = enqueue(&db, signed_tx(&keypair, b"three")?, false)?;

    let err = engine.drain_pending().unwrap_err();
    assert!(err.is_rejection());

    assert!(db.get_transaction(&first.hash)?.is_some());
    assert!(db.get_queued(&bad.hash)?.is_none());
    assert!(db.get_status(&bad.hash)?.is_some());
    assert!(db.get_queued(&third.hash)?.is_some());

    assert_eq!(engine.drain_pending()?, 1);
    Ok(())
}

#[test]
fn test_parallel_workers_on_shared_database() -> TestResult {
    let (_dir, db, engine) = setup()?;
    let keypair = KeyPair::generate()?;
    let entries = (0..12)
        .map(|i| enqueue(&db, signed_tx(&keypair, format!("tx {}", i).as_bytes())?, false))
        .collect::<Result<Vec<_>, _>>()?;

    let handles: Vec<_> = entries
        .iter()
        .cloned()
        .map(|entry| {
            let engine = engine.clone();
            thread::spawn(move || engine.admit(&entry.hash, &entry.data, false))
        })
        .collect();
    for handle in handles {
        handle.join().map_err(|_| "worker panicked")??;
    }

    assert!(db.list_pending_unused()?.is_empty());
    for entry in &entries {
        let row = db.get_transaction(&entry.hash)?.ok_or("ledger row missing")?;
        assert_eq!(row.counter, 1);
    }
    Ok(())
}

#[test]
fn test_failed_status_write_leaves_entry_for_retry() -> TestResult {
    let (_dir, db, healthy) = setup()?;
    let config = AdmissionConfig::default();
    let decoder = Arc::new(EnvelopeDecoder::from_config(&config));
    let status = Arc::new(ReadOnlyStatus { db: db.clone() });
    let engine = AdmissionEngine::new(db.clone(), db.clone(), status, decoder, config);
    let entry = enqueue(&db, b"garbage".to_vec(), false)?;

    let err = engine
        .admit(&entry.hash, &entry.data, true)
        .expect_err("status write must fail");
    assert!(matches!(err, AdmissionError::Persistence(_)));
    assert!(err.is_retryable());
    assert!(db.get_queued(&entry.hash)?.is_some());
    assert!(db.get_status(&entry.hash)?.is_none());
    assert!(db.get_transaction(&entry.hash)?.is_none());

    // Once the status table accepts writes the entry is rejected for good.
    let err = healthy.drain_pending().expect_err("garbage is rejected on retry");
    assert!(err.is_rejection());
    assert!(db.get_queued(&entry.hash)?.is_none());
    assert!(db.get_status(&entry.hash)?.is_some());
    Ok(())
}
