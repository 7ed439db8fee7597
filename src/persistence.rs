//! Database persistence layer for Ledgergate

use crate::error::ChainError;
use crate::transaction::{LedgerRow, QueueEntry, StatusRecord, TxHash};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

/// Intake queue of transactions awaiting admission.
pub trait QueueStore: Send + Sync {
    /// Adds an entry, or refreshes its data if the hash is already queued.
    fn enqueue(&self, entry: &QueueEntry) -> Result<(), ChainError>;
    fn get_queued(&self, hash: &TxHash) -> Result<Option<QueueEntry>, ChainError>;
    /// Removes an entry. Removing an absent hash is not an error.
    fn dequeue(&self, hash: &TxHash) -> Result<(), ChainError>;
    /// Queued entries not linked to a used ledger row, in intake order.
    fn list_pending_unused(&self) -> Result<Vec<QueueEntry>, ChainError>;
}

/// Verified transaction table.
pub trait LedgerStore: Send + Sync {
    fn get_transaction(&self, hash: &TxHash) -> Result<Option<LedgerRow>, ChainError>;
    fn delete_transaction(&self, hash: &TxHash) -> Result<(), ChainError>;
    fn insert_transaction(&self, row: &LedgerRow) -> Result<(), ChainError>;

    /// Replaces whatever row exists for `row.hash` with `row`.
    ///
    /// Stores with transactions override this so the hash never lacks a row.
    fn rewrite_transaction(&self, row: &LedgerRow) -> Result<(), ChainError> {
        self.delete_transaction(&row.hash)?;
        self.insert_transaction(row)
    }

    /// Deletes the row only when it is neither verified nor used.
    fn delete_transaction_if_unused(&self, hash: &TxHash) -> Result<(), ChainError>;

    /// Flags rows as consumed by a confirmed block.
    fn mark_used(&self, hashes: &[TxHash]) -> Result<(), ChainError>;
}

/// Terminal outcome table read by submitters.
pub trait StatusStore: Send + Sync {
    fn set_error(&self, hash: &TxHash, message: &str) -> Result<(), ChainError>;
    fn get_status(&self, hash: &TxHash) -> Result<Option<StatusRecord>, ChainError>;
}

fn hash_from_vec(bytes: Vec<u8>) -> rusqlite::Result<TxHash> {
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            len,
            rusqlite::types::Type::Blob,
            format!("hash must be 32 bytes, got {}", len).into(),
        )
    })
}

fn queue_entry_from_row(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    Ok(QueueEntry {
        hash: hash_from_vec(row.get(0)?)?,
        data: row.get(1)?,
        from_gate: row.get(2)?,
        received_at: row.get(3)?,
    })
}

fn ledger_row_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerRow> {
    let stored: i64 = row.get(4)?;
    let counter = u64::try_from(stored).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Integer, Box::new(e))
    })?;
    Ok(LedgerRow {
        hash: hash_from_vec(row.get(0)?)?,
        data: row.get(1)?,
        tx_type: row.get(2)?,
        key_id: row.get(3)?,
        counter,
        verified: row.get(5)?,
        used: row.get(6)?,
    })
}

const INSERT_TRANSACTION_SQL: &str =
    "INSERT INTO transactions (hash, data, tx_type, key_id, counter, verified, used)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

type InsertParams<'a> = (Vec<u8>, &'a [u8], u8, i64, i64, bool, bool);

fn insert_params(row: &LedgerRow) -> Result<InsertParams<'_>, ChainError> {
    let counter = i64::try_from(row.counter).map_err(|_| {
        ChainError::DatabaseError(format!("Counter {} does not fit in storage", row.counter))
    })?;
    Ok((
        row.hash.to_vec(),
        row.data.as_slice(),
        row.tx_type,
        row.key_id,
        counter,
        row.verified,
        row.used,
    ))
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS queue_tx (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                hash BLOB NOT NULL UNIQUE,
                data BLOB NOT NULL,
                from_gate INTEGER NOT NULL DEFAULT 0,
                received_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create queue_tx table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                hash BLOB PRIMARY KEY,
                data BLOB NOT NULL,
                tx_type INTEGER NOT NULL,
                key_id INTEGER NOT NULL,
                counter INTEGER NOT NULL,
                verified INTEGER NOT NULL DEFAULT 0,
                used INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to create transactions table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS transactions_status (
                hash BLOB PRIMARY KEY,
                error TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to create transactions_status table: {}", e))
        })?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ChainError> {
        self.conn
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))
    }
}

impl QueueStore for Database {
    fn enqueue(&self, entry: &QueueEntry) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO queue_tx (hash, data, from_gate, received_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(hash) DO UPDATE SET data = excluded.data, from_gate = excluded.from_gate",
            params![entry.hash.to_vec(), entry.data, entry.from_gate, entry.received_at],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to enqueue transaction: {}", e)))?;
        Ok(())
    }

    fn get_queued(&self, hash: &TxHash) -> Result<Option<QueueEntry>, ChainError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT hash, data, from_gate, received_at FROM queue_tx WHERE hash = ?1",
            params![hash.to_vec()],
            queue_entry_from_row,
        )
        .optional()
        .map_err(|e| ChainError::DatabaseError(format!("Failed to get queued transaction: {}", e)))
    }

    fn dequeue(&self, hash: &TxHash) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM queue_tx WHERE hash = ?1", params![hash.to_vec()])
            .map_err(|e| {
                ChainError::DatabaseError(format!("Failed to delete queued transaction: {}", e))
            })?;
        Ok(())
    }

    fn list_pending_unused(&self) -> Result<Vec<QueueEntry>, ChainError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT q.hash, q.data, q.from_gate, q.received_at
                 FROM queue_tx q LEFT JOIN transactions t ON t.hash = q.hash
                 WHERE t.used IS NULL OR t.used = 0
                 ORDER BY q.seq ASC",
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], queue_entry_from_row)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query queue: {}", e)))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(
                row.map_err(|e| ChainError::DatabaseError(format!("Failed to read row: {}", e)))?,
            );
        }
        Ok(entries)
    }
}

impl LedgerStore for Database {
    fn get_transaction(&self, hash: &TxHash) -> Result<Option<LedgerRow>, ChainError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT hash, data, tx_type, key_id, counter, verified, used
             FROM transactions WHERE hash = ?1",
            params![hash.to_vec()],
            ledger_row_from_row,
        )
        .optional()
        .map_err(|e| ChainError::DatabaseError(format!("Failed to get transaction: {}", e)))
    }

    fn delete_transaction(&self, hash: &TxHash) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM transactions WHERE hash = ?1", params![hash.to_vec()])
            .map_err(|e| {
                ChainError::DatabaseError(format!("Failed to delete transaction: {}", e))
            })?;
        Ok(())
    }

    fn insert_transaction(&self, row: &LedgerRow) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute(INSERT_TRANSACTION_SQL, insert_params(row)?)
            .map_err(|e| {
                ChainError::DatabaseError(format!("Failed to insert transaction: {}", e))
            })?;
        Ok(())
    }

    fn rewrite_transaction(&self, row: &LedgerRow) -> Result<(), ChainError> {
        let insert = insert_params(row)?;
        let conn_guard = self.lock()?;
        let tx = conn_guard.unchecked_transaction().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to start transaction: {}", e))
        })?;

        tx.execute("DELETE FROM transactions WHERE hash = ?1", params![row.hash.to_vec()])
            .map_err(|e| {
                ChainError::DatabaseError(format!("Failed to delete transaction: {}", e))
            })?;

        tx.execute(INSERT_TRANSACTION_SQL, insert)
            .map_err(|e| {
                ChainError::DatabaseError(format!("Failed to insert transaction: {}", e))
            })?;

        tx.commit().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(())
    }

    fn delete_transaction_if_unused(&self, hash: &TxHash) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM transactions WHERE hash = ?1 AND used = 0 AND verified = 0",
            params![hash.to_vec()],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to delete unused transaction: {}", e))
        })?;
        Ok(())
    }

    fn mark_used(&self, hashes: &[TxHash]) -> Result<(), ChainError> {
        let conn_guard = self.lock()?;
        let tx = conn_guard.unchecked_transaction().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to start transaction: {}", e))
        })?;

        for hash in hashes {
            tx.execute(
                "UPDATE transactions SET used = 1 WHERE hash = ?1",
                params![hash.to_vec()],
            )
            .map_err(|e| {
                ChainError::DatabaseError(format!("Failed to mark transaction used: {}", e))
            })?;
        }

        tx.commit().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(())
    }
}

impl StatusStore for Database {
    fn set_error(&self, hash: &TxHash, message: &str) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO transactions_status (hash, error, updated_at)
             VALUES (?1, ?2, ?3)",
            params![hash.to_vec(), message, chrono::Utc::now().timestamp()],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to set transaction status: {}", e))
        })?;
        Ok(())
    }

    fn get_status(&self, hash: &TxHash) -> Result<Option<StatusRecord>, ChainError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT hash, error, updated_at FROM transactions_status WHERE hash = ?1",
            params![hash.to_vec()],
            |row| {
                Ok(StatusRecord {
                    hash: hash_from_vec(row.get(0)?)?,
                    error: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| ChainError::DatabaseError(format!("Failed to get transaction status: {}", e)))
    }
}

#[derive(Default)]
struct MemoryTables {
    next_seq: u64,
    queue: BTreeMap<u64, QueueEntry>,
    queue_index: HashMap<TxHash, u64>,
    ledger: HashMap<TxHash, LedgerRow>,
    status: HashMap<TxHash, StatusRecord>,
    fail_inserts: HashSet<TxHash>,
    fail_dequeues: HashSet<TxHash>,
    fail_status: HashSet<TxHash>,
}

/// In-memory implementation of all three stores, useful for tests and ephemeral runs.
///
/// Failures can be injected per hash to exercise the error paths of callers.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<MemoryTables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryTables>, ChainError> {
        self.tables
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))
    }

    /// Makes every ledger insert for `hash` fail until cleared.
    pub fn fail_inserts_for(&self, hash: TxHash) -> Result<(), ChainError> {
        self.lock()?.fail_inserts.insert(hash);
        Ok(())
    }

    /// Makes every queue removal for `hash` fail until cleared.
    pub fn fail_dequeues_for(&self, hash: TxHash) -> Result<(), ChainError> {
        self.lock()?.fail_dequeues.insert(hash);
        Ok(())
    }

    /// Makes every status write for `hash` fail until cleared.
    pub fn fail_status_writes_for(&self, hash: TxHash) -> Result<(), ChainError> {
        self.lock()?.fail_status.insert(hash);
        Ok(())
    }

    pub fn clear_failures(&self) -> Result<(), ChainError> {
        let mut tables = self.lock()?;
        tables.fail_inserts.clear();
        tables.fail_dequeues.clear();
        tables.fail_status.clear();
        Ok(())
    }

    pub fn queue_len(&self) -> Result<usize, ChainError> {
        Ok(self.lock()?.queue.len())
    }
}

impl MemoryTables {
    fn insert_row(&mut self, row: &LedgerRow) -> Result<(), ChainError> {
        if self.fail_inserts.contains(&row.hash) {
            return Err(ChainError::DatabaseError(format!(
                "Injected insert failure for {}",
                hex::encode(row.hash)
            )));
        }
        if self.ledger.contains_key(&row.hash) {
            return Err(ChainError::DatabaseError(format!(
                "UNIQUE constraint failed: transactions.hash ({})",
                hex::encode(row.hash)
            )));
        }
        self.ledger.insert(row.hash, row.clone());
        Ok(())
    }
}

impl QueueStore for InMemoryStore {
    fn enqueue(&self, entry: &QueueEntry) -> Result<(), ChainError> {
        let mut tables = self.lock()?;
        if let Some(seq) = tables.queue_index.get(&entry.hash).copied() {
            if let Some(existing) = tables.queue.get_mut(&seq) {
                existing.data = entry.data.clone();
                existing.from_gate = entry.from_gate;
            }
            return Ok(());
        }
        tables.next_seq += 1;
        let seq = tables.next_seq;
        tables.queue.insert(seq, entry.clone());
        tables.queue_index.insert(entry.hash, seq);
        Ok(())
    }

    fn get_queued(&self, hash: &TxHash) -> Result<Option<QueueEntry>, ChainError> {
        let tables = self.lock()?;
        Ok(tables
            .queue_index
            .get(hash)
            .and_then(|seq| tables.queue.get(seq))
            .cloned())
    }

    fn dequeue(&self, hash: &TxHash) -> Result<(), ChainError> {
        let mut tables = self.lock()?;
        if tables.fail_dequeues.contains(hash) {
            return Err(ChainError::DatabaseError(format!(
                "Injected queue delete failure for {}",
                hex::encode(hash)
            )));
        }
        if let Some(seq) = tables.queue_index.remove(hash) {
            tables.queue.remove(&seq);
        }
        Ok(())
    }

    fn list_pending_unused(&self) -> Result<Vec<QueueEntry>, ChainError> {
        let tables = self.lock()?;
        Ok(tables
            .queue
            .values()
            .filter(|entry| !tables.ledger.get(&entry.hash).map_or(false, |row| row.used))
            .cloned()
            .collect())
    }
}

impl LedgerStore for InMemoryStore {
    fn get_transaction(&self, hash: &TxHash) -> Result<Option<LedgerRow>, ChainError> {
        Ok(self.lock()?.ledger.get(hash).cloned())
    }

    fn delete_transaction(&self, hash: &TxHash) -> Result<(), ChainError> {
        self.lock()?.ledger.remove(hash);
        Ok(())
    }

    fn insert_transaction(&self, row: &LedgerRow) -> Result<(), ChainError> {
        self.lock()?.insert_row(row)
    }

    fn rewrite_transaction(&self, row: &LedgerRow) -> Result<(), ChainError> {
        let mut tables = self.lock()?;
        let previous = tables.ledger.remove(&row.hash);
        if let Err(e) = tables.insert_row(row) {
            if let Some(previous) = previous {
                tables.ledger.insert(previous.hash, previous);
            }
            return Err(e);
        }
        Ok(())
    }

    fn delete_transaction_if_unused(&self, hash: &TxHash) -> Result<(), ChainError> {
        let mut tables = self.lock()?;
        let unused = tables
            .ledger
            .get(hash)
            .map_or(false, |row| !row.used && !row.verified);
        if unused {
            tables.ledger.remove(hash);
        }
        Ok(())
    }

    fn mark_used(&self, hashes: &[TxHash]) -> Result<(), ChainError> {
        let mut tables = self.lock()?;
        for hash in hashes {
            if let Some(row) = tables.ledger.get_mut(hash) {
                row.used = true;
            }
        }
        Ok(())
    }
}

impl StatusStore for InMemoryStore {
    fn set_error(&self, hash: &TxHash, message: &str) -> Result<(), ChainError> {
        let mut tables = self.lock()?;
        if tables.fail_status.contains(hash) {
            return Err(ChainError::DatabaseError(format!(
                "Injected status write failure for {}",
                hex::encode(hash)
            )));
        }
        tables.status.insert(
            *hash,
            StatusRecord {
                hash: *hash,
                error: message.to_string(),
                updated_at: chrono::Utc::now().timestamp(),
            },
        );
        Ok(())
    }

    fn get_status(&self, hash: &TxHash) -> Result<Option<StatusRecord>, ChainError> {
        Ok(self.lock()?.status.get(hash).cloned())
    }
}
