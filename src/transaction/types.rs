/// Transaction envelope and storage record types
use crate::crypto::{KeyId, KeyPair};
use crate::error::ChainError;
use sha2::{Digest, Sha256};

/// Content identifier of a raw transaction.
pub type TxHash = [u8; 32];

/// Maximum transaction size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

/// System type: genesis data carried by the first block.
pub const TX_TYPE_FIRST_BLOCK: u8 = 1;
/// System type: network halt request.
pub const TX_TYPE_STOP_NETWORK: u8 = 2;
/// Ordinary signed contract call.
pub const TX_TYPE_CONTRACT: u8 = 128;

/// Hash of raw envelope bytes, used as the queue and ledger key.
pub fn tx_hash(raw: &[u8]) -> TxHash {
    Sha256::digest(raw).into()
}

/// Signed header carried by every non-system transaction.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TxHeader {
    pub key_id: KeyId,
    /// Unix seconds at signing time.
    pub time: i64,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Wire form of a transaction, bincode-encoded.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TxEnvelope {
    pub tx_type: u8,
    /// Owner used for system types, which may travel without a header.
    pub key_id: KeyId,
    pub header: Option<TxHeader>,
    pub payload: Vec<u8>,
}

impl TxEnvelope {
    pub fn new(tx_type: u8, payload: Vec<u8>) -> Self {
        TxEnvelope {
            tx_type,
            key_id: 0,
            header: None,
            payload,
        }
    }

    pub fn with_key_id(mut self, key_id: KeyId) -> Self {
        self.key_id = key_id;
        self
    }

    pub fn signable_message(&self, header_key_id: KeyId, time: i64) -> Vec<u8> {
        let mut message = Vec::with_capacity(self.payload.len() + 32);
        message.extend_from_slice("TX:".as_bytes());
        message.push(self.tx_type);
        message.extend_from_slice(&self.key_id.to_le_bytes());
        message.extend_from_slice(&header_key_id.to_le_bytes());
        message.extend_from_slice(&time.to_le_bytes());
        message.extend_from_slice(&self.payload);
        message
    }

    /// Attaches a header signed by `keypair` on behalf of its own key id.
    pub fn sign(self, keypair: &KeyPair, time: i64) -> Result<Self, ChainError> {
        let key_id = keypair.key_id();
        self.sign_as(keypair, key_id, time)
    }

    /// Attaches a header signed by `keypair` claiming `key_id` as owner.
    pub fn sign_as(
        mut self,
        keypair: &KeyPair,
        key_id: KeyId,
        time: i64,
    ) -> Result<Self, ChainError> {
        let message = self.signable_message(key_id, time);
        let signature = keypair.sign(&message)?;
        self.header = Some(TxHeader {
            key_id,
            time,
            public_key: keypair.public_key_bytes().to_vec(),
            signature: signature.to_vec(),
        });
        Ok(self)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ChainError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, ChainError> {
        bincode::deserialize(raw).map_err(|e| {
            ChainError::InvalidTransaction(format!("Malformed transaction envelope: {}", e))
        })
    }
}

/// What the admission engine needs to know about a decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTx {
    pub tx_type: u8,
    pub key_id: KeyId,
    pub header: Option<TxHeader>,
}

/// A transaction waiting in the intake queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub hash: TxHash,
    pub data: Vec<u8>,
    /// Received through an external bridge rather than submitted locally.
    pub from_gate: bool,
    pub received_at: i64,
}

impl QueueEntry {
    pub fn new(data: Vec<u8>, from_gate: bool) -> Self {
        QueueEntry {
            hash: tx_hash(&data),
            data,
            from_gate,
            received_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// An admitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    pub hash: TxHash,
    pub data: Vec<u8>,
    pub tx_type: u8,
    pub key_id: KeyId,
    pub counter: u64,
    pub verified: bool,
    /// Set once a confirmed block has consumed the row.
    pub used: bool,
}

/// Terminal error recorded for a locally submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub hash: TxHash,
    pub error: String,
    pub updated_at: i64,
}
