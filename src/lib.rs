//! Ledgergate - admission of queued transactions into a verified ledger
//!
//! # Architecture
//!
//! ## Admission Pipeline
//! - [`admission`] - Admission engine, rejection handler, queue reaper, batch driver
//! - [`locks`] - Per-hash mutual exclusion
//!
//! ## Transactions
//! - [`transaction`] - Envelope types, decoding and signature validation
//! - [`crypto`] - Signatures and key ids (secp256k1)
//!
//! ## State Management
//! - [`persistence`] - Queue, ledger and status stores (SQLite, in-memory)
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Admission Pipeline
// ============================================================================
pub mod admission;
pub mod locks;

// ============================================================================
// Transactions
// ============================================================================
pub mod crypto;
pub mod transaction;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

pub use admission::AdmissionEngine;
pub use error::{AdmissionError, ChainError};
