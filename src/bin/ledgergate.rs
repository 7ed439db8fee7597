#![forbid(unsafe_code)]
//! Command line front end for the admission pipeline

use clap::{Parser, Subcommand};
use colored::*;
use ledgergate::admission::AdmissionEngine;
use ledgergate::config::{load_config_from, Config, DEFAULT_CONFIG_PATH};
use ledgergate::crypto::KeyPair;
use ledgergate::persistence::{Database, LedgerStore, QueueStore, StatusStore};
use ledgergate::transaction::{tx_hash, EnvelopeDecoder, QueueEntry, TxEnvelope, TxHash};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queues a hex-encoded raw transaction
    Enqueue {
        data: String,
        /// Mark the transaction as received through a bridge
        #[arg(long)]
        from_gate: bool,
    },
    /// Admits one queued transaction
    Admit { hash: String },
    /// Admits everything currently queued
    Drain,
    /// Drains the queue on a fixed interval until interrupted
    Run {
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },
    /// Rejects a queued transaction with an error message
    Reject { hash: String, message: String },
    /// Prints the recorded error for a transaction, if any
    Status { hash: String },
    /// Prints the queue and ledger state of a transaction
    Show { hash: String },
    /// Builds a signed transaction envelope
    Sign {
        #[arg(long)]
        tx_type: u8,
        #[arg(long)]
        payload: String,
        /// Hex secret key to sign with; a fresh key is generated when omitted
        #[arg(long)]
        secret: Option<String>,
    },
}

fn parse_hash(hex_str: &str) -> Result<TxHash, Box<dyn std::error::Error>> {
    let bytes = hex::decode(hex_str)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| format!("Hash must be 32 bytes, got {}", len).into())
}

fn init_tracing(config: &Config) {
    let level = config
        .logging
        .level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn open_pipeline(
    config: &Config,
) -> Result<(Arc<Database>, AdmissionEngine), Box<dyn std::error::Error>> {
    if let Some(parent) = Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create data dir {:?}: {}", parent, e))?;
        }
    }
    let db = Arc::new(Database::open(&config.database.path)?);
    let decoder = Arc::new(EnvelopeDecoder::from_config(&config.admission));
    let engine = AdmissionEngine::with_store(db.clone(), decoder, config.admission.clone());
    Ok((db, engine))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config_from(&cli.config)?;
    init_tracing(&config);

    if let Commands::Sign {
        tx_type,
        payload,
        secret,
    } = &cli.command
    {
        return sign(*tx_type, payload, secret.as_deref());
    }

    let (db, engine) = open_pipeline(&config)?;

    match cli.command {
        Commands::Sign { .. } => {}
        Commands::Enqueue { data, from_gate } => {
            let entry = QueueEntry::new(hex::decode(data.trim())?, from_gate);
            db.enqueue(&entry)?;
            println!("{} {}", "Queued".bright_green(), hex::encode(entry.hash));
        }
        Commands::Admit { hash } => {
            let hash = parse_hash(&hash)?;
            let entry = db
                .get_queued(&hash)?
                .ok_or_else(|| format!("Transaction {} is not queued", hex::encode(hash)))?;
            match engine.admit(&entry.hash, &entry.data, !entry.from_gate) {
                Ok(()) => println!("{} {}", "Admitted".bright_green(), hex::encode(hash)),
                Err(e) if e.is_admitted() => {
                    println!("{} {} ({})", "Admitted".bright_yellow(), hex::encode(hash), e)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Drain => {
            let admitted = engine.drain_pending()?;
            println!("{} {} transaction(s)", "Admitted".bright_green(), admitted);
        }
        Commands::Run { interval_secs } => run(engine, interval_secs).await,
        Commands::Reject { hash, message } => {
            let hash = parse_hash(&hash)?;
            engine.reject(&hash, &message)?;
            println!("{} {}", "Rejected".bright_red(), hex::encode(hash));
        }
        Commands::Status { hash } => {
            let hash = parse_hash(&hash)?;
            match db.get_status(&hash)? {
                Some(record) => println!("{} {}", "Error:".bright_red(), record.error),
                None => println!("{}", "No error recorded".bright_green()),
            }
        }
        Commands::Show { hash } => {
            let hash = parse_hash(&hash)?;
            let queued = db.get_queued(&hash)?;
            let row = db.get_transaction(&hash)?;
            let status = db.get_status(&hash)?;
            let view = serde_json::json!({
                "hash": hex::encode(hash),
                "queued": queued.map(|q| serde_json::json!({
                    "from_gate": q.from_gate,
                    "received_at": q.received_at,
                    "size": q.data.len(),
                })),
                "ledger": row.map(|r| serde_json::json!({
                    "tx_type": r.tx_type,
                    "key_id": r.key_id,
                    "counter": r.counter,
                    "verified": r.verified,
                    "used": r.used,
                })),
                "error": status.map(|s| s.error),
            });
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }

    Ok(())
}

async fn run(engine: AdmissionEngine, interval_secs: u64) {
    info!("Draining queue every {}s", interval_secs);
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        let worker = engine.clone();
        match tokio::task::spawn_blocking(move || worker.drain_pending()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("Drain pass failed: {}", e),
            Err(e) => error!("Drain task panicked: {}", e),
        }
    }
}

fn sign(
    tx_type: u8,
    payload: &str,
    secret: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let keypair = match secret {
        Some(secret) => KeyPair::from_secret_bytes(&hex::decode(secret.trim())?)?,
        None => KeyPair::generate()?,
    };
    let raw = TxEnvelope::new(tx_type, payload.as_bytes().to_vec())
        .with_key_id(keypair.key_id())
        .sign(&keypair, chrono::Utc::now().timestamp())?
        .to_bytes()?;

    println!("{} {}", "key id:".bright_cyan(), keypair.key_id());
    println!("{} {}", "hash:".bright_cyan(), hex::encode(tx_hash(&raw)));
    println!("{}", hex::encode(raw));
    Ok(())
}
