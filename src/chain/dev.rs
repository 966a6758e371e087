// src/chain/dev.rs

//! Local stand-ins for a node and an account, used by the demo binary and
//! by tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{BlockHeader, NonceSource, Receipt, Signer, TransactionRequest};
use crate::errors::{BotError, Result};
use crate::types::BoxFuture;

/// Emits synthetic block headers on a fixed interval.
#[derive(Debug, Clone)]
pub struct DevChain {
    block_time: Duration,
    start_block: u64,
}

impl DevChain {
    pub fn new(block_time: Duration, start_block: u64) -> Self {
        Self {
            block_time,
            start_block,
        }
    }

    /// Spawn the block producer. It stops when the receiver is dropped.
    pub fn spawn(self) -> (mpsc::Receiver<BlockHeader>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<BlockHeader>(16);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.block_time);
            // The first tick completes immediately.
            ticker.tick().await;

            let mut number = self.start_block;
            let mut parent_hash = block_hash(number.saturating_sub(1));
            loop {
                ticker.tick().await;
                let header = BlockHeader {
                    number,
                    hash: block_hash(number),
                    parent_hash: parent_hash.clone(),
                    timestamp: Utc::now(),
                };
                parent_hash = header.hash.clone();
                debug!(block = number, "dev chain produced block");
                if tx.send(header).await.is_err() {
                    break;
                }
                number += 1;
            }
        });

        (rx, handle)
    }
}

fn block_hash(number: u64) -> String {
    format!("0x{}", blake3::hash(&number.to_be_bytes()).to_hex())
}

/// Signer that "broadcasts" into memory.
///
/// The on-chain nonce it reports is the highest nonce it has seen, unless
/// bumped manually to simulate transactions sent from elsewhere.
#[derive(Debug)]
pub struct DevSigner {
    address: String,
    onchain: AtomicU64,
    sent: Mutex<Vec<(TransactionRequest, u64)>>,
}

impl DevSigner {
    pub fn new(address: impl Into<String>, onchain_nonce: u64) -> Self {
        Self {
            address: address.into(),
            onchain: AtomicU64::new(onchain_nonce),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Pretend a transaction was sent outside the runtime.
    pub fn bump_onchain_nonce(&self, nonce: u64) {
        self.onchain.fetch_max(nonce, Ordering::SeqCst);
    }

    /// Nonces passed to `sign_and_send`, in call order.
    pub fn sent_nonces(&self) -> Vec<u64> {
        match self.sent.lock() {
            Ok(sent) => sent.iter().map(|(_, n)| *n).collect(),
            Err(poisoned) => poisoned.into_inner().iter().map(|(_, n)| *n).collect(),
        }
    }
}

impl Signer for DevSigner {
    fn address(&self) -> &str {
        &self.address
    }

    fn sign_and_send(&self, tx: TransactionRequest, nonce: u64) -> BoxFuture<'_, Result<Receipt>> {
        Box::pin(async move {
            let mut sent = self
                .sent
                .lock()
                .map_err(|_| BotError::Provider("dev signer state poisoned".to_string()))?;
            if sent.iter().any(|(_, n)| *n == nonce) {
                return Err(BotError::Provider(format!("nonce {nonce} already used")));
            }
            let hash = blake3::hash(format!("{}:{}:{}", self.address, tx.to, nonce).as_bytes());
            sent.push((tx, nonce));
            self.onchain.fetch_max(nonce, Ordering::SeqCst);
            Ok(Receipt {
                transaction_hash: format!("0x{}", hash.to_hex()),
                nonce,
            })
        })
    }
}

impl NonceSource for DevSigner {
    fn onchain_nonce(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move { Ok(self.onchain.load(Ordering::SeqCst)) })
    }
}
