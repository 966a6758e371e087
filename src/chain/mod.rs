// src/chain/mod.rs

//! Types exchanged with the blockchain collaborators.
//!
//! The runtime never talks to a node itself. Block headers and decoded logs
//! arrive over channels fed by a provider, and transactions leave through a
//! [`Signer`]. The only thing the runtime contributes to a transaction is
//! its nonce.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::types::BoxFuture;

pub mod dev;

pub use dev::{DevChain, DevSigner};

/// Hex-encoded account or contract address.
pub type Address = String;

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// A decoded contract event log.
///
/// `removed` is set by the provider when a reorg retracts a log it already
/// delivered. The runtime forwards such logs untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractLog {
    pub contract_address: Address,
    /// Canonical signature, e.g. `Transfer(address,address,uint256)`.
    pub event_signature: String,
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: String,
    #[serde(default)]
    pub removed: bool,
}

impl ContractLog {
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: String,
    pub nonce: u64,
}

/// Account collaborator that owns key material.
pub trait Signer: Send + Sync {
    fn address(&self) -> &str;

    /// Sign `tx` with the given nonce and broadcast it.
    fn sign_and_send(&self, tx: TransactionRequest, nonce: u64) -> BoxFuture<'_, Result<Receipt>>;
}

/// Source of the signer's latest on-chain nonce.
pub trait NonceSource: Send + Sync {
    fn onchain_nonce(&self) -> BoxFuture<'_, Result<u64>>;
}
