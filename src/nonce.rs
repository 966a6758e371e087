// src/nonce.rs

//! Transaction nonce counter shared by every handler that signs.
//!
//! All reads and writes of the counter go through a single
//! `tokio::sync::Mutex`. When a reconciliation is due, the on-chain nonce is
//! fetched while the lock is held, so a concurrent `next()` can never observe
//! a half-reconciled counter.
//!
//! Semantics, with `c` the last issued value:
//! - reconcile with on-chain value `v`: `c = max(c, v)`
//! - `next()`: `c += 1`, return `c`

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::chain::NonceSource;
use crate::errors::Result;

/// When `next()` consults the chain before issuing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoncePolicy {
    Manual,
    PerCall,
    Periodic(Duration),
}

#[derive(Debug)]
struct Counter {
    last_issued: u64,
    last_reconciled: Option<Instant>,
}

pub struct NonceManager {
    counter: Mutex<Counter>,
    source: Option<Arc<dyn NonceSource>>,
    policy: NoncePolicy,
}

impl std::fmt::Debug for NonceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceManager")
            .field("policy", &self.policy)
            .field("has_source", &self.source.is_some())
            .finish_non_exhaustive()
    }
}

impl NonceManager {
    /// Counter starting at `seed`, never consulting the chain.
    pub fn new(seed: u64) -> Self {
        Self {
            counter: Mutex::new(Counter {
                last_issued: seed,
                last_reconciled: None,
            }),
            source: None,
            policy: NoncePolicy::Manual,
        }
    }

    /// Seed the counter from the signer's current on-chain nonce.
    pub async fn from_chain(source: Arc<dyn NonceSource>, policy: NoncePolicy) -> Result<Self> {
        let seed = source.onchain_nonce().await?;
        info!(seed, ?policy, "nonce manager seeded from chain");
        Ok(Self {
            counter: Mutex::new(Counter {
                last_issued: seed,
                last_reconciled: Some(Instant::now()),
            }),
            source: Some(source),
            policy,
        })
    }

    pub fn policy(&self) -> NoncePolicy {
        self.policy
    }

    /// Issue the next nonce.
    pub async fn next(&self) -> Result<u64> {
        let mut counter = self.counter.lock().await;

        if self.reconcile_due(&counter) {
            if let Some(source) = &self.source {
                let onchain = source.onchain_nonce().await?;
                reconcile(&mut counter, onchain);
            }
        }

        counter.last_issued += 1;
        Ok(counter.last_issued)
    }

    /// Raise the counter to at least `onchain`.
    pub async fn reset_from_chain(&self, onchain: u64) {
        let mut counter = self.counter.lock().await;
        reconcile(&mut counter, onchain);
    }

    /// Fetch the on-chain nonce now and reconcile, regardless of policy.
    pub async fn sync(&self) -> Result<()> {
        let Some(source) = &self.source else {
            return Ok(());
        };
        let mut counter = self.counter.lock().await;
        let onchain = source.onchain_nonce().await?;
        reconcile(&mut counter, onchain);
        Ok(())
    }

    /// The most recently issued value (or the seed if nothing was issued).
    pub async fn last_issued(&self) -> u64 {
        self.counter.lock().await.last_issued
    }

    fn reconcile_due(&self, counter: &Counter) -> bool {
        match self.policy {
            NoncePolicy::Manual => false,
            NoncePolicy::PerCall => true,
            NoncePolicy::Periodic(interval) => counter
                .last_reconciled
                .is_none_or(|at| at.elapsed() >= interval),
        }
    }
}

fn reconcile(counter: &mut Counter, onchain: u64) {
    if onchain > counter.last_issued {
        debug!(
            previous = counter.last_issued,
            onchain, "nonce counter behind chain; advancing"
        );
        counter.last_issued = onchain;
    }
    counter.last_reconciled = Some(Instant::now());
}
