// src/handler/context.rs

use std::sync::Arc;

use tracing::{info, warn};

use crate::broker::TaskId;
use crate::chain::{Receipt, Signer, TransactionRequest};
use crate::errors::{BotError, Result};
use crate::nonce::NonceManager;
use crate::state::{SharedState, WorkerState};

/// Collaborators injected into every handler invocation.
#[derive(Clone, Default)]
pub struct Dependencies {
    pub shared: SharedState,
    pub nonce: Option<Arc<NonceManager>>,
    pub signer: Option<Arc<dyn Signer>>,
}

impl Dependencies {
    pub fn new(shared: SharedState) -> Self {
        Self {
            shared,
            nonce: None,
            signer: None,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>, nonce: Arc<NonceManager>) -> Self {
        self.signer = Some(signer);
        self.nonce = Some(nonce);
        self
    }
}

/// What a handler sees next to its payload.
///
/// Shared state has no cross-key transactions: a read followed by a write
/// from two concurrent handlers can interleave.
#[derive(Clone)]
pub struct HandlerContext {
    pub handler: Arc<str>,
    pub task_id: Option<TaskId>,
    pub shared: SharedState,
    pub worker: WorkerState,
    nonce: Option<Arc<NonceManager>>,
    signer: Option<Arc<dyn Signer>>,
}

impl HandlerContext {
    pub fn new(
        handler: &str,
        task_id: Option<TaskId>,
        deps: &Dependencies,
        worker: WorkerState,
    ) -> Self {
        Self {
            handler: Arc::from(handler),
            task_id,
            shared: deps.shared.clone(),
            worker,
            nonce: deps.nonce.clone(),
            signer: deps.signer.clone(),
        }
    }

    pub fn nonce_manager(&self) -> Option<&Arc<NonceManager>> {
        self.nonce.as_ref()
    }

    pub fn signer(&self) -> Option<&Arc<dyn Signer>> {
        self.signer.as_ref()
    }

    /// Take the next nonce and hand `tx` to the signer.
    ///
    /// The nonce is consumed even when signing or broadcasting fails, which
    /// leaves a gap until the manager reconciles with the chain.
    pub async fn send_transaction(&self, tx: TransactionRequest) -> Result<Receipt> {
        let (Some(signer), Some(nonce)) = (&self.signer, &self.nonce) else {
            return Err(BotError::Provider(format!(
                "handler '{}' has no signer configured",
                self.handler
            )));
        };
        let n = nonce.next().await?;
        let receipt = match signer.sign_and_send(tx, n).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(
                    handler = %self.handler,
                    nonce = n,
                    error = %e,
                    "transaction failed; nonce consumed"
                );
                return Err(e);
            }
        };
        info!(
            handler = %self.handler,
            nonce = n,
            tx = %receipt.transaction_hash,
            "transaction sent"
        );
        Ok(receipt)
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("handler", &self.handler)
            .field("task_id", &self.task_id)
            .field("has_signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}
