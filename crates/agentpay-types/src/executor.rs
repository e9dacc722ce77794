//! Payment executor contract
//!
//! The broker never moves value on-chain itself. When configured, an
//! external executor performs the transfer and reports the resulting
//! hashes. Executor errors are non-fatal advisories: the owning entity
//! stays at its current state and the caller may retry.

use crate::{EscrowId, Result, TipId, Token};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What kind of settlement a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Tip,
    Escrow,
}

/// A transfer handed to the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub kind: PaymentKind,
    pub tip_id: Option<TipId>,
    pub escrow_id: Option<EscrowId>,
    pub recipient: String,
    pub amount: Decimal,
    pub token: Token,
}

/// What the executor reports back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

/// The on-chain transfer collaborator
#[async_trait::async_trait]
pub trait PaymentExecutor: Send + Sync {
    async fn execute(&self, request: PaymentRequest) -> Result<PaymentReceipt>;
}
