//! Escrow types for AgentPay
//!
//! An escrow is a permanent audit record of an intent to transfer value
//! from a payer to a payee, released only on satisfaction of its declared
//! conditions. Escrows are never destroyed; terminal records stay in the
//! collection.

use crate::{EscrowId, Token, TokenAdapter};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of an escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowState {
    /// Created, awaiting on-chain funding
    Pending,
    /// Funded, awaiting approvals
    Funded,
    /// Value locked, awaiting delivery or resolution
    Locked,
    /// Value released to the payee
    Released,
    /// Value returned to the payer
    Refunded,
    /// Under dispute, awaiting an arbiter decision
    Disputed,
}

impl EscrowState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Funded => "funded",
            Self::Locked => "locked",
            Self::Released => "released",
            Self::Refunded => "refunded",
            Self::Disputed => "disputed",
        }
    }
}

impl fmt::Display for EscrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition flags declared at creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowConditions {
    /// Both parties must approve before the escrow locks
    pub requires_approval: bool,
    /// A delivery proof must be recorded before release
    pub requires_delivery: bool,
    /// Release after delivery is gated on an arbiter
    pub requires_arbiter: bool,
    /// Release after delivery is gated on client confirmation
    pub requires_client_confirmation: bool,
}

/// Proof of delivery recorded on a locked escrow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryProof {
    /// Who submitted the proof
    pub submitted_by: String,
    /// When it was submitted
    pub submitted_at: DateTime<Utc>,
    /// Opaque proof payload
    pub data: serde_json::Value,
    /// Optional detached signature over the payload
    pub signature: Option<String>,
}

/// Dispute recorded on a locked escrow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeRecord {
    pub disputed_by: String,
    pub reason: String,
    pub disputed_at: DateTime<Utc>,
}

/// How a terminal transition came about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Reason recorded at release or refund
    pub reason: String,
    /// Arbiter identifier when the transition came from dispute resolution
    pub arbiter: Option<String>,
}

/// Instants of each transition; a terminal escrow has exactly one terminal
/// instant set, and every instant is >= the ones before it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowTimeline {
    pub created_at: DateTime<Utc>,
    pub funded_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub disputed_at: Option<DateTime<Utc>>,
}

impl EscrowTimeline {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            funded_at: None,
            locked_at: None,
            released_at: None,
            refunded_at: None,
            disputed_at: None,
        }
    }
}

/// An escrow record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escrow {
    /// Unique escrow ID
    pub id: EscrowId,
    /// Party that funds the escrow
    pub payer: String,
    /// Party that receives on release
    pub payee: String,
    /// Amount held, in the token's display unit
    pub amount: Decimal,
    /// Settlement token
    pub token: Token,
    /// Transfer mechanism, derived from the token at creation and handed
    /// to the payment executor at settlement
    pub adapter: TokenAdapter,
    /// Purpose text
    pub purpose: String,
    /// Declared conditions (requires_approval already derived)
    pub conditions: EscrowConditions,
    /// Absolute timeout instant, if any
    pub timeout_at: Option<DateTime<Utc>>,
    /// Ordered approver identifiers, no duplicates
    pub approvals: Vec<String>,
    /// Delivery proof, once submitted
    pub delivery_proof: Option<DeliveryProof>,
    /// Dispute record, once opened
    pub dispute: Option<DisputeRecord>,
    /// External hash reported at funding
    pub funding_hash: Option<String>,
    /// Terminal resolution details
    pub resolution: Option<Resolution>,
    /// Current state
    pub state: EscrowState,
    /// Transition instants
    pub timeline: EscrowTimeline,
}

impl Escrow {
    /// Both payer and payee have approved
    pub fn has_party_approvals(&self) -> bool {
        self.approvals.iter().any(|a| a == &self.payer)
            && self.approvals.iter().any(|a| a == &self.payee)
    }

    /// Delivery submission releases in the same call when delivery is the
    /// only remaining gate
    pub fn auto_releases_on_delivery(&self) -> bool {
        self.conditions.requires_delivery
            && !self.conditions.requires_arbiter
            && !self.conditions.requires_client_confirmation
    }

    /// Whether the timeout has elapsed at `now`
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.timeout_at.map(|t| t <= now).unwrap_or(false)
    }
}

/// Request to create an escrow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEscrowRequest {
    pub payer: String,
    pub payee: String,
    pub amount: Decimal,
    pub purpose: String,
    pub token: Token,
    #[serde(default)]
    pub conditions: EscrowConditions,
    /// Minutes until automatic refund eligibility; None disables the timeout
    pub timeout_minutes: Option<i64>,
}

/// Arbiter decision when resolving a dispute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeDecision {
    /// Release to the payee
    Release,
    /// Refund to the payer
    Refund,
}
