//! Quote types for AgentPay
//!
//! A quote is a priced offer for a described service from a provider to a
//! client, negotiable through counter-offers until accepted, rejected, or
//! expired. Counter-offers are append-only; the agreed price is set exactly
//! once; a linked escrow exists iff the terms required one at acceptance.

use crate::{EscrowId, QuoteId, Token};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a quote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteState {
    Pending,
    Accepted,
    Rejected,
    Countered,
    Expired,
}

impl QuoteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Countered => "countered",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for QuoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Negotiable terms attached to a quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteTerms {
    /// Promised delivery time in minutes
    pub delivery_time_minutes: Option<i64>,
    /// Free-form quality guarantee
    pub quality_guarantee: Option<String>,
    /// Refund policy label
    pub refund_policy: String,
    /// Acceptance constructs an escrow
    pub escrow_required: bool,
    /// Delivery submission releases the escrow without client confirmation
    pub auto_release: bool,
    /// Disputes go to an arbiter
    pub requires_arbiter: bool,
}

impl Default for QuoteTerms {
    fn default() -> Self {
        Self {
            delivery_time_minutes: None,
            quality_guarantee: None,
            refund_policy: "none".to_string(),
            escrow_required: true,
            auto_release: false,
            requires_arbiter: false,
        }
    }
}

/// Partial terms carried by a counter-offer; unset fields keep the
/// previous value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteTermsPatch {
    pub delivery_time_minutes: Option<i64>,
    pub quality_guarantee: Option<String>,
    pub refund_policy: Option<String>,
    pub escrow_required: Option<bool>,
    pub auto_release: Option<bool>,
    pub requires_arbiter: Option<bool>,
}

impl QuoteTermsPatch {
    /// Overlay this patch onto existing terms
    pub fn apply(&self, terms: &mut QuoteTerms) {
        if let Some(minutes) = self.delivery_time_minutes {
            terms.delivery_time_minutes = Some(minutes);
        }
        if let Some(guarantee) = &self.quality_guarantee {
            terms.quality_guarantee = Some(guarantee.clone());
        }
        if let Some(policy) = &self.refund_policy {
            terms.refund_policy = policy.clone();
        }
        if let Some(required) = self.escrow_required {
            terms.escrow_required = required;
        }
        if let Some(auto) = self.auto_release {
            terms.auto_release = auto;
        }
        if let Some(arbiter) = self.requires_arbiter {
            terms.requires_arbiter = arbiter;
        }
    }
}

/// One entry in a quote's counter-offer history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterOffer {
    pub offered_by: String,
    pub price: Decimal,
    pub terms: QuoteTermsPatch,
    pub offered_at: DateTime<Utc>,
}

/// Delivery metadata recorded by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteDelivery {
    pub data: serde_json::Value,
    pub delivered_at: DateTime<Utc>,
}

/// A negotiation quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub provider: String,
    pub client: String,
    pub service: String,
    /// Base price offered by the provider
    pub price: Decimal,
    pub token: Token,
    pub terms: QuoteTerms,
    pub expires_at: DateTime<Utc>,
    /// Append-only counter-offer history
    pub counter_offers: Vec<CounterOffer>,
    /// Set exactly once, at acceptance
    pub agreed_price: Option<Decimal>,
    /// Set iff terms.escrow_required at acceptance time
    pub escrow_id: Option<EscrowId>,
    pub delivery: Option<QuoteDelivery>,
    pub rejection_reason: Option<String>,
    pub state: QuoteState,
    pub created_at: DateTime<Utc>,
}

impl Quote {
    /// Whether the quote is still within its validity window at `now`.
    /// The expiry instant itself is still valid.
    pub fn is_within_validity(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

/// Request to open a quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateQuoteRequest {
    pub provider: String,
    pub client: String,
    pub service: String,
    pub price: Decimal,
    pub token: Token,
    #[serde(default)]
    pub terms: QuoteTerms,
    pub valid_for_minutes: i64,
}
