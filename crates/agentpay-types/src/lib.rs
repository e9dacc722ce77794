//! AgentPay Types - Canonical domain types for the payment broker
//!
//! This crate contains the foundational types for AgentPay with zero
//! dependencies on other agentpay crates. It defines the complete type
//! system for:
//!
//! - Identity types (EscrowId, QuoteId, SubscriptionId, EventId, TipId)
//! - The token model and adapter tags
//! - Escrow, quote, subscription/delivery, and tip entities
//! - The closed webhook event-type set
//! - The payment-executor collaborator contract
//! - The shared error taxonomy
//!
//! State fields are closed Rust enums in memory; their snake_case string
//! forms appear only at the persistence and wire boundary.

pub mod error;
pub mod escrow;
pub mod executor;
pub mod identity;
pub mod quote;
pub mod tip;
pub mod token;
pub mod webhook;

pub use error::*;
pub use escrow::*;
pub use executor::*;
pub use identity::*;
pub use quote::*;
pub use tip::*;
pub use token::*;
pub use webhook::*;
