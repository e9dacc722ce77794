//! AgentPay Webhooks - durable, retrying event delivery
//!
//! This crate owns the subscription registry, the durable delivery queue,
//! the retry scheduler, HMAC signing, and the event log. Other engines
//! publish wire events through [`WebhookEngine::emit`]; delivery happens
//! asynchronously on a cooperative worker and survives process restarts
//! through snapshot rehydration.
//!
//! # Delivery lifecycle
//!
//! 1. `emit` snapshots the enabled subscriptions whose event set contains
//!    the emitted type and appends one Delivery per match, checkpointing
//!    the queue in the same write.
//! 2. The worker tick partitions the queue into due and pending entries,
//!    delivers the due ones with a bounded fan-out, and re-enqueues
//!    transient failures with exponential backoff.
//! 3. A delivery that exhausts its attempts is dropped and surfaced via
//!    counters and an in-process signal.
//!
//! Delivery is at-least-once per (subscription, event); receivers must
//! deduplicate on the `X-Event-ID` header.

pub mod config;
pub mod engine;
pub mod log;
pub mod signing;

pub use config::WebhookConfig;
pub use engine::{DeliverySignal, QueueStats, WebhookEngine};
pub use log::{EventLog, EventLogEntry};
pub use signing::{sign_payload, verify_signature};
