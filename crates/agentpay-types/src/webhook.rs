//! Webhook types for AgentPay
//!
//! Subscriptions register an HTTP endpoint for a subset of the closed
//! event-type set. Each matching emitted event produces a Delivery that is
//! persisted until it succeeds or exhausts its attempts. The canonical
//! JSON payload is serialized once at enqueue and reused byte-for-byte for
//! signing and transmission.

use crate::{AgentPayError, EventId, Result, SubscriptionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The closed set of wire event types, plus the reserved `test` type that
/// `emit` rejects and `test_webhook` uses for synchronous probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EscrowCreated,
    EscrowFunded,
    EscrowLocked,
    EscrowReleased,
    EscrowRefunded,
    EscrowDisputed,
    TippingReceived,
    PaymentSettled,
    Test,
}

impl EventType {
    /// Every type a subscription may register for
    pub const RECOGNIZED: [EventType; 8] = [
        Self::EscrowCreated,
        Self::EscrowFunded,
        Self::EscrowLocked,
        Self::EscrowReleased,
        Self::EscrowRefunded,
        Self::EscrowDisputed,
        Self::TippingReceived,
        Self::PaymentSettled,
    ];

    /// Parse a wire tag; the reserved `test` type is not recognized
    pub fn parse(s: &str) -> Result<Self> {
        Self::RECOGNIZED
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AgentPayError::InvalidEventType {
                event_type: s.to_string(),
            })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EscrowCreated => "escrow_created",
            Self::EscrowFunded => "escrow_funded",
            Self::EscrowLocked => "escrow_locked",
            Self::EscrowReleased => "escrow_released",
            Self::EscrowRefunded => "escrow_refunded",
            Self::EscrowDisputed => "escrow_disputed",
            Self::TippingReceived => "tipping_received",
            Self::PaymentSettled => "payment_settled",
            Self::Test => "test",
        }
    }

    /// The reserved probe type never allowed through `emit`
    pub fn is_reserved(&self) -> bool {
        matches!(self, Self::Test)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of a state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Fresh id generated at emit, not at delivery
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub data: serde_json::Value,
    pub context: serde_json::Value,
}

impl WebhookEvent {
    pub fn new(
        event_type: EventType,
        data: serde_json::Value,
        context: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            timestamp: Utc::now().timestamp_millis(),
            data,
            context,
        }
    }
}

/// A registered webhook endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub url: String,
    /// Non-empty subset of the recognized event types
    pub events: Vec<EventType>,
    /// 32 random bytes, hex-encoded; emitted exactly once at registration
    pub secret: String,
    pub enabled: bool,
    pub success_count: u64,
    pub failure_count: u64,
    pub retry_count: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Extra headers sent with every delivery
    pub headers: Option<HashMap<String, String>>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn matches(&self, event_type: EventType) -> bool {
        self.enabled && self.events.contains(&event_type)
    }
}

/// Options accepted at registration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    pub headers: Option<HashMap<String, String>>,
}

/// Partial update to a subscription; unset fields keep their value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    pub url: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub enabled: Option<bool>,
    pub headers: Option<HashMap<String, String>>,
}

/// Returned once from `register`; the only place the secret is emitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionReceipt {
    pub id: SubscriptionId,
    pub url: String,
    pub events: Vec<EventType>,
    pub secret: String,
    pub created_at: DateTime<Utc>,
}

/// Subscription view with the secret redacted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub url: String,
    pub events: Vec<EventType>,
    pub enabled: bool,
    pub success_count: u64,
    pub failure_count: u64,
    pub retry_count: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Subscription> for SubscriptionInfo {
    fn from(sub: &Subscription) -> Self {
        Self {
            id: sub.id,
            url: sub.url.clone(),
            events: sub.events.clone(),
            enabled: sub.enabled,
            success_count: sub.success_count,
            failure_count: sub.failure_count,
            retry_count: sub.retry_count,
            last_triggered_at: sub.last_triggered_at,
            created_at: sub.created_at,
        }
    }
}

/// Status tag on a queued delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// First attempt, not yet tried
    Pending,
    /// Re-enqueued after a transient failure
    Retrying,
}

/// One scheduled attempt to transmit one event to one subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub subscription_id: SubscriptionId,
    pub event: WebhookEvent,
    /// Canonical JSON bytes of the event, fixed at enqueue
    pub payload: String,
    /// Attempt counter, starting at 1
    pub attempt: u32,
    /// None means due immediately
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub status: DeliveryStatus,
}

impl Delivery {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map(|t| t <= now).unwrap_or(true)
    }
}

/// Outcome of a synchronous `test_webhook` probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookTestReport {
    pub subscription_id: SubscriptionId,
    pub success: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recognized_types() {
        assert_eq!(
            EventType::parse("escrow_created").unwrap(),
            EventType::EscrowCreated
        );
        assert_eq!(
            EventType::parse("payment_settled").unwrap(),
            EventType::PaymentSettled
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_reserved() {
        assert!(EventType::parse("escrow_imploded").is_err());
        // `test` is reserved for synchronous probes
        assert!(EventType::parse("test").is_err());
    }

    #[test]
    fn test_event_wire_shape() {
        let event = WebhookEvent::new(
            EventType::EscrowFunded,
            serde_json::json!({"escrow_id": "x"}),
            serde_json::json!({}),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "escrow_funded");
        assert!(json["timestamp"].is_i64());
    }

    #[test]
    fn test_subscription_matching() {
        let mut sub = Subscription {
            id: SubscriptionId::new(),
            url: "https://example.com/hook".to_string(),
            events: vec![EventType::EscrowReleased],
            secret: "s".to_string(),
            enabled: true,
            success_count: 0,
            failure_count: 0,
            retry_count: 0,
            last_triggered_at: None,
            headers: None,
            created_at: Utc::now(),
        };
        assert!(sub.matches(EventType::EscrowReleased));
        assert!(!sub.matches(EventType::EscrowFunded));

        sub.enabled = false;
        assert!(!sub.matches(EventType::EscrowReleased));
    }

    #[test]
    fn test_delivery_due() {
        let event = WebhookEvent::new(EventType::EscrowCreated, serde_json::json!({}), serde_json::json!({}));
        let delivery = Delivery {
            subscription_id: SubscriptionId::new(),
            payload: serde_json::to_string(&event).unwrap(),
            event,
            attempt: 1,
            next_attempt_at: None,
            status: DeliveryStatus::Pending,
        };
        assert!(delivery.is_due(Utc::now()));

        let later = Delivery {
            next_attempt_at: Some(Utc::now() + chrono::Duration::minutes(1)),
            ..delivery
        };
        assert!(!later.is_due(Utc::now()));
    }

    #[test]
    fn test_info_redacts_secret() {
        let sub = Subscription {
            id: SubscriptionId::new(),
            url: "https://example.com".to_string(),
            events: vec![EventType::EscrowCreated],
            secret: "super-secret".to_string(),
            enabled: true,
            success_count: 2,
            failure_count: 1,
            retry_count: 1,
            last_triggered_at: None,
            headers: None,
            created_at: Utc::now(),
        };
        let info = SubscriptionInfo::from(&sub);
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("super-secret"));
        assert_eq!(info.success_count, 2);
    }
}
