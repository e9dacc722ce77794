//! Webhook engine configuration
//!
//! Supplied as a record at startup. Unknown options are rejected at
//! deserialization time rather than ignored.

use agentpay_types::{AgentPayError, Result};
use serde::{Deserialize, Serialize};

/// Delivery and retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WebhookConfig {
    /// Maximum delivery attempts per (subscription, event)
    pub max_retries: u32,
    /// Delay before the second attempt
    pub initial_delay_ms: u64,
    /// Upper bound on the backoff delay
    pub max_delay_ms: u64,
    /// Multiplier applied per failed attempt
    pub backoff_multiplier: f64,
    /// Per-request HTTP timeout
    pub request_timeout_ms: u64,
    /// Event-log entries retained across saves
    pub max_log_entries: usize,
    /// Periodic queue checkpoint interval
    pub queue_checkpoint_interval_ms: u64,
    /// Concurrent deliveries per worker pass
    pub delivery_fan_out: usize,
    /// Worker tick interval
    pub worker_tick_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 3_600_000,
            backoff_multiplier: 2.0,
            request_timeout_ms: 10_000,
            max_log_entries: 10_000,
            queue_checkpoint_interval_ms: 5_000,
            delivery_fan_out: 5,
            worker_tick_ms: 1_000,
        }
    }
}

impl WebhookConfig {
    /// Reject configurations where a zero would stall the engine
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(AgentPayError::invalid_input("max_retries", "must be at least 1"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(AgentPayError::invalid_input(
                "backoff_multiplier",
                "must be at least 1.0",
            ));
        }
        for (field, value) in [
            ("initial_delay_ms", self.initial_delay_ms),
            ("max_delay_ms", self.max_delay_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("queue_checkpoint_interval_ms", self.queue_checkpoint_interval_ms),
            ("worker_tick_ms", self.worker_tick_ms),
        ] {
            if value == 0 {
                return Err(AgentPayError::invalid_input(field, "must be greater than zero"));
            }
        }
        if self.delivery_fan_out == 0 {
            return Err(AgentPayError::invalid_input("delivery_fan_out", "must be greater than zero"));
        }
        if self.max_log_entries == 0 {
            return Err(AgentPayError::invalid_input("max_log_entries", "must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = WebhookConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.initial_delay_ms, 1_000);
        assert_eq!(config.max_delay_ms, 3_600_000);
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.request_timeout_ms, 10_000);
        assert_eq!(config.max_log_entries, 10_000);
        assert_eq!(config.queue_checkpoint_interval_ms, 5_000);
        assert_eq!(config.delivery_fan_out, 5);
        assert_eq!(config.worker_tick_ms, 1_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_option_rejected() {
        let raw = r#"{"max_retries": 3, "carrier_pigeons": true}"#;
        let parsed: std::result::Result<WebhookConfig, _> = serde_json::from_str(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_partial_record_fills_defaults() {
        let raw = r#"{"max_retries": 3, "initial_delay_ms": 50}"#;
        let config: WebhookConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay_ms, 50);
        assert_eq!(config.worker_tick_ms, 1_000);
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = WebhookConfig {
            worker_tick_ms: 0,
            ..WebhookConfig::default()
        };
        assert!(config.validate().is_err());

        let config = WebhookConfig {
            max_retries: 0,
            ..WebhookConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
