//! Identity types for AgentPay
//!
//! All identity types are strongly typed wrappers around UUIDs to prevent
//! accidental mixing of different ID types. Each carries a short prefix in
//! its string form so identifiers are self-describing in logs and payloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id_type!(EscrowId, "escrow", "Unique identifier for an escrow");
define_id_type!(QuoteId, "quote", "Unique identifier for a negotiation quote");
define_id_type!(SubscriptionId, "hook", "Unique identifier for a webhook subscription");
define_id_type!(EventId, "evt", "Unique identifier for an emitted event");
define_id_type!(TipId, "tip", "Unique identifier for a repository tip");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_carries_prefix() {
        let id = EscrowId::new();
        assert!(id.to_string().starts_with("escrow_"));
        assert!(SubscriptionId::new().to_string().starts_with("hook_"));
    }

    #[test]
    fn test_id_parsing_round_trip() {
        let id = QuoteId::new();
        let parsed = QuoteId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_id_parsing_without_prefix() {
        let uuid = Uuid::new_v4();
        let parsed = TipId::parse(&uuid.to_string()).unwrap();
        assert_eq!(parsed, TipId::from_uuid(uuid));
    }

    #[test]
    fn test_ids_serialize_as_bare_uuid() {
        let id = EventId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
