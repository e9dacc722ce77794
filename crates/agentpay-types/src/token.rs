//! Token model for AgentPay
//!
//! Amounts are denominated in one of a closed set of supported tokens.
//! The broker never constructs or signs chain transactions itself; the
//! token only selects the adapter tag handed to the external payment
//! executor and drives the default approval policy.

use crate::{AgentPayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported settlement tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Token {
    /// The chain's native token
    PrimaryNative,
    /// The supported ERC-20 stablecoin
    Erc20Stable,
}

impl Token {
    /// Parse a wire symbol into a token
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "primary-native" => Ok(Self::PrimaryNative),
            "erc20-stable" => Ok(Self::Erc20Stable),
            other => Err(AgentPayError::invalid_input(
                "token",
                format!("unsupported token '{other}'"),
            )),
        }
    }

    /// The wire symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::PrimaryNative => "primary-native",
            Self::Erc20Stable => "erc20-stable",
        }
    }

    /// Adapter tag consumed by the payment executor
    pub fn adapter(&self) -> TokenAdapter {
        match self {
            Self::PrimaryNative => TokenAdapter::Native,
            Self::Erc20Stable => TokenAdapter::Erc20,
        }
    }

    /// Stablecoin escrows require approval before lock unless the caller
    /// opted in explicitly
    pub fn defaults_to_approval(&self) -> bool {
        matches!(self, Self::Erc20Stable)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Transfer mechanism selected by the token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenAdapter {
    /// Native value transfer
    Native,
    /// ERC-20 contract call
    Erc20,
}

impl TokenAdapter {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Erc20 => "erc20",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_tokens() {
        assert_eq!(Token::parse("primary-native").unwrap(), Token::PrimaryNative);
        assert_eq!(Token::parse("erc20-stable").unwrap(), Token::Erc20Stable);
    }

    #[test]
    fn test_parse_unsupported_token() {
        let err = Token::parse("dogecoin").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_adapter_tags() {
        assert_eq!(Token::PrimaryNative.adapter().tag(), "native");
        assert_eq!(Token::Erc20Stable.adapter().tag(), "erc20");
    }

    #[test]
    fn test_approval_defaults() {
        assert!(!Token::PrimaryNative.defaults_to_approval());
        assert!(Token::Erc20Stable.defaults_to_approval());
    }

    #[test]
    fn test_wire_form_round_trip() {
        let json = serde_json::to_string(&Token::Erc20Stable).unwrap();
        assert_eq!(json, "\"erc20-stable\"");
        let back: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Token::Erc20Stable);
    }
}
