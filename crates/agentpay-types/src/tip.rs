//! Tip types for AgentPay
//!
//! A tip is a payment attributed to a repository reference and directed at
//! a named recipient, carried operationally by an escrow. Repository owner
//! and name segments follow the GitHub naming rule: alphanumeric with
//! interior hyphens, no leading or trailing hyphen, at most 39 characters
//! per segment.

use crate::{AgentPayError, EscrowId, Result, TipId, Token};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a repository owner or name segment
pub const MAX_NAME_SEGMENT_LEN: usize = 39;

/// Check a segment against the GitHub naming rule
pub fn is_valid_github_name(s: &str) -> bool {
    if s.is_empty() || s.len() > MAX_NAME_SEGMENT_LEN {
        return false;
    }
    let bytes = s.as_bytes();
    if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
        return false;
    }
    bytes
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b'-')
}

fn is_valid_address(s: &str) -> bool {
    s.len() == 42
        && s.starts_with("0x")
        && s[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// A repository reference, `<owner>/<name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parse and validate an `owner/name` reference
    pub fn parse(s: &str) -> Result<Self> {
        let (owner, name) = s.split_once('/').ok_or_else(|| {
            AgentPayError::invalid_input("repo_ref", format!("'{s}' is not of the form owner/name"))
        })?;
        if !is_valid_github_name(owner) || !is_valid_github_name(name) {
            return Err(AgentPayError::invalid_input(
                "repo_ref",
                format!("'{s}' violates the repository naming rule"),
            ));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Where a tip is directed: a GitHub username or an on-chain address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipRecipient {
    Github(String),
    Address(String),
}

impl TipRecipient {
    /// Parse a recipient string. The two rules are a true OR: `0x` + 40
    /// hex chars is an address; any string satisfying the GitHub naming
    /// rule is a username, including usernames that merely begin with
    /// `0x`.
    pub fn parse(s: &str) -> Result<Self> {
        if is_valid_address(s) {
            return Ok(Self::Address(s.to_string()));
        }
        if is_valid_github_name(s) {
            return Ok(Self::Github(s.to_string()));
        }
        Err(AgentPayError::invalid_input(
            "recipient",
            format!("'{s}' is neither a valid username nor a 40-hex address"),
        ))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Github(name) => name,
            Self::Address(addr) => addr,
        }
    }
}

impl fmt::Display for TipRecipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a tip; advances only along the forward chain or terminates in
/// Cancelled from any pre-released state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipState {
    Pending,
    EscrowCreated,
    Funded,
    Locked,
    Released,
    Cancelled,
}

impl TipState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Cancelled)
    }

    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::EscrowCreated => "escrow_created",
            Self::Funded => "funded",
            Self::Locked => "locked",
            Self::Released => "released",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition instants for a tip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TipTimeline {
    pub created_at: DateTime<Utc>,
    pub escrow_created_at: Option<DateTime<Utc>>,
    pub funded_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl TipTimeline {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            escrow_created_at: None,
            funded_at: None,
            locked_at: None,
            released_at: None,
            cancelled_at: None,
        }
    }
}

/// On-chain settlement record attached at release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TipSettlement {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub settled_at: DateTime<Utc>,
}

/// A repository-attributed tip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tip {
    pub id: TipId,
    pub repo: RepoRef,
    pub tipper: String,
    pub recipient: TipRecipient,
    /// Strictly positive, in the token's display unit
    pub amount: Decimal,
    pub token: Token,
    pub message: Option<String>,
    pub issue_url: Option<String>,
    pub commit_ref: Option<String>,
    /// Set once the escrow factory has run
    pub escrow_id: Option<EscrowId>,
    pub funding_hash: Option<String>,
    pub settlement: Option<TipSettlement>,
    pub cancel_reason: Option<String>,
    pub state: TipState,
    pub timeline: TipTimeline,
}

/// Request to record a tip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTipRequest {
    /// `owner/name` repository reference
    pub repo_ref: String,
    pub tipper: String,
    /// GitHub username or `0x`-prefixed address
    pub recipient: String,
    pub amount: Decimal,
    pub token: Token,
    pub message: Option<String>,
    pub issue_url: Option<String>,
    pub commit_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_ref_parsing() {
        let repo = RepoRef::parse("rust-lang/cargo").unwrap();
        assert_eq!(repo.owner, "rust-lang");
        assert_eq!(repo.name, "cargo");
        assert_eq!(repo.to_string(), "rust-lang/cargo");
    }

    #[test]
    fn test_repo_ref_rejects_bad_shapes() {
        assert!(RepoRef::parse("no-slash").is_err());
        assert!(RepoRef::parse("-owner/name").is_err());
        assert!(RepoRef::parse("owner-/name").is_err());
        assert!(RepoRef::parse("owner/na me").is_err());
        assert!(RepoRef::parse("owner/").is_err());
    }

    #[test]
    fn test_segment_length_boundary() {
        // 39 GitHub-legal characters are accepted; 40 are rejected
        let ok = "a".repeat(39);
        let too_long = "a".repeat(40);
        assert!(is_valid_github_name(&ok));
        assert!(!is_valid_github_name(&too_long));

        assert!(RepoRef::parse(&format!("{ok}/{ok}")).is_ok());
        assert!(RepoRef::parse(&format!("{too_long}/{ok}")).is_err());
        assert!(RepoRef::parse(&format!("{ok}/{too_long}")).is_err());
    }

    #[test]
    fn test_recipient_username() {
        let recipient = TipRecipient::parse("octo-cat").unwrap();
        assert_eq!(recipient, TipRecipient::Github("octo-cat".to_string()));
    }

    #[test]
    fn test_recipient_address() {
        let addr = format!("0x{}", "ab12".repeat(10));
        let recipient = TipRecipient::parse(&addr).unwrap();
        assert!(matches!(recipient, TipRecipient::Address(_)));
    }

    #[test]
    fn test_recipient_username_with_address_prefix() {
        // a legal username that happens to start with 0x is not an
        // address, but it is a valid recipient
        let recipient = TipRecipient::parse("0xShib").unwrap();
        assert_eq!(recipient, TipRecipient::Github("0xShib".to_string()));

        let recipient = TipRecipient::parse("0xdeadbeef").unwrap();
        assert_eq!(recipient, TipRecipient::Github("0xdeadbeef".to_string()));

        // too short for an address, still a legal username
        let recipient = TipRecipient::parse("0x1234").unwrap();
        assert_eq!(recipient, TipRecipient::Github("0x1234".to_string()));
    }

    #[test]
    fn test_recipient_rejects_malformed() {
        // 42 chars but non-hex: fails the address rule and exceeds the
        // 39-char username bound
        assert!(TipRecipient::parse(&format!("0x{}", "zz12".repeat(10))).is_err());
        assert!(TipRecipient::parse("-leading").is_err());
        assert!(TipRecipient::parse("").is_err());
    }

    #[test]
    fn test_tip_state_chain_flags() {
        assert!(TipState::Pending.can_cancel());
        assert!(TipState::Locked.can_cancel());
        assert!(!TipState::Released.can_cancel());
        assert!(!TipState::Cancelled.can_cancel());
        assert!(TipState::Released.is_terminal());
    }
}
