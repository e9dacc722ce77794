//! Tip aggregation
//!
//! Aggregates are computed over a consistent read snapshot and returned as
//! immutable values; callers join against other engines by id if they need
//! more.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;

use agentpay_types::{RepoRef, Tip, TipState, Token};

/// Count and sum for one token
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenTally {
    pub count: usize,
    pub total: Decimal,
}

/// Count and sum for one repository
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoTally {
    pub repo: String,
    pub count: usize,
    pub total_amount: Decimal,
}

/// Per-repository aggregate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoTipStats {
    pub repo: String,
    pub count: usize,
    pub total_amount: Decimal,
    pub average_amount: Decimal,
    pub by_token: HashMap<Token, TokenTally>,
    pub by_state: HashMap<TipState, usize>,
}

/// Per-tipper aggregate with their top repositories by sum
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TipperStats {
    pub tipper: String,
    pub tip_count: usize,
    pub total_amount: Decimal,
    pub top_repos: Vec<RepoTally>,
}

/// System-wide aggregate with the top 10 repositories by sum
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalTipStats {
    pub total_tips: usize,
    pub total_amount: Decimal,
    pub by_token: HashMap<Token, TokenTally>,
    pub top_repos: Vec<RepoTally>,
}

/// Filters for settlement batching
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TipBatchFilters {
    pub repo: Option<RepoRef>,
    pub token: Option<Token>,
    pub tipper: Option<String>,
}

/// Tips eligible for a settlement run and their sum
#[derive(Debug, Clone, PartialEq)]
pub struct TipBatch {
    pub tips: Vec<Tip>,
    pub total_amount: Decimal,
}

pub(crate) fn build_repo_stats(repo: String, tips: &[&Tip]) -> RepoTipStats {
    let count = tips.len();
    let total_amount: Decimal = tips.iter().map(|t| t.amount).sum();
    let average_amount = if count > 0 {
        total_amount / Decimal::from(count as u64)
    } else {
        Decimal::ZERO
    };

    let mut by_token: HashMap<Token, TokenTally> = HashMap::new();
    let mut by_state: HashMap<TipState, usize> = HashMap::new();
    for tip in tips {
        let tally = by_token.entry(tip.token).or_default();
        tally.count += 1;
        tally.total += tip.amount;
        *by_state.entry(tip.state).or_default() += 1;
    }

    RepoTipStats {
        repo,
        count,
        total_amount,
        average_amount,
        by_token,
        by_state,
    }
}

/// Tally per repository, largest sums first; ties break on the repo name
/// so results are deterministic
pub(crate) fn rank_repos<'a>(tips: impl Iterator<Item = &'a Tip>) -> Vec<RepoTally> {
    let mut by_repo: HashMap<String, RepoTally> = HashMap::new();
    for tip in tips {
        let repo = tip.repo.to_string();
        let tally = by_repo.entry(repo.clone()).or_insert_with(|| RepoTally {
            repo,
            count: 0,
            total_amount: Decimal::ZERO,
        });
        tally.count += 1;
        tally.total_amount += tip.amount;
    }

    let mut ranked: Vec<RepoTally> = by_repo.into_values().collect();
    ranked.sort_by(|a, b| {
        b.total_amount
            .cmp(&a.total_amount)
            .then_with(|| a.repo.cmp(&b.repo))
    });
    ranked
}
