//! AgentPay Tipping - repository-attributed tips
//!
//! A tip records who tipped which repository, for how much, and where the
//! value should land. Settlement is carried by the escrow layer: the tip
//! advances `pending -> escrow_created -> funded -> locked -> released`,
//! mirroring its escrow, and may be cancelled from any pre-released state.
//!
//! Escrow construction goes through the [`TipEscrowFactory`] seam so the
//! engine composes with the Escrow Engine in production and with stubs in
//! tests. An optional [`PaymentExecutor`] performs the actual on-chain
//! transfer at settlement time; its failures are advisories, never state
//! transitions.

pub mod stats;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use agentpay_escrow::EscrowEngine;
use agentpay_store::SnapshotFile;
use agentpay_types::{
    AgentPayError, CreateEscrowRequest, CreateTipRequest, EscrowConditions, EscrowId, EventType,
    PaymentExecutor, PaymentKind, PaymentRequest, RepoRef, Result, Tip, TipId, TipRecipient,
    TipSettlement, TipState, TipTimeline,
};
use agentpay_webhooks::WebhookEngine;

pub use stats::{
    GlobalTipStats, RepoTally, RepoTipStats, TipBatch, TipBatchFilters, TipperStats, TokenTally,
};

/// Constructs the escrow that carries a tip. The production implementation
/// is [`EscrowBackedFactory`]; tests substitute stubs.
#[async_trait::async_trait]
pub trait TipEscrowFactory: Send + Sync {
    async fn create_escrow(&self, tip: &Tip) -> Result<EscrowId>;
}

/// Factory backed by the Escrow Engine: payer = tipper, payee = recipient,
/// purpose derived from the repository reference
pub struct EscrowBackedFactory {
    escrow: Arc<EscrowEngine>,
    timeout_minutes: Option<i64>,
}

impl EscrowBackedFactory {
    pub fn new(escrow: Arc<EscrowEngine>) -> Self {
        Self {
            escrow,
            timeout_minutes: None,
        }
    }

    pub fn with_timeout_minutes(mut self, minutes: i64) -> Self {
        self.timeout_minutes = Some(minutes);
        self
    }
}

#[async_trait::async_trait]
impl TipEscrowFactory for EscrowBackedFactory {
    async fn create_escrow(&self, tip: &Tip) -> Result<EscrowId> {
        let escrow = self
            .escrow
            .create(CreateEscrowRequest {
                payer: tip.tipper.clone(),
                payee: tip.recipient.as_str().to_string(),
                amount: tip.amount,
                purpose: format!("Tip for {}", tip.repo),
                token: tip.token,
                conditions: EscrowConditions::default(),
                timeout_minutes: self.timeout_minutes,
            })
            .await?;
        Ok(escrow.id)
    }
}

/// In-process notification carrying identifiers only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipTransition {
    pub tip_id: TipId,
    pub state: TipState,
}

/// The tipping engine
pub struct TippingEngine {
    tips: RwLock<HashMap<TipId, Tip>>,
    store: SnapshotFile<HashMap<TipId, Tip>>,
    webhooks: Arc<WebhookEngine>,
    executor: Option<Arc<dyn PaymentExecutor>>,
    transitions: broadcast::Sender<TipTransition>,
}

impl TippingEngine {
    /// Build an engine, rehydrating the tip table from `data_dir`
    pub fn new(webhooks: Arc<WebhookEngine>, data_dir: Option<&Path>) -> Self {
        let store = SnapshotFile::new(data_dir.map(|d| d.join("tips.json")));
        let tips = store.load();
        let (transitions, _) = broadcast::channel(256);
        Self {
            tips: RwLock::new(tips),
            store,
            webhooks,
            executor: None,
            transitions,
        }
    }

    /// Attach the on-chain transfer collaborator
    pub fn with_executor(mut self, executor: Arc<dyn PaymentExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Subscribe to in-process transition notifications
    pub fn subscribe(&self) -> broadcast::Receiver<TipTransition> {
        self.transitions.subscribe()
    }

    /// Validate and record a tip in `pending`. Emits `tipping_received`.
    pub async fn create_tip(&self, request: CreateTipRequest) -> Result<Tip> {
        let repo = RepoRef::parse(&request.repo_ref)?;
        let recipient = TipRecipient::parse(&request.recipient)?;
        if request.tipper.trim().is_empty() {
            return Err(AgentPayError::invalid_input("tipper", "must not be empty"));
        }
        if request.amount <= Decimal::ZERO {
            return Err(AgentPayError::invalid_input("amount", "must be positive"));
        }

        let tip = Tip {
            id: TipId::new(),
            repo,
            tipper: request.tipper,
            recipient,
            amount: request.amount,
            token: request.token,
            message: request.message,
            issue_url: request.issue_url,
            commit_ref: request.commit_ref,
            escrow_id: None,
            funding_hash: None,
            settlement: None,
            cancel_reason: None,
            state: TipState::Pending,
            timeline: TipTimeline::new(Utc::now()),
        };

        {
            let mut tips = self.tips.write().await;
            tips.insert(tip.id, tip.clone());
            self.store.persist(&tips).await?;
        }

        info!(tip_id = %tip.id, repo = %tip.repo, amount = %tip.amount, "tip recorded");
        self.notify(tip.id, tip.state);
        self.emit_event(EventType::TippingReceived, &tip, json!({})).await;
        Ok(tip)
    }

    /// Construct and link the carrying escrow through the factory seam
    pub async fn create_escrow(&self, tip_id: TipId, factory: &dyn TipEscrowFactory) -> Result<Tip> {
        let (result, escrow_id) = {
            let mut tips = self.tips.write().await;
            let tip = get_mut(&mut tips, &tip_id)?;
            if tip.state != TipState::Pending {
                return Err(AgentPayError::precondition(
                    "escrow can only be created for a pending tip",
                    tip.state,
                ));
            }

            let escrow_id = factory.create_escrow(tip).await?;
            tip.escrow_id = Some(escrow_id);
            tip.state = TipState::EscrowCreated;
            tip.timeline.escrow_created_at = Some(Utc::now());

            let result = tip.clone();
            self.store.persist(&tips).await?;
            (result, escrow_id)
        };

        info!(tip_id = %tip_id, escrow_id = %escrow_id, "tip escrow created");
        self.notify(tip_id, result.state);
        Ok(result)
    }

    /// Record on-chain funding of the carrying escrow
    pub async fn fund_escrow(&self, tip_id: TipId, external_hash: &str) -> Result<Tip> {
        let result = {
            let mut tips = self.tips.write().await;
            let tip = get_mut(&mut tips, &tip_id)?;
            if tip.state != TipState::EscrowCreated {
                return Err(AgentPayError::precondition(
                    "funding requires a created escrow",
                    tip.state,
                ));
            }

            tip.state = TipState::Funded;
            tip.funding_hash = Some(external_hash.to_string());
            tip.timeline.funded_at = Some(Utc::now());

            let result = tip.clone();
            self.store.persist(&tips).await?;
            result
        };

        self.notify(tip_id, result.state);
        Ok(result)
    }

    /// Advance a funded tip to `locked`
    pub async fn lock_escrow(&self, tip_id: TipId) -> Result<Tip> {
        let result = {
            let mut tips = self.tips.write().await;
            let tip = get_mut(&mut tips, &tip_id)?;
            if tip.state != TipState::Funded {
                return Err(AgentPayError::precondition(
                    "only a funded tip can lock",
                    tip.state,
                ));
            }

            tip.state = TipState::Locked;
            tip.timeline.locked_at = Some(Utc::now());

            let result = tip.clone();
            self.store.persist(&tips).await?;
            result
        };

        self.notify(tip_id, result.state);
        Ok(result)
    }

    /// Record settlement and release the tip. Emits `payment_settled`.
    pub async fn release_tip(
        &self,
        tip_id: TipId,
        tx_hash: &str,
        block_number: u64,
        gas_used: Option<u64>,
    ) -> Result<Tip> {
        let result = self
            .finish_release(tip_id, tx_hash, Some(block_number), gas_used)
            .await?;
        Ok(result)
    }

    /// Cancel a tip from any pre-released state
    pub async fn cancel_tip(&self, tip_id: TipId, reason: Option<&str>) -> Result<Tip> {
        let result = {
            let mut tips = self.tips.write().await;
            let tip = get_mut(&mut tips, &tip_id)?;
            if !tip.state.can_cancel() {
                return Err(AgentPayError::precondition(
                    format!("cannot cancel in state {}", tip.state),
                    tip.state,
                ));
            }

            tip.state = TipState::Cancelled;
            tip.cancel_reason = reason.map(str::to_string);
            tip.timeline.cancelled_at = Some(Utc::now());

            let result = tip.clone();
            self.store.persist(&tips).await?;
            result
        };

        info!(tip_id = %tip_id, "tip cancelled");
        self.notify(tip_id, result.state);
        Ok(result)
    }

    /// Settle a locked tip through the configured payment executor.
    /// Returns `Ok(None)` when no executor is configured or the transfer
    /// fails; the tip stays locked and the caller may retry.
    pub async fn settle_with_executor(&self, tip_id: TipId) -> Result<Option<Tip>> {
        let tip = self.get(tip_id).await?;
        if tip.state != TipState::Locked {
            return Err(AgentPayError::precondition(
                "only a locked tip can be settled",
                tip.state,
            ));
        }

        let Some(executor) = self.executor.clone() else {
            warn!(tip_id = %tip_id, "no payment executor configured; tip stays locked");
            return Ok(None);
        };

        let request = PaymentRequest {
            kind: PaymentKind::Tip,
            tip_id: Some(tip_id),
            escrow_id: tip.escrow_id,
            recipient: tip.recipient.as_str().to_string(),
            amount: tip.amount,
            token: tip.token,
        };

        let receipt = match executor.execute(request).await {
            Ok(receipt) => receipt,
            Err(error) => {
                warn!(tip_id = %tip_id, error = %error, "payment executor failed; tip stays locked");
                return Ok(None);
            }
        };

        let result = self
            .finish_release(tip_id, &receipt.tx_hash, receipt.block_number, None)
            .await?;
        Ok(Some(result))
    }

    async fn finish_release(
        &self,
        tip_id: TipId,
        tx_hash: &str,
        block_number: Option<u64>,
        gas_used: Option<u64>,
    ) -> Result<Tip> {
        let result = {
            let mut tips = self.tips.write().await;
            let tip = get_mut(&mut tips, &tip_id)?;
            if tip.state != TipState::Locked {
                return Err(AgentPayError::precondition(
                    "only a locked tip can be released",
                    tip.state,
                ));
            }

            let now = Utc::now();
            tip.state = TipState::Released;
            tip.timeline.released_at = Some(now);
            tip.settlement = Some(TipSettlement {
                tx_hash: tx_hash.to_string(),
                block_number,
                gas_used,
                settled_at: now,
            });

            let result = tip.clone();
            self.store.persist(&tips).await?;
            result
        };

        info!(tip_id = %tip_id, tx_hash, "tip released");
        self.notify(tip_id, result.state);
        self.emit_event(
            EventType::PaymentSettled,
            &result,
            json!({ "tx_hash": tx_hash, "block_number": block_number }),
        )
        .await;
        Ok(result)
    }

    // ========================================================================
    // Read side and aggregation
    // ========================================================================

    pub async fn get(&self, tip_id: TipId) -> Result<Tip> {
        self.tips
            .read()
            .await
            .get(&tip_id)
            .cloned()
            .ok_or_else(|| AgentPayError::TipNotFound {
                tip_id: tip_id.to_string(),
            })
    }

    pub async fn list_by_repo(&self, repo: &RepoRef) -> Vec<Tip> {
        self.tips
            .read()
            .await
            .values()
            .filter(|t| &t.repo == repo)
            .cloned()
            .collect()
    }

    pub async fn list_by_tipper(&self, tipper: &str) -> Vec<Tip> {
        self.tips
            .read()
            .await
            .values()
            .filter(|t| t.tipper == tipper)
            .cloned()
            .collect()
    }

    /// Aggregate for one repository
    pub async fn repo_stats(&self, repo: &RepoRef) -> RepoTipStats {
        let tips = self.tips.read().await;
        let matching: Vec<&Tip> = tips.values().filter(|t| &t.repo == repo).collect();
        stats::build_repo_stats(repo.to_string(), &matching)
    }

    /// Aggregate for one tipper with their top `top_n` repositories by sum
    pub async fn tipper_stats(&self, tipper: &str, top_n: usize) -> TipperStats {
        let tips = self.tips.read().await;
        let matching: Vec<&Tip> = tips.values().filter(|t| t.tipper == tipper).collect();
        let tip_count = matching.len();
        let total_amount: Decimal = matching.iter().map(|t| t.amount).sum();
        let mut top_repos = stats::rank_repos(matching.into_iter());
        top_repos.truncate(top_n);
        TipperStats {
            tipper: tipper.to_string(),
            tip_count,
            total_amount,
            top_repos,
        }
    }

    /// System-wide aggregate with the top 10 repositories by sum
    pub async fn global_stats(&self) -> GlobalTipStats {
        let tips = self.tips.read().await;
        let total_tips = tips.len();
        let total_amount: Decimal = tips.values().map(|t| t.amount).sum();

        let mut by_token: HashMap<_, TokenTally> = HashMap::new();
        for tip in tips.values() {
            let tally = by_token.entry(tip.token).or_default();
            tally.count += 1;
            tally.total += tip.amount;
        }

        let mut top_repos = stats::rank_repos(tips.values());
        top_repos.truncate(10);

        GlobalTipStats {
            total_tips,
            total_amount,
            by_token,
            top_repos,
        }
    }

    /// Tips awaiting settlement (funded or locked) matching the filters,
    /// and their sum, for a nightly settlement caller
    pub async fn process_batch(&self, filters: Option<TipBatchFilters>) -> TipBatch {
        let filters = filters.unwrap_or_default();
        let tips = self.tips.read().await;
        let selected: Vec<Tip> = tips
            .values()
            .filter(|t| matches!(t.state, TipState::Funded | TipState::Locked))
            .filter(|t| filters.repo.as_ref().map_or(true, |r| &t.repo == r))
            .filter(|t| filters.token.map_or(true, |token| t.token == token))
            .filter(|t| filters.tipper.as_ref().map_or(true, |p| &t.tipper == p))
            .cloned()
            .collect();
        let total_amount: Decimal = selected.iter().map(|t| t.amount).sum();
        TipBatch {
            tips: selected,
            total_amount,
        }
    }

    fn notify(&self, tip_id: TipId, state: TipState) {
        let _ = self.transitions.send(TipTransition { tip_id, state });
    }

    /// Wire events publish after the tip mutation has committed; a failed
    /// emit is logged and dropped
    async fn emit_event(&self, event_type: EventType, tip: &Tip, context: serde_json::Value) {
        let data = json!({
            "tip_id": tip.id.to_string(),
            "repo": tip.repo.to_string(),
            "tipper": tip.tipper,
            "recipient": tip.recipient.as_str(),
            "amount": tip.amount,
            "token": tip.token,
            "state": tip.state,
        });
        if let Err(error) = self.webhooks.emit(event_type, data, context).await {
            warn!(tip_id = %tip.id, event_type = %event_type, error = %error, "failed to publish tip event");
        }
    }
}

fn get_mut<'a>(tips: &'a mut HashMap<TipId, Tip>, id: &TipId) -> Result<&'a mut Tip> {
    tips.get_mut(id).ok_or_else(|| AgentPayError::TipNotFound {
        tip_id: id.to_string(),
    })
}
