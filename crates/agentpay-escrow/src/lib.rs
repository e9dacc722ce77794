//! AgentPay Escrow - the escrow state machine
//!
//! Escrows advance `pending -> funded -> locked` and terminate in
//! `released` or `refunded`, with `disputed` as a transitional detour from
//! `locked`. Every transition checks its precondition against the current
//! state and fails explicitly; terminal records are never mutated again
//! and never destroyed.
//!
//! Writes serialize behind the collection's write lock and the whole
//! escrow table is snapshotted before the lock is released. Wire events
//! are published only after the snapshot commits; an event lost between
//! commit and publish is acceptable, because re-issuing the triggering
//! operation fails its precondition on the already-advanced state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use agentpay_store::SnapshotFile;
use agentpay_types::{
    AgentPayError, CreateEscrowRequest, DeliveryProof, DisputeDecision, DisputeRecord, Escrow,
    EscrowId, EscrowState, EscrowTimeline, EventType, Resolution, Result,
};
use agentpay_webhooks::WebhookEngine;

/// In-process notification carrying identifiers only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscrowTransition {
    pub escrow_id: EscrowId,
    pub state: EscrowState,
}

struct PendingEvent {
    event_type: EventType,
    escrow: Escrow,
    context: serde_json::Value,
}

/// The escrow engine
pub struct EscrowEngine {
    escrows: RwLock<HashMap<EscrowId, Escrow>>,
    store: SnapshotFile<HashMap<EscrowId, Escrow>>,
    webhooks: Arc<WebhookEngine>,
    transitions: broadcast::Sender<EscrowTransition>,
}

impl EscrowEngine {
    /// Build an engine, rehydrating the escrow table from `data_dir`
    pub fn new(webhooks: Arc<WebhookEngine>, data_dir: Option<&Path>) -> Self {
        let store = SnapshotFile::new(data_dir.map(|d| d.join("escrows.json")));
        let escrows = store.load();
        let (transitions, _) = broadcast::channel(256);
        Self {
            escrows: RwLock::new(escrows),
            store,
            webhooks,
            transitions,
        }
    }

    /// Subscribe to in-process transition notifications
    pub fn subscribe(&self) -> broadcast::Receiver<EscrowTransition> {
        self.transitions.subscribe()
    }

    /// Open an escrow in `pending`. `requires_approval` is derived from
    /// the token's default policy OR the explicit condition flag.
    pub async fn create(&self, request: CreateEscrowRequest) -> Result<Escrow> {
        if request.amount <= Decimal::ZERO {
            return Err(AgentPayError::invalid_input("amount", "must be positive"));
        }
        if request.payer.trim().is_empty() {
            return Err(AgentPayError::invalid_input("payer", "must not be empty"));
        }
        if request.payee.trim().is_empty() {
            return Err(AgentPayError::invalid_input("payee", "must not be empty"));
        }
        if let Some(minutes) = request.timeout_minutes {
            if minutes <= 0 {
                return Err(AgentPayError::invalid_input(
                    "timeout_minutes",
                    "must be positive when present",
                ));
            }
        }

        let now = Utc::now();
        let mut conditions = request.conditions;
        conditions.requires_approval =
            conditions.requires_approval || request.token.defaults_to_approval();

        let escrow = Escrow {
            id: EscrowId::new(),
            payer: request.payer,
            payee: request.payee,
            amount: request.amount,
            token: request.token,
            adapter: request.token.adapter(),
            purpose: request.purpose,
            conditions,
            timeout_at: request.timeout_minutes.map(|m| now + Duration::minutes(m)),
            approvals: Vec::new(),
            delivery_proof: None,
            dispute: None,
            funding_hash: None,
            resolution: None,
            state: EscrowState::Pending,
            timeline: EscrowTimeline::new(now),
        };

        {
            let mut escrows = self.escrows.write().await;
            escrows.insert(escrow.id, escrow.clone());
            self.store.persist(&escrows).await?;
        }

        info!(escrow_id = %escrow.id, amount = %escrow.amount, token = %escrow.token, "escrow created");
        self.publish(vec![PendingEvent {
            event_type: EventType::EscrowCreated,
            escrow: escrow.clone(),
            context: json!({}),
        }])
        .await;
        Ok(escrow)
    }

    /// Record on-chain funding. When no approvals are required the escrow
    /// locks in the same atomic step.
    pub async fn fund(&self, id: EscrowId, external_hash: &str) -> Result<Escrow> {
        let (result, events) = {
            let mut escrows = self.escrows.write().await;
            let escrow = get_mut(&mut escrows, &id)?;
            if escrow.state != EscrowState::Pending {
                return Err(AgentPayError::precondition(
                    "only a pending escrow can be funded",
                    escrow.state,
                ));
            }

            let now = Utc::now();
            escrow.state = EscrowState::Funded;
            escrow.funding_hash = Some(external_hash.to_string());
            escrow.timeline.funded_at = Some(now);
            let mut events = vec![PendingEvent {
                event_type: EventType::EscrowFunded,
                escrow: escrow.clone(),
                context: json!({ "external_hash": external_hash }),
            }];

            if !escrow.conditions.requires_approval {
                escrow.state = EscrowState::Locked;
                escrow.timeline.locked_at = Some(now);
                events.push(PendingEvent {
                    event_type: EventType::EscrowLocked,
                    escrow: escrow.clone(),
                    context: json!({ "auto_locked": true }),
                });
            }

            let result = escrow.clone();
            self.store.persist(&escrows).await?;
            (result, events)
        };

        info!(escrow_id = %id, state = %result.state, "escrow funded");
        self.publish(events).await;
        Ok(result)
    }

    /// Record an approval. The escrow locks once both payer and payee have
    /// approved; other identities are recorded but do not count toward the
    /// lock.
    pub async fn approve(&self, id: EscrowId, approver: &str) -> Result<Escrow> {
        let (result, events) = {
            let mut escrows = self.escrows.write().await;
            let escrow = get_mut(&mut escrows, &id)?;
            if escrow.state != EscrowState::Funded {
                return Err(AgentPayError::precondition(
                    "only a funded escrow can be approved",
                    escrow.state,
                ));
            }
            if escrow.approvals.iter().any(|a| a == approver) {
                return Err(AgentPayError::precondition(
                    format!("approver {approver} already recorded"),
                    escrow.state,
                ));
            }

            escrow.approvals.push(approver.to_string());
            let mut events = Vec::new();
            if escrow.has_party_approvals() {
                escrow.state = EscrowState::Locked;
                escrow.timeline.locked_at = Some(Utc::now());
                events.push(PendingEvent {
                    event_type: EventType::EscrowLocked,
                    escrow: escrow.clone(),
                    context: json!({ "approvals": escrow.approvals }),
                });
            }

            let result = escrow.clone();
            self.store.persist(&escrows).await?;
            (result, events)
        };

        self.publish(events).await;
        Ok(result)
    }

    /// Record a delivery proof on a locked escrow. When delivery is the
    /// only remaining gate, the escrow releases in the same call; the
    /// proof write always precedes the release evaluation.
    pub async fn submit_delivery(
        &self,
        id: EscrowId,
        submitted_by: &str,
        data: serde_json::Value,
        signature: Option<String>,
    ) -> Result<Escrow> {
        let (result, events) = {
            let mut escrows = self.escrows.write().await;
            let escrow = get_mut(&mut escrows, &id)?;
            if escrow.state != EscrowState::Locked {
                return Err(AgentPayError::precondition(
                    "delivery proof requires a locked escrow",
                    escrow.state,
                ));
            }

            let now = Utc::now();
            escrow.delivery_proof = Some(DeliveryProof {
                submitted_by: submitted_by.to_string(),
                submitted_at: now,
                data,
                signature,
            });

            let mut events = Vec::new();
            if escrow.auto_releases_on_delivery() {
                apply_release(escrow, "automatic - delivery confirmed", None, now);
                events.push(PendingEvent {
                    event_type: EventType::EscrowReleased,
                    escrow: escrow.clone(),
                    context: json!({ "reason": "automatic - delivery confirmed" }),
                });
            }

            let result = escrow.clone();
            self.store.persist(&escrows).await?;
            (result, events)
        };

        self.publish(events).await;
        Ok(result)
    }

    /// Release a locked escrow to the payee
    pub async fn release(&self, id: EscrowId, reason: &str) -> Result<Escrow> {
        let (result, events) = {
            let mut escrows = self.escrows.write().await;
            let escrow = get_mut(&mut escrows, &id)?;
            if escrow.state != EscrowState::Locked {
                return Err(AgentPayError::precondition(
                    "only a locked escrow can be released",
                    escrow.state,
                ));
            }
            if escrow.conditions.requires_delivery && escrow.delivery_proof.is_none() {
                return Err(AgentPayError::precondition("delivery required", escrow.state));
            }

            apply_release(escrow, reason, None, Utc::now());
            let result = escrow.clone();
            self.store.persist(&escrows).await?;
            let events = vec![PendingEvent {
                event_type: EventType::EscrowReleased,
                escrow: result.clone(),
                context: json!({ "reason": reason }),
            }];
            (result, events)
        };

        info!(escrow_id = %id, reason, "escrow released");
        self.publish(events).await;
        Ok(result)
    }

    /// Return a funded, locked, or disputed escrow to the payer
    pub async fn refund(&self, id: EscrowId, reason: &str) -> Result<Escrow> {
        let (result, events) = {
            let mut escrows = self.escrows.write().await;
            let escrow = get_mut(&mut escrows, &id)?;
            if !matches!(
                escrow.state,
                EscrowState::Funded | EscrowState::Locked | EscrowState::Disputed
            ) {
                return Err(AgentPayError::precondition(
                    "only a funded, locked, or disputed escrow can be refunded",
                    escrow.state,
                ));
            }

            apply_refund(escrow, reason, None, Utc::now());
            let result = escrow.clone();
            self.store.persist(&escrows).await?;
            let events = vec![PendingEvent {
                event_type: EventType::EscrowRefunded,
                escrow: result.clone(),
                context: json!({ "reason": reason }),
            }];
            (result, events)
        };

        info!(escrow_id = %id, reason, "escrow refunded");
        self.publish(events).await;
        Ok(result)
    }

    /// Open a dispute on a locked escrow
    pub async fn dispute(&self, id: EscrowId, disputed_by: &str, reason: &str) -> Result<Escrow> {
        let (result, events) = {
            let mut escrows = self.escrows.write().await;
            let escrow = get_mut(&mut escrows, &id)?;
            if escrow.state != EscrowState::Locked {
                return Err(AgentPayError::precondition(
                    "only a locked escrow can be disputed",
                    escrow.state,
                ));
            }

            let now = Utc::now();
            escrow.state = EscrowState::Disputed;
            escrow.timeline.disputed_at = Some(now);
            escrow.dispute = Some(DisputeRecord {
                disputed_by: disputed_by.to_string(),
                reason: reason.to_string(),
                disputed_at: now,
            });

            let result = escrow.clone();
            self.store.persist(&escrows).await?;
            let events = vec![PendingEvent {
                event_type: EventType::EscrowDisputed,
                escrow: result.clone(),
                context: json!({ "disputed_by": disputed_by, "reason": reason }),
            }];
            (result, events)
        };

        self.publish(events).await;
        Ok(result)
    }

    /// Settle a dispute. The arbiter decision supersedes the delivery
    /// gate.
    pub async fn resolve_dispute(
        &self,
        id: EscrowId,
        decision: DisputeDecision,
        arbiter: &str,
    ) -> Result<Escrow> {
        let reason = format!("arbiter decision by {arbiter}");
        let (result, events) = {
            let mut escrows = self.escrows.write().await;
            let escrow = get_mut(&mut escrows, &id)?;
            if escrow.state != EscrowState::Disputed {
                return Err(AgentPayError::precondition(
                    "only a disputed escrow can be resolved",
                    escrow.state,
                ));
            }

            let now = Utc::now();
            let event_type = match decision {
                DisputeDecision::Release => {
                    apply_release(escrow, &reason, Some(arbiter.to_string()), now);
                    EventType::EscrowReleased
                }
                DisputeDecision::Refund => {
                    apply_refund(escrow, &reason, Some(arbiter.to_string()), now);
                    EventType::EscrowRefunded
                }
            };

            let result = escrow.clone();
            self.store.persist(&escrows).await?;
            let events = vec![PendingEvent {
                event_type,
                escrow: result.clone(),
                context: json!({ "arbiter": arbiter, "reason": reason }),
            }];
            (result, events)
        };

        info!(escrow_id = %id, arbiter, decision = ?decision, "dispute resolved");
        self.publish(events).await;
        Ok(result)
    }

    /// Refund every funded or locked escrow whose timeout has elapsed.
    /// Idempotent: a second sweep with no time advance refunds nothing.
    pub async fn process_timeouts(&self) -> Result<Vec<EscrowId>> {
        self.sweep_timeouts(Utc::now()).await
    }

    async fn sweep_timeouts(&self, now: DateTime<Utc>) -> Result<Vec<EscrowId>> {
        let (refunded, events) = {
            let mut escrows = self.escrows.write().await;
            let mut refunded = Vec::new();
            let mut events = Vec::new();
            for escrow in escrows.values_mut() {
                if matches!(escrow.state, EscrowState::Funded | EscrowState::Locked)
                    && escrow.is_timed_out(now)
                {
                    apply_refund(escrow, "automatic timeout", None, now);
                    refunded.push(escrow.id);
                    events.push(PendingEvent {
                        event_type: EventType::EscrowRefunded,
                        escrow: escrow.clone(),
                        context: json!({ "reason": "automatic timeout" }),
                    });
                }
            }
            if !refunded.is_empty() {
                self.store.persist(&escrows).await?;
            }
            (refunded, events)
        };

        if !refunded.is_empty() {
            info!(count = refunded.len(), "escrows refunded by timeout sweep");
        }
        self.publish(events).await;
        Ok(refunded)
    }

    // ========================================================================
    // Read side
    // ========================================================================

    pub async fn get(&self, id: EscrowId) -> Result<Escrow> {
        self.escrows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AgentPayError::EscrowNotFound {
                escrow_id: id.to_string(),
            })
    }

    pub async fn list(&self) -> Vec<Escrow> {
        self.escrows.read().await.values().cloned().collect()
    }

    pub async fn list_by_state(&self, state: EscrowState) -> Vec<Escrow> {
        self.escrows
            .read()
            .await
            .values()
            .filter(|e| e.state == state)
            .cloned()
            .collect()
    }

    pub async fn list_by_payer(&self, payer: &str) -> Vec<Escrow> {
        self.escrows
            .read()
            .await
            .values()
            .filter(|e| e.payer == payer)
            .cloned()
            .collect()
    }

    pub async fn list_by_payee(&self, payee: &str) -> Vec<Escrow> {
        self.escrows
            .read()
            .await
            .values()
            .filter(|e| e.payee == payee)
            .cloned()
            .collect()
    }

    /// Publish wire events and transition signals. Runs after the
    /// collection lock is released; a failed emit is logged and dropped,
    /// never unwound into the committed transition.
    async fn publish(&self, events: Vec<PendingEvent>) {
        for event in events {
            let _ = self.transitions.send(EscrowTransition {
                escrow_id: event.escrow.id,
                state: event.escrow.state,
            });
            if let Err(error) = self
                .webhooks
                .emit(event.event_type, escrow_payload(&event.escrow), event.context)
                .await
            {
                warn!(
                    escrow_id = %event.escrow.id,
                    event_type = %event.event_type,
                    error = %error,
                    "failed to publish escrow event",
                );
            }
        }
    }
}

fn get_mut<'a>(
    escrows: &'a mut HashMap<EscrowId, Escrow>,
    id: &EscrowId,
) -> Result<&'a mut Escrow> {
    escrows.get_mut(id).ok_or_else(|| AgentPayError::EscrowNotFound {
        escrow_id: id.to_string(),
    })
}

fn apply_release(escrow: &mut Escrow, reason: &str, arbiter: Option<String>, now: DateTime<Utc>) {
    escrow.state = EscrowState::Released;
    escrow.timeline.released_at = Some(now);
    escrow.resolution = Some(Resolution {
        reason: reason.to_string(),
        arbiter,
    });
}

fn apply_refund(escrow: &mut Escrow, reason: &str, arbiter: Option<String>, now: DateTime<Utc>) {
    escrow.state = EscrowState::Refunded;
    escrow.timeline.refunded_at = Some(now);
    escrow.resolution = Some(Resolution {
        reason: reason.to_string(),
        arbiter,
    });
}

fn escrow_payload(escrow: &Escrow) -> serde_json::Value {
    json!({
        "escrow_id": escrow.id.to_string(),
        "payer": escrow.payer,
        "payee": escrow.payee,
        "amount": escrow.amount,
        "token": escrow.token,
        "adapter": escrow.adapter.tag(),
        "state": escrow.state,
    })
}
