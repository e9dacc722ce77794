//! AgentPay Negotiation - the quote lifecycle
//!
//! A provider opens a priced quote toward a client; the client accepts,
//! rejects, or counter-offers until the quote expires. Acceptance fixes
//! the agreed price and, when the terms require it, constructs an escrow
//! through the Escrow Engine with the client as payer and the provider as
//! payee.
//!
//! Every operation verifies the caller against the role recorded at quote
//! creation. Acceptance holds the negotiation write lock while calling
//! into the Escrow Engine so that the price agreement and the escrow
//! linkage commit atomically with respect to concurrent negotiation
//! callers; the escrow is created before the quote mutates, so a failed
//! construction leaves the quote pending.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use agentpay_escrow::EscrowEngine;
use agentpay_store::SnapshotFile;
use agentpay_types::{
    AgentPayError, CounterOffer, CreateEscrowRequest, CreateQuoteRequest, EscrowConditions,
    EscrowId, EscrowState, Quote, QuoteDelivery, QuoteId, QuoteState, QuoteTermsPatch, Result,
};

/// Minutes added to the promised delivery time to form the escrow timeout
const ESCROW_TIMEOUT_MARGIN_MINUTES: i64 = 30;
/// Escrow timeout when the terms carry no delivery time
const DEFAULT_ESCROW_TIMEOUT_MINUTES: i64 = 120;

/// In-process notification carrying identifiers only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteTransition {
    pub quote_id: QuoteId,
    pub state: QuoteState,
}

/// The negotiation engine
pub struct NegotiationEngine {
    quotes: RwLock<HashMap<QuoteId, Quote>>,
    store: SnapshotFile<HashMap<QuoteId, Quote>>,
    escrow: Arc<EscrowEngine>,
    transitions: broadcast::Sender<QuoteTransition>,
}

impl NegotiationEngine {
    /// Build an engine, rehydrating the quote table from `data_dir`
    pub fn new(escrow: Arc<EscrowEngine>, data_dir: Option<&Path>) -> Self {
        let store = SnapshotFile::new(data_dir.map(|d| d.join("quotes.json")));
        let quotes = store.load();
        let (transitions, _) = broadcast::channel(256);
        Self {
            quotes: RwLock::new(quotes),
            store,
            escrow,
            transitions,
        }
    }

    /// Subscribe to in-process transition notifications
    pub fn subscribe(&self) -> broadcast::Receiver<QuoteTransition> {
        self.transitions.subscribe()
    }

    /// Open a quote in `pending`, valid until now + valid_for_minutes
    pub async fn create_quote(&self, request: CreateQuoteRequest) -> Result<Quote> {
        if request.provider.trim().is_empty() {
            return Err(AgentPayError::invalid_input("provider", "must not be empty"));
        }
        if request.client.trim().is_empty() {
            return Err(AgentPayError::invalid_input("client", "must not be empty"));
        }
        if request.price <= Decimal::ZERO {
            return Err(AgentPayError::invalid_input("price", "must be positive"));
        }
        if request.valid_for_minutes <= 0 {
            return Err(AgentPayError::invalid_input(
                "valid_for_minutes",
                "must be positive",
            ));
        }

        let now = Utc::now();
        let quote = Quote {
            id: QuoteId::new(),
            provider: request.provider,
            client: request.client,
            service: request.service,
            price: request.price,
            token: request.token,
            terms: request.terms,
            expires_at: now + Duration::minutes(request.valid_for_minutes),
            counter_offers: Vec::new(),
            agreed_price: None,
            escrow_id: None,
            delivery: None,
            rejection_reason: None,
            state: QuoteState::Pending,
            created_at: now,
        };

        {
            let mut quotes = self.quotes.write().await;
            quotes.insert(quote.id, quote.clone());
            self.store.persist(&quotes).await?;
        }

        info!(quote_id = %quote.id, price = %quote.price, "quote created");
        self.notify(quote.id, quote.state);
        Ok(quote)
    }

    /// Client accepts the base offer. Fixes the agreed price and, when the
    /// terms require it, constructs the linked escrow.
    pub async fn accept(&self, quote_id: QuoteId, caller: &str) -> Result<Quote> {
        let result = {
            let mut quotes = self.quotes.write().await;
            let quote = get_mut(&mut quotes, &quote_id)?;
            verify_role(&quote.client, caller, "client")?;
            if quote.state != QuoteState::Pending {
                return Err(AgentPayError::precondition(
                    "only a pending quote can be accepted",
                    quote.state,
                ));
            }
            if !quote.is_within_validity(Utc::now()) {
                return Err(AgentPayError::precondition("quote expired", quote.state));
            }

            let agreed_price = quote.price;
            let escrow_id = self.build_escrow(quote, agreed_price).await?;

            quote.state = QuoteState::Accepted;
            quote.agreed_price = Some(agreed_price);
            quote.escrow_id = escrow_id;
            let result = quote.clone();
            self.store.persist(&quotes).await?;
            result
        };

        info!(quote_id = %quote_id, price = %result.price, "quote accepted");
        self.notify(quote_id, result.state);
        Ok(result)
    }

    /// Client rejects a pending quote
    pub async fn reject(&self, quote_id: QuoteId, caller: &str, reason: Option<&str>) -> Result<Quote> {
        let result = {
            let mut quotes = self.quotes.write().await;
            let quote = get_mut(&mut quotes, &quote_id)?;
            verify_role(&quote.client, caller, "client")?;
            if quote.state != QuoteState::Pending {
                return Err(AgentPayError::precondition(
                    "only a pending quote can be rejected",
                    quote.state,
                ));
            }

            quote.state = QuoteState::Rejected;
            quote.rejection_reason = reason.map(str::to_string);
            let result = quote.clone();
            self.store.persist(&quotes).await?;
            result
        };

        self.notify(quote_id, result.state);
        Ok(result)
    }

    /// Client counters with a new price and a terms overlay. Counters are
    /// append-only.
    pub async fn counter_offer(
        &self,
        quote_id: QuoteId,
        caller: &str,
        new_price: Decimal,
        new_terms: QuoteTermsPatch,
    ) -> Result<Quote> {
        if new_price <= Decimal::ZERO {
            return Err(AgentPayError::invalid_input("price", "must be positive"));
        }

        let result = {
            let mut quotes = self.quotes.write().await;
            let quote = get_mut(&mut quotes, &quote_id)?;
            verify_role(&quote.client, caller, "client")?;
            if !matches!(quote.state, QuoteState::Pending | QuoteState::Countered) {
                return Err(AgentPayError::precondition(
                    "only a pending or countered quote can be countered",
                    quote.state,
                ));
            }
            if !quote.is_within_validity(Utc::now()) {
                return Err(AgentPayError::precondition("quote expired", quote.state));
            }

            quote.counter_offers.push(CounterOffer {
                offered_by: caller.to_string(),
                price: new_price,
                terms: new_terms,
                offered_at: Utc::now(),
            });
            quote.state = QuoteState::Countered;
            let result = quote.clone();
            self.store.persist(&quotes).await?;
            result
        };

        self.notify(quote_id, result.state);
        Ok(result)
    }

    /// Provider accepts a counter-offer (the last one unless an index is
    /// given). The counter's price becomes the agreed price and its terms
    /// overlay merges into the quote terms before the escrow is built.
    pub async fn accept_counter(
        &self,
        quote_id: QuoteId,
        caller: &str,
        index: Option<usize>,
    ) -> Result<Quote> {
        let result = {
            let mut quotes = self.quotes.write().await;
            let quote = get_mut(&mut quotes, &quote_id)?;
            verify_role(&quote.provider, caller, "provider")?;
            if quote.state != QuoteState::Countered {
                return Err(AgentPayError::precondition(
                    "only a countered quote can have a counter accepted",
                    quote.state,
                ));
            }

            let index = index.unwrap_or(quote.counter_offers.len().saturating_sub(1));
            let counter = quote.counter_offers.get(index).cloned().ok_or_else(|| {
                AgentPayError::invalid_input(
                    "counter_index",
                    format!("no counter-offer at index {index}"),
                )
            })?;

            counter.terms.apply(&mut quote.terms);
            let agreed_price = counter.price;
            let escrow_id = self.build_escrow(quote, agreed_price).await?;

            quote.state = QuoteState::Accepted;
            quote.agreed_price = Some(agreed_price);
            quote.escrow_id = escrow_id;
            let result = quote.clone();
            self.store.persist(&quotes).await?;
            result
        };

        info!(quote_id = %quote_id, price = %result.agreed_price.unwrap_or_default(), "counter-offer accepted");
        self.notify(quote_id, result.state);
        Ok(result)
    }

    /// Provider records delivery; a linked escrow receives the proof via
    /// `submit_delivery`
    pub async fn mark_delivered(
        &self,
        quote_id: QuoteId,
        caller: &str,
        proof: serde_json::Value,
    ) -> Result<Quote> {
        let (result, escrow_id) = {
            let mut quotes = self.quotes.write().await;
            let quote = get_mut(&mut quotes, &quote_id)?;
            verify_role(&quote.provider, caller, "provider")?;
            if quote.state != QuoteState::Accepted {
                return Err(AgentPayError::precondition(
                    "only an accepted quote can be delivered",
                    quote.state,
                ));
            }

            quote.delivery = Some(QuoteDelivery {
                data: proof.clone(),
                delivered_at: Utc::now(),
            });
            let escrow_id = quote.escrow_id;
            let result = quote.clone();
            self.store.persist(&quotes).await?;
            (result, escrow_id)
        };

        if let Some(escrow_id) = escrow_id {
            self.escrow
                .submit_delivery(escrow_id, caller, proof, None)
                .await?;
        }
        Ok(result)
    }

    /// Client confirms delivery, releasing the linked escrow when it is
    /// still locked. A prior auto-release is tolerated.
    pub async fn confirm_delivery(&self, quote_id: QuoteId, caller: &str) -> Result<()> {
        let escrow_id = {
            let quotes = self.quotes.read().await;
            let quote = quotes.get(&quote_id).ok_or_else(|| AgentPayError::QuoteNotFound {
                quote_id: quote_id.to_string(),
            })?;
            verify_role(&quote.client, caller, "client")?;
            if quote.delivery.is_none() {
                return Err(AgentPayError::precondition(
                    "delivery has not been recorded",
                    quote.state,
                ));
            }
            quote.escrow_id
        };

        let Some(escrow_id) = escrow_id else {
            return Ok(());
        };

        let escrow = self.escrow.get(escrow_id).await?;
        match escrow.state {
            EscrowState::Locked => {
                self.escrow
                    .release(escrow_id, "client confirmed delivery")
                    .await?;
                Ok(())
            }
            // delivery submission already released it
            EscrowState::Released => Ok(()),
            other => Err(AgentPayError::precondition(
                "linked escrow cannot be released",
                other,
            )),
        }
    }

    /// Transition all pending quotes past expiry to `expired`
    pub async fn process_expirations(&self) -> Result<Vec<QuoteId>> {
        self.sweep_expirations(Utc::now()).await
    }

    async fn sweep_expirations(&self, now: DateTime<Utc>) -> Result<Vec<QuoteId>> {
        let expired = {
            let mut quotes = self.quotes.write().await;
            let mut expired = Vec::new();
            for quote in quotes.values_mut() {
                if quote.state == QuoteState::Pending && !quote.is_within_validity(now) {
                    quote.state = QuoteState::Expired;
                    expired.push(quote.id);
                }
            }
            if !expired.is_empty() {
                self.store.persist(&quotes).await?;
            }
            expired
        };

        if !expired.is_empty() {
            info!(count = expired.len(), "quotes expired");
        }
        for quote_id in &expired {
            self.notify(*quote_id, QuoteState::Expired);
        }
        Ok(expired)
    }

    // ========================================================================
    // Read side
    // ========================================================================

    pub async fn get(&self, quote_id: QuoteId) -> Result<Quote> {
        self.quotes
            .read()
            .await
            .get(&quote_id)
            .cloned()
            .ok_or_else(|| AgentPayError::QuoteNotFound {
                quote_id: quote_id.to_string(),
            })
    }

    pub async fn list_for_provider(&self, provider: &str) -> Vec<Quote> {
        self.quotes
            .read()
            .await
            .values()
            .filter(|q| q.provider == provider)
            .cloned()
            .collect()
    }

    pub async fn list_for_client(&self, client: &str) -> Vec<Quote> {
        self.quotes
            .read()
            .await
            .values()
            .filter(|q| q.client == client)
            .cloned()
            .collect()
    }

    /// Construct the escrow for an acceptance. Returns None when the terms
    /// do not require one. Called with the negotiation write lock held;
    /// the Escrow Engine never calls back into this engine.
    async fn build_escrow(&self, quote: &Quote, agreed_price: Decimal) -> Result<Option<EscrowId>> {
        if !quote.terms.escrow_required {
            return Ok(None);
        }

        let timeout_minutes = quote
            .terms
            .delivery_time_minutes
            .map(|m| m + ESCROW_TIMEOUT_MARGIN_MINUTES)
            .unwrap_or(DEFAULT_ESCROW_TIMEOUT_MINUTES);

        let escrow = self
            .escrow
            .create(CreateEscrowRequest {
                payer: quote.client.clone(),
                payee: quote.provider.clone(),
                amount: agreed_price,
                purpose: quote.service.clone(),
                token: quote.token,
                conditions: EscrowConditions {
                    requires_approval: true,
                    requires_delivery: true,
                    requires_arbiter: quote.terms.requires_arbiter,
                    requires_client_confirmation: !quote.terms.auto_release,
                },
                timeout_minutes: Some(timeout_minutes),
            })
            .await?;
        Ok(Some(escrow.id))
    }

    fn notify(&self, quote_id: QuoteId, state: QuoteState) {
        let _ = self.transitions.send(QuoteTransition { quote_id, state });
    }
}

fn get_mut<'a>(
    quotes: &'a mut HashMap<QuoteId, Quote>,
    id: &QuoteId,
) -> Result<&'a mut Quote> {
    quotes.get_mut(id).ok_or_else(|| AgentPayError::QuoteNotFound {
        quote_id: id.to_string(),
    })
}

fn verify_role(expected: &str, caller: &str, role: &str) -> Result<()> {
    if expected != caller {
        return Err(AgentPayError::unauthorized(format!(
            "caller {caller} is not the recorded {role}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentpay_types::{QuoteTerms, Token};
    use agentpay_webhooks::{WebhookConfig, WebhookEngine};
    use rust_decimal_macros::dec;

    fn engines() -> (Arc<EscrowEngine>, NegotiationEngine) {
        let webhooks = Arc::new(WebhookEngine::new(WebhookConfig::default(), None).unwrap());
        let escrow = Arc::new(EscrowEngine::new(webhooks, None));
        let negotiation = NegotiationEngine::new(escrow.clone(), None);
        (escrow, negotiation)
    }

    fn quote_request(terms: QuoteTerms) -> CreateQuoteRequest {
        CreateQuoteRequest {
            provider: "P".to_string(),
            client: "C".to_string(),
            service: "s".to_string(),
            price: dec!(100),
            token: Token::PrimaryNative,
            terms,
            valid_for_minutes: 60,
        }
    }

    #[tokio::test]
    async fn counter_then_accept_links_escrow_at_counter_price() {
        // S3: quote at 100, client counters at 80, provider accepts
        let (escrow, negotiation) = engines();
        let quote = negotiation
            .create_quote(quote_request(QuoteTerms {
                delivery_time_minutes: Some(30),
                ..QuoteTerms::default()
            }))
            .await
            .unwrap();

        let countered = negotiation
            .counter_offer(quote.id, "C", dec!(80), QuoteTermsPatch::default())
            .await
            .unwrap();
        assert_eq!(countered.state, QuoteState::Countered);

        let accepted = negotiation.accept_counter(quote.id, "P", None).await.unwrap();
        assert_eq!(accepted.state, QuoteState::Accepted);
        assert_eq!(accepted.agreed_price, Some(dec!(80)));

        // the linked escrow carries the agreed price with the client as
        // payer and the provider as payee
        let linked = escrow.get(accepted.escrow_id.unwrap()).await.unwrap();
        assert_eq!(linked.amount, dec!(80));
        assert_eq!(linked.payer, "C");
        assert_eq!(linked.payee, "P");
        assert!(linked.conditions.requires_approval);
        assert!(linked.conditions.requires_delivery);
        assert!(linked.conditions.requires_client_confirmation);
        assert!(linked.timeout_at.is_some());
    }

    #[tokio::test]
    async fn accept_uses_base_price_and_derived_conditions() {
        let (escrow, negotiation) = engines();
        let quote = negotiation
            .create_quote(quote_request(QuoteTerms {
                auto_release: true,
                requires_arbiter: true,
                ..QuoteTerms::default()
            }))
            .await
            .unwrap();

        let accepted = negotiation.accept(quote.id, "C").await.unwrap();
        assert_eq!(accepted.agreed_price, Some(dec!(100)));

        let linked = escrow.get(accepted.escrow_id.unwrap()).await.unwrap();
        assert!(linked.conditions.requires_arbiter);
        // auto_release disables the client-confirmation gate
        assert!(!linked.conditions.requires_client_confirmation);
    }

    #[tokio::test]
    async fn accept_without_escrow_requirement_links_nothing() {
        let (_escrow, negotiation) = engines();
        let quote = negotiation
            .create_quote(quote_request(QuoteTerms {
                escrow_required: false,
                ..QuoteTerms::default()
            }))
            .await
            .unwrap();

        let accepted = negotiation.accept(quote.id, "C").await.unwrap();
        assert_eq!(accepted.escrow_id, None);
        assert_eq!(accepted.agreed_price, Some(dec!(100)));
    }

    #[tokio::test]
    async fn role_mismatches_are_unauthorized() {
        let (_escrow, negotiation) = engines();
        let quote = negotiation
            .create_quote(quote_request(QuoteTerms::default()))
            .await
            .unwrap();

        assert_eq!(
            negotiation.accept(quote.id, "P").await.unwrap_err().error_code(),
            "UNAUTHORIZED"
        );
        assert_eq!(
            negotiation
                .counter_offer(quote.id, "P", dec!(90), QuoteTermsPatch::default())
                .await
                .unwrap_err()
                .error_code(),
            "UNAUTHORIZED"
        );
        assert_eq!(
            negotiation.reject(quote.id, "intruder", None).await.unwrap_err().error_code(),
            "UNAUTHORIZED"
        );

        negotiation
            .counter_offer(quote.id, "C", dec!(90), QuoteTermsPatch::default())
            .await
            .unwrap();
        assert_eq!(
            negotiation.accept_counter(quote.id, "C", None).await.unwrap_err().error_code(),
            "UNAUTHORIZED"
        );
    }

    #[tokio::test]
    async fn accept_after_state_change_fails() {
        let (_escrow, negotiation) = engines();
        let quote = negotiation
            .create_quote(quote_request(QuoteTerms::default()))
            .await
            .unwrap();
        negotiation.accept(quote.id, "C").await.unwrap();

        let err = negotiation.accept(quote.id, "C").await.unwrap_err();
        assert_eq!(err.error_code(), "PRECONDITION_VIOLATED");

        let err = negotiation
            .counter_offer(quote.id, "C", dec!(50), QuoteTermsPatch::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "PRECONDITION_VIOLATED");
    }

    #[tokio::test]
    async fn expiration_sweep_and_expired_accept() {
        let (_escrow, negotiation) = engines();
        let quote = negotiation
            .create_quote(quote_request(QuoteTerms::default()))
            .await
            .unwrap();

        // one millisecond past expiry the sweep flips the quote
        let past_expiry = quote.expires_at + Duration::milliseconds(1);
        let expired = negotiation.sweep_expirations(past_expiry).await.unwrap();
        assert_eq!(expired, vec![quote.id]);
        assert_eq!(
            negotiation.get(quote.id).await.unwrap().state,
            QuoteState::Expired
        );

        let err = negotiation.accept(quote.id, "C").await.unwrap_err();
        assert_eq!(err.error_code(), "PRECONDITION_VIOLATED");

        // a second sweep finds nothing
        let again = negotiation.sweep_expirations(past_expiry).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn delivery_and_client_confirmation_release_escrow() {
        let (escrow, negotiation) = engines();
        let quote = negotiation
            .create_quote(quote_request(QuoteTerms {
                delivery_time_minutes: Some(15),
                ..QuoteTerms::default()
            }))
            .await
            .unwrap();
        let accepted = negotiation.accept(quote.id, "C").await.unwrap();
        let escrow_id = accepted.escrow_id.unwrap();

        // fund and lock the escrow through the normal approval path
        escrow.fund(escrow_id, "0xQUOTE").await.unwrap();
        escrow.approve(escrow_id, "C").await.unwrap();
        escrow.approve(escrow_id, "P").await.unwrap();

        let delivered = negotiation
            .mark_delivered(quote.id, "P", serde_json::json!({"result": "report.pdf"}))
            .await
            .unwrap();
        assert!(delivered.delivery.is_some());

        // client confirmation is still required
        let locked = escrow.get(escrow_id).await.unwrap();
        assert_eq!(locked.state, EscrowState::Locked);
        assert!(locked.delivery_proof.is_some());

        negotiation.confirm_delivery(quote.id, "C").await.unwrap();
        let released = escrow.get(escrow_id).await.unwrap();
        assert_eq!(released.state, EscrowState::Released);
        assert_eq!(
            released.resolution.unwrap().reason,
            "client confirmed delivery"
        );
    }

    #[tokio::test]
    async fn auto_release_terms_tolerate_confirmation() {
        let (escrow, negotiation) = engines();
        let quote = negotiation
            .create_quote(quote_request(QuoteTerms {
                auto_release: true,
                ..QuoteTerms::default()
            }))
            .await
            .unwrap();
        let accepted = negotiation.accept(quote.id, "C").await.unwrap();
        let escrow_id = accepted.escrow_id.unwrap();

        escrow.fund(escrow_id, "0xAUTO").await.unwrap();
        escrow.approve(escrow_id, "C").await.unwrap();
        escrow.approve(escrow_id, "P").await.unwrap();

        // delivery submission auto-releases
        negotiation
            .mark_delivered(quote.id, "P", serde_json::json!({"done": true}))
            .await
            .unwrap();
        assert_eq!(
            escrow.get(escrow_id).await.unwrap().state,
            EscrowState::Released
        );

        // a later confirmation is not an error
        negotiation.confirm_delivery(quote.id, "C").await.unwrap();
    }

    #[tokio::test]
    async fn confirm_requires_recorded_delivery() {
        let (_escrow, negotiation) = engines();
        let quote = negotiation
            .create_quote(quote_request(QuoteTerms::default()))
            .await
            .unwrap();
        negotiation.accept(quote.id, "C").await.unwrap();

        let err = negotiation.confirm_delivery(quote.id, "C").await.unwrap_err();
        assert_eq!(err.error_code(), "PRECONDITION_VIOLATED");
    }

    #[tokio::test]
    async fn counter_history_is_append_only() {
        let (_escrow, negotiation) = engines();
        let quote = negotiation
            .create_quote(quote_request(QuoteTerms::default()))
            .await
            .unwrap();

        negotiation
            .counter_offer(quote.id, "C", dec!(90), QuoteTermsPatch::default())
            .await
            .unwrap();
        let second = negotiation
            .counter_offer(
                quote.id,
                "C",
                dec!(85),
                QuoteTermsPatch {
                    auto_release: Some(true),
                    ..QuoteTermsPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(second.counter_offers.len(), 2);

        // accepting an explicit earlier counter uses that counter's price
        let accepted = negotiation.accept_counter(quote.id, "P", Some(0)).await.unwrap();
        assert_eq!(accepted.agreed_price, Some(dec!(90)));
        assert_eq!(accepted.counter_offers.len(), 2);
        // the first counter carried no terms overlay
        assert!(!accepted.terms.auto_release);
    }

    #[tokio::test]
    async fn accept_counter_with_bad_index_fails() {
        let (_escrow, negotiation) = engines();
        let quote = negotiation
            .create_quote(quote_request(QuoteTerms::default()))
            .await
            .unwrap();
        negotiation
            .counter_offer(quote.id, "C", dec!(90), QuoteTermsPatch::default())
            .await
            .unwrap();

        let err = negotiation
            .accept_counter(quote.id, "P", Some(7))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn quotes_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let webhooks = Arc::new(WebhookEngine::new(WebhookConfig::default(), None).unwrap());
        let escrow = Arc::new(EscrowEngine::new(webhooks, None));

        let id = {
            let negotiation = NegotiationEngine::new(escrow.clone(), Some(dir.path()));
            let quote = negotiation
                .create_quote(quote_request(QuoteTerms::default()))
                .await
                .unwrap();
            quote.id
        };

        let negotiation = NegotiationEngine::new(escrow, Some(dir.path()));
        let reloaded = negotiation.get(id).await.unwrap();
        assert_eq!(reloaded.state, QuoteState::Pending);
        assert_eq!(reloaded.price, dec!(100));
    }
}
