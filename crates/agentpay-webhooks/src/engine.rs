//! The webhook delivery engine
//!
//! Owns the subscription registry, the durable delivery queue, and the
//! event log. All three are snapshot files rehydrated at construction, so
//! in-flight deliveries survive restarts. Mutations serialize behind the
//! collection's write lock, and every queue addition checkpoints the queue
//! in the same critical section.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use agentpay_store::SnapshotFile;
use agentpay_types::{
    AgentPayError, Delivery, DeliveryStatus, EventId, EventType, Result, Subscription,
    SubscriptionId, SubscriptionInfo, SubscriptionOptions, SubscriptionReceipt,
    SubscriptionUpdate, WebhookEvent, WebhookTestReport,
};

use crate::config::WebhookConfig;
use crate::log::{EventLog, EventLogEntry};
use crate::signing::{generate_secret, sign_payload, verify_signature};

/// In-process notification published by the delivery worker. Carries
/// identifiers and counts only; payloads never travel on this channel.
#[derive(Debug, Clone)]
pub enum DeliverySignal {
    Delivered {
        subscription_id: SubscriptionId,
        event_id: EventId,
    },
    DeliveryFailed {
        subscription_id: SubscriptionId,
        event_id: EventId,
        attempts: u32,
    },
    QueueProcessed {
        delivered: usize,
        retried: usize,
        dropped: usize,
    },
}

/// Summary of one worker pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub delivered: usize,
    pub retried: usize,
    pub dropped: usize,
}

enum AttemptOutcome {
    Success { status: u16 },
    Failure { reason: String, status: Option<u16> },
    SubscriptionGone,
}

/// The webhook delivery engine
pub struct WebhookEngine {
    config: WebhookConfig,
    http: reqwest::Client,
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    subscription_store: SnapshotFile<HashMap<SubscriptionId, Subscription>>,
    queue: RwLock<Vec<Delivery>>,
    queue_store: SnapshotFile<Vec<Delivery>>,
    event_log: RwLock<EventLog>,
    log_store: SnapshotFile<Vec<EventLogEntry>>,
    signals: broadcast::Sender<DeliverySignal>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebhookEngine {
    /// Build an engine, rehydrating subscriptions, the delivery queue, and
    /// the event log from `data_dir`. `None` runs fully in memory.
    pub fn new(config: WebhookConfig, data_dir: Option<&Path>) -> Result<Self> {
        config.validate()?;

        let subscription_store =
            SnapshotFile::new(data_dir.map(|d| d.join("subscriptions.json")));
        let queue_store = SnapshotFile::new(data_dir.map(|d| d.join("delivery_queue.json")));
        let log_store = SnapshotFile::new(data_dir.map(|d| d.join("event_log.json")));

        let subscriptions = subscription_store.load();
        let queue: Vec<Delivery> = queue_store.load();
        let event_log = EventLog::new(config.max_log_entries, log_store.load());

        if !queue.is_empty() {
            info!(pending = queue.len(), "rehydrated delivery queue");
        }

        let (signals, _) = broadcast::channel(256);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            http: reqwest::Client::new(),
            subscriptions: RwLock::new(subscriptions),
            subscription_store,
            queue: RwLock::new(queue),
            queue_store,
            event_log: RwLock::new(event_log),
            log_store,
            signals,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Subscribe to in-process delivery signals
    pub fn subscribe(&self) -> broadcast::Receiver<DeliverySignal> {
        self.signals.subscribe()
    }

    // ========================================================================
    // Subscription registry
    // ========================================================================

    /// Register an endpoint. The returned receipt is the only place the
    /// secret is ever emitted.
    pub async fn register(
        &self,
        url: &str,
        event_types: &[String],
        options: SubscriptionOptions,
    ) -> Result<SubscriptionReceipt> {
        let url = validate_url(url)?;
        let events = filter_event_types(event_types)?;

        let subscription = Subscription {
            id: SubscriptionId::new(),
            url,
            events,
            secret: generate_secret(),
            enabled: true,
            success_count: 0,
            failure_count: 0,
            retry_count: 0,
            last_triggered_at: None,
            headers: options.headers,
            created_at: Utc::now(),
        };

        let receipt = SubscriptionReceipt {
            id: subscription.id,
            url: subscription.url.clone(),
            events: subscription.events.clone(),
            secret: subscription.secret.clone(),
            created_at: subscription.created_at,
        };

        {
            let mut subscriptions = self.subscriptions.write().await;
            subscriptions.insert(subscription.id, subscription);
            self.subscription_store.persist(&subscriptions).await?;
        }

        info!(subscription_id = %receipt.id, url = %receipt.url, "webhook subscription registered");
        Ok(receipt)
    }

    /// Apply a partial update; event types are re-filtered against the
    /// closed set
    pub async fn update(
        &self,
        id: SubscriptionId,
        update: SubscriptionUpdate,
    ) -> Result<SubscriptionInfo> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription =
            subscriptions
                .get_mut(&id)
                .ok_or_else(|| AgentPayError::SubscriptionNotFound {
                    subscription_id: id.to_string(),
                })?;

        if let Some(url) = update.url {
            subscription.url = validate_url(&url)?;
        }
        if let Some(event_types) = update.event_types {
            subscription.events = filter_event_types(&event_types)?;
        }
        if let Some(enabled) = update.enabled {
            subscription.enabled = enabled;
        }
        if let Some(headers) = update.headers {
            subscription.headers = Some(headers);
        }

        let info = SubscriptionInfo::from(&*subscription);
        self.subscription_store.persist(&subscriptions).await?;
        Ok(info)
    }

    pub async fn unregister(&self, id: SubscriptionId) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.remove(&id).is_none() {
            return Err(AgentPayError::SubscriptionNotFound {
                subscription_id: id.to_string(),
            });
        }
        self.subscription_store.persist(&subscriptions).await?;
        info!(subscription_id = %id, "webhook subscription removed");
        Ok(())
    }

    /// All subscriptions with secrets redacted, oldest first
    pub async fn list(&self) -> Vec<SubscriptionInfo> {
        let subscriptions = self.subscriptions.read().await;
        let mut infos: Vec<SubscriptionInfo> =
            subscriptions.values().map(SubscriptionInfo::from).collect();
        infos.sort_by_key(|info| info.created_at);
        infos
    }

    pub async fn get(&self, id: SubscriptionId) -> Result<SubscriptionInfo> {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .get(&id)
            .map(SubscriptionInfo::from)
            .ok_or_else(|| AgentPayError::SubscriptionNotFound {
                subscription_id: id.to_string(),
            })
    }

    /// Recompute the HMAC over the canonical payload bytes and compare in
    /// constant time
    pub async fn verify_delivery_signature(
        &self,
        id: SubscriptionId,
        payload: &[u8],
        candidate: &str,
    ) -> Result<bool> {
        let secret = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .get(&id)
                .map(|s| s.secret.clone())
                .ok_or_else(|| AgentPayError::SubscriptionNotFound {
                    subscription_id: id.to_string(),
                })?
        };
        verify_signature(&secret, payload, candidate)
    }

    // ========================================================================
    // Emission
    // ========================================================================

    /// Validate the type, enqueue one delivery per matching enabled
    /// subscription, checkpoint the queue, and return. Delivery itself is
    /// asynchronous.
    pub async fn emit(
        &self,
        event_type: EventType,
        data: serde_json::Value,
        context: serde_json::Value,
    ) -> Result<EventId> {
        if event_type.is_reserved() {
            return Err(AgentPayError::InvalidEventType {
                event_type: event_type.as_str().to_string(),
            });
        }

        let event = WebhookEvent::new(event_type, data, context);
        let payload = serde_json::to_string(&event)
            .map_err(|error| AgentPayError::persistence(format!("failed to encode event: {error}")))?;

        let matching: Vec<SubscriptionId> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .values()
                .filter(|s| s.matches(event_type))
                .map(|s| s.id)
                .collect()
        };

        if !matching.is_empty() {
            let mut queue = self.queue.write().await;
            for subscription_id in &matching {
                queue.push(Delivery {
                    subscription_id: *subscription_id,
                    event: event.clone(),
                    payload: payload.clone(),
                    attempt: 1,
                    next_attempt_at: None,
                    status: DeliveryStatus::Pending,
                });
            }
            self.queue_store.persist(&queue).await?;
        }

        {
            let mut log = self.event_log.write().await;
            log.record(event_type.as_str());
            self.log_store.persist(&log.entries().to_vec()).await?;
        }

        debug!(
            event_id = %event.id,
            event_type = %event_type,
            subscriptions = matching.len(),
            "event emitted",
        );
        Ok(event.id)
    }

    /// The most recent `n` event-log entries, oldest first
    pub async fn recent_log(&self, n: usize) -> Vec<EventLogEntry> {
        self.event_log.read().await.recent(n).to_vec()
    }

    /// Current queue contents (diagnostics and tests)
    pub async fn queue_snapshot(&self) -> Vec<Delivery> {
        self.queue.read().await.clone()
    }

    // ========================================================================
    // Delivery worker
    // ========================================================================

    /// Spawn the delivery tick and the periodic queue checkpointer
    pub fn start(self: Arc<Self>) {
        let worker = {
            let engine = Arc::clone(&self);
            let mut shutdown = self.shutdown.subscribe();
            let tick_ms = self.config.worker_tick_ms;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_millis(tick_ms));
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            engine.process_queue().await;
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };

        let checkpointer = {
            let engine = Arc::clone(&self);
            let mut shutdown = self.shutdown.subscribe();
            let checkpoint_ms = self.config.queue_checkpoint_interval_ms;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_millis(checkpoint_ms));
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            if let Err(error) = engine.checkpoint_queue().await {
                                warn!(error = %error, "periodic queue checkpoint failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };

        self.tasks.lock().extend([worker, checkpointer]);
    }

    /// Stop the ticks, await the in-flight batch, and take a final
    /// checkpoint
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        if let Err(error) = self.checkpoint_queue().await {
            warn!(error = %error, "final queue checkpoint failed");
        }
        info!("webhook delivery engine stopped");
    }

    /// One worker pass: partition the queue into due and pending, deliver
    /// the due entries with a bounded fan-out, re-enqueue transient
    /// failures, drop exhausted ones.
    pub async fn process_queue(&self) -> QueueStats {
        let now = Utc::now();
        let due: Vec<Delivery> = {
            let mut queue = self.queue.write().await;
            let (due, pending): (Vec<Delivery>, Vec<Delivery>) =
                queue.drain(..).partition(|d| d.is_due(now));
            *queue = pending;
            due
        };

        let mut stats = QueueStats::default();
        if !due.is_empty() {
            let outcomes: Vec<(Delivery, AttemptOutcome)> = stream::iter(due)
                .map(|delivery| async move {
                    let outcome = self.attempt(&delivery).await;
                    (delivery, outcome)
                })
                .buffer_unordered(self.config.delivery_fan_out)
                .collect()
                .await;

            for (delivery, outcome) in outcomes {
                match outcome {
                    AttemptOutcome::Success { status } => {
                        debug!(
                            subscription_id = %delivery.subscription_id,
                            event_id = %delivery.event.id,
                            status,
                            "delivery succeeded",
                        );
                        self.on_success(&delivery).await;
                        stats.delivered += 1;
                    }
                    AttemptOutcome::SubscriptionGone => {
                        debug!(
                            subscription_id = %delivery.subscription_id,
                            "subscription removed; dropping delivery",
                        );
                        stats.dropped += 1;
                    }
                    AttemptOutcome::Failure { reason, .. } => {
                        if delivery.attempt < self.config.max_retries {
                            self.on_transient_failure(delivery, &reason).await;
                            stats.retried += 1;
                        } else {
                            self.on_permanent_failure(&delivery, &reason).await;
                            stats.dropped += 1;
                        }
                    }
                }
            }

            let subscriptions = self.subscriptions.read().await;
            if let Err(error) = self.subscription_store.persist(&subscriptions).await {
                warn!(error = %error, "failed to persist subscription counters");
            }
        }

        if let Err(error) = self.checkpoint_queue().await {
            warn!(error = %error, "queue checkpoint failed");
        }

        let _ = self.signals.send(DeliverySignal::QueueProcessed {
            delivered: stats.delivered,
            retried: stats.retried,
            dropped: stats.dropped,
        });
        stats
    }

    /// Deliver a synthetic event of the reserved `test` type once,
    /// synchronously, bypassing the queue
    pub async fn test_webhook(&self, id: SubscriptionId) -> Result<WebhookTestReport> {
        {
            let subscriptions = self.subscriptions.read().await;
            if !subscriptions.contains_key(&id) {
                return Err(AgentPayError::SubscriptionNotFound {
                    subscription_id: id.to_string(),
                });
            }
        }

        let event = WebhookEvent::new(
            EventType::Test,
            serde_json::json!({ "message": "webhook connectivity test" }),
            serde_json::json!({}),
        );
        let payload = serde_json::to_string(&event)
            .map_err(|error| AgentPayError::persistence(format!("failed to encode event: {error}")))?;
        let delivery = Delivery {
            subscription_id: id,
            event,
            payload,
            attempt: 1,
            next_attempt_at: None,
            status: DeliveryStatus::Pending,
        };

        let report = match self.attempt(&delivery).await {
            AttemptOutcome::Success { status } => WebhookTestReport {
                subscription_id: id,
                success: true,
                status: Some(status),
                error: None,
            },
            AttemptOutcome::Failure { reason, status } => WebhookTestReport {
                subscription_id: id,
                success: false,
                status,
                error: Some(reason),
            },
            AttemptOutcome::SubscriptionGone => WebhookTestReport {
                subscription_id: id,
                success: false,
                status: None,
                error: Some("subscription removed".to_string()),
            },
        };
        Ok(report)
    }

    async fn attempt(&self, delivery: &Delivery) -> AttemptOutcome {
        let subscription = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions.get(&delivery.subscription_id).cloned()
        };
        let Some(subscription) = subscription else {
            return AttemptOutcome::SubscriptionGone;
        };

        let signature = match sign_payload(&subscription.secret, delivery.payload.as_bytes()) {
            Ok(signature) => signature,
            Err(error) => {
                return AttemptOutcome::Failure {
                    reason: error.to_string(),
                    status: None,
                }
            }
        };

        let mut request = self
            .http
            .post(&subscription.url)
            .timeout(Duration::from_millis(self.config.request_timeout_ms))
            .header("Content-Type", "application/json")
            .header("X-Webhook-ID", subscription.id.to_string())
            .header("X-Event-ID", delivery.event.id.to_string())
            .header("X-Event-Type", delivery.event.event_type.as_str())
            .header("X-Timestamp", delivery.event.timestamp.to_string())
            .header("X-Signature", signature)
            .body(delivery.payload.clone());
        if let Some(headers) = &subscription.headers {
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => AttemptOutcome::Success {
                status: response.status().as_u16(),
            },
            Ok(response) => AttemptOutcome::Failure {
                reason: format!("received status {}", response.status()),
                status: Some(response.status().as_u16()),
            },
            Err(error) => AttemptOutcome::Failure {
                reason: format!("transport error: {error}"),
                status: None,
            },
        }
    }

    async fn on_success(&self, delivery: &Delivery) {
        {
            let mut subscriptions = self.subscriptions.write().await;
            if let Some(subscription) = subscriptions.get_mut(&delivery.subscription_id) {
                subscription.success_count += 1;
                subscription.last_triggered_at = Some(Utc::now());
            }
        }
        let _ = self.signals.send(DeliverySignal::Delivered {
            subscription_id: delivery.subscription_id,
            event_id: delivery.event.id,
        });
    }

    async fn on_transient_failure(&self, delivery: Delivery, reason: &str) {
        let subscription_id = delivery.subscription_id;
        let delay_ms = self.backoff_delay_ms(delivery.attempt);
        let next_attempt_at = Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);
        warn!(
            subscription_id = %subscription_id,
            event_id = %delivery.event.id,
            attempt = delivery.attempt,
            delay_ms,
            reason,
            "delivery failed; retry scheduled",
        );

        {
            let mut queue = self.queue.write().await;
            queue.push(Delivery {
                attempt: delivery.attempt + 1,
                next_attempt_at: Some(next_attempt_at),
                status: DeliveryStatus::Retrying,
                ..delivery
            });
            if let Err(error) = self.queue_store.persist(&queue).await {
                warn!(error = %error, "failed to checkpoint queue after retry scheduling");
            }
        }

        let mut subscriptions = self.subscriptions.write().await;
        if let Some(subscription) = subscriptions.get_mut(&subscription_id) {
            subscription.failure_count += 1;
            subscription.retry_count += 1;
        }
    }

    async fn on_permanent_failure(&self, delivery: &Delivery, reason: &str) {
        warn!(
            subscription_id = %delivery.subscription_id,
            event_id = %delivery.event.id,
            attempts = delivery.attempt,
            reason,
            "delivery attempts exhausted; dropping",
        );
        {
            let mut subscriptions = self.subscriptions.write().await;
            if let Some(subscription) = subscriptions.get_mut(&delivery.subscription_id) {
                subscription.failure_count += 1;
            }
        }
        let _ = self.signals.send(DeliverySignal::DeliveryFailed {
            subscription_id: delivery.subscription_id,
            event_id: delivery.event.id,
            attempts: delivery.attempt,
        });
    }

    fn backoff_delay_ms(&self, failed_attempt: u32) -> u64 {
        let exponent = failed_attempt.saturating_sub(1) as i32;
        let raw = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(exponent);
        raw.min(self.config.max_delay_ms as f64) as u64
    }

    async fn checkpoint_queue(&self) -> Result<()> {
        let queue = self.queue.read().await;
        self.queue_store.persist(&queue).await
    }
}

fn validate_url(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|error| AgentPayError::invalid_input("url", format!("malformed URL: {error}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AgentPayError::invalid_input(
            "url",
            format!("scheme '{}' is not http or https", parsed.scheme()),
        ));
    }
    Ok(parsed.to_string())
}

/// Intersect raw tags with the closed recognized set, preserving order and
/// dropping duplicates; an empty result is an error
fn filter_event_types(raw: &[String]) -> Result<Vec<EventType>> {
    let mut events = Vec::new();
    for tag in raw {
        if let Ok(event_type) = EventType::parse(tag) {
            if !events.contains(&event_type) {
                events.push(event_type);
            }
        }
    }
    if events.is_empty() {
        return Err(AgentPayError::NoValidEventTypes);
    }
    Ok(events)
}
