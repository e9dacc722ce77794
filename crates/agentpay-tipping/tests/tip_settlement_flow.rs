//! End-to-end tip settlement: a tip carried by a real escrow, with the
//! wire events from both engines landing in the shared event log in
//! transition order.

use std::sync::Arc;

use rust_decimal_macros::dec;

use agentpay_escrow::EscrowEngine;
use agentpay_tipping::{EscrowBackedFactory, TippingEngine};
use agentpay_types::{CreateTipRequest, EscrowState, TipState, Token};
use agentpay_webhooks::{WebhookConfig, WebhookEngine};

fn tip_request() -> CreateTipRequest {
    CreateTipRequest {
        repo_ref: "octo/widgets".to_string(),
        tipper: "grateful-agent".to_string(),
        recipient: "octo-cat".to_string(),
        amount: dec!(25),
        token: Token::PrimaryNative,
        message: Some("thanks for the parser fix".to_string()),
        issue_url: None,
        commit_ref: Some("abc123".to_string()),
    }
}

#[tokio::test]
async fn tip_rides_a_real_escrow_to_settlement() {
    let webhooks = Arc::new(WebhookEngine::new(WebhookConfig::default(), None).unwrap());
    let escrow = Arc::new(EscrowEngine::new(webhooks.clone(), None));
    let tipping = TippingEngine::new(webhooks.clone(), None);
    let factory = EscrowBackedFactory::new(escrow.clone()).with_timeout_minutes(120);

    let tip = tipping.create_tip(tip_request()).await.unwrap();

    // the factory opens a real escrow: tipper pays, recipient receives
    let linked = tipping.create_escrow(tip.id, &factory).await.unwrap();
    let escrow_id = linked.escrow_id.unwrap();
    let backing = escrow.get(escrow_id).await.unwrap();
    assert_eq!(backing.payer, "grateful-agent");
    assert_eq!(backing.payee, "octo-cat");
    assert_eq!(backing.amount, dec!(25));
    assert_eq!(backing.state, EscrowState::Pending);

    // the caller reports on-chain funding to both engines; a native-token
    // escrow with no conditions locks in the same step
    let funded = escrow.fund(escrow_id, "0xA").await.unwrap();
    assert_eq!(funded.state, EscrowState::Locked);
    tipping.fund_escrow(tip.id, "0xA").await.unwrap();
    tipping.lock_escrow(tip.id).await.unwrap();

    // settlement: escrow releases, tip records the settlement hashes
    escrow.release(escrow_id, "tip settled").await.unwrap();
    let released = tipping
        .release_tip(tip.id, "0xB", 123, Some(50_000))
        .await
        .unwrap();
    assert_eq!(released.state, TipState::Released);
    assert_eq!(released.settlement.unwrap().tx_hash, "0xB");

    // both engines published through the same delivery engine, in
    // transition order
    let log: Vec<String> = webhooks
        .recent_log(20)
        .await
        .into_iter()
        .map(|e| e.entry)
        .collect();
    assert_eq!(
        log,
        vec![
            "tipping_received",
            "escrow_created",
            "escrow_funded",
            "escrow_locked",
            "escrow_released",
            "payment_settled",
        ]
    );

    // the tip timeline is monotonically non-decreasing along the chain
    let timeline = released.timeline;
    let escrow_created_at = timeline.escrow_created_at.unwrap();
    let funded_at = timeline.funded_at.unwrap();
    let locked_at = timeline.locked_at.unwrap();
    let released_at = timeline.released_at.unwrap();
    assert!(timeline.created_at <= escrow_created_at);
    assert!(escrow_created_at <= funded_at);
    assert!(funded_at <= locked_at);
    assert!(locked_at <= released_at);
}
