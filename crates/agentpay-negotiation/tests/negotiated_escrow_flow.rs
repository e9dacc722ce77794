//! End-to-end negotiation flow: quote -> counter -> acceptance -> escrow
//! lifecycle, with every escrow transition delivered to a live webhook
//! receiver by the background worker.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use agentpay_escrow::EscrowEngine;
use agentpay_negotiation::NegotiationEngine;
use agentpay_types::{
    CreateQuoteRequest, EscrowState, QuoteTerms, QuoteTermsPatch, SubscriptionOptions, Token,
};
use agentpay_webhooks::{verify_signature, WebhookConfig, WebhookEngine};

#[derive(Debug, Clone)]
struct RecordedRequest {
    headers: HashMap<String, String>,
    body: String,
}

struct StubReceiver {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl StubReceiver {
    fn url(&self) -> String {
        format!("http://{}/hook", self.addr)
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let header_text = String::from_utf8_lossy(&buf[..pos]).to_string();
            let mut headers = HashMap::new();
            for line in header_text.lines().skip(1) {
                if let Some((name, value)) = line.split_once(':') {
                    headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
                }
            }
            let content_length: usize = headers
                .get("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let mut body = buf[pos + 4..].to_vec();
            while body.len() < content_length {
                let n = socket.read(&mut chunk).await.ok()?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&chunk[..n]);
            }
            return Some(RecordedRequest {
                headers,
                body: String::from_utf8_lossy(&body).to_string(),
            });
        }
    }
}

async fn start_stub() -> StubReceiver {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));

    let recorded = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            if let Some(request) = read_request(&mut socket).await {
                recorded.lock().await.push(request);
            }
            let response = "HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.flush().await;
        }
    });

    StubReceiver { addr, requests }
}

#[tokio::test]
async fn negotiated_trade_is_delivered_to_subscribers() {
    let stub = start_stub().await;

    let webhooks = Arc::new(
        WebhookEngine::new(
            WebhookConfig {
                worker_tick_ms: 20,
                initial_delay_ms: 10,
                queue_checkpoint_interval_ms: 100,
                ..WebhookConfig::default()
            },
            None,
        )
        .unwrap(),
    );
    let escrow = Arc::new(EscrowEngine::new(webhooks.clone(), None));
    let negotiation = NegotiationEngine::new(escrow.clone(), None);

    let receipt = webhooks
        .register(
            &stub.url(),
            &[
                "escrow_created".to_string(),
                "escrow_funded".to_string(),
                "escrow_locked".to_string(),
                "escrow_released".to_string(),
            ],
            SubscriptionOptions::default(),
        )
        .await
        .unwrap();

    Arc::clone(&webhooks).start();

    // negotiate: quote at 100, client counters at 80, provider accepts
    let quote = negotiation
        .create_quote(CreateQuoteRequest {
            provider: "P".to_string(),
            client: "C".to_string(),
            service: "model evaluation run".to_string(),
            price: dec!(100),
            token: Token::PrimaryNative,
            terms: QuoteTerms {
                delivery_time_minutes: Some(30),
                ..QuoteTerms::default()
            },
            valid_for_minutes: 60,
        })
        .await
        .unwrap();
    negotiation
        .counter_offer(quote.id, "C", dec!(80), QuoteTermsPatch::default())
        .await
        .unwrap();
    let accepted = negotiation.accept_counter(quote.id, "P", None).await.unwrap();
    let escrow_id = accepted.escrow_id.unwrap();

    // drive the escrow to released through the standard path
    escrow.fund(escrow_id, "0xFUND").await.unwrap();
    escrow.approve(escrow_id, "C").await.unwrap();
    escrow.approve(escrow_id, "P").await.unwrap();
    negotiation
        .mark_delivered(quote.id, "P", serde_json::json!({"artifact": "results.tar"}))
        .await
        .unwrap();
    negotiation.confirm_delivery(quote.id, "C").await.unwrap();
    assert_eq!(
        escrow.get(escrow_id).await.unwrap().state,
        EscrowState::Released
    );

    // the worker delivers all four transitions
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let info = webhooks.get(receipt.id).await.unwrap();
        if info.success_count >= 4 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for deliveries, got {}",
            info.success_count
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    webhooks.shutdown().await;

    let requests = stub.requests.lock().await;
    assert_eq!(requests.len(), 4);

    let types: Vec<&str> = requests
        .iter()
        .map(|r| r.headers["x-event-type"].as_str())
        .collect();
    assert!(types.contains(&"escrow_created"));
    assert!(types.contains(&"escrow_released"));

    // every delivery is signed over its exact body, and event ids are
    // unique so receivers can deduplicate
    let mut event_ids = HashSet::new();
    for request in requests.iter() {
        assert!(verify_signature(
            &receipt.secret,
            request.body.as_bytes(),
            &request.headers["x-signature"],
        )
        .unwrap());
        assert!(event_ids.insert(request.headers["x-event-id"].clone()));

        let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["data"]["payer"], "C");
        assert_eq!(body["data"]["payee"], "P");
    }
}
