//! Both HTTP services on ephemeral ports, driven with reqwest.

use axum::Router;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;

use bank_ledger::config::PrecheckPolicy;
use bank_ledger::ledger::{self, InMemoryLedgerStore, JournalEngine};
use bank_ledger::payment::{self, HttpLedgerClient, InMemoryPaymentStore, TransferOrchestrator};
use bank_ledger::resilience::{BreakerRegistry, BreakerSettings};

async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{}", addr)
}

async fn spawn_ledger() -> String {
    let engine = Arc::new(JournalEngine::new(Arc::new(InMemoryLedgerStore::new())));
    spawn(ledger::api::router(engine)).await
}

async fn spawn_orchestrator(ledger_url: &str, precheck: Option<PrecheckPolicy>) -> String {
    let client = HttpLedgerClient::new(ledger_url, Duration::from_secs(2)).unwrap();
    let orchestrator = TransferOrchestrator::new(
        Arc::new(InMemoryPaymentStore::new()),
        Arc::new(client),
        Arc::new(BreakerRegistry::new(BreakerSettings::default())),
    )
    .with_precheck(precheck);
    spawn(payment::api::router(Arc::new(orchestrator))).await
}

fn dec(v: &Value) -> Decimal {
    Decimal::from_str(v.as_str().unwrap()).unwrap()
}

async fn open_account(http: &reqwest::Client, base: &str, number: &str, account_type: &str) -> String {
    let resp = http
        .post(format!("{}/accounts", base))
        .json(&json!({
            "owner_id": Uuid::new_v4(),
            "number": number,
            "account_type": account_type,
            "currency": "USD",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    body["data"]["id"].as_str().unwrap().to_string()
}

async fn post_transaction(http: &reqwest::Client, base: &str, body: Value) -> (StatusCode, Value) {
    let resp = http
        .post(format!("{}/transactions", base))
        .json(&body)
        .send()
        .await
        .unwrap();
    (resp.status(), resp.json().await.unwrap())
}

async fn balance(http: &reqwest::Client, base: &str, id: &str) -> Decimal {
    let body: Value = http
        .get(format!("{}/accounts/{}", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    dec(&body["data"]["balance"])
}

fn transfer_body(from: &str, to: &str, amount: &str, reference: Option<&str>) -> Value {
    json!({
        "description": "http transfer",
        "reference_id": reference,
        "postings": [
            {"account_id": from, "amount": amount, "direction": -1},
            {"account_id": to, "amount": amount, "direction": 1},
        ],
    })
}

#[tokio::test]
async fn ledger_http_lifecycle() {
    let http = reqwest::Client::new();
    let base = spawn_ledger().await;

    let health: Value = http.get(format!("{}/health", base)).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["code"], 0);
    assert_eq!(health["data"]["service"], "ledger");

    let funding = open_account(&http, &base, "EQ-1", "EQUITY").await;
    let alice = open_account(&http, &base, "A-1", "ASSET").await;

    let (status, body) = post_transaction(&http, &base, transfer_body(&funding, &alice, "500", Some("seed"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "POSTED");
    let entry_id = body["data"]["id"].as_str().unwrap().to_string();

    // same reference: the existing entry, not a second posting
    let (status, body) = post_transaction(&http, &base, transfer_body(&funding, &alice, "500", Some("seed"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], entry_id.as_str());
    assert_eq!(balance(&http, &base, &alice).await, Decimal::from(500));

    let unbalanced = json!({
        "description": "bad",
        "postings": [
            {"account_id": funding, "amount": "10", "direction": -1},
            {"account_id": alice, "amount": "9", "direction": 1},
        ],
    });
    let (status, body) = post_transaction(&http, &base, unbalanced).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "UNBALANCED_ENTRY");

    let huge = "79228162514264337593543950335";
    let oversized = json!({
        "description": "huge",
        "postings": [
            {"account_id": funding, "amount": huge, "direction": 1},
            {"account_id": alice, "amount": huge, "direction": 1},
        ],
    });
    let (status, body) = post_transaction(&http, &base, oversized).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_ARGUMENT");

    let (status, body) = post_transaction(&http, &base, transfer_body(&alice, &funding, "600", None)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "INSUFFICIENT_FUNDS");

    let resp = http
        .post(format!("{}/transactions/{}/void", base, entry_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(balance(&http, &base, &alice).await, Decimal::ZERO);

    let body: Value = http
        .get(format!("{}/transactions/{}", base, entry_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["status"], "VOID");

    let resp = http
        .get(format!("{}/accounts/{}", base, Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = http.get(format!("{}/accounts/not-a-uuid", base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn orchestrator_settles_over_http() {
    let http = reqwest::Client::new();
    let ledger = spawn_ledger().await;
    let orchestrator = spawn_orchestrator(&ledger, Some(PrecheckPolicy::FailClosed)).await;

    let funding = open_account(&http, &ledger, "EQ-1", "EQUITY").await;
    let a = open_account(&http, &ledger, "A", "ASSET").await;
    let b = open_account(&http, &ledger, "B", "ASSET").await;
    post_transaction(&http, &ledger, transfer_body(&funding, &a, "500", None)).await;

    let resp = http
        .post(format!("{}/transfer", orchestrator))
        .json(&json!({
            "from_account_id": a,
            "to_account_id": b,
            "amount": "100.00",
            "currency": "USD",
            "description": "rent",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["status"], "COMPLETED");
    let payment_id = body["data"]["payment_id"].as_str().unwrap().to_string();

    assert_eq!(balance(&http, &ledger, &a).await, Decimal::from(400));
    assert_eq!(balance(&http, &ledger, &b).await, Decimal::from(100));

    let body: Value = http
        .get(format!("{}/payments/{}", orchestrator, payment_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["status"], "COMPLETED");
    assert!(body["data"]["journal_entry_id"].is_string());

    // pre-check sees the balance and rejects without creating a payment
    let resp = http
        .post(format!("{}/transfer", orchestrator))
        .json(&json!({
            "from_account_id": b,
            "to_account_id": a,
            "amount": "1000",
            "currency": "USD",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "INSUFFICIENT_FUNDS");
    assert!(body.get("data").is_none());

    // unknown sender under fail_closed
    let resp = http
        .post(format!("{}/transfer", orchestrator))
        .json(&json!({
            "from_account_id": Uuid::new_v4(),
            "to_account_id": a,
            "amount": "1",
            "currency": "USD",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = http
        .post(format!("{}/transfer", orchestrator))
        .json(&json!({
            "from_account_id": a,
            "to_account_id": b,
            "amount": "0",
            "currency": "USD",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["msg"], "amount must be greater than zero");

    let resp = http
        .post(format!("{}/transfer", orchestrator))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn breaker_opens_when_ledger_is_down() {
    let http = reqwest::Client::new();
    // a port that was just released: connections are refused
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    };
    let orchestrator = spawn_orchestrator(&dead, None).await;

    let request = json!({
        "from_account_id": Uuid::new_v4(),
        "to_account_id": Uuid::new_v4(),
        "amount": "10",
        "currency": "USD",
    });

    for _ in 0..5 {
        let resp = http
            .post(format!("{}/transfer", orchestrator))
            .json(&request)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "LEDGER_UNAVAILABLE");
        assert_eq!(body["data"]["status"], "FAILED");
    }

    let resp = http
        .post(format!("{}/transfer", orchestrator))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "CIRCUIT_OPEN");

    // the FAILED payment is queryable
    let payment_id = body["data"]["payment_id"].as_str().unwrap();
    let body: Value = http
        .get(format!("{}/payments/{}", orchestrator, payment_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["status"], "FAILED");
    assert!(body["data"]["failure_reason"].as_str().unwrap().starts_with("CIRCUIT_OPEN"));
}
