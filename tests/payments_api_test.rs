//! Integration tests for the /api/payments routes, backed by the in-memory store

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tower::util::ServiceExt;
use tuition_payments::api::{router, PaymentsState};
use tuition_payments::database::memory::InMemoryStore;
use tuition_payments::database::repository::{SettlementStore, TransactionStore};
use tuition_payments::health::HealthChecker;
use tuition_payments::payments::envelope::GatewayTransaction;
use tuition_payments::payments::factory::GatewayRegistry;
use tuition_payments::payments::providers::wompi::signed_event;
use tuition_payments::payments::providers::WompiSettings;
use tuition_payments::payments::types::{Payer, TransactionStatus};
use tuition_payments::services::payment_orchestrator::{
    OrchestratorConfig, PaymentOrchestrator, PaymentStores,
};
use uuid::Uuid;

const EVENTS_SECRET: &str = "events_secret_api";

struct TestApp {
    store: InMemoryStore,
    tenant_id: Uuid,
    user_id: Uuid,
    profile_id: Uuid,
}

async fn setup(enable_online_payments: bool) -> TestApp {
    let store = InMemoryStore::new();
    let tenant_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let profile_id = Uuid::new_v4();

    store
        .add_payer(
            Payer {
                user_id,
                profile_id,
                tenant_id,
                email: Some("parent@school.example".to_string()),
                full_name: Some("Parent Payer".to_string()),
            },
            Decimal::ZERO,
        )
        .await;
    store
        .put_tenant_settings(
            tenant_id,
            json!({
                "enableOnlinePayments": enable_online_payments,
                "paymentGateway": "wompi",
                "wompi": {
                    "pubKey": "pub_test_api",
                    "integritySecret": "integrity_api",
                    "eventsSecret": EVENTS_SECRET,
                    "isSandbox": true
                }
            }),
        )
        .await;

    TestApp {
        store,
        tenant_id,
        user_id,
        profile_id,
    }
}

fn build_app(store: &InMemoryStore, simulation: bool) -> Router {
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        GatewayRegistry::with_wompi(WompiSettings::default()).unwrap(),
        PaymentStores::in_memory(store.clone()),
        OrchestratorConfig::default(),
    ));
    let state = PaymentsState::new(orchestrator, HealthChecker::without_database());
    router(if simulation {
        state.with_simulation()
    } else {
        state
    })
}

async fn body_json(response: axum::response::Response) -> JsonValue {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn start_request(app: &TestApp, body: JsonValue) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/payments")
        .header("content-type", "application/json")
        .header("x-tenant-id", app.tenant_id.to_string())
        .header("x-user-id", app.user_id.to_string())
        .header("x-request-id", "req-test-1")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn callback_request(payload: &JsonValue) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/payments/callback")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

#[tokio::test]
async fn start_then_callback_credits_balance() {
    let test = setup(true).await;
    let app = build_app(&test.store, false);

    let response = app
        .clone()
        .oneshot(start_request(
            &test,
            json!({"amount": 150000, "redirect_url": "https://school.example/done"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let intent = body_json(response).await;
    let reference = intent["reference"].as_str().unwrap().to_string();
    assert_eq!(intent["amount_in_cents"], json!(15_000_000));
    assert_eq!(intent["currency"], json!("COP"));
    assert_eq!(intent["public_key"], json!("pub_test_api"));

    let payload = signed_event(
        &GatewayTransaction {
            id: "wompi-tx-1".to_string(),
            status: "APPROVED".to_string(),
            reference: reference.clone(),
            amount_in_cents: 15_000_000,
            currency: "COP".to_string(),
        },
        1_700_000_000,
        EVENTS_SECRET,
    );

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(callback_request(&payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));
    }

    let tx = test
        .store
        .find_by_reference(&reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Approved);
    assert_eq!(tx.external_id.as_deref(), Some("wompi-tx-1"));
    assert_eq!(
        test.store.balance(test.profile_id).await.unwrap(),
        Some(Decimal::from(150_000))
    );
    assert_eq!(test.store.payment_records().await.len(), 1);
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let test = setup(true).await;
    let app = build_app(&test.store, false);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments")
                .header("content-type", "application/json")
                .header("x-tenant-id", test.tenant_id.to_string())
                .body(Body::from(json!({"amount": 50000}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], json!("UNAUTHENTICATED"));
}

#[tokio::test]
async fn disabled_tenant_gets_payments_disabled() {
    let test = setup(false).await;
    let app = build_app(&test.store, false);

    let response = app
        .oneshot(start_request(&test, json!({"amount": 50000})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"], json!("PAYMENTS_DISABLED"));
    assert_eq!(body["request_id"], json!("req-test-1"));
    assert!(test.store.transactions().await.is_empty());
}

#[tokio::test]
async fn invalid_body_is_bad_request() {
    let test = setup(true).await;
    let app = build_app(&test.store, false);

    let response = app
        .oneshot(start_request(&test, json!({"currency": "COP"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn garbage_callbacks_are_acknowledged() {
    let test = setup(true).await;
    let app = build_app(&test.store, false);

    for body in ["not json", "{}", r#"{"data":{"transaction":{"reference":"PAY-x"}}}"#] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/payments/callback")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert!(test.store.payment_records().await.is_empty());
}

#[tokio::test]
async fn simulate_route_only_exists_when_enabled() {
    let test = setup(true).await;

    let disabled = build_app(&test.store, false);
    let response = disabled
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments/simulate")
                .header("content-type", "application/json")
                .body(Body::from(json!({"reference": "PAY-x"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let app = build_app(&test.store, true);
    let response = app
        .clone()
        .oneshot(start_request(&test, json!({"amount": 20000})))
        .await
        .unwrap();
    let intent = body_json(response).await;
    let reference = intent["reference"].as_str().unwrap().to_string();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments/simulate")
                .header("content-type", "application/json")
                .body(Body::from(json!({"reference": reference}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        test.store.balance(test.profile_id).await.unwrap(),
        Some(Decimal::from(20_000))
    );
}

#[tokio::test]
async fn reconcile_unknown_reference_is_not_found() {
    let test = setup(true).await;
    let app = build_app(&test.store, false);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments/PAY-unknown/reconcile")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], json!("TRANSACTION_NOT_FOUND"));
}

#[tokio::test]
async fn health_reports_degraded_without_database() {
    let test = setup(true).await;
    let app = build_app(&test.store, false);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], json!("degraded"));
}
