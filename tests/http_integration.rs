//! Integration tests for the HTTP surface.
//!
//! The full router runs over in-memory stores and a scripted gateway:
//! 1. Payment endpoints require a session token
//! 2. Processor webhooks settle and answer with the processor's ack body
//! 3. Panel webhooks are size-checked and signature-checked before parsing

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::Router;
use hmac::{Hmac, Mac};
use http::{Request, StatusCode};
use secrecy::SecretString;
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;

use tollgate::adapters::auth::MockSessionValidator;
use tollgate::adapters::http::{build_router, AppState};
use tollgate::adapters::memory::{
    InMemoryPaymentStore, InMemorySubscriptionRepository, MockGateway, RecordingListener,
    RecordingNotifier,
};
use tollgate::adapters::panel::{PanelWebhookVerifier, SIGNATURE_HEADER};
use tollgate::application::handlers::settlement::{
    CheckPaymentStatusHandler, CreatePaymentIntentHandler, HandleGatewayWebhookHandler,
    SettlementEngine,
};
use tollgate::application::handlers::subscription::{PanelNoticePolicy, SyncPanelEventHandler};
use tollgate::domain::foundation::{Currency, OrderId, PanelUserId, SubscriptionId, Timestamp, UserId};
use tollgate::domain::settlement::{
    IntentStatus, PaymentState, Processor, SettlementEvent, TolerancePolicy,
};
use tollgate::domain::subscription::{Subscription, SubscriptionStatus};
use tollgate::ports::{GatewayRegistry, VerificationError, WebhookAck};

// =============================================================================
// Test Infrastructure
// =============================================================================

const TOKEN: &str = "session-42";
const PANEL_SECRET: &str = "panel-webhook-secret";
const PANEL_MAX_BODY: usize = 512;

struct TestApp {
    router: Router,
    store: Arc<InMemoryPaymentStore>,
    subscriptions: Arc<InMemorySubscriptionRepository>,
    gateway: Arc<MockGateway>,
    listener: Arc<RecordingListener>,
}

fn test_app(panel_secret: Option<&str>) -> TestApp {
    let store = Arc::new(InMemoryPaymentStore::new());
    let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
    let gateway = Arc::new(
        MockGateway::new(Processor::Freekassa).with_ack(WebhookAck::Text("YES")),
    );
    let gateways = GatewayRegistry::new().with(gateway.clone());
    let listener = Arc::new(RecordingListener::new());
    let engine = Arc::new(SettlementEngine::new(
        store.clone(),
        TolerancePolicy::new(),
        listener.clone(),
    ));

    let state = AppState {
        gateways: gateways.clone(),
        create_payment_intent: Arc::new(CreatePaymentIntentHandler::new(
            store.clone(),
            gateways.clone(),
        )),
        check_payment_status: Arc::new(CheckPaymentStatusHandler::new(
            store.clone(),
            gateways.clone(),
            engine.clone(),
        )),
        gateway_webhooks: Arc::new(HandleGatewayWebhookHandler::new(gateways, engine)),
        panel_verifier: Arc::new(PanelWebhookVerifier::new(
            panel_secret.map(|s| SecretString::new(s.to_string())),
            PANEL_MAX_BODY,
        )),
        panel_events: Arc::new(SyncPanelEventHandler::new(
            store.clone(),
            subscriptions.clone(),
            Arc::new(RecordingNotifier::new()),
            PanelNoticePolicy::default(),
        )),
        session_validator: Arc::new(MockSessionValidator::new().with_test_user(TOKEN, 42)),
        trust_proxy_headers: false,
    };

    TestApp {
        router: build_router(state, Duration::from_secs(5)),
        store,
        subscriptions,
        gateway,
        listener,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

fn create_payment(token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/payments")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(PANEL_SECRET.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn panel_request(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/panel/webhook")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body)).unwrap()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn health_lists_configured_processors() {
    let app = test_app(None);

    let (status, body) = send(
        &app.router,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["processors"], json!(["freekassa"]));
}

// =============================================================================
// Payments
// =============================================================================

#[tokio::test]
async fn create_payment_requires_session() {
    let app = test_app(None);

    let (status, _) = send(
        &app.router,
        create_payment(None, json!({ "processor": "freekassa", "amount_minor": 50_000 })),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.gateway.checkout_calls(), 0);
}

#[tokio::test]
async fn create_payment_opens_checkout_and_records_pending_intent() {
    let app = test_app(None);

    let (status, body) = send(
        &app.router,
        create_payment(
            Some(TOKEN),
            json!({ "processor": "freekassa", "amount_minor": 50_000 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let body = json_body(&body);
    let order_id = OrderId::new(body["order_id"].as_str().unwrap()).unwrap();
    assert!(order_id.as_str().starts_with("f42_"));
    assert!(body["checkout_url"].as_str().unwrap().contains(order_id.as_str()));

    let intent = app.store.intent(&order_id).unwrap();
    assert_eq!(intent.status, IntentStatus::Pending);
    assert_eq!(intent.amount_minor, 50_000);
    assert_eq!(intent.user_id, UserId::new(42));
}

#[tokio::test]
async fn create_payment_rejects_amount_outside_limits() {
    let app = test_app(None);

    let (status, body) = send(
        &app.router,
        create_payment(Some(TOKEN), json!({ "processor": "freekassa", "amount_minor": 5 })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(&body)["code"], "AMOUNT_OUT_OF_RANGE");
    assert_eq!(app.gateway.checkout_calls(), 0);
}

#[tokio::test]
async fn create_payment_rejects_currency_the_processor_does_not_settle_in() {
    let app = test_app(None);

    let (status, body) = send(
        &app.router,
        create_payment(
            Some(TOKEN),
            json!({ "processor": "freekassa", "amount_minor": 50_000, "currency": "USD" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(&body)["code"], "UNSUPPORTED_CURRENCY");
    assert_eq!(app.gateway.checkout_calls(), 0);
    assert_eq!(app.store.intent_count(), 0);
}

#[tokio::test]
async fn failed_checkout_is_reported_without_processor_detail() {
    let app = test_app(None);
    app.gateway.fail_checkout("merchant 1234 blocked");

    let (status, body) = send(
        &app.router,
        create_payment(
            Some(TOKEN),
            json!({ "processor": "freekassa", "amount_minor": 50_000 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(!String::from_utf8_lossy(&body).contains("1234"));
}

#[tokio::test]
async fn status_of_unknown_order_is_not_found() {
    let app = test_app(None);

    let (status, _) = send(
        &app.router,
        Request::builder()
            .uri("/payments/f42_zzzzzz")
            .header("authorization", format!("Bearer {}", TOKEN))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Processor webhooks
// =============================================================================

#[tokio::test]
async fn verified_webhook_settles_and_returns_processor_ack() {
    let app = test_app(None);
    let (_, body) = send(
        &app.router,
        create_payment(
            Some(TOKEN),
            json!({ "processor": "freekassa", "amount_minor": 50_000 }),
        ),
    )
    .await;
    let order_id = OrderId::new(json_body(&body)["order_id"].as_str().unwrap()).unwrap();
    app.gateway.push_webhook(Ok(SettlementEvent::verified(
        Processor::Freekassa,
        order_id.clone(),
        Some("fk-777".to_string()),
        50_000,
        Currency::Rub,
        "paid",
        PaymentState::Paid,
    )));

    let (status, body) = send(
        &app.router,
        Request::builder()
            .method("POST")
            .uri("/webhooks/freekassa")
            .body(Body::from("MERCHANT_ID=1&AMOUNT=500"))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"YES");
    assert_eq!(app.store.ledger_rows_for(&order_id).len(), 1);
    assert_eq!(app.listener.settled().len(), 1);

    let (status, body) = send(
        &app.router,
        Request::builder()
            .uri(format!("/payments/{}", order_id))
            .header("authorization", format!("Bearer {}", TOKEN))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], "settled");
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected_without_detail() {
    let app = test_app(None);
    app.gateway
        .push_webhook(Err(VerificationError::InvalidSignature));

    let (status, body) = send(
        &app.router,
        Request::builder()
            .method("POST")
            .uri("/webhooks/freekassa")
            .body(Body::from("SIGN=forged"))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let body = json_body(&body);
    assert_eq!(body["code"], "WEBHOOK_REJECTED");
    assert!(body.get("message").is_none());
    assert!(app.store.ledger_rows().is_empty());
}

#[tokio::test]
async fn webhook_for_unconfigured_processor_is_404() {
    let app = test_app(None);

    let (status, _) = send(
        &app.router,
        Request::builder()
            .method("POST")
            .uri("/webhooks/wata")
            .body(Body::from("{}"))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_body_over_router_limit_is_413_not_500() {
    let app = test_app(None);
    let body = vec![b'x'; 1024 * 1024 + 1];

    let (status, _) = send(
        &app.router,
        Request::builder()
            .method("POST")
            .uri("/webhooks/freekassa")
            .header("content-length", body.len())
            .body(Body::from(body))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.listener.settled().is_empty());
}

// =============================================================================
// Panel webhooks
// =============================================================================

fn linked_subscription(app: &TestApp) -> Subscription {
    let now = Timestamp::now();
    let subscription = Subscription {
        id: SubscriptionId::new(),
        user_id: UserId::new(42),
        status: SubscriptionStatus::Active,
        end_date: now.plus_secs(7 * 86_400),
        traffic_limit_gb: 50,
        traffic_used_gb: 3.0,
        subscription_url: None,
        crypto_link: None,
        short_uuid: None,
        connected_squads: Vec::new(),
        panel_user_id: Some(PanelUserId::new()),
        last_external_update_at: None,
        updated_at: now,
    };
    app.subscriptions.insert(subscription.clone());
    subscription
}

#[tokio::test]
async fn signed_panel_event_updates_subscription() {
    let app = test_app(Some(PANEL_SECRET));
    let subscription = linked_subscription(&app);
    let panel_user_id = subscription.panel_user_id.unwrap();
    let body = json!({
        "scope": "user",
        "event": "user.expired",
        "data": { "uuid": panel_user_id.to_string() }
    })
    .to_string()
    .into_bytes();
    let signature = sign(&body);

    let (status, response) = send(&app.router, panel_request(body, Some(signature))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&response), json!({ "status": "ok", "processed": true }));
    let stored = app.subscriptions.get(subscription.id).unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Expired);
    assert!(stored.last_external_update_at.is_some());
}

#[tokio::test]
async fn unknown_panel_event_is_acknowledged_unprocessed() {
    let app = test_app(Some(PANEL_SECRET));
    let body = json!({ "scope": "user", "event": "user.teleported", "data": {} })
        .to_string()
        .into_bytes();
    let signature = sign(&body);

    let (status, response) = send(&app.router, panel_request(body, Some(signature))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&response)["processed"], false);
}

#[tokio::test]
async fn panel_event_with_wrong_signature_is_401() {
    let app = test_app(Some(PANEL_SECRET));
    let subscription = linked_subscription(&app);
    let body = json!({
        "event": "user.disabled",
        "data": { "uuid": subscription.panel_user_id.unwrap().to_string() }
    })
    .to_string()
    .into_bytes();

    let (status, _) = send(&app.router, panel_request(body, Some("00".repeat(32)))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        app.subscriptions.get(subscription.id).unwrap().status,
        SubscriptionStatus::Active
    );
}

#[tokio::test]
async fn panel_event_without_signature_is_401() {
    let app = test_app(Some(PANEL_SECRET));

    let (status, _) = send(&app.router, panel_request(b"{}".to_vec(), None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn oversized_panel_body_is_413() {
    let app = test_app(Some(PANEL_SECRET));
    let body = vec![b'x'; PANEL_MAX_BODY + 1];
    let signature = sign(&body);

    let (status, _) = send(&app.router, panel_request(body, Some(signature))).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn signed_but_malformed_panel_body_is_400() {
    let app = test_app(Some(PANEL_SECRET));
    let body = b"not json".to_vec();
    let signature = sign(&body);

    let (status, _) = send(&app.router, panel_request(body, Some(signature))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn panel_webhook_without_secret_is_503() {
    let app = test_app(None);
    let body = b"{}".to_vec();
    let signature = sign(&body);

    let (status, _) = send(&app.router, panel_request(body, Some(signature))).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
