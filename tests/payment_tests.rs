mod common;

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use sha2::Sha256;

use formrelay::integrations::payments::quickstream::{SIGNATURE_HEADER, classify_status, titleize};
use formrelay::integrations::{HookChain, IntegrationHook, ThreeDsStatus};
use formrelay::models::{AuthenticationState, Payment, PaymentStatus};
use formrelay::payments::amount::parse_amount;
use formrelay::payments::three_ds;

const WEBHOOK_SECRET: &str = "whsec-test";

async fn quickstream(app: &common::TestApp) -> Value {
    app.create_integration(
        "qs",
        "quickstream",
        json!({
            "publishableKey": "pub",
            "secretKey": "secret",
            "supplierBusinessCode": "SUPPLIER",
            "webhookSecret": WEBHOOK_SECRET,
        }),
    )
    .await
}

fn payment_form(settings: Value) -> Value {
    json!({
        "handle": "donate",
        "title": "Donate",
        "fields": [
            { "handle": "email", "label": "Email", "type": "email", "required": true },
            { "handle": "amount", "label": "Amount", "type": "single_line_text" },
            {
                "handle": "payment",
                "label": "Payment",
                "type": "payment",
                "integration": "qs",
                "settings": settings,
            },
        ],
        "settings": { "rate_limit": 100 },
    })
}

fn fixed_aud() -> Value {
    json!({ "amountType": "fixed", "amountFixed": "25.00", "currencyFixed": "aud" })
}

fn donation() -> Value {
    json!({ "email": "ada@example.com", "payment": { "singleUseTokenId": "tok_1" } })
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

async fn post_webhook(app: &common::TestApp, body: &Value, signature: Option<String>) -> (Value, StatusCode) {
    let bytes = serde_json::to_vec(body).unwrap();
    let signature = signature.unwrap_or_else(|| sign(&bytes));
    let resp = app
        .client
        .post(app.url("/v1/payments/qs/webhook"))
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(bytes)
        .send()
        .await
        .expect("webhook request failed");
    let status = resp.status();
    (resp.json().await.unwrap_or(Value::Null), status)
}

async fn payments_for(app: &common::TestApp, submission_id: &str) -> Vec<Payment> {
    app.state
        .stores
        .payments
        .list_for_submission(submission_id.parse().unwrap())
        .await
        .unwrap()
}

async fn submission_status(app: &common::TestApp, submission_id: &str) -> String {
    app.state
        .stores
        .submissions
        .find_by_id(submission_id.parse().unwrap())
        .await
        .unwrap()
        .unwrap()
        .status
}

// ── Capture ─────────────────────────────────────────────────────

#[tokio::test]
async fn approved_payment_completes_submission() {
    let app = common::spawn_app().await;
    quickstream(&app).await;
    app.create_form(payment_form(fixed_aud())).await;
    app.fake.respond(
        "/quickstream/transactions",
        200,
        json!({ "status": "Approved", "receiptNumber": "R100", "responseText": "Approved" }),
    );

    let (body, status) = app.submit_json("donate", &donation()).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["payments"][0]["field"], "payment");
    assert_eq!(body["payments"][0]["status"], "success");
    assert_eq!(body["payments"][0]["reference"], "R100");

    let sent = app.fake.requests_to("/quickstream/transactions");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body["singleUseTokenId"], "tok_1");
    assert_eq!(sent[0].body["supplierBusinessCode"], "SUPPLIER");
    assert_eq!(sent[0].body["principalAmount"], json!(25.0));
    assert_eq!(sent[0].body["currency"], "AUD");
    assert!(
        sent[0].headers["authorization"]
            .to_str()
            .unwrap()
            .starts_with("Basic ")
    );

    let submission_id = body["submission_id"].as_str().unwrap();
    assert_eq!(submission_status(&app, submission_id).await, "complete");

    let payments = payments_for(&app, submission_id).await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status(), Some(PaymentStatus::Success));
    assert_eq!(payments[0].amount, Decimal::from_str("25.00").unwrap());
}

#[tokio::test]
async fn dynamic_amount_is_read_from_the_submission() {
    let app = common::spawn_app().await;
    quickstream(&app).await;
    app.create_form(payment_form(json!({
        "amountType": "dynamic",
        "amountVariable": "{amount}",
        "currency": "NZD",
        "showReference": true,
        "referenceField": "{email}",
    })))
    .await;
    app.fake.respond("/quickstream/transactions", 200, json!({ "status": "Approved", "receiptNumber": "R1" }));

    let mut data = donation();
    data["amount"] = json!("$1,042.50");
    let (_, status) = app.submit_json("donate", &data).await;
    assert_eq!(status, StatusCode::CREATED);

    let sent = app.fake.requests_to("/quickstream/transactions");
    assert_eq!(sent[0].body["principalAmount"], json!(1042.5));
    assert_eq!(sent[0].body["currency"], "NZD");
    assert_eq!(sent[0].body["customerReferenceNumber"], "ada@example.com");
}

#[tokio::test]
async fn declined_payment_is_a_field_error() {
    let app = common::spawn_app().await;
    quickstream(&app).await;
    app.create_form(payment_form(fixed_aud())).await;
    app.fake.respond(
        "/quickstream/transactions",
        200,
        json!({ "status": "DECLINED", "responseText": "Insufficient funds" }),
    );

    let (body, status) = app.submit_json("donate", &donation()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"]["payment"][0], "Declined: Insufficient funds");
}

#[tokio::test]
async fn missing_payment_inputs_are_reported() {
    let app = common::spawn_app().await;
    quickstream(&app).await;
    app.create_form(payment_form(fixed_aud())).await;

    let (body, status) = app.submit_json("donate", &json!({ "email": "ada@example.com" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"]["payment"][0], "Missing `singleUseTokenId` from payload.");
    assert!(app.fake.requests_to("/quickstream/transactions").is_empty());

    let app = common::spawn_app().await;
    quickstream(&app).await;
    app.create_form(payment_form(json!({ "amountType": "dynamic", "amountVariable": "{amount}", "currencyFixed": "AUD" })))
        .await;

    let mut data = donation();
    data["amount"] = json!("free");
    let (body, _) = app.submit_json("donate", &data).await;
    assert_eq!(body["errors"]["payment"][0], "Missing `amount` from payload.");

    let app = common::spawn_app().await;
    quickstream(&app).await;
    app.create_form(payment_form(json!({ "amountFixed": "10" }))).await;

    let (body, _) = app.submit_json("donate", &donation()).await;
    assert_eq!(body["errors"]["payment"][0], "Missing `currency` from payload.");
}

// ── 3-D Secure ──────────────────────────────────────────────────

#[tokio::test]
async fn authentication_required_waits_for_callback() {
    let app = common::spawn_app().await;
    quickstream(&app).await;
    let form = app.create_form(payment_form(fixed_aud())).await;
    let hook = app.attach_webhook(&form, "hook", "/hook").await;
    app.fake.respond(
        "/quickstream/transactions",
        200,
        json!({ "status": "Authentication Required", "receiptNumber": "" }),
    );

    let (body, status) = app.submit_json("donate", &donation()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["payments"][0]["authentication"], "required");

    let submission_id = body["submission_id"].as_str().unwrap();
    assert_eq!(submission_status(&app, submission_id).await, "incomplete");
    assert!(app.fake.requests_to("/hook").is_empty());

    app.fake.respond(
        "/quickstream/transactions",
        200,
        json!({ "status": "Approved", "receiptNumber": "R200" }),
    );
    let (callback, status) = app
        .post_json(
            "/v1/payments/qs/callback",
            &json!({
                "paymentId": body["payments"][0]["id"],
                "singleUseTokenId": "tok_2",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{callback}");
    assert_eq!(callback["status"], "processed");
    assert_eq!(callback["payment"]["status"], "success");
    assert_eq!(callback["payment"]["authentication"], "authenticated");

    let retried = app.fake.requests_to("/quickstream/transactions");
    assert_eq!(retried.len(), 2);
    assert_eq!(retried[1].body["singleUseTokenId"], "tok_2");
    assert_eq!(retried[1].body["principalAmount"], json!(25.0));

    assert_eq!(submission_status(&app, submission_id).await, "complete");
    assert_eq!(app.fake.requests_to("/hook").len(), 1);

    let (log, _) = app
        .get_auth(&format!("/api/v1/integrations/{}/log", hook["id"].as_str().unwrap()))
        .await;
    assert_eq!(log[0]["success"], true);

    // A second callback changes nothing.
    let (again, _) = app
        .post_json(
            "/v1/payments/qs/callback",
            &json!({ "paymentId": body["payments"][0]["id"], "singleUseTokenId": "tok_3" }),
        )
        .await;
    assert_eq!(again["status"], "unchanged");
    assert_eq!(app.fake.requests_to("/quickstream/transactions").len(), 2);
}

#[tokio::test]
async fn pending_second_leg_is_settled_by_webhook() {
    let app = common::spawn_app().await;
    quickstream(&app).await;
    let form = app.create_form(payment_form(fixed_aud())).await;
    app.attach_webhook(&form, "hook", "/hook").await;
    app.fake.respond("/quickstream/transactions", 200, json!({ "status": "Authentication Required" }));

    let (body, _) = app.submit_json("donate", &donation()).await;
    let payment_id = body["payments"][0]["id"].clone();
    let submission_id = body["submission_id"].as_str().unwrap();

    app.fake.respond(
        "/quickstream/transactions",
        200,
        json!({ "status": "Pending", "receiptNumber": "R300" }),
    );
    let (callback, status) = app
        .post_json(
            "/v1/payments/qs/callback",
            &json!({ "paymentId": payment_id, "singleUseTokenId": "tok_2" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{callback}");
    assert_eq!(callback["status"], "pending");
    assert_eq!(callback["payment"]["reference"], "R300");
    assert_eq!(callback["payment"]["authentication"], "authenticated");

    // The challenge is spent: a replay must not charge again.
    let (again, status) = app
        .post_json(
            "/v1/payments/qs/callback",
            &json!({ "paymentId": payment_id, "singleUseTokenId": "tok_3" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["status"], "unchanged");
    assert_eq!(app.fake.requests_to("/quickstream/transactions").len(), 2);
    assert_eq!(submission_status(&app, submission_id).await, "incomplete");

    let (resp, status) = post_webhook(&app, &json!({ "receiptNumber": "R300", "status": "Approved" }), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["status"], "processed");

    let payments = payments_for(&app, submission_id).await;
    assert_eq!(payments[0].status(), Some(PaymentStatus::Success));
    assert_eq!(payments[0].reference.as_deref(), Some("R300"));
    assert_eq!(submission_status(&app, submission_id).await, "complete");
    assert_eq!(app.fake.requests_to("/hook").len(), 1);
}

#[tokio::test]
async fn callback_needs_a_pending_challenge() {
    let app = common::spawn_app().await;
    quickstream(&app).await;
    app.create_form(payment_form(fixed_aud())).await;
    app.fake.respond(
        "/quickstream/transactions",
        200,
        json!({ "status": "Pending", "receiptNumber": "R500" }),
    );

    let (body, _) = app.submit_json("donate", &donation()).await;
    assert_eq!(body["payments"][0]["status"], "pending");

    let (callback, status) = app
        .post_json(
            "/v1/payments/qs/callback",
            &json!({ "paymentId": body["payments"][0]["id"], "singleUseTokenId": "tok_2" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(callback["status"], "unchanged");
    assert_eq!(app.fake.requests_to("/quickstream/transactions").len(), 1);
}

#[tokio::test]
async fn unreachable_gateway_leaves_challenge_open() {
    let app = common::spawn_app().await;
    quickstream(&app).await;
    app.create_form(payment_form(fixed_aud())).await;
    app.fake.respond("/quickstream/transactions", 200, json!({ "status": "Authentication Required" }));

    let (body, _) = app.submit_json("donate", &donation()).await;
    let callback = json!({ "paymentId": body["payments"][0]["id"], "singleUseTokenId": "tok_2" });

    app.fake.respond("/quickstream/transactions", 503, json!({}));
    let (_, status) = app.post_json("/v1/payments/qs/callback", &callback).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let payments = payments_for(&app, body["submission_id"].as_str().unwrap()).await;
    assert_eq!(payments[0].authentication(), Some(AuthenticationState::Required));

    app.fake.respond("/quickstream/transactions", 200, json!({ "status": "Approved", "receiptNumber": "R600" }));
    let (resp, status) = app.post_json("/v1/payments/qs/callback", &callback).await;
    assert_eq!(status, StatusCode::OK, "{resp}");
    assert_eq!(resp["status"], "processed");
    assert_eq!(resp["payment"]["reference"], "R600");
}

#[tokio::test]
async fn failed_authentication_fails_the_payment() {
    let app = common::spawn_app().await;
    quickstream(&app).await;
    app.create_form(payment_form(fixed_aud())).await;
    app.fake.respond("/quickstream/transactions", 200, json!({ "status": "Authentication Required" }));

    let (body, _) = app.submit_json("donate", &donation()).await;
    let (callback, status) = app
        .post_json(
            "/v1/payments/qs/callback",
            &json!({ "paymentId": body["payments"][0]["id"], "authentication": "failed" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(callback["status"], "processed");
    assert_eq!(callback["payment"]["status"], "failed");
    assert_eq!(callback["payment"]["authentication"], "failed");

    let submission_id = body["submission_id"].as_str().unwrap();
    assert_eq!(submission_status(&app, submission_id).await, "incomplete");
}

#[tokio::test]
async fn three_ds_auth_reports_status() {
    let app = common::spawn_app().await;
    quickstream(&app).await;

    app.fake.respond(
        "/quickstream/three-ds-authentications",
        200,
        json!({ "transStatus": "C", "acsUrl": "https://acs.example" }),
    );
    let (body, status) = app
        .post_json(
            "/v1/payments/qs/3ds-auth",
            &json!({ "singleUseTokenId": "tok_1", "params": { "browserInfo": { "language": "en" } } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["threeDsStatus"], "challenge");
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["acsUrl"], "https://acs.example");

    let sent = app.fake.requests_to("/quickstream/three-ds-authentications");
    assert_eq!(sent[0].body["singleUseTokenId"], "tok_1");
    assert_eq!(sent[0].body["supplierBusinessCode"], "SUPPLIER");
    assert_eq!(sent[0].body["browserInfo"]["language"], "en");

    app.fake.respond("/quickstream/three-ds-authentications", 200, json!({ "transStatus": "N" }));
    let (body, status) = app
        .post_json("/v1/payments/qs/3ds-auth", &json!({ "singleUseTokenId": "tok_1" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["threeDsStatus"], "failed");

    let (body, status) = app.post_json("/v1/payments/qs/3ds-auth", &json!({})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["threeDsStatus"], "error");
    assert_eq!(body["message"], "Missing `singleUseTokenId` from payload.");
}

// ── Webhooks ────────────────────────────────────────────────────

#[derive(Default)]
struct Fulfilment {
    reconciled: AtomicUsize,
}

impl IntegrationHook for Fulfilment {
    fn after_payment_reconciled(&self, payment: &Payment) {
        if payment.status() == Some(PaymentStatus::Success) {
            self.reconciled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn webhook_reconciles_pending_payment_once() {
    let fulfilment = Arc::new(Fulfilment::default());
    let app = common::spawn_app_with(HookChain::new().with(fulfilment.clone())).await;
    quickstream(&app).await;
    app.create_form(payment_form(fixed_aud())).await;
    app.fake.respond(
        "/quickstream/transactions",
        200,
        json!({ "status": "Pending", "receiptNumber": "R300" }),
    );

    let (body, status) = app.submit_json("donate", &donation()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["payments"][0]["status"], "pending");

    let notification = json!({ "data": { "receiptNumber": "R300", "status": "Approved" } });

    let (resp, status) = post_webhook(&app, &notification, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["status"], "processed");

    let (resp, status) = post_webhook(&app, &notification, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["status"], "unchanged");

    assert_eq!(fulfilment.reconciled.load(Ordering::SeqCst), 1);

    let payments = payments_for(&app, body["submission_id"].as_str().unwrap()).await;
    assert_eq!(payments[0].status(), Some(PaymentStatus::Success));
    assert_eq!(payments[0].response["receiptNumber"], "R300");
}

#[tokio::test]
async fn webhook_without_terminal_status_stays_pending() {
    let app = common::spawn_app().await;
    quickstream(&app).await;
    app.create_form(payment_form(fixed_aud())).await;
    app.fake.respond("/quickstream/transactions", 200, json!({ "status": "Pending", "receiptNumber": "R400" }));
    app.submit_json("donate", &donation()).await;

    let (resp, _) = post_webhook(&app, &json!({ "receiptNumber": "R400", "status": "Pending" }), None).await;
    assert_eq!(resp["status"], "pending");

    let (resp, _) = post_webhook(&app, &json!({ "receiptNumber": "R400", "status": "Declined" }), None).await;
    assert_eq!(resp["status"], "processed");

    let (resp, _) = post_webhook(&app, &json!({ "receiptNumber": "R400", "status": "Approved" }), None).await;
    assert_eq!(resp["status"], "unchanged");
}

#[tokio::test]
async fn webhook_for_unknown_payment_is_ignored() {
    let app = common::spawn_app().await;
    quickstream(&app).await;

    let (resp, status) = post_webhook(&app, &json!({ "receiptNumber": "NOPE", "status": "Approved" }), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["status"], "ignored");

    let (resp, _) = post_webhook(&app, &json!({ "event": "ping" }), None).await;
    assert_eq!(resp["status"], "ignored");
}

#[tokio::test]
async fn webhook_signature_is_checked() {
    let app = common::spawn_app().await;
    quickstream(&app).await;
    let notification = json!({ "receiptNumber": "R1", "status": "Approved" });

    let (body, status) = post_webhook(&app, &notification, Some(sign(b"something else"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid webhook signature.");

    let (_, status) = post_webhook(&app, &notification, Some("not-hex".to_string())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ── Units ───────────────────────────────────────────────────────

#[test]
fn quickstream_statuses() {
    assert_eq!(classify_status("Approved"), Some((PaymentStatus::Success, None)));
    assert_eq!(classify_status("Approved*"), Some((PaymentStatus::Success, None)));
    assert_eq!(classify_status("Pending"), Some((PaymentStatus::Pending, None)));
    assert_eq!(
        classify_status("Authentication Required"),
        Some((PaymentStatus::Pending, Some(AuthenticationState::Required)))
    );
    assert_eq!(classify_status("Declined"), None);

    assert_eq!(titleize("DECLINED_BY_BANK"), "Declined By Bank");
    assert_eq!(titleize("system-error"), "System Error");
}

#[test]
fn amounts_ignore_symbols_and_separators() {
    assert_eq!(parse_amount("$1,042.50"), Some(Decimal::from_str("1042.50").unwrap()));
    assert_eq!(parse_amount(" € 7 "), Some(Decimal::from(7)));
    assert_eq!(parse_amount("ten"), None);
    assert_eq!(parse_amount("$"), None);
}

#[test]
fn three_ds_status_codes() {
    assert_eq!(three_ds::classify("Y"), ThreeDsStatus::Frictionless);
    assert_eq!(three_ds::classify("c"), ThreeDsStatus::Challenge);
    assert_eq!(three_ds::classify("R"), ThreeDsStatus::Failed);
    assert_eq!(three_ds::classify("??"), ThreeDsStatus::Error);
}
