mod common;

use reqwest::StatusCode;
use serde_json::{Value, json};

use formrelay::integrations::captchas::honeypot::is_filled;
use formrelay::integrations::captchas::recaptcha::{assessment_verdict, siteverify_verdict};
use formrelay::integrations::CaptchaVerdict;

/// Attach a captcha integration to a fresh contact form.
async fn guarded_form(app: &common::TestApp, provider: &str, settings: Value) -> Value {
    let form = app.create_form(common::contact_form("contact", false)).await;
    let captcha = app.create_integration(provider, provider, settings).await;
    app.attach(&form, &captcha, json!({})).await;
    form
}

/// The stored submissions for `form`, spam included.
async fn stored(app: &common::TestApp, form: &Value) -> Vec<Value> {
    let (list, status) = app
        .get_auth(&format!("/api/v1/forms/{}/submissions", form["id"].as_str().unwrap()))
        .await;
    assert_eq!(status, StatusCode::OK);
    list["submissions"].as_array().cloned().unwrap_or_default()
}

// ── Honeypot ────────────────────────────────────────────────────

#[tokio::test]
async fn honeypot_catches_bots_silently() {
    let app = common::spawn_app().await;
    let form = guarded_form(&app, "honeypot", json!({})).await;
    app.attach_webhook(&form, "hook", "/hook").await;

    let (body, status) = app
        .submit_json("contact", &json!({ "email": "bot@example.com", "beesknees": "http://spam" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));

    let submissions = stored(&app, &form).await;
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0]["status"], "spam");
    assert_eq!(submissions[0]["spam_reason"], "Honeypot field `beesknees` was filled in.");
    assert!(app.fake.requests_to("/hook").is_empty());
}

#[tokio::test]
async fn honeypot_lets_people_through() {
    let app = common::spawn_app().await;
    let form = guarded_form(&app, "honeypot", json!({ "field": "website" })).await;

    let (_, status) = app
        .submit_json("contact", &json!({ "email": "ada@example.com", "website": "" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(stored(&app, &form).await[0]["status"], "complete");
}

#[test]
fn honeypot_fill_detection() {
    let values = json!({ "a": "", "b": "x", "c": null, "d": 0, "e": [] });
    assert!(!is_filled(&values, "a"));
    assert!(is_filled(&values, "b"));
    assert!(!is_filled(&values, "c"));
    assert!(is_filled(&values, "d"));
    assert!(is_filled(&values, "e"));
    assert!(!is_filled(&values, "missing"));
}

// ── reCAPTCHA ───────────────────────────────────────────────────

fn recaptcha(kind: &str) -> Value {
    json!({ "type": kind, "siteKey": "site", "secretKey": "secret", "projectId": "p1" })
}

#[tokio::test]
async fn recaptcha_missing_token_is_spam() {
    let app = common::spawn_app().await;
    let form = guarded_form(&app, "recaptcha", recaptcha("v2_checkbox")).await;

    let (_, status) = app.submit_json("contact", &json!({ "email": "ada@example.com" })).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(stored(&app, &form).await[0]["spam_reason"], "Client-side token missing.");
    assert!(app.fake.requests_to("/recaptcha/siteverify").is_empty());
}

#[tokio::test]
async fn recaptcha_v2_posts_token_to_siteverify() {
    let app = common::spawn_app().await;
    let form = guarded_form(&app, "recaptcha", recaptcha("v2_checkbox")).await;
    app.fake.respond("/recaptcha/siteverify", 200, json!({ "success": true }));

    let (_, status) = app
        .submit_json("contact", &json!({ "email": "ada@example.com", "g-recaptcha-response": "tok" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let sent = app.fake.requests_to("/recaptcha/siteverify");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body["secret"], "secret");
    assert_eq!(sent[0].body["response"], "tok");
    assert_eq!(sent[0].body["remoteip"], "127.0.0.1");

    // The token isn't a form field, so it isn't stored.
    let submission = &stored(&app, &form).await[0];
    assert!(submission["values"].get("g-recaptcha-response").is_none());
}

#[tokio::test]
async fn recaptcha_v3_low_score_is_spam() {
    let app = common::spawn_app().await;
    let form = guarded_form(&app, "recaptcha", recaptcha("v3")).await;
    app.fake.respond("/recaptcha/siteverify", 200, json!({ "success": true, "score": 0.3 }));

    let (body, status) = app
        .submit_json("contact", &json!({ "email": "ada@example.com", "g-recaptcha-response": "tok" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    assert_eq!(stored(&app, &form).await[0]["spam_reason"], "Score 0.3 is below threshold 0.5.");
}

#[tokio::test]
async fn recaptcha_enterprise_creates_assessment() {
    let app = common::spawn_app().await;
    guarded_form(&app, "recaptcha", recaptcha("enterprise")).await;
    app.fake.respond(
        "/recaptcha-enterprise/v1/projects/p1/assessments",
        200,
        json!({ "tokenProperties": { "valid": true }, "riskAnalysis": { "score": 0.9 } }),
    );

    let (_, status) = app
        .submit_json("contact", &json!({ "email": "ada@example.com", "g-recaptcha-response": "tok" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let sent = app.fake.requests_to("/recaptcha-enterprise/v1/projects/p1/assessments");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].query.as_deref(), Some("key=secret"));
    assert_eq!(sent[0].body["event"]["token"], "tok");
    assert_eq!(sent[0].body["event"]["siteKey"], "site");
}

#[tokio::test]
async fn unreachable_verifier_rejects() {
    let app = common::spawn_app().await;
    let form = guarded_form(&app, "recaptcha", recaptcha("v2_checkbox")).await;
    app.fake.respond("/recaptcha/siteverify", 503, json!({}));

    let (_, status) = app
        .submit_json("contact", &json!({ "email": "ada@example.com", "g-recaptcha-response": "tok" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored(&app, &form).await[0]["status"], "spam");
}

#[test]
fn siteverify_verdicts() {
    assert_eq!(siteverify_verdict(&json!({ "success": true }), 0.5), CaptchaVerdict::pass());
    assert_eq!(siteverify_verdict(&json!({ "success": true, "score": 0.5 }), 0.5), CaptchaVerdict::pass());
    assert_eq!(
        siteverify_verdict(&json!({ "success": true, "score": 0.1 }), 0.5),
        CaptchaVerdict::reject("Score 0.1 is below threshold 0.5.")
    );

    let failed = json!({ "success": false, "error-codes": ["timeout-or-duplicate"] });
    assert_eq!(siteverify_verdict(&failed, 0.5), CaptchaVerdict::reject(failed.to_string()));
}

#[test]
fn assessment_verdicts() {
    let scored = json!({ "tokenProperties": { "valid": true }, "riskAnalysis": { "score": 0.2 } });
    assert_eq!(
        assessment_verdict(&scored, 0.5),
        CaptchaVerdict::reject("Score 0.2 is below threshold 0.5.")
    );

    let zero = json!({ "tokenProperties": { "valid": true }, "riskAnalysis": { "score": 0.0 } });
    assert_eq!(
        assessment_verdict(&zero, 0.5),
        CaptchaVerdict::reject("Score 0 is below threshold 0.5.")
    );

    let unscored = json!({ "tokenProperties": { "valid": true } });
    assert_eq!(assessment_verdict(&unscored, 0.5), CaptchaVerdict::pass());

    let forged = json!({ "tokenProperties": { "valid": false, "invalidReason": "MALFORMED" }, "riskAnalysis": { "score": 0.9 } });
    assert_eq!(assessment_verdict(&forged, 0.5), CaptchaVerdict::reject("MALFORMED"));

    let invalid = json!({ "tokenProperties": { "valid": false, "invalidReason": "EXPIRED" } });
    assert_eq!(assessment_verdict(&invalid, 0.5), CaptchaVerdict::reject("EXPIRED"));

    assert_eq!(
        assessment_verdict(&json!({}), 0.5),
        CaptchaVerdict::reject("Captcha validation failed.")
    );
}

// ── Turnstile ───────────────────────────────────────────────────

#[tokio::test]
async fn turnstile_verifies_token() {
    let app = common::spawn_app().await;
    let form = guarded_form(&app, "turnstile", json!({ "siteKey": "site", "secretKey": "secret" })).await;

    app.fake.respond("/turnstile/siteverify", 200, json!({ "success": true }));
    let (_, status) = app
        .submit_json("contact", &json!({ "email": "ada@example.com", "cf-turnstile-response": "tok" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let sent = app.fake.requests_to("/turnstile/siteverify");
    assert_eq!(sent[0].body["secret"], "secret");
    assert_eq!(sent[0].body["response"], "tok");

    app.fake.respond(
        "/turnstile/siteverify",
        200,
        json!({ "success": false, "error-codes": ["invalid-input-response"] }),
    );
    let (_, status) = app
        .submit_json("contact", &json!({ "email": "bob@example.com", "cf-turnstile-response": "bad" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let spam: Vec<Value> = stored(&app, &form)
        .await
        .into_iter()
        .filter(|s| s["status"] == "spam")
        .collect();
    assert_eq!(spam.len(), 1);
    assert!(
        spam[0]["spam_reason"]
            .as_str()
            .unwrap()
            .contains("invalid-input-response")
    );
}

#[tokio::test]
async fn disabled_captcha_is_not_checked() {
    let app = common::spawn_app().await;
    let form = app.create_form(common::contact_form("contact", false)).await;
    let captcha = app
        .create_integration("turnstile", "turnstile", json!({ "siteKey": "site", "secretKey": "secret" }))
        .await;
    app.attach(&form, &captcha, json!({ "enabled": false })).await;

    let (_, status) = app.submit_json("contact", &json!({ "email": "ada@example.com" })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(app.fake.requests_to("/turnstile/siteverify").is_empty());
}
