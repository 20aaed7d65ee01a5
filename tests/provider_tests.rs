mod common;

use reqwest::StatusCode;
use serde_json::{Value, json};

fn bearer(request: &common::Recorded) -> &str {
    request
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

async fn stored_integration(app: &common::TestApp, integration: &Value) -> formrelay::models::Integration {
    app.state
        .stores
        .integrations
        .find_by_id(integration["id"].as_str().unwrap().parse().unwrap())
        .await
        .unwrap()
        .unwrap()
}

// ── Dynamics 365 ────────────────────────────────────────────────

const DYNAMICS_API: &str = "/dynamics/api/data/v9.0";

async fn connect_dynamics(app: &common::TestApp) -> Value {
    let integration = app
        .create_integration(
            "dynamics",
            "dynamics365",
            json!({
                "clientId": "client-1",
                "clientSecret": "secret-1",
                "apiDomain": app.fake.url("/dynamics"),
                "mapToContact": true,
                "mapToAccount": true,
                "mapToOpportunity": true,
            }),
        )
        .await;

    let (_, status) = app
        .put_auth(
            &format!("/api/v1/integrations/{}/token", integration["id"].as_str().unwrap()),
            &json!({
                "access_token": "old",
                "refresh_token": "refresh-1",
                "token_url": app.fake.url("/oauth/token"),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    integration
}

fn dynamics_mapping() -> Value {
    json!({
        "enabled": true,
        "field_mappings": {
            "contact": { "emailaddress1": "{email}", "firstname": "{firstName}" },
            "account": { "name": "{firstName}" },
            "opportunity": { "name": "Enquiry from {email}" },
        },
    })
}

#[tokio::test]
async fn expired_token_is_refreshed_and_the_send_retried() {
    let app = common::spawn_app().await;
    let form = app.create_form(common::contact_form("contact", false)).await;
    let integration = connect_dynamics(&app).await;
    app.attach(&form, &integration, dynamics_mapping()).await;

    let contacts = format!("{DYNAMICS_API}/contacts");
    app.fake.respond_once(&contacts, 401, json!({ "error": { "message": "token expired" } }));
    app.fake.respond(
        "/oauth/token",
        200,
        json!({ "access_token": "new", "refresh_token": "refresh-2", "expires_in": 3600 }),
    );
    app.fake.respond(&contacts, 200, json!({ "contactid": "c-1" }));
    app.fake.respond(&format!("{DYNAMICS_API}/accounts"), 200, json!({ "accountid": "a-1" }));
    app.fake.respond(&format!("{DYNAMICS_API}/opportunities"), 200, json!({ "opportunityid": "o-1" }));

    let (_, status) = app
        .submit_json("contact", &json!({ "firstName": "Ada", "email": "ada@example.com" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let sent = app.fake.requests_to(&contacts);
    assert_eq!(sent.len(), 2);
    assert_eq!(bearer(&sent[0]), "Bearer old");
    assert_eq!(bearer(&sent[1]), "Bearer new");
    assert_eq!(sent[1].query.as_deref(), Some("$select=contactid"));
    assert_eq!(sent[1].body["emailaddress1"], "ada@example.com");
    assert_eq!(sent[1].body, sent[0].body);

    let refresh = app.fake.requests_to("/oauth/token");
    assert_eq!(refresh.len(), 1);
    assert_eq!(refresh[0].body["grant_type"], "refresh_token");
    assert_eq!(refresh[0].body["refresh_token"], "refresh-1");
    assert_eq!(refresh[0].body["client_id"], "client-1");
    assert_eq!(refresh[0].body["client_secret"], "secret-1");

    let stored = stored_integration(&app, &integration).await;
    let token = app
        .state
        .stores
        .tokens
        .find_for_integration(stored.uid)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(token.access_token, "new");
    assert_eq!(token.refresh_token.as_deref(), Some("refresh-2"));
    assert!(token.expires_at.is_some());

    // The next submission starts from the persisted token.
    app.submit_json("contact", &json!({ "firstName": "Grace", "email": "grace@example.com" }))
        .await;
    let sent = app.fake.requests_to(&contacts);
    assert_eq!(sent.len(), 3);
    assert_eq!(bearer(&sent[2]), "Bearer new");
    assert_eq!(app.fake.requests_to("/oauth/token").len(), 1);
}

#[tokio::test]
async fn later_entities_bind_to_earlier_ones() {
    let app = common::spawn_app().await;
    let form = app.create_form(common::contact_form("contact", false)).await;
    let integration = connect_dynamics(&app).await;
    app.attach(&form, &integration, dynamics_mapping()).await;

    app.fake.respond(&format!("{DYNAMICS_API}/contacts"), 200, json!({ "contactid": "c-1" }));
    app.fake.respond(&format!("{DYNAMICS_API}/accounts"), 200, json!({ "accountid": "a-1" }));
    app.fake.respond(&format!("{DYNAMICS_API}/opportunities"), 200, json!({ "opportunityid": "o-1" }));

    app.submit_json("contact", &json!({ "firstName": "Ada", "email": "ada@example.com" }))
        .await;

    let contact = &app.fake.requests_to(&format!("{DYNAMICS_API}/contacts"))[0];
    assert!(contact.body.as_object().unwrap().keys().all(|k| !k.ends_with("@odata.bind")));
    assert_eq!(contact.headers["prefer"], "return=representation");
    assert_eq!(contact.headers["odata-version"], "4.0");

    let account = &app.fake.requests_to(&format!("{DYNAMICS_API}/accounts"))[0];
    assert_eq!(bearer(account), "Bearer old");
    assert_eq!(account.body["name"], "Ada");
    assert_eq!(account.body["primarycontactid@odata.bind"], "contacts(c-1)");

    let opportunity = &app.fake.requests_to(&format!("{DYNAMICS_API}/opportunities"))[0];
    assert_eq!(opportunity.body["name"], "Enquiry from ada@example.com");
    assert_eq!(opportunity.body["parentcontactid@odata.bind"], "contacts(c-1)");
    assert_eq!(opportunity.body["parentaccountid@odata.bind"], "accounts(a-1)");

    // Entities go out in dependency order.
    let order: Vec<String> = app
        .fake
        .requests()
        .into_iter()
        .filter(|r| r.path.starts_with(DYNAMICS_API))
        .map(|r| r.path.trim_start_matches(DYNAMICS_API).to_string())
        .collect();
    assert_eq!(order, ["/contacts", "/accounts", "/opportunities"]);
}

#[tokio::test]
async fn missing_entity_id_stops_the_chain() {
    let app = common::spawn_app().await;
    let form = app.create_form(common::contact_form("contact", false)).await;
    let integration = connect_dynamics(&app).await;
    app.attach(&form, &integration, dynamics_mapping()).await;

    app.fake.respond(&format!("{DYNAMICS_API}/contacts"), 200, json!({ "fullname": "Ada" }));

    app.submit_json("contact", &json!({ "firstName": "Ada", "email": "ada@example.com" }))
        .await;

    assert!(app.fake.requests_to(&format!("{DYNAMICS_API}/accounts")).is_empty());
    let (log, _) = app
        .get_auth(&format!("/api/v1/integrations/{}/log", integration["id"].as_str().unwrap()))
        .await;
    assert_eq!(log[0]["success"], false);
    assert_eq!(log[0]["response"]["kind"], "remote_rejected");
    assert!(log[0]["response"]["message"].as_str().unwrap().contains("contactid"));
}

// ── Entry ───────────────────────────────────────────────────────

async fn entry_setup(app: &common::TestApp) -> (Value, Value) {
    app.fake.respond(
        "/cms/entry-types",
        200,
        json!({
            "data": [{
                "uid": "et-news",
                "name": "News",
                "section": "news",
                "sectionType": "channel",
                "fields": [
                    { "handle": "summary", "name": "Summary", "type": "plainText" },
                    { "handle": "contactEmail", "name": "Contact email", "type": "email" },
                ],
            }],
        }),
    );
    let form = app.create_form(common::contact_form("contact", false)).await;
    let integration = app.create_integration("news", "entry", json!({})).await;
    (form, integration)
}

fn entry_mapping(overwrite: bool) -> Value {
    json!({
        "enabled": true,
        "settings": { "entryTypeUid": "et-news", "overwriteValues": overwrite },
        "field_mappings": {
            "attributes": { "title": "{firstName}" },
            "fields": { "summary": "{message}", "contactEmail": "{email}" },
        },
    })
}

#[tokio::test]
async fn entry_drops_blank_values_unless_overwriting() {
    let app = common::spawn_app_with_cms().await;
    let (form, integration) = entry_setup(&app).await;
    app.attach(&form, &integration, entry_mapping(false)).await;

    let submission = json!({ "firstName": "Ada", "email": "ada@example.com" });
    let (body, status) = app.submit_json("contact", &submission).await;
    assert_eq!(status, StatusCode::CREATED);

    let sent = app.fake.requests_to("/cms/entries");
    assert_eq!(sent.len(), 1);
    let entry = &sent[0].body;
    assert_eq!(bearer(&sent[0]), "Bearer cms-token");
    assert_eq!(entry["entryTypeUid"], "et-news");
    assert_eq!(entry["submissionId"], body["submission_id"]);
    assert_eq!(entry["attributes"]["title"], "Ada");
    assert_eq!(entry["fields"]["contactEmail"], "ada@example.com");
    assert!(entry["fields"].get("summary").is_none(), "blank value must not be sent: {entry}");
    assert_eq!(entry["inheritStatus"], true);
    assert_eq!(entry["createDraft"], false);

    app.attach(&form, &integration, entry_mapping(true)).await;
    app.submit_json("contact", &submission).await;

    let sent = app.fake.requests_to("/cms/entries");
    assert_eq!(sent.len(), 2);
    let fields = sent[1].body["fields"].as_object().unwrap();
    assert!(fields.contains_key("summary"));
    assert_eq!(fields["summary"], Value::Null);
}

// ── Campaign ────────────────────────────────────────────────────

#[tokio::test]
async fn campaign_subscribes_to_the_selected_list() {
    let app = common::spawn_app_with_cms().await;
    app.fake.respond(
        "/cms/campaign/lists",
        200,
        json!({ "data": [{ "id": "list-1", "title": "Newsletter" }, { "id": "list-2", "title": "Events" }] }),
    );
    app.fake.respond(
        "/cms/campaign/contact-fields",
        200,
        json!([{ "handle": "firstName", "name": "First name", "type": "plainText" }]),
    );

    let form = app.create_form(common::contact_form("contact", false)).await;
    let integration = app.create_integration("newsletter", "campaign", json!({})).await;
    app.attach(
        &form,
        &integration,
        json!({
            "enabled": true,
            "settings": { "listId": "list-1" },
            "field_mappings": { "default": { "email": "{email}", "firstName": "{firstName}" } },
        }),
    )
    .await;

    let resp = app
        .client
        .post(app.url("/v1/forms/contact/submissions"))
        .header("referer", "https://example.com/contact")
        .json(&json!({ "firstName": "Ada", "email": "ada@example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    assert_eq!(app.fake.requests_to("/cms/campaign/lists").len(), 1);

    let sent = app.fake.requests_to("/cms/campaign/subscribe");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, "POST");
    assert_eq!(
        sent[0].body,
        json!({
            "email": "ada@example.com",
            "listId": "list-1",
            "fields": { "firstName": "Ada" },
            "source": "formrelay",
            "referrer": "https://example.com/contact",
        })
    );
}

#[tokio::test]
async fn campaign_without_a_list_is_a_config_error() {
    let app = common::spawn_app_with_cms().await;
    let form = app.create_form(common::contact_form("contact", false)).await;
    let integration = app.create_integration("newsletter", "campaign", json!({})).await;
    app.attach(
        &form,
        &integration,
        json!({ "enabled": true, "field_mappings": { "default": { "email": "{email}" } } }),
    )
    .await;

    app.submit_json("contact", &json!({ "email": "ada@example.com" })).await;

    assert!(app.fake.requests_to("/cms/campaign/subscribe").is_empty());
    let (log, _) = app
        .get_auth(&format!("/api/v1/integrations/{}/log", integration["id"].as_str().unwrap()))
        .await;
    assert_eq!(log[0]["success"], false);
    assert_eq!(log[0]["response"]["kind"], "config");
    assert_eq!(log[0]["response"]["message"], "No mailing list selected.");
}
