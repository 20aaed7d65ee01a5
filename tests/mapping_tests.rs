mod common;

use std::collections::BTreeMap;

use serde_json::{Value, json};

use formrelay::fields::{FieldKind, FieldOption, FormField};
use formrelay::integrations::mapping::{self, MappingContext};
use formrelay::integrations::template::{self, TemplateContext};
use formrelay::integrations::{
    HookChain, IntegrationField, IntegrationFieldType, IntegrationHook, IntegrationKind,
};
use formrelay::models::{Form, Integration, Submission};
use formrelay::site::{self, SiteContext};

fn fields() -> Vec<FormField> {
    vec![
        FormField::new("firstName", "First name", FieldKind::SingleLineText),
        FormField::new("email", "Email", FieldKind::Email),
        FormField::new("phone", "Phone", FieldKind::Phone),
        FormField::new(
            "colours",
            "Colours",
            FieldKind::Checkboxes {
                options: vec![
                    FieldOption { label: "Red".to_string(), value: "red".to_string() },
                    FieldOption { label: "Blue".to_string(), value: "blue".to_string() },
                ],
            },
        ),
        FormField::new(
            "guests",
            "Guests",
            FieldKind::Repeater {
                fields: vec![FormField::new("name", "Name", FieldKind::SingleLineText)],
            },
        ),
        FormField::new(
            "address",
            "Address",
            FieldKind::Group {
                fields: vec![FormField::new("city", "City", FieldKind::SingleLineText)],
            },
        ),
    ]
}

struct Fixture {
    form: Form,
    submission: Submission,
    integration: Integration,
}

fn fixture() -> Fixture {
    let form = common::form_with(fields());
    let submission = common::submission_with(
        &form,
        json!({
            "firstName": "Ada",
            "email": "ada@example.com",
            "colours": ["red", "blue"],
            "guests": [{ "name": "Ada" }, { "name": "Bob" }],
            "address": { "city": "Hobart" },
        }),
    );
    let integration = common::integration_with("klaviyo", json!({}));
    Fixture { form, submission, integration }
}

fn context<'a>(f: &'a Fixture, hooks: &'a HookChain) -> MappingContext<'a> {
    MappingContext {
        form: &f.form,
        submission: &f.submission,
        integration: &f.integration,
        kind: IntegrationKind::Crm,
        accepts_markup: false,
        relations_as_ids: false,
        hooks,
        provider: None,
    }
}

fn mapping(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ── Resolution ──────────────────────────────────────────────────

#[test]
fn resolves_only_mapped_schema_slots() {
    let f = fixture();
    let hooks = HookChain::new();
    let schema = vec![
        IntegrationField::new("email", "Email", IntegrationFieldType::String).required(),
        IntegrationField::new("first_name", "First Name", IntegrationFieldType::String),
        IntegrationField::new("tags", "Tags", IntegrationFieldType::Array),
        IntegrationField::new("note", "Note", IntegrationFieldType::String),
        IntegrationField::new("unmapped", "Unmapped", IntegrationFieldType::String),
    ];
    let map = mapping(&[
        ("email", "{email}"),
        ("first_name", "{firstName}"),
        ("tags", "{colours}"),
        ("note", "Hello {firstName}"),
        ("not_in_schema", "{email}"),
    ]);

    let out = mapping::resolve(&context(&f, &hooks), Some(&map), &schema, false);

    assert_eq!(out.get("email"), Some(&json!("ada@example.com")));
    assert_eq!(out.get("first_name"), Some(&json!("Ada")));
    assert_eq!(out.get("tags"), Some(&json!(["red", "blue"])));
    assert_eq!(out.get("note"), Some(&json!("Hello Ada")));
    assert!(!out.contains_key("unmapped"));
    assert!(!out.contains_key("not_in_schema"));
}

#[test]
fn blank_values_are_left_out_unless_overwriting() {
    let f = fixture();
    let hooks = HookChain::new();
    let schema = vec![IntegrationField::new("phone", "Phone", IntegrationFieldType::String)];
    let map = mapping(&[("phone", "{phone}")]);

    let out = mapping::resolve(&context(&f, &hooks), Some(&map), &schema, false);
    assert!(out.is_empty());

    let out = mapping::resolve(&context(&f, &hooks), Some(&map), &schema, true);
    assert_eq!(out.get("phone"), Some(&Value::Null));
}

#[test]
fn missing_value_in_boolean_slot_is_blank() {
    let f = fixture();
    let hooks = HookChain::new();
    let schema = vec![
        IntegrationField::new("sms_opt_in", "SMS opt-in", IntegrationFieldType::Boolean),
        IntegrationField::new("has_name", "Has name", IntegrationFieldType::Boolean),
    ];
    let map = mapping(&[("sms_opt_in", "{phone}"), ("has_name", "{firstName}")]);

    let out = mapping::resolve(&context(&f, &hooks), Some(&map), &schema, false);
    assert!(!out.contains_key("sms_opt_in"));
    assert_eq!(out.get("has_name"), Some(&json!(false)));

    let out = mapping::resolve(&context(&f, &hooks), Some(&map), &schema, true);
    assert_eq!(out.get("sms_opt_in"), Some(&Value::Null));
}

#[test]
fn dangling_reference_resolves_to_nothing() {
    let f = fixture();
    let hooks = HookChain::new();
    let schema = vec![IntegrationField::new("email", "Email", IntegrationFieldType::String)];
    let map = mapping(&[("email", "{deletedField}")]);

    let out = mapping::resolve(&context(&f, &hooks), Some(&map), &schema, false);
    assert!(out.is_empty());
}

#[test]
fn empty_schema_resolves_every_mapped_handle_as_text() {
    let f = fixture();
    let hooks = HookChain::new();
    let map = mapping(&[("Email", "{email}"), ("Colours", "{colours}")]);

    let out = mapping::resolve(&context(&f, &hooks), Some(&map), &[], false);
    assert_eq!(out.get("Email"), Some(&json!("ada@example.com")));
    assert_eq!(out.get("Colours"), Some(&json!("red, blue")));
}

#[test]
fn missing_mapping_resolves_to_empty_payload() {
    let f = fixture();
    let hooks = HookChain::new();
    let schema = vec![IntegrationField::new("email", "Email", IntegrationFieldType::String)];

    assert!(mapping::resolve(&context(&f, &hooks), None, &schema, true).is_empty());
}

#[test]
fn nested_references_read_repeater_and_group_values() {
    let f = fixture();
    let hooks = HookChain::new();
    let ctx = context(&f, &hooks);

    let (names, source) = mapping::resolve_expression(&ctx, "{guests[name]}", IntegrationFieldType::Array);
    assert_eq!(names, json!(["Ada", "Bob"]));
    assert_eq!(source.map(|f| f.handle.as_str()), Some("name"));

    let (joined, _) = mapping::resolve_expression(&ctx, "{guests[name]}", IntegrationFieldType::String);
    assert_eq!(joined, json!("Ada, Bob"));

    let (city, _) = mapping::resolve_expression(&ctx, "{address[city]}", IntegrationFieldType::String);
    assert_eq!(city, json!("Hobart"));

    let (unknown, source) = mapping::resolve_expression(&ctx, "{address[zip]}", IntegrationFieldType::String);
    assert_eq!(unknown, Value::Null);
    assert!(source.is_none());
}

// ── Hooks ───────────────────────────────────────────────────────

struct ShoutEmail;

impl IntegrationHook for ShoutEmail {
    fn modify_field_value(
        &self,
        _ctx: &MappingContext<'_>,
        external_handle: &str,
        field: Option<&FormField>,
        value: Value,
    ) -> Value {
        if external_handle == "email" && field.is_some_and(|f| f.handle == "email") {
            if let Some(s) = value.as_str() {
                return json!(s.to_uppercase());
            }
        }
        value
    }
}

#[test]
fn hooks_can_rewrite_resolved_values() {
    let f = fixture();
    let hooks = HookChain::new().with(std::sync::Arc::new(ShoutEmail));
    let schema = vec![
        IntegrationField::new("email", "Email", IntegrationFieldType::String),
        IntegrationField::new("first_name", "First Name", IntegrationFieldType::String),
    ];
    let map = mapping(&[("email", "{email}"), ("first_name", "{firstName}")]);

    let out = mapping::resolve(&context(&f, &hooks), Some(&map), &schema, false);
    assert_eq!(out.get("email"), Some(&json!("ADA@EXAMPLE.COM")));
    assert_eq!(out.get("first_name"), Some(&json!("Ada")));
}

// ── Validation ──────────────────────────────────────────────────

#[test]
fn validation_reports_unmapped_required_and_unknown_fields() {
    let f = fixture();
    let schema = vec![
        IntegrationField::new("email", "Email", IntegrationFieldType::String).required(),
        IntegrationField::new("city", "City", IntegrationFieldType::String),
    ];

    let errors = mapping::validate_field_mapping(
        &f.form,
        Some(&mapping(&[("city", "{address[zip]}")])),
        &schema,
    )
    .unwrap_err();
    assert_eq!(
        errors,
        vec![
            "Email must be mapped.".to_string(),
            "city is mapped to unknown field {address[zip]}.".to_string(),
        ]
    );

    assert!(mapping::validate_field_mapping(&f.form, None, &schema).is_err());
    assert!(
        mapping::validate_field_mapping(
            &f.form,
            Some(&mapping(&[("email", "{email}"), ("city", "{address[city]}")])),
            &schema,
        )
        .is_ok()
    );
    // Templates aren't field references and always pass.
    assert!(
        mapping::validate_field_mapping(&f.form, Some(&mapping(&[("email", "x-{email}")])), &schema).is_ok()
    );
}

// ── Templates ───────────────────────────────────────────────────

#[tokio::test]
async fn templates_resolve_namespaces() {
    let f = fixture();
    let ctx = TemplateContext {
        form: &f.form,
        submission: &f.submission,
        integration: Some(&f.integration),
    };

    let rendered = template::render("{form:handle}/{integration:handle}/{submission:id}", &ctx);
    assert_eq!(rendered, format!("test/klaviyo/{}", f.submission.id));

    assert_eq!(template::render("{site:handle}", &ctx), "default");
    let scoped = site::scope(
        SiteContext { handle: "au".to_string(), language: "en-AU".to_string() },
        async { template::render("{site:handle} {site:language}", &ctx) },
    )
    .await;
    assert_eq!(scoped, "au en-AU");

    assert_eq!(template::render("{colours} {address[city]} {nope}!", &ctx), "red, blue Hobart !");
}
