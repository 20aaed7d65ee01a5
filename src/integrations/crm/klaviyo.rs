use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::integrations::client::{self, OutboundRequest, RequestAuth};
use crate::integrations::mapping::{self, MappingContext};
use crate::integrations::{
    Delivery, IntegrationContext, IntegrationError, IntegrationField, IntegrationFieldType,
    IntegrationFormSettings, IntegrationKind, IntegrationProvider, SendContext,
};

const API_REVISION: &str = "2024-05-15";

/// Profile keys Klaviyo expects nested under `location`.
const LOCATION_KEYS: [&str; 6] = ["address1", "address2", "city", "region", "zip", "country"];

pub struct Klaviyo {
    base_url: String,
}

impl Klaviyo {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn request(&self, ctx: &IntegrationContext<'_>, method: reqwest::Method, path: &str) -> Result<OutboundRequest, IntegrationError> {
        let key = ctx
            .integration
            .setting("privateApiKey")
            .ok_or_else(|| IntegrationError::config("Klaviyo private API key is not set."))?;

        Ok(OutboundRequest::new(method, format!("{}/{path}", self.base_url))
            .header("revision", API_REVISION)
            .header("accept", "application/json")
            .auth(RequestAuth::Header {
                name: "Authorization".to_string(),
                value: format!("Klaviyo-API-Key {key}"),
            }))
    }

    fn profile_fields() -> Vec<IntegrationField> {
        let s = IntegrationFieldType::String;
        vec![
            IntegrationField::new("first_name", "First Name", s),
            IntegrationField::new("last_name", "Last Name", s),
            IntegrationField::new("email", "Email", s).required(),
            IntegrationField::new("phone_number", "Phone Number", s),
            IntegrationField::new("address1", "Address 1", s),
            IntegrationField::new("address2", "Address 2", s),
            IntegrationField::new("city", "City", s),
            IntegrationField::new("region", "Region", s),
            IntegrationField::new("country", "Country", s),
            IntegrationField::new("zip", "Zip", s),
            IntegrationField::new("organization", "Organization", s),
            IntegrationField::new("title", "Title", s),
        ]
    }
}

/// Move the address parts of a flat profile into a `location` object.
pub fn nest_location(mut profile: Map<String, Value>) -> Map<String, Value> {
    let mut location = Map::new();
    for key in LOCATION_KEYS {
        if let Some(value) = profile.remove(key) {
            if !value.is_null() && value != Value::String(String::new()) {
                location.insert(key.to_string(), value);
            }
        }
    }
    if !location.is_empty() {
        profile.insert("location".to_string(), Value::Object(location));
    }
    profile
}

#[async_trait]
impl IntegrationProvider for Klaviyo {
    fn id(&self) -> &str {
        "klaviyo"
    }

    fn name(&self) -> &str {
        "Klaviyo"
    }

    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Crm
    }

    fn settings_schema(&self) -> Value {
        json!({
            "publicApiKey": {"type": "string", "required": true},
            "privateApiKey": {"type": "string", "required": true, "secret": true},
            "mapToProfile": {"type": "boolean", "default": false}
        })
    }

    fn validate_settings(&self, settings: &Value) -> Result<(), IntegrationError> {
        for key in ["publicApiKey", "privateApiKey"] {
            let present = settings
                .get(key)
                .and_then(|v| v.as_str())
                .is_some_and(|s| !s.trim().is_empty());
            if !present {
                return Err(IntegrationError::config(format!("{key} is required.")));
            }
        }
        Ok(())
    }

    async fn fetch_connection(&self, ctx: &IntegrationContext<'_>) -> Result<(), IntegrationError> {
        self.request(ctx, reqwest::Method::GET, "lists")?.send(ctx.http).await?;
        Ok(())
    }

    async fn fetch_form_settings(
        &self,
        ctx: &IntegrationContext<'_>,
    ) -> Result<IntegrationFormSettings, IntegrationError> {
        let mut settings = IntegrationFormSettings::default();
        if ctx.integration.setting_bool("mapToProfile") {
            settings = settings.with_fields("profile", Self::profile_fields());
        }
        Ok(settings)
    }

    async fn send_payload(&self, ctx: &SendContext<'_>) -> Result<Delivery, IntegrationError> {
        let schema = Self::profile_fields();
        let mapping_ctx = MappingContext::for_send(ctx, self);
        let profile = mapping::resolve(
            &mapping_ctx,
            ctx.form_integration.mapping("profile"),
            &schema,
            ctx.overwrite_values(),
        );

        let payload = json!({
            "data": {
                "type": "profile",
                "attributes": nest_location(profile),
            }
        });

        let request = self
            .request(&ctx.ctx, reqwest::Method::POST, "profile-import")?
            .json(payload);
        client::deliver_payload(ctx, request, None).await
    }
}
