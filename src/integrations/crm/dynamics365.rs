use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::fields::FieldOption;
use crate::integrations::client::{self, OutboundRequest, RequestAuth};
use crate::integrations::mapping::{self, MappingContext};
use crate::integrations::oauth::{OauthClient, OauthCredentials};
use crate::integrations::{
    Delivery, IntegrationContext, IntegrationError, IntegrationField, IntegrationFieldType,
    IntegrationFormSettings, IntegrationKind, IntegrationProvider, SendContext,
};

const DEFAULT_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/token";
const DEFAULT_API_VERSION: &str = "v9.0";
const DEFAULT_IMPERSONATE_HEADER: &str = "CallerObjectId";
const DEFAULT_REQUIRED_LEVELS: [&str; 2] = ["SystemRequired", "ApplicationRequired"];
const EXCLUDED_TYPES: [&str; 5] = ["Customer", "EntityName", "State", "Uniqueidentifier", "Virtual"];

/// Entities in the order they are created. Later entities bind to the ids
/// of earlier ones.
static ENTITIES: [Entity; 5] = [
    Entity::new("contact", "contacts", "mapToContact"),
    Entity::new("account", "accounts", "mapToAccount"),
    Entity::new("lead", "leads", "mapToLead"),
    Entity::new("opportunity", "opportunities", "mapToOpportunity"),
    Entity::new("incident", "incidents", "mapToIncident"),
];

/// `(lookup target, entity set, label attribute, value attribute)`
const TARGET_SCHEMAS: [(&str, &str, &str, &str); 10] = [
    ("businessunit", "businessunits", "name", "businessunitid"),
    ("systemuser", "systemusers", "fullname", "systemuserid"),
    ("account", "accounts", "name", "accountid"),
    ("contact", "contacts", "fullname", "contactid"),
    ("lead", "leads", "fullname", "leadid"),
    ("incident", "incidents", "title", "incidentid"),
    ("transactioncurrency", "transactioncurrencies", "currencyname", "transactioncurrencyid"),
    ("team", "teams", "name", "teamid"),
    ("campaign", "campaigns", "name", "campaignid"),
    ("pricelevel", "pricelevels", "name", "pricelevelid"),
];

struct Entity {
    name: &'static str,
    set: &'static str,
    toggle: &'static str,
}

impl Entity {
    const fn new(name: &'static str, set: &'static str, toggle: &'static str) -> Self {
        Self { name, set, toggle }
    }

    fn id_attribute(&self) -> String {
        format!("{}id", self.name)
    }
}

/// Microsoft Dynamics 365 (Dataverse Web API) over OAuth.
pub struct Dynamics365;

impl Dynamics365 {
    pub fn new() -> Self {
        Self
    }

    fn credentials(ctx: &IntegrationContext<'_>) -> Result<OauthCredentials, IntegrationError> {
        let integration = ctx.integration;
        let client_id = integration
            .setting("clientId")
            .ok_or_else(|| IntegrationError::config("Client ID is not set."))?;
        let client_secret = integration
            .setting("clientSecret")
            .ok_or_else(|| IntegrationError::config("Client secret is not set."))?;

        Ok(OauthCredentials {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token_url: integration
                .setting("tokenUrl")
                .unwrap_or(DEFAULT_TOKEN_URL)
                .to_string(),
            scope: None,
        })
    }

    fn base_url(ctx: &IntegrationContext<'_>) -> Result<String, IntegrationError> {
        let domain = ctx
            .integration
            .setting("apiDomain")
            .ok_or_else(|| IntegrationError::config("API domain is not set."))?;
        let version = ctx.integration.setting("apiVersion").unwrap_or(DEFAULT_API_VERSION);
        Ok(format!("{}/api/data/{version}", domain.trim_end_matches('/')))
    }

    fn enabled_entities(ctx: &IntegrationContext<'_>) -> Vec<&'static Entity> {
        ENTITIES
            .iter()
            .filter(|e| ctx.integration.setting_bool(e.toggle))
            .collect()
    }
}

impl Default for Dynamics365 {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected API session for one operation.
struct Session<'a> {
    ctx: IntegrationContext<'a>,
    base_url: String,
    oauth: OauthClient<'a>,
}

impl<'a> Session<'a> {
    async fn open(ctx: &IntegrationContext<'a>) -> Result<Self, IntegrationError> {
        let credentials = Dynamics365::credentials(ctx)?;
        Ok(Self {
            ctx: *ctx,
            base_url: Dynamics365::base_url(ctx)?,
            oauth: OauthClient::load(ctx, credentials).await?,
        })
    }

    /// A request carrying the headers the Web API wants on every call.
    async fn request(&self, method: reqwest::Method, path: &str) -> OutboundRequest {
        let mut request = OutboundRequest::new(method.clone(), format!("{}/{path}", self.base_url))
            .header("Accept", "application/json")
            .header("OData-MaxVersion", "4.0")
            .header("OData-Version", "4.0")
            .auth(RequestAuth::Bearer(self.oauth.access_token().await));

        if method == reqwest::Method::POST || method == reqwest::Method::PATCH {
            request = request.header("Prefer", "return=representation");
        }
        if method == reqwest::Method::PATCH {
            request = request.header("If-Match", "*");
        }

        let integration = self.ctx.integration;
        if method == reqwest::Method::POST && integration.setting_bool("impersonateUser") {
            if let Some(user) = integration.setting("impersonateUserId") {
                let header = integration
                    .setting("impersonateHeader")
                    .unwrap_or(DEFAULT_IMPERSONATE_HEADER);
                request = request.header(header, user);
            }
        }
        request
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, IntegrationError> {
        let path = if query.is_empty() {
            path.to_string()
        } else {
            let mut serializer = form_urlencoded::Serializer::new(String::new());
            for (key, value) in query {
                serializer.append_pair(key, value);
            }
            format!("{path}?{}", serializer.finish())
        };
        let request = self.request(reqwest::Method::GET, &path).await;
        client::send_authorized(self.ctx.http, &request, Some(&self.oauth)).await
    }

    async fn entity_fields(
        &self,
        entity: &Entity,
        owner_cache: &mut HashMap<String, Vec<FieldOption>>,
    ) -> Result<Vec<IntegrationField>, IntegrationError> {
        let select = [
            "AttributeType",
            "IsCustomAttribute",
            "IsValidForCreate",
            "IsValidForUpdate",
            "CanBeSecuredForCreate",
            "CanBeSecuredForUpdate",
            "LogicalName",
            "DisplayName",
            "RequiredLevel",
        ]
        .join(",");
        let expand = format!("Attributes($select={select})");

        let metadata = self
            .get(
                &definitions_uri(entity.name, None),
                &[("$select", "Attributes"), ("$expand", &expand)],
            )
            .await?;

        // DateTime attributes with DateOnly behaviour reject full timestamps.
        let date_times = self
            .get(
                &definitions_uri(entity.name, Some("DateTime")),
                &[("$select", "SchemaName,LogicalName,DateTimeBehavior")],
            )
            .await?;
        let date_only: Vec<&str> = list(&date_times)
            .iter()
            .filter(|a| a.pointer("/DateTimeBehavior/Value").and_then(|v| v.as_str()) == Some("DateOnly"))
            .filter_map(|a| a.get("MetadataId").and_then(|v| v.as_str()))
            .collect();

        let required_levels = self.required_levels();

        let mut fields: Vec<(String, IntegrationField)> = Vec::new();
        for attribute in metadata.get("Attributes").and_then(|v| v.as_array()).into_iter().flatten() {
            let label = attribute
                .pointer("/DisplayName/UserLocalizedLabel/Label")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let can_create = attribute.get("IsValidForCreate").and_then(|v| v.as_bool()).unwrap_or(false);
            let required_level = attribute
                .pointer("/RequiredLevel/Value")
                .and_then(|v| v.as_str())
                .unwrap_or("None");
            let mut attribute_type = attribute.get("AttributeType").and_then(|v| v.as_str()).unwrap_or("");
            let key = attribute_handle(attribute);

            if label.is_empty() || key.is_empty() || !can_create || EXCLUDED_TYPES.contains(&attribute_type) {
                continue;
            }

            let mut handle = key.clone();
            if attribute.get("@odata.type").and_then(|v| v.as_str())
                == Some("#Microsoft.Dynamics.CRM.LookupAttributeMetadata")
            {
                handle.push_str("@odata.bind");
            }

            let metadata_id = attribute.get("MetadataId").and_then(|v| v.as_str()).unwrap_or("");
            if attribute_type == "DateTime" && date_only.contains(&metadata_id) {
                attribute_type = "Date";
            }

            let mut field = IntegrationField::new(&handle, label, convert_field_type(attribute_type));
            field.required = required_levels.iter().any(|level| level == required_level);
            if field.field_type == IntegrationFieldType::Boolean {
                field = field.with_options(
                    "Default options",
                    vec![option("True", "true"), option("False", "false")],
                );
            }
            fields.push((key, field));
        }

        let picklists = self
            .get(
                &definitions_uri(entity.name, Some("Picklist")),
                &[
                    ("$select", "IsCustomAttribute,LogicalName,SchemaName"),
                    ("$expand", "GlobalOptionSet($select=Options)"),
                ],
            )
            .await?;
        for picklist in list(&picklists) {
            let key = attribute_handle(picklist);
            let options: Vec<FieldOption> = picklist
                .pointer("/GlobalOptionSet/Options")
                .and_then(|v| v.as_array())
                .into_iter()
                .flatten()
                .map(|o| FieldOption {
                    label: o
                        .pointer("/Label/UserLocalizedLabel/Label")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    value: o.get("Value").map(value_string).unwrap_or_default(),
                })
                .collect();
            if let Some((_, field)) = fields.iter_mut().find(|(k, _)| *k == key) {
                if !options.is_empty() {
                    let name = field.name.clone();
                    *field = field.clone().with_options(&name, options);
                }
            }
        }

        self.owner_options(entity, &mut fields, owner_cache).await?;

        let users = self.system_user_options().await?;
        fields.push((
            "createdby".to_string(),
            IntegrationField::new("createdby", "Created By", IntegrationFieldType::String)
                .with_options("Created By", users),
        ));

        let mut fields: Vec<IntegrationField> = fields.into_iter().map(|(_, f)| f).collect();
        fields.sort_by(|a, b| b.required.cmp(&a.required).then_with(|| a.name.cmp(&b.name)));
        Ok(fields)
    }

    /// Populate options for lookup attributes from the entities they point
    /// at. Fetched entity lists are shared across all entities in one call.
    async fn owner_options(
        &self,
        entity: &Entity,
        fields: &mut [(String, IntegrationField)],
        cache: &mut HashMap<String, Vec<FieldOption>>,
    ) -> Result<(), IntegrationError> {
        let lookups = self
            .get(
                &definitions_uri(entity.name, Some("Lookup")),
                &[("$select", "IsCustomAttribute,LogicalName,SchemaName,Targets")],
            )
            .await?;

        for lookup in list(&lookups) {
            for target in targets(lookup) {
                let Some((_, set, label, value)) = TARGET_SCHEMAS.iter().find(|s| s.0 == target) else {
                    continue;
                };
                if cache.contains_key(target) {
                    continue;
                }

                let mut select = format!("{label},{value}");
                if target == "systemuser" {
                    select.push_str(",applicationid");
                }
                let response = self.get(set, &[("$select", &select), ("$top", "100")]).await?;

                let options = list(&response)
                    .iter()
                    .filter(|e| target != "systemuser" || e.get("applicationid").is_none_or(|v| v.is_null()))
                    .map(|e| FieldOption {
                        label: e.get(*label).map(value_string).unwrap_or_default(),
                        value: lookup_value(set, &e.get(*value).map(value_string).unwrap_or_default()),
                    })
                    .collect();
                cache.insert(target.to_string(), options);
            }
        }

        for lookup in list(&lookups) {
            let key = attribute_handle(lookup);
            let options: Vec<FieldOption> = targets(lookup)
                .iter()
                .filter_map(|t| cache.get(*t))
                .flatten()
                .cloned()
                .collect();
            if options.is_empty() {
                continue;
            }
            if let Some((_, field)) = fields.iter_mut().find(|(k, _)| *k == key) {
                let name = field.name.clone();
                *field = field.clone().with_options(&name, options);
            }
        }
        Ok(())
    }

    async fn system_user_options(&self) -> Result<Vec<FieldOption>, IntegrationError> {
        let response = self
            .get(
                "systemusers",
                &[
                    ("$top", "100"),
                    ("$select", "fullname,systemuserid,applicationid"),
                    ("$orderby", "fullname"),
                    ("$filter", "applicationid eq null and invitestatuscode eq 4 and isdisabled eq false"),
                ],
            )
            .await?;

        Ok(list(&response)
            .iter()
            .map(|user| FieldOption {
                label: user.get("fullname").map(value_string).unwrap_or_default(),
                value: lookup_value("systemusers", &user.get("systemuserid").map(value_string).unwrap_or_default()),
            })
            .collect())
    }

    fn required_levels(&self) -> Vec<String> {
        match self.ctx.integration.settings.get("requiredLevels").and_then(|v| v.as_array()) {
            Some(levels) => levels.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect(),
            None => DEFAULT_REQUIRED_LEVELS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn definitions_uri(entity: &str, attribute_type: Option<&str>) -> String {
    let mut path = format!("EntityDefinitions(LogicalName='{entity}')");
    if let Some(kind) = attribute_type {
        path.push_str(&format!("/Attributes/Microsoft.Dynamics.CRM.{kind}AttributeMetadata"));
    }
    path
}

/// Custom attributes are addressed by schema name, built-in ones by logical name.
fn attribute_handle(attribute: &Value) -> String {
    let custom = attribute.get("IsCustomAttribute").and_then(|v| v.as_bool()).unwrap_or(false);
    let key = if custom { "SchemaName" } else { "LogicalName" };
    attribute.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string()
}

fn targets(lookup: &Value) -> Vec<&str> {
    lookup
        .get("Targets")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|t| t.as_str())
        .collect()
}

fn list(response: &Value) -> &[Value] {
    response
        .get("value")
        .and_then(|v| v.as_array())
        .map(|v| v.as_slice())
        .unwrap_or(&[])
}

fn value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn option(label: &str, value: &str) -> FieldOption {
    FieldOption {
        label: label.to_string(),
        value: value.to_string(),
    }
}

pub fn convert_field_type(attribute_type: &str) -> IntegrationFieldType {
    match attribute_type {
        "Decimal" | "Double" | "Money" => IntegrationFieldType::Float,
        "BigInt" | "Integer" => IntegrationFieldType::Number,
        "Boolean" => IntegrationFieldType::Boolean,
        "Date" => IntegrationFieldType::Date,
        "DateTime" => IntegrationFieldType::Datetime,
        _ => IntegrationFieldType::String,
    }
}

/// `entityset(GUID)`, the form `@odata.bind` values take.
pub fn lookup_value(entity_set: &str, id: &str) -> String {
    format!("{entity_set}({id})")
}

/// Relationship bindings for an entity given the ids created so far.
pub fn bindings(entity: &str, created: &HashMap<&str, String>) -> Map<String, Value> {
    let mut out = Map::new();
    let contact = created.get("contact").map(|id| lookup_value("contacts", id));
    let account = created.get("account").map(|id| lookup_value("accounts", id));

    let mut bind = |key: &str, value: &Option<String>| {
        if let Some(value) = value {
            out.insert(format!("{key}@odata.bind"), Value::String(value.clone()));
        }
    };

    match entity {
        "account" => bind("primarycontactid", &contact),
        "lead" => {
            bind("parentcontactid", &contact);
            bind("customerid_contact", &contact);
            bind("parentaccountid", &account);
            bind("customerid_account", &account);
        }
        "opportunity" => {
            bind("parentcontactid", &contact);
            bind("parentaccountid", &account);
        }
        "incident" => bind("customerid_contact", &contact),
        _ => {}
    }
    out
}

#[async_trait]
impl IntegrationProvider for Dynamics365 {
    fn id(&self) -> &str {
        "dynamics365"
    }

    fn name(&self) -> &str {
        "Microsoft Dynamics 365"
    }

    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Crm
    }

    fn settings_schema(&self) -> Value {
        json!({
            "clientId": {"type": "string", "required": true},
            "clientSecret": {"type": "string", "required": true, "secret": true},
            "apiDomain": {"type": "string", "required": true},
            "apiVersion": {"type": "string", "default": DEFAULT_API_VERSION},
            "tokenUrl": {"type": "string", "default": DEFAULT_TOKEN_URL},
            "impersonateUser": {"type": "boolean", "default": false},
            "impersonateHeader": {"type": "string", "default": DEFAULT_IMPERSONATE_HEADER},
            "impersonateUserId": {"type": "string"},
            "requiredLevels": {"type": "array", "default": DEFAULT_REQUIRED_LEVELS},
            "mapToContact": {"type": "boolean", "default": false},
            "mapToAccount": {"type": "boolean", "default": false},
            "mapToLead": {"type": "boolean", "default": false},
            "mapToOpportunity": {"type": "boolean", "default": false},
            "mapToIncident": {"type": "boolean", "default": false}
        })
    }

    fn validate_settings(&self, settings: &Value) -> Result<(), IntegrationError> {
        let present = |key: &str| {
            settings
                .get(key)
                .and_then(|v| v.as_str())
                .is_some_and(|s| !s.trim().is_empty())
        };
        for key in ["clientId", "clientSecret", "apiDomain"] {
            if !present(key) {
                return Err(IntegrationError::config(format!("{key} is required.")));
            }
        }
        let impersonate = settings.get("impersonateUser").and_then(|v| v.as_bool()).unwrap_or(false);
        if impersonate && !present("impersonateUserId") {
            return Err(IntegrationError::config("impersonateUserId is required when impersonating."));
        }
        Ok(())
    }

    async fn fetch_connection(&self, ctx: &IntegrationContext<'_>) -> Result<(), IntegrationError> {
        let session = Session::open(ctx).await?;
        session.get("WhoAmI", &[]).await?;
        Ok(())
    }

    async fn fetch_form_settings(
        &self,
        ctx: &IntegrationContext<'_>,
    ) -> Result<IntegrationFormSettings, IntegrationError> {
        let session = Session::open(ctx).await?;
        let mut owner_cache = HashMap::new();
        let mut settings = IntegrationFormSettings::default();

        for entity in Self::enabled_entities(ctx) {
            let fields = session.entity_fields(entity, &mut owner_cache).await?;
            settings = settings.with_fields(entity.name, fields);
        }
        Ok(settings)
    }

    async fn send_payload(&self, ctx: &SendContext<'_>) -> Result<Delivery, IntegrationError> {
        let session = Session::open(&ctx.ctx).await?;
        let cached = ctx.integration().cached_form_settings();
        let mapping_ctx = MappingContext::for_send(ctx, self);

        let mut created: HashMap<&str, String> = HashMap::new();
        let mut last = Value::Null;

        for entity in Self::enabled_entities(&ctx.ctx) {
            let mut payload = mapping::resolve(
                &mapping_ctx,
                ctx.form_integration.mapping(entity.name),
                cached.fields(entity.name),
                ctx.overwrite_values(),
            );
            payload.extend(bindings(entity.name, &created));

            let id_attribute = entity.id_attribute();
            let path = format!("{}?$select={id_attribute}", entity.set);
            let request = session
                .request(reqwest::Method::POST, &path)
                .await
                .json(Value::Object(payload.clone()));

            let response = match client::deliver_payload(ctx, request, Some(&session.oauth)).await? {
                Delivery::Sent(response) => response,
                Delivery::Skipped => return Ok(Delivery::Skipped),
            };

            let id = response
                .get(&id_attribute)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    IntegrationError::rejected(format!(
                        "Missing return {id_attribute} {response}. Sent payload {}",
                        Value::Object(payload.clone())
                    ))
                    .with_response(response.clone())
                })?;

            created.insert(entity.name, id.to_string());
            last = response;
        }

        Ok(Delivery::Sent(last))
    }
}
