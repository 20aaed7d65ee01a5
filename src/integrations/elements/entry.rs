use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::cms::CmsClient;
use crate::integrations::client;
use crate::integrations::field::IntegrationCollection;
use crate::integrations::mapping::{self, MappingContext};
use crate::integrations::{
    Delivery, IntegrationContext, IntegrationError, IntegrationField, IntegrationFieldType,
    IntegrationFormSettings, IntegrationKind, IntegrationProvider, SendContext,
};

/// Creates CMS entries (or drafts) from submissions.
pub struct Entry {
    cms: CmsClient,
}

impl Entry {
    pub fn new(cms: CmsClient) -> Self {
        Self { cms }
    }

    pub fn element_attributes() -> Vec<IntegrationField> {
        use IntegrationFieldType::*;
        vec![
            IntegrationField::new("title", "Title", String),
            IntegrationField::new("siteId", "Site ID", String),
            IntegrationField::new("slug", "Slug", String),
            IntegrationField::new("author", "Author", Array),
            IntegrationField::new("postDate", "Post Date", Datetime),
            IntegrationField::new("expiryDate", "Expiry Date", Datetime),
            IntegrationField::new("enabled", "Enabled", Boolean),
            IntegrationField::new("dateCreated", "Date Created", Datetime),
            IntegrationField::new("dateUpdated", "Date Updated", Datetime),
        ]
    }

    async fn entry_type_collections(
        &self,
        http: &reqwest::Client,
    ) -> Result<BTreeMap<String, Vec<IntegrationCollection>>, IntegrationError> {
        let mut sections: BTreeMap<String, Vec<IntegrationCollection>> = BTreeMap::new();
        for entry_type in self.cms.entry_types(http).await? {
            if entry_type.section_type == "single" {
                continue;
            }
            let fields = entry_type
                .fields
                .iter()
                .map(|f| {
                    let mut field = IntegrationField::new(&f.handle, &f.name, f.integration_type());
                    field.required = f.required;
                    field
                })
                .collect();
            sections
                .entry(entry_type.section.clone())
                .or_default()
                .push(IntegrationCollection {
                    id: entry_type.uid,
                    name: entry_type.name,
                    fields,
                });
        }
        Ok(sections)
    }
}

/// The first id of a mapped `author` value, if any.
fn author_id(value: &Value) -> Option<Value> {
    match value {
        Value::Array(items) => items.first().filter(|v| !v.is_null()).cloned(),
        Value::Null => None,
        other => Some(other.clone()),
    }
}

#[async_trait]
impl IntegrationProvider for Entry {
    fn id(&self) -> &str {
        "entry"
    }

    fn name(&self) -> &str {
        "Entry"
    }

    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Element
    }

    fn accepts_markup(&self) -> bool {
        true
    }

    fn settings_schema(&self) -> Value {
        json!({
            "defaultAuthorId": {"type": "string"}
        })
    }

    fn validate_settings(&self, _settings: &Value) -> Result<(), IntegrationError> {
        Ok(())
    }

    async fn fetch_form_settings(
        &self,
        ctx: &IntegrationContext<'_>,
    ) -> Result<IntegrationFormSettings, IntegrationError> {
        let mut settings =
            IntegrationFormSettings::default().with_fields("attributes", Self::element_attributes());
        for (section, collections) in self.entry_type_collections(ctx.http).await? {
            settings = settings.with_collections(&section, collections);
        }
        Ok(settings)
    }

    async fn send_payload(&self, ctx: &SendContext<'_>) -> Result<Delivery, IntegrationError> {
        let entry_type_uid = ctx
            .form_integration
            .setting_str("entryTypeUid")
            .ok_or_else(|| IntegrationError::config("Unable to save element integration. No `entryTypeUid`."))?;

        let cached = ctx.integration().cached_form_settings();
        let fields_schema = match cached.find_collection(entry_type_uid) {
            Some(collection) => collection.fields.clone(),
            None => self
                .entry_type_collections(ctx.ctx.http)
                .await?
                .into_values()
                .flatten()
                .find(|c| c.id == entry_type_uid)
                .map(|c| c.fields)
                .ok_or_else(|| IntegrationError::config(format!("Unable to find entry type “{entry_type_uid}”.")))?,
        };

        let mapping_ctx = MappingContext::for_send(ctx, self);
        let overwrite = ctx.overwrite_values();

        let mut attributes = mapping::resolve(
            &mapping_ctx,
            ctx.form_integration.mapping("attributes"),
            &Self::element_attributes(),
            overwrite,
        );
        let fields = mapping::resolve(
            &mapping_ctx,
            ctx.form_integration.mapping("fields"),
            &fields_schema,
            overwrite,
        );

        let default_author = ctx
            .form_integration
            .setting_str("defaultAuthorId")
            .or_else(|| ctx.integration().setting("defaultAuthorId"))
            .map(|id| Value::String(id.to_string()));
        let author = attributes
            .remove("author")
            .as_ref()
            .and_then(author_id)
            .or(default_author);

        // Without a mapped status the entry inherits its section's default.
        let inherit_status = !attributes.contains_key("enabled");

        let payload = json!({
            "entryTypeUid": entry_type_uid,
            "site": ctx.submission.site_handle,
            "authorId": author,
            "attributes": Value::Object(attributes),
            "fields": Value::Object(fields),
            "createDraft": ctx.form_integration.setting_bool("createDraft"),
            "inheritStatus": inherit_status,
            "submissionId": ctx.submission.id,
        });

        let request = self.cms.request(reqwest::Method::POST, "entries")?.json(payload);

        client::deliver_payload(ctx, request, None).await.map_err(|err| {
            let message = format!(
                "Unable to save “{}” element integration. Error: {}.",
                ctx.integration().handle,
                err.message
            );
            IntegrationError {
                message,
                ..err
            }
        })
    }
}
