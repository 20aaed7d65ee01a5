use async_trait::async_trait;
use serde_json::{Value, json};

use crate::cms::{CmsClient, MailingList};
use crate::integrations::client::{self, OutboundRequest};
use crate::integrations::field::IntegrationCollection;
use crate::integrations::mapping::{self, MappingContext};
use crate::integrations::{
    Delivery, IntegrationContext, IntegrationError, IntegrationField, IntegrationFieldType,
    IntegrationFormSettings, IntegrationKind, IntegrationProvider, SendContext,
};

/// Subscribes contacts to mailing lists of the CMS's Campaign plugin.
pub struct Campaign {
    cms: CmsClient,
}

impl Campaign {
    pub fn new(cms: CmsClient) -> Self {
        Self { cms }
    }

    async fn list_collections(&self, http: &reqwest::Client) -> Result<Vec<IntegrationCollection>, IntegrationError> {
        let lists = self.cms.mailing_lists(http).await?;
        let custom: Vec<IntegrationField> = self
            .cms
            .contact_fields(http)
            .await?
            .iter()
            .map(|f| {
                let mut field = IntegrationField::new(&f.handle, &f.name, f.integration_type());
                field.required = f.required;
                field
            })
            .collect();

        let multi_site = {
            let mut sites: Vec<&str> = lists.iter().filter_map(|l| l.site.as_deref()).collect();
            sites.sort_unstable();
            sites.dedup();
            sites.len() > 1
        };

        let mut lists: Vec<&MailingList> = lists.iter().collect();
        lists.sort_by(|a, b| a.site.cmp(&b.site).then_with(|| a.title.cmp(&b.title)));

        Ok(lists
            .into_iter()
            .map(|list| {
                let name = match (&list.site, multi_site) {
                    (Some(site), true) => format!("({site}) {}", list.title),
                    _ => list.title.clone(),
                };
                let mut fields = vec![IntegrationField::new("email", "Email", IntegrationFieldType::String).required()];
                fields.extend(custom.iter().cloned());
                IntegrationCollection {
                    id: list.id.clone(),
                    name,
                    fields,
                }
            })
            .collect())
    }
}

#[async_trait]
impl IntegrationProvider for Campaign {
    fn id(&self) -> &str {
        "campaign"
    }

    fn name(&self) -> &str {
        "Campaign"
    }

    fn kind(&self) -> IntegrationKind {
        IntegrationKind::EmailMarketing
    }

    /// Rich text is kept as (decoded) markup.
    fn accepts_markup(&self) -> bool {
        true
    }

    /// Relation fields map one-to-one onto CMS relation fields.
    fn relations_as_ids(&self) -> bool {
        true
    }

    fn settings_schema(&self) -> Value {
        json!({})
    }

    fn validate_settings(&self, _settings: &Value) -> Result<(), IntegrationError> {
        Ok(())
    }

    async fn fetch_form_settings(
        &self,
        ctx: &IntegrationContext<'_>,
    ) -> Result<IntegrationFormSettings, IntegrationError> {
        let lists = self.list_collections(ctx.http).await?;
        Ok(IntegrationFormSettings::default().with_collections("lists", lists))
    }

    async fn send_payload(&self, ctx: &SendContext<'_>) -> Result<Delivery, IntegrationError> {
        let list_id = ctx
            .form_integration
            .setting_str("listId")
            .ok_or_else(|| IntegrationError::config("No mailing list selected."))?;

        let cached = ctx.integration().cached_form_settings();
        let list = match cached.collection("lists", list_id) {
            Some(list) => list.clone(),
            None => self
                .list_collections(ctx.ctx.http)
                .await?
                .into_iter()
                .find(|l| l.id == list_id)
                .ok_or_else(|| IntegrationError::config(format!("Unable to find list “{list_id}”.")))?,
        };

        let mapping_ctx = MappingContext::for_send(ctx, self);
        let mut values = mapping::resolve(
            &mapping_ctx,
            ctx.form_integration.mapping("default"),
            &list.fields,
            ctx.overwrite_values(),
        );

        let email = values.remove("email").unwrap_or(Value::Null);

        let request: OutboundRequest = self
            .cms
            .request(reqwest::Method::POST, "campaign/subscribe")?
            .json(json!({
                "email": email,
                "listId": list.id,
                "fields": values,
                "source": "formrelay",
                "referrer": ctx.submission.metadata.get("referer"),
            }));

        client::deliver_payload(ctx, request, None).await
    }
}
