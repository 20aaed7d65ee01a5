use serde::{Deserialize, Serialize};

use crate::integrations::client::{OutboundRequest, RequestAuth};
use crate::integrations::{IntegrationError, IntegrationFieldType};

/// A mailing list on the CMS's newsletter plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailingList {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub site: Option<String>,
}

/// A custom field defined on a CMS element layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmsField {
    pub handle: String,
    pub name: String,
    /// CMS field type, e.g. `entries`, `date`, `lightswitch`.
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
}

impl CmsField {
    pub fn integration_type(&self) -> IntegrationFieldType {
        match self.field_type.as_str() {
            "assets" | "categories" | "checkboxes" | "entries" | "multiSelect" | "table" | "tags"
            | "users" => IntegrationFieldType::Array,
            "date" => IntegrationFieldType::Datetime,
            "lightswitch" => IntegrationFieldType::Boolean,
            "number" => IntegrationFieldType::Float,
            _ => IntegrationFieldType::String,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryType {
    pub uid: String,
    pub name: String,
    pub section: String,
    /// `single`, `channel` or `structure`. Singles can't take new entries.
    #[serde(default)]
    pub section_type: String,
    #[serde(default)]
    pub fields: Vec<CmsField>,
}

/// Connection to the CMS's element API. Used by the element and Campaign
/// integrations, which write into the CMS rather than a third party.
#[derive(Debug, Clone)]
pub struct CmsClient {
    base_url: String,
    token: Option<String>,
}

impl CmsClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()).map(|t| t.to_string()),
        }
    }

    pub fn request(&self, method: reqwest::Method, path: &str) -> Result<OutboundRequest, IntegrationError> {
        if self.base_url.is_empty() {
            return Err(IntegrationError::config("CMS URL is not configured."));
        }
        let mut request = OutboundRequest::new(method, format!("{}/{path}", self.base_url))
            .header("accept", "application/json");
        if let Some(token) = &self.token {
            request = request.auth(RequestAuth::Bearer(token.clone()));
        }
        Ok(request)
    }

    pub async fn mailing_lists(&self, http: &reqwest::Client) -> Result<Vec<MailingList>, IntegrationError> {
        let response = self.request(reqwest::Method::GET, "campaign/lists")?.send(http).await?;
        decode(response, "mailing lists")
    }

    pub async fn contact_fields(&self, http: &reqwest::Client) -> Result<Vec<CmsField>, IntegrationError> {
        let response = self
            .request(reqwest::Method::GET, "campaign/contact-fields")?
            .send(http)
            .await?;
        decode(response, "contact fields")
    }

    pub async fn entry_types(&self, http: &reqwest::Client) -> Result<Vec<EntryType>, IntegrationError> {
        let response = self.request(reqwest::Method::GET, "entry-types")?.send(http).await?;
        decode(response, "entry types")
    }
}

fn decode<T: serde::de::DeserializeOwned>(response: serde_json::Value, what: &str) -> Result<T, IntegrationError> {
    let items = response.get("data").cloned().unwrap_or(response);
    serde_json::from_value(items.clone()).map_err(|e| {
        IntegrationError::rejected(format!("Unexpected {what} response from CMS: {e}")).with_response(items)
    })
}
