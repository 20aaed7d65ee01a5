use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use super::client::OutboundRequest;
use super::{IntegrationContext, IntegrationError};
use crate::db::NewToken;
use crate::models::OauthToken;

#[derive(Debug, Clone)]
pub struct OauthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub scope: Option<String>,
}

/// OAuth access for one operation. The token is read from the store when
/// the client is built and never outlives the operation; a refresh on 401 is
/// persisted so the next operation starts from the new token.
pub struct OauthClient<'a> {
    ctx: IntegrationContext<'a>,
    credentials: OauthCredentials,
    token: Mutex<OauthToken>,
}

impl<'a> OauthClient<'a> {
    pub async fn load(
        ctx: &IntegrationContext<'a>,
        credentials: OauthCredentials,
    ) -> Result<Self, IntegrationError> {
        let token = ctx
            .tokens
            .find_for_integration(ctx.integration.uid)
            .await?
            .ok_or_else(|| IntegrationError::config("Integration is not connected: no access token."))?;

        Ok(Self {
            ctx: *ctx,
            credentials,
            token: Mutex::new(token),
        })
    }

    pub async fn access_token(&self) -> String {
        self.token.lock().await.access_token.clone()
    }

    pub async fn refresh(&self) -> Result<String, IntegrationError> {
        let mut token = self.token.lock().await;

        let refresh_token = token
            .refresh_token
            .clone()
            .ok_or_else(|| IntegrationError::config("Access token expired and no refresh token is stored."))?;
        let token_url = token
            .token_url
            .clone()
            .unwrap_or_else(|| self.credentials.token_url.clone());

        let mut form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token),
            ("client_id".to_string(), self.credentials.client_id.clone()),
            ("client_secret".to_string(), self.credentials.client_secret.clone()),
        ];
        if let Some(scope) = &self.credentials.scope {
            form.push(("scope".to_string(), scope.clone()));
        }

        let response = OutboundRequest::post(&token_url)
            .form(form)
            .send(self.ctx.http)
            .await?;

        let access_token = response
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                IntegrationError::rejected("Token refresh response has no access_token.")
                    .with_response(response.clone())
            })?
            .to_string();

        let expires_at = response
            .get("expires_in")
            .and_then(|v| v.as_i64().or_else(|| v.as_str()?.parse().ok()))
            .map(|secs| Utc::now() + Duration::seconds(secs));

        let saved = self
            .ctx
            .tokens
            .save(&NewToken {
                integration_uid: self.ctx.integration.uid,
                access_token: access_token.clone(),
                refresh_token: response
                    .get("refresh_token")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                token_url: Some(token_url),
                expires_at,
            })
            .await?;

        tracing::info!(integration = %self.ctx.integration.handle, "Refreshed OAuth access token");

        *token = saved;
        Ok(access_token)
    }
}
