use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tracing::info;

use guru_core::domain::integration::Integration;
use guru_core::store::IntegrationStore;

use crate::client::DelMatchClient;
use crate::error::DelMatchError;

/// Hands out a bearer token that is valid at the given instant, re-running the
/// password grant and persisting the result when the stored one has expired.
#[derive(Clone)]
pub struct TokenProvider {
    client: DelMatchClient,
    integrations: Arc<dyn IntegrationStore>,
}

impl TokenProvider {
    pub fn new(client: DelMatchClient, integrations: Arc<dyn IntegrationStore>) -> Self {
        Self { client, integrations }
    }

    pub fn client(&self) -> &DelMatchClient {
        &self.client
    }

    pub fn integrations(&self) -> &Arc<dyn IntegrationStore> {
        &self.integrations
    }

    pub async fn get_valid_token(
        &self,
        integration: &Integration,
        now: DateTime<Utc>,
    ) -> Result<SecretString, DelMatchError> {
        if !integration.token_expired(now) {
            if let Some(token) = &integration.token {
                return Ok(token.clone());
            }
        }

        info!(
            event_name = "delmatch.token.refresh",
            tenant_id = %integration.tenant_id.0,
            domain = %integration.api_base_url,
            "token expired, refreshing"
        );
        let fresh = self
            .client
            .authenticate(&integration.api_base_url, &integration.email, &integration.password)
            .await?;
        self.integrations.save_token(&integration.tenant_id, &fresh.token, fresh.expires_at).await?;
        Ok(fresh.token)
    }
}
