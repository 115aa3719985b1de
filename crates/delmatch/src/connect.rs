use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tracing::info;

use guru_core::domain::customer::TenantId;
use guru_core::domain::integration::Integration;
use guru_core::store::IntegrationStore;

use crate::client::DelMatchClient;
use crate::domain::normalize_base_url;
use crate::error::DelMatchError;

pub struct ConnectRequest {
    pub tenant: TenantId,
    pub api_base_url: String,
    pub email: String,
    pub password: SecretString,
    pub historical_orders_url: Option<String>,
    pub sync_interval_minutes: Option<u32>,
}

/// Validates the domain, proves the credentials with a token request and
/// stores the integration together with the fresh token.
///
/// Reconnecting keeps the stored high-water mark and last sync time.
pub async fn connect_integration(
    client: &DelMatchClient,
    store: &dyn IntegrationStore,
    request: ConnectRequest,
    now: DateTime<Utc>,
) -> Result<Integration, DelMatchError> {
    let email = request.email.trim();
    if email.is_empty() {
        return Err(DelMatchError::NotConfigured("e-mail is required".to_string()));
    }
    let domain = normalize_base_url(&request.api_base_url)?;
    let access = client.authenticate(&domain, email, &request.password).await?;

    let mut integration = match store.find_integration(&request.tenant).await? {
        Some(mut existing) => {
            existing.api_base_url = domain;
            existing.email = email.to_string();
            existing.password = request.password;
            existing.updated_at = now;
            existing
        }
        None => Integration::new(request.tenant, domain, email, request.password, now),
    };
    if request.historical_orders_url.is_some() {
        integration.historical_orders_url = request.historical_orders_url;
    }
    if let Some(minutes) = request.sync_interval_minutes {
        integration.sync_interval_minutes = minutes;
    }
    integration.token = Some(access.token);
    integration.expires_at = Some(access.expires_at);

    store.save_integration(&integration).await?;
    info!(
        event_name = "delmatch.integration.connected",
        tenant_id = %integration.tenant_id.0,
        domain = %integration.api_base_url,
        "Del Match integration connected"
    );
    Ok(integration)
}
