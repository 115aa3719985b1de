use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::domain::customer::TenantId;

/// A tenant's connection to the Del Match order API. One per tenant.
#[derive(Clone, Debug)]
pub struct Integration {
    pub tenant_id: TenantId,
    /// Bare host, e.g. `loja.delmatchcardapio.com`.
    pub api_base_url: String,
    pub email: String,
    pub password: SecretString,
    pub token: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_order_reference: Option<u64>,
    pub historical_orders_url: Option<String>,
    pub sync_enabled: bool,
    pub sync_interval_minutes: u32,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    pub fn new(
        tenant_id: TenantId,
        api_base_url: impl Into<String>,
        email: impl Into<String>,
        password: SecretString,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            api_base_url: api_base_url.into(),
            email: email.into(),
            password,
            token: None,
            expires_at: None,
            last_order_reference: None,
            historical_orders_url: None,
            sync_enabled: true,
            sync_interval_minutes: 60,
            last_sync_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when the stored token is missing or expired at `now`.
    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        match (&self.token, self.expires_at) {
            (Some(_), Some(expires_at)) => expires_at <= now,
            _ => true,
        }
    }

    /// True when periodic sync should pick this integration up at `now`.
    pub fn sync_due(&self, now: DateTime<Utc>) -> bool {
        if !self.sync_enabled {
            return false;
        }
        match self.last_sync_at {
            None => true,
            Some(last) => {
                now.signed_duration_since(last).num_minutes() >= i64::from(self.sync_interval_minutes)
            }
        }
    }
}
