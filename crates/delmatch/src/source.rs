use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use guru_core::domain::integration::Integration;
use guru_core::ingest::{IngestionPipeline, IngestionReport, OrderSource, SourceError, SyncMode};

use crate::error::DelMatchError;
use crate::token::TokenProvider;

/// One tenant's Del Match feed, bound to a sync mode for a single run.
pub struct DelMatchSource {
    tokens: TokenProvider,
    integration: Integration,
    mode: SyncMode,
    now: DateTime<Utc>,
}

impl DelMatchSource {
    pub fn new(
        tokens: TokenProvider,
        integration: Integration,
        mode: SyncMode,
        now: DateTime<Utc>,
    ) -> Self {
        Self { tokens, integration, mode, now }
    }

    async fn fetch(&self) -> Result<Vec<Value>, DelMatchError> {
        let historical_url = match self.mode {
            SyncMode::Incremental => None,
            SyncMode::Historical => Some(
                self.integration
                    .historical_orders_url
                    .as_deref()
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| {
                        DelMatchError::NotConfigured(format!(
                            "historical orders URL not configured for tenant `{}`",
                            self.integration.tenant_id.0
                        ))
                    })?,
            ),
        };

        let token = self.tokens.get_valid_token(&self.integration, self.now).await?;
        match historical_url {
            Some(url) => self.tokens.client().fetch_orders_from(url, &token).await,
            None => self.tokens.client().fetch_orders(&self.integration.api_base_url, &token).await,
        }
    }
}

#[async_trait]
impl OrderSource for DelMatchSource {
    async fn fetch_orders(&self) -> Result<Vec<Value>, SourceError> {
        self.fetch().await.map_err(SourceError::from)
    }
}

/// Runs one sync of `integration` through `pipeline`. A successful incremental
/// run also stamps the integration's last sync time.
pub async fn sync_integration(
    pipeline: &IngestionPipeline,
    tokens: &TokenProvider,
    integration: Integration,
    mode: SyncMode,
    now: DateTime<Utc>,
) -> Result<IngestionReport, SourceError> {
    let tenant = integration.tenant_id.clone();
    let source = DelMatchSource::new(tokens.clone(), integration, mode, now);
    let mut report = pipeline.sync_orders(&tenant, &source, mode, now).await?;

    if mode == SyncMode::Incremental {
        if let Err(store_error) = tokens.integrations().mark_synced(&tenant, now).await {
            warn!(
                event_name = "sync.mark_synced.failed",
                correlation_id = %report.run_id,
                tenant_id = %tenant.0,
                error = %store_error,
                "could not stamp last sync time"
            );
            report.note(format!("last sync time not stored: {store_error}"));
        }
    }
    Ok(report)
}
