use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use guru_core::audit::{OperationKind, OperationLogEntry};
use guru_core::domain::integration::Integration;
use guru_core::ingest::{IngestionPipeline, SyncMode};
use guru_core::store::{CustomerStore, IntegrationStore};
use guru_delmatch::{sync_integration, TokenProvider};

/// Incremental Del Match sync for every connected tenant whose interval has
/// elapsed. Each run leaves a `periodic_sync` or `periodic_sync_error` entry
/// in the operation log.
pub struct PeriodicSync {
    pipeline: Arc<IngestionPipeline>,
    tokens: TokenProvider,
    integrations: Arc<dyn IntegrationStore>,
    customers: Arc<dyn CustomerStore>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

fn eligible(integration: &Integration, now: DateTime<Utc>) -> bool {
    integration.sync_enabled && integration.token.is_some() && integration.sync_due(now)
}

impl PeriodicSync {
    pub fn new(
        pipeline: Arc<IngestionPipeline>,
        tokens: TokenProvider,
        integrations: Arc<dyn IntegrationStore>,
        customers: Arc<dyn CustomerStore>,
    ) -> Self {
        Self { pipeline, tokens, integrations, customers }
    }

    /// One pass over all integrations. Tenants are synced one after another;
    /// a failing tenant never stops the rest.
    pub async fn run_once(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();
        let integrations = match self.integrations.list_integrations().await {
            Ok(integrations) => integrations,
            Err(store_error) => {
                error!(
                    event_name = "sync.periodic.list_failed",
                    error = %store_error,
                    "could not list integrations"
                );
                return summary;
            }
        };

        for integration in integrations {
            if !eligible(&integration, now) {
                summary.skipped += 1;
                continue;
            }
            summary.attempted += 1;
            let tenant = integration.tenant_id.clone();

            let entry = match sync_integration(
                &self.pipeline,
                &self.tokens,
                integration,
                SyncMode::Incremental,
                now,
            )
            .await
            {
                Ok(report) => {
                    summary.succeeded += 1;
                    info!(
                        event_name = "sync.periodic.completed",
                        correlation_id = %report.run_id,
                        tenant_id = %tenant.0,
                        summary = %report.summary(),
                        "periodic sync completed"
                    );
                    OperationLogEntry::new(
                        tenant.clone(),
                        OperationKind::PeriodicSync,
                        "api_integration",
                        Some(tenant.0.clone()),
                        now,
                    )
                    .with_detail("run_id", report.run_id.clone())
                    .with_detail("orders_created", report.orders_created.to_string())
                    .with_detail("customers_created", report.customers_created.to_string())
                    .with_detail("customers_updated", report.customers_updated.to_string())
                }
                Err(source_error) => {
                    summary.failed += 1;
                    warn!(
                        event_name = "sync.periodic.failed",
                        tenant_id = %tenant.0,
                        error = %source_error,
                        "periodic sync failed"
                    );
                    OperationLogEntry::new(
                        tenant.clone(),
                        OperationKind::PeriodicSyncError,
                        "api_integration",
                        Some(tenant.0.clone()),
                        now,
                    )
                    .with_detail("error", source_error.to_string())
                }
            };

            if let Err(store_error) = self.customers.record_operation(&entry).await {
                warn!(
                    event_name = "sync.periodic.log_failed",
                    tenant_id = %tenant.0,
                    error = %store_error,
                    "could not record periodic sync outcome"
                );
            }
        }
        summary
    }

    /// Ticks every `tick` until `shutdown` flips to true or its sender drops.
    pub fn spawn(self: Arc<Self>, tick: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(event_name = "sync.periodic.started", tick_secs = tick.as_secs(), "periodic sync started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let summary = self.run_once(Utc::now()).await;
                        if summary.attempted > 0 {
                            info!(
                                event_name = "sync.periodic.tick",
                                attempted = summary.attempted,
                                succeeded = summary.succeeded,
                                failed = summary.failed,
                                skipped = summary.skipped,
                                "periodic sync tick finished"
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(event_name = "sync.periodic.stopped", "periodic sync stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use axum::http::header::AUTHORIZATION;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::{Duration, Utc};
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tokio::sync::watch;

    use guru_core::audit::OperationKind;
    use guru_core::config::{DelMatchConfig, UrlScheme};
    use guru_core::domain::customer::TenantId;
    use guru_core::domain::integration::Integration;
    use guru_core::ingest::{IngestSettings, IngestionPipeline};
    use guru_core::store::IntegrationStore;
    use guru_db::{InMemoryCustomerStore, InMemoryIntegrationStore};
    use guru_delmatch::{DelMatchClient, TokenProvider};

    use super::{PeriodicSync, TickSummary};

    async fn orders(headers: HeaderMap) -> (StatusCode, Json<Value>) {
        let bearer = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
        if bearer != Some("Bearer tok-bom") {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid_token" })));
        }
        (
            StatusCode::OK,
            Json(json!([{
                "reference": 3100,
                "createdAt": "2024-06-01T19:30:00-03:00",
                "totalPrice": 58.9,
                "customer": { "name": "Carla Dias", "phone": "(31) 98888-7777" },
                "items": [{ "name": "Pizza Margherita", "quantity": 1, "price": 58.9, "totalPrice": 58.9 }]
            }])),
        )
    }

    async fn spawn_fake_api() -> String {
        let router = Router::new().route("/api/orders.json", get(orders));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind fake api");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("fake api should serve");
        });
        format!("http://{address}")
    }

    fn integration(tenant: &str, token: Option<&str>) -> Integration {
        let mut integration = Integration::new(
            TenantId(tenant.to_string()),
            "pizzaria.delmatchcardapio.com",
            "dono@pizzaria.com",
            SecretString::from("s3nha".to_string()),
            Utc::now() - Duration::days(1),
        );
        integration.token = token.map(|token| SecretString::from(token.to_string()));
        integration.expires_at = token.map(|_| Utc::now() + Duration::hours(6));
        integration
    }

    struct Harness {
        scheduler: PeriodicSync,
        customers: Arc<InMemoryCustomerStore>,
        integrations: Arc<InMemoryIntegrationStore>,
    }

    async fn harness() -> Harness {
        let endpoint = spawn_fake_api().await;
        let customers = Arc::new(InMemoryCustomerStore::default());
        let integrations = Arc::new(InMemoryIntegrationStore::default());
        let client =
            DelMatchClient::new(&DelMatchConfig { request_timeout_secs: 5, scheme: UrlScheme::Http })
                .expect("client")
                .with_endpoint(endpoint);
        let pipeline = Arc::new(IngestionPipeline::new(
            customers.clone(),
            integrations.clone(),
            IngestSettings::default(),
        ));
        let scheduler = PeriodicSync::new(
            pipeline,
            TokenProvider::new(client, integrations.clone()),
            integrations.clone(),
            customers.clone(),
        );
        Harness { scheduler, customers, integrations }
    }

    #[tokio::test]
    async fn tick_syncs_due_tenants_and_logs_each_outcome() {
        let h = harness().await;
        let mut disabled = integration("d-desligada", Some("tok-bom"));
        disabled.sync_enabled = false;
        for stored in [
            integration("a-boa", Some("tok-bom")),
            integration("b-ruim", Some("tok-ruim")),
            integration("c-sem-token", None),
            disabled,
        ] {
            h.integrations.save_integration(&stored).await.expect("save");
        }

        let now = Utc::now();
        let summary = h.scheduler.run_once(now).await;
        assert_eq!(summary, TickSummary { attempted: 2, succeeded: 1, failed: 1, skipped: 2 });

        let operations = h.customers.operations().await;
        let periodic: Vec<_> = operations
            .iter()
            .filter(|entry| {
                matches!(entry.operation, OperationKind::PeriodicSync | OperationKind::PeriodicSyncError)
            })
            .collect();
        assert_eq!(periodic.len(), 2);
        let ok = periodic
            .iter()
            .find(|entry| entry.operation == OperationKind::PeriodicSync)
            .expect("success entry");
        assert_eq!(ok.tenant_id.0, "a-boa");
        assert_eq!(ok.details.get("orders_created").map(String::as_str), Some("1"));
        let failed = periodic
            .iter()
            .find(|entry| entry.operation == OperationKind::PeriodicSyncError)
            .expect("error entry");
        assert_eq!(failed.tenant_id.0, "b-ruim");
        assert!(failed.details.contains_key("error"));

        let good = h
            .integrations
            .find_integration(&TenantId("a-boa".to_string()))
            .await
            .expect("find")
            .expect("stored");
        assert_eq!(good.last_sync_at, Some(now));
        assert_eq!(good.last_order_reference, Some(3100));
    }

    #[tokio::test]
    async fn synced_tenant_waits_for_its_interval() {
        let h = harness().await;
        h.integrations.save_integration(&integration("a-boa", Some("tok-bom"))).await.expect("save");

        let now = Utc::now();
        assert_eq!(h.scheduler.run_once(now).await.succeeded, 1);

        let soon = h.scheduler.run_once(now + Duration::minutes(10)).await;
        assert_eq!(soon, TickSummary { skipped: 1, ..TickSummary::default() });

        let later = h.scheduler.run_once(now + Duration::minutes(61)).await;
        assert_eq!(later.succeeded, 1);
    }

    #[tokio::test]
    async fn spawned_loop_stops_on_shutdown() {
        let h = harness().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::new(h.scheduler).spawn(StdDuration::from_millis(20), shutdown_rx);

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        shutdown_tx.send(true).expect("send shutdown");

        tokio::time::timeout(StdDuration::from_secs(2), handle)
            .await
            .expect("loop should stop")
            .expect("task should not panic");
    }
}
