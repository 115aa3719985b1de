use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use guru_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    /// Del Match integrations with periodic sync switched on.
    pub sync_enabled_integrations: Option<i64>,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";
    let sync_enabled_integrations = if ready {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM api_integrations WHERE sync_enabled = 1")
            .fetch_one(&state.db_pool)
            .await
            .ok()
    } else {
        None
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck { status: "ready", detail: "guru-server runtime initialized".to_string() },
        database,
        sync_enabled_integrations,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM customers").fetch_one(pool).await {
        Ok(customers) => {
            HealthCheck { status: "ready", detail: format!("{customers} customers stored") }
        }
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}
