//! Tenant-scoped JSON API: CSV imports, Del Match connection and sync,
//! segment dashboard, customer listing and deletion, campaign planning.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use guru_core::audit::{OperationKind, OperationLogEntry};
use guru_core::campaign::{plan_campaign, CampaignCriteria, CampaignDraft, CampaignPlan, SendMode};
use guru_core::dashboard::{dashboard_metrics, DashboardMetrics};
use guru_core::domain::customer::{CustomerId, TenantId};
use guru_core::domain::integration::Integration;
use guru_core::errors::{ApplicationError, DomainError, InterfaceError};
use guru_core::ingest::{IngestionPipeline, IngestionReport, SyncMode};
use guru_core::rfm::Segment;
use guru_core::segments::{score_cohort, CustomerFilter, ScoredCustomer};
use guru_core::store::{CustomerStore, IntegrationStore};
use guru_db::{CampaignRepository, RepositoryError};
use guru_delmatch::{connect_integration, sync_integration, ConnectRequest, DelMatchError, TokenProvider};

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub customers: Arc<dyn CustomerStore>,
    pub integrations: Arc<dyn IntegrationStore>,
    pub campaigns: Arc<dyn CampaignRepository>,
    pub pipeline: Arc<IngestionPipeline>,
    pub tokens: TokenProvider,
    /// Interval given to integrations connected through the API.
    pub sync_interval_minutes: u32,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/tenants/{tenant}/imports/csv", post(import_csv))
        .route("/api/v1/tenants/{tenant}/sync", post(trigger_sync))
        .route("/api/v1/tenants/{tenant}/integration", get(show_integration).put(connect))
        .route("/api/v1/tenants/{tenant}/segments", get(segments))
        .route("/api/v1/tenants/{tenant}/customers", get(list_customers))
        .route("/api/v1/tenants/{tenant}/customers/delete", post(delete_customers))
        .route("/api/v1/tenants/{tenant}/campaigns", get(list_campaigns).post(create_campaign))
        .route("/api/v1/tenants/{tenant}/campaigns/preview", post(preview_campaign))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: Option<String>,
    pub correlation_id: String,
}

impl<E: Into<ApplicationError>> From<E> for ApiError {
    fn from(error: E) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        let mapped = error.into().into_interface(correlation_id);
        warn!(
            event_name = "api.request.failed",
            correlation_id = %mapped.correlation_id(),
            error = %mapped,
            "request failed"
        );
        Self(mapped)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            InterfaceError::BadRequest { message, .. } => (StatusCode::BAD_REQUEST, Some(message.clone())),
            InterfaceError::NotFound { message, .. } => (StatusCode::NOT_FOUND, Some(message.clone())),
            InterfaceError::ServiceUnavailable { message, .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, Some(message.clone()))
            }
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        let body = ErrorBody {
            error: self.0.user_message().to_string(),
            detail,
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn invalid_input(message: impl Into<String>) -> ApplicationError {
    ApplicationError::Domain(DomainError::InvalidInput(message.into()))
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

/// Credential and domain problems are the caller's to fix; everything else
/// is the remote side or our store.
fn connect_failure(error: DelMatchError) -> ApplicationError {
    match error {
        DelMatchError::InvalidDomain(message) | DelMatchError::NotConfigured(message) => {
            invalid_input(message)
        }
        DelMatchError::Unauthorized(message) => {
            invalid_input(format!("Del Match rejected the credentials: {message}"))
        }
        DelMatchError::Store(store_error) => store_error.into(),
        other => ApplicationError::Integration(other.to_string()),
    }
}

async fn scored_customers(
    state: &ApiState,
    tenant: &TenantId,
    now: DateTime<Utc>,
) -> ApiResult<Vec<ScoredCustomer>> {
    let customers = state.customers.list_customers(tenant).await?;
    Ok(score_cohort(customers, now).1)
}

async fn import_csv(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    body: Bytes,
) -> ApiResult<Json<IngestionReport>> {
    let tenant = TenantId(tenant);
    let report = state.pipeline.import_csv(&tenant, &body, Utc::now()).await?;
    info!(
        event_name = "api.import.completed",
        correlation_id = %report.run_id,
        tenant_id = %tenant.0,
        bytes = body.len(),
        "csv import finished"
    );
    Ok(Json(report))
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncQuery {
    pub mode: Option<SyncMode>,
}

async fn trigger_sync(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    Query(query): Query<SyncQuery>,
) -> ApiResult<Json<IngestionReport>> {
    let tenant = TenantId(tenant);
    let integration = state
        .integrations
        .find_integration(&tenant)
        .await?
        .ok_or_else(|| ApplicationError::NotFound(format!("no integration for tenant `{}`", tenant.0)))?;

    let mode = query.mode.unwrap_or(SyncMode::Incremental);
    let report = sync_integration(&state.pipeline, &state.tokens, integration, mode, Utc::now()).await?;
    Ok(Json(report))
}

/// Integration as shown to operators; credentials never leave the server.
#[derive(Debug, Serialize, Deserialize)]
pub struct IntegrationView {
    pub tenant_id: String,
    pub api_base_url: String,
    pub email: String,
    pub historical_orders_url: Option<String>,
    pub sync_enabled: bool,
    pub sync_interval_minutes: u32,
    pub last_order_reference: Option<u64>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub connected: bool,
}

impl From<Integration> for IntegrationView {
    fn from(integration: Integration) -> Self {
        Self {
            tenant_id: integration.tenant_id.0,
            api_base_url: integration.api_base_url,
            email: integration.email,
            historical_orders_url: integration.historical_orders_url,
            sync_enabled: integration.sync_enabled,
            sync_interval_minutes: integration.sync_interval_minutes,
            last_order_reference: integration.last_order_reference,
            last_sync_at: integration.last_sync_at,
            token_expires_at: integration.expires_at,
            connected: integration.token.is_some(),
        }
    }
}

async fn show_integration(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
) -> ApiResult<Json<IntegrationView>> {
    let tenant = TenantId(tenant);
    let integration = state
        .integrations
        .find_integration(&tenant)
        .await?
        .ok_or_else(|| ApplicationError::NotFound(format!("no integration for tenant `{}`", tenant.0)))?;
    Ok(Json(integration.into()))
}

#[derive(Debug, Deserialize)]
pub struct ConnectBody {
    pub api_base_url: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub historical_orders_url: Option<String>,
}

async fn connect(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    Json(body): Json<ConnectBody>,
) -> ApiResult<Json<IntegrationView>> {
    let request = ConnectRequest {
        tenant: TenantId(tenant),
        api_base_url: body.api_base_url,
        email: body.email,
        password: SecretString::from(body.password),
        historical_orders_url: body.historical_orders_url.filter(|url| !url.trim().is_empty()),
        sync_interval_minutes: Some(state.sync_interval_minutes),
    };
    let integration = connect_integration(
        state.tokens.client(),
        state.integrations.as_ref(),
        request,
        Utc::now(),
    )
    .await
    .map_err(connect_failure)?;
    Ok(Json(integration.into()))
}

async fn segments(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
) -> ApiResult<Json<DashboardMetrics>> {
    let tenant = TenantId(tenant);
    let now = Utc::now();
    let customers = state.customers.list_customers(&tenant).await?;
    let order_dates = state.customers.list_order_dates(&tenant).await?;
    let (baseline, scored) = score_cohort(customers, now);
    Ok(Json(dashboard_metrics(&scored, &baseline, &order_dates, now)))
}

#[derive(Debug, Default, Deserialize)]
pub struct CustomerQuery {
    pub search: Option<String>,
    pub segment: Option<String>,
}

async fn list_customers(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    Query(query): Query<CustomerQuery>,
) -> ApiResult<Json<Vec<ScoredCustomer>>> {
    let segment = query
        .segment
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| raw.parse::<Segment>().map_err(invalid_input))
        .transpose()?;
    let filter = CustomerFilter { search: query.search, segment };

    let scored = scored_customers(&state, &TenantId(tenant), Utc::now()).await?;
    Ok(Json(filter.apply(&scored).into_iter().cloned().collect()))
}

#[derive(Debug, Deserialize)]
pub struct DeleteBody {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: usize,
}

async fn delete_customers(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    Json(body): Json<DeleteBody>,
) -> ApiResult<Json<DeleteResponse>> {
    if body.ids.is_empty() {
        return Err(invalid_input("no customers selected").into());
    }
    let tenant = TenantId(tenant);
    let ids: Vec<CustomerId> = body.ids.into_iter().map(CustomerId).collect();
    let deleted = state.customers.delete_customers(&tenant, &ids).await?;

    let now = Utc::now();
    for id in &ids {
        let entry = OperationLogEntry::new(
            tenant.clone(),
            OperationKind::DeleteCustomer,
            "customer",
            Some(id.0.clone()),
            now,
        );
        state.customers.record_operation(&entry).await?;
    }
    Ok(Json(DeleteResponse { deleted }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CampaignBody {
    pub template_name: String,
    pub message: String,
    pub segment: Option<String>,
    /// Local notation, e.g. `150,00`.
    pub min_total_spent: Option<String>,
    /// `dd/mm/yyyy`.
    pub last_order_date: Option<String>,
    pub customer_id: Option<String>,
    /// Absent means send now.
    pub scheduled_at: Option<DateTime<Utc>>,
}

async fn plan(state: &ApiState, tenant: &TenantId, body: CampaignBody) -> ApiResult<CampaignPlan> {
    let criteria = CampaignCriteria::parse(
        body.segment.as_deref(),
        body.min_total_spent.as_deref(),
        body.last_order_date.as_deref(),
        body.customer_id.as_deref(),
    )?;
    let draft = CampaignDraft {
        template_name: body.template_name,
        message: body.message,
        criteria,
        send_mode: body.scheduled_at.map_or(SendMode::Now, SendMode::Scheduled),
    };
    let now = Utc::now();
    let scored = scored_customers(state, tenant, now).await?;
    Ok(plan_campaign(tenant, draft, &scored, now)?)
}

async fn preview_campaign(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    Json(body): Json<CampaignBody>,
) -> ApiResult<Json<CampaignPlan>> {
    Ok(Json(plan(&state, &TenantId(tenant), body).await?))
}

async fn create_campaign(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    Json(body): Json<CampaignBody>,
) -> ApiResult<(StatusCode, Json<CampaignPlan>)> {
    let tenant = TenantId(tenant);
    let plan = plan(&state, &tenant, body).await?;
    state.campaigns.save_campaign(&plan).await.map_err(persistence)?;

    let entry = OperationLogEntry::new(
        tenant,
        OperationKind::CreateCampaign,
        "whatsapp_campaign",
        Some(plan.id.clone()),
        plan.created_at,
    )
    .with_detail("recipients", plan.recipients.len().to_string())
    .with_detail("status", plan.status.as_str());
    state.customers.record_operation(&entry).await?;

    info!(
        event_name = "api.campaign.created",
        campaign_id = %plan.id,
        tenant_id = %plan.tenant_id.0,
        recipients = plan.recipients.len(),
        status = plan.status.as_str(),
        "campaign stored"
    );
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn list_campaigns(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
) -> ApiResult<Json<Vec<CampaignPlan>>> {
    let campaigns = state.campaigns.list_campaigns(&TenantId(tenant)).await.map_err(persistence)?;
    Ok(Json(campaigns))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header::CONTENT_TYPE, Request, StatusCode},
        Router,
    };
    use chrono::{Duration, Utc};
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use guru_core::audit::OperationKind;
    use guru_core::campaign::{CampaignPlan, CampaignStatus};
    use guru_core::config::{DelMatchConfig, UrlScheme};
    use guru_core::dashboard::DashboardMetrics;
    use guru_core::ingest::{IngestSettings, IngestionPipeline, IngestionReport};
    use guru_core::segments::ScoredCustomer;
    use guru_db::{InMemoryCampaignRepository, InMemoryCustomerStore, InMemoryIntegrationStore};
    use guru_delmatch::{DelMatchClient, TokenProvider};

    use super::{router, ApiState, DeleteResponse, ErrorBody};

    struct Harness {
        app: Router,
        customers: Arc<InMemoryCustomerStore>,
    }

    fn harness() -> Harness {
        let customers = Arc::new(InMemoryCustomerStore::default());
        let integrations = Arc::new(InMemoryIntegrationStore::default());
        let client =
            DelMatchClient::new(&DelMatchConfig { request_timeout_secs: 5, scheme: UrlScheme::Http })
                .expect("client");
        let state = ApiState {
            customers: customers.clone(),
            integrations: integrations.clone(),
            campaigns: Arc::new(InMemoryCampaignRepository::default()),
            pipeline: Arc::new(IngestionPipeline::new(
                customers.clone(),
                integrations.clone(),
                IngestSettings::default(),
            )),
            tokens: TokenProvider::new(client, integrations),
            sync_interval_minutes: 45,
        };
        Harness { app: router(state), customers }
    }

    fn csv() -> String {
        let recent = (Utc::now() - Duration::days(3)).format("%d/%m/%Y");
        let older = (Utc::now() - Duration::days(20)).format("%d/%m/%Y");
        format!(
            "nome;celular;logradouro;logradouro_numero;complemento;bairro;cidade;total;total_pontos;cliente_desde;ticket_medio;ultimo_pedido\n\
             Ana Souza;(11) 98765-4321;Rua A;10;;Centro;Campinas;12;0;10/01/2024;60,00;{recent}\n\
             Bruno Lima;(21) 99876-5432;Rua B;20;;Lapa;Rio de Janeiro;2;0;15/02/2024;35,00;{older}\n"
        )
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body bytes");
        (status, body.to_vec())
    }

    fn parse<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).expect("json body")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).expect("request")
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn import(app: &Router) -> IngestionReport {
        let request = Request::post("/api/v1/tenants/pizzaria/imports/csv")
            .header(CONTENT_TYPE, "text/csv")
            .body(Body::from(csv()))
            .expect("request");
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        parse(&body)
    }

    #[tokio::test]
    async fn csv_import_feeds_segments_and_customer_listing() {
        let h = harness();
        let report = import(&h.app).await;
        assert_eq!(report.customers_created, 2);
        assert_eq!(report.orders_created, 14);

        let (status, body) = send(&h.app, get("/api/v1/tenants/pizzaria/segments")).await;
        assert_eq!(status, StatusCode::OK);
        let metrics: DashboardMetrics = parse(&body);
        assert_eq!(metrics.total_customers, 2);

        let (status, body) = send(&h.app, get("/api/v1/tenants/pizzaria/customers?search=ana")).await;
        assert_eq!(status, StatusCode::OK);
        let listed: Vec<ScoredCustomer> = parse(&body);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].customer.name, "Ana Souza");

        let (status, body) = send(&h.app, get("/api/v1/tenants/outra-loja/customers")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(parse::<Vec<ScoredCustomer>>(&body).is_empty());
    }

    #[tokio::test]
    async fn csv_without_required_columns_is_a_bad_request() {
        let h = harness();
        let request = Request::post("/api/v1/tenants/pizzaria/imports/csv")
            .body(Body::from("nome;celular\nAna;11987654321\n"))
            .expect("request");

        let (status, body) = send(&h.app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorBody = parse(&body);
        assert!(error.detail.as_deref().is_some_and(|detail| detail.contains("total")));
        assert!(!error.correlation_id.is_empty());
    }

    #[tokio::test]
    async fn unknown_segment_filter_is_rejected() {
        let h = harness();
        let (status, _) = send(&h.app, get("/api/v1/tenants/pizzaria/customers?segment=ouro")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sync_and_integration_lookup_need_a_connection() {
        let h = harness();

        let (status, _) =
            send(&h.app, post_json("/api/v1/tenants/pizzaria/sync?mode=historical", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&h.app, get("/api/v1/tenants/pizzaria/integration")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn connecting_to_a_foreign_domain_is_rejected_before_any_request() {
        let h = harness();
        let request = Request::put("/api/v1/tenants/pizzaria/integration")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "api_base_url": "https://pizzaria.example.com",
                    "email": "dono@pizzaria.com",
                    "password": "s3nha"
                })
                .to_string(),
            ))
            .expect("request");

        let (status, body) = send(&h.app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorBody = parse(&body);
        assert!(error.detail.is_some());
    }

    #[tokio::test]
    async fn campaign_preview_then_create_records_the_operation() {
        let h = harness();
        import(&h.app).await;
        let campaign = json!({
            "template_name": "volte_sempre",
            "message": "Temos novidades no cardapio!",
            "min_total_spent": "500,00"
        });

        let (status, body) =
            send(&h.app, post_json("/api/v1/tenants/pizzaria/campaigns/preview", campaign.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let preview: CampaignPlan = parse(&body);
        assert_eq!(preview.recipients.len(), 1);
        assert_eq!(preview.status, CampaignStatus::Sending);

        let (status, body) =
            send(&h.app, post_json("/api/v1/tenants/pizzaria/campaigns", campaign)).await;
        assert_eq!(status, StatusCode::CREATED);
        let created: CampaignPlan = parse(&body);

        let (status, body) = send(&h.app, get("/api/v1/tenants/pizzaria/campaigns")).await;
        assert_eq!(status, StatusCode::OK);
        let listed: Vec<CampaignPlan> = parse(&body);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);

        let operations = h.customers.operations().await;
        assert!(operations.iter().any(|entry| entry.operation == OperationKind::CreateCampaign
            && entry.entity_id.as_deref() == Some(created.id.as_str())));
    }

    #[tokio::test]
    async fn campaign_without_recipients_is_a_bad_request() {
        let h = harness();
        let (status, _) = send(
            &h.app,
            post_json(
                "/api/v1/tenants/pizzaria/campaigns/preview",
                json!({ "template_name": "volte_sempre", "message": "Oi!" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deleting_customers_logs_each_id() {
        let h = harness();
        import(&h.app).await;
        let (_, body) = send(&h.app, get("/api/v1/tenants/pizzaria/customers?search=bruno")).await;
        let bruno: Vec<ScoredCustomer> = parse(&body);
        let id = bruno[0].customer.id.0.clone();

        let (status, body) = send(
            &h.app,
            post_json("/api/v1/tenants/pizzaria/customers/delete", json!({ "ids": [id] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse::<DeleteResponse>(&body).deleted, 1);

        let (_, body) = send(&h.app, get("/api/v1/tenants/pizzaria/customers")).await;
        assert_eq!(parse::<Vec<ScoredCustomer>>(&body).len(), 1);

        let operations = h.customers.operations().await;
        assert_eq!(
            operations.iter().filter(|entry| entry.operation == OperationKind::DeleteCustomer).count(),
            1
        );

        let (status, _) = send(
            &h.app,
            post_json("/api/v1/tenants/pizzaria/customers/delete", json!({ "ids": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
