use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::sqlite::SqliteRow;

use guru_core::domain::customer::TenantId;
use guru_core::domain::integration::Integration;
use guru_core::store::{IntegrationStore, StoreError};

use super::{column, parse_timestamp, RepositoryError};
use crate::DbPool;

const INTEGRATION_COLUMNS: &str = "tenant_id, api_base_url, email, password, token, expires_at,
     last_order_reference, historical_orders_url, sync_enabled, sync_interval_minutes,
     last_sync_at, created_at, updated_at";

pub struct SqlIntegrationRepository {
    pool: DbPool,
}

impl SqlIntegrationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn update_one<'q>(
        &self,
        tenant: &TenantId,
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    ) -> Result<(), StoreError> {
        let affected =
            query.execute(&self.pool).await.map_err(RepositoryError::from)?.rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound(format!("no integration for tenant `{}`", tenant.0)));
        }
        Ok(())
    }
}

fn optional_timestamp(field: &str, raw: Option<String>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.as_deref().map(|value| parse_timestamp(field, value)).transpose()
}

fn row_to_integration(row: &SqliteRow) -> Result<Integration, RepositoryError> {
    let password: String = column(row, "password")?;
    let token: Option<String> = column(row, "token")?;
    let last_order_reference: Option<i64> = column(row, "last_order_reference")?;
    let interval: i64 = column(row, "sync_interval_minutes")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(Integration {
        tenant_id: TenantId(column(row, "tenant_id")?),
        api_base_url: column(row, "api_base_url")?,
        email: column(row, "email")?,
        password: SecretString::from(password),
        token: token.map(SecretString::from),
        expires_at: optional_timestamp("expires_at", column(row, "expires_at")?)?,
        last_order_reference: last_order_reference
            .map(|value| {
                u64::try_from(value).map_err(|_| {
                    RepositoryError::Decode(format!("last_order_reference `{value}` is negative"))
                })
            })
            .transpose()?,
        historical_orders_url: column(row, "historical_orders_url")?,
        sync_enabled: column(row, "sync_enabled")?,
        sync_interval_minutes: u32::try_from(interval).map_err(|_| {
            RepositoryError::Decode(format!("sync_interval_minutes `{interval}` out of range"))
        })?,
        last_sync_at: optional_timestamp("last_sync_at", column(row, "last_sync_at")?)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn reference_as_i64(reference: u64) -> Result<i64, StoreError> {
    i64::try_from(reference)
        .map_err(|_| StoreError::Corrupt(format!("order reference {reference} exceeds storage range")))
}

#[async_trait]
impl IntegrationStore for SqlIntegrationRepository {
    async fn find_integration(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<Integration>, StoreError> {
        let sql = format!("SELECT {INTEGRATION_COLUMNS} FROM api_integrations WHERE tenant_id = ?");
        let row = sqlx::query(&sql)
            .bind(&tenant.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(row.as_ref().map(row_to_integration).transpose()?)
    }

    async fn save_integration(&self, integration: &Integration) -> Result<(), StoreError> {
        let last_order_reference =
            integration.last_order_reference.map(reference_as_i64).transpose()?;

        sqlx::query(
            "INSERT INTO api_integrations (tenant_id, api_base_url, email, password, token, expires_at,
                                           last_order_reference, historical_orders_url, sync_enabled,
                                           sync_interval_minutes, last_sync_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id) DO UPDATE SET
                 api_base_url = excluded.api_base_url,
                 email = excluded.email,
                 password = excluded.password,
                 token = excluded.token,
                 expires_at = excluded.expires_at,
                 last_order_reference = excluded.last_order_reference,
                 historical_orders_url = excluded.historical_orders_url,
                 sync_enabled = excluded.sync_enabled,
                 sync_interval_minutes = excluded.sync_interval_minutes,
                 last_sync_at = excluded.last_sync_at,
                 updated_at = excluded.updated_at",
        )
        .bind(&integration.tenant_id.0)
        .bind(&integration.api_base_url)
        .bind(&integration.email)
        .bind(integration.password.expose_secret())
        .bind(integration.token.as_ref().map(|token| token.expose_secret().to_string()))
        .bind(integration.expires_at.map(|at| at.to_rfc3339()))
        .bind(last_order_reference)
        .bind(&integration.historical_orders_url)
        .bind(integration.sync_enabled)
        .bind(i64::from(integration.sync_interval_minutes))
        .bind(integration.last_sync_at.map(|at| at.to_rfc3339()))
        .bind(integration.created_at.to_rfc3339())
        .bind(integration.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn list_integrations(&self) -> Result<Vec<Integration>, StoreError> {
        let sql = format!("SELECT {INTEGRATION_COLUMNS} FROM api_integrations ORDER BY tenant_id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(RepositoryError::from)?;
        Ok(rows.iter().map(row_to_integration).collect::<Result<Vec<_>, _>>()?)
    }

    async fn save_token(
        &self,
        tenant: &TenantId,
        token: &SecretString,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let query = sqlx::query(
            "UPDATE api_integrations SET token = ?, expires_at = ?, updated_at = ? WHERE tenant_id = ?",
        )
        .bind(token.expose_secret().to_string())
        .bind(expires_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(&tenant.0);
        self.update_one(tenant, query).await
    }

    async fn load_high_water_mark(&self, tenant: &TenantId) -> Result<Option<u64>, StoreError> {
        let value: Option<Option<i64>> = sqlx::query_scalar(
            "SELECT last_order_reference FROM api_integrations WHERE tenant_id = ?",
        )
        .bind(&tenant.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        value
            .flatten()
            .map(|raw| {
                u64::try_from(raw).map_err(|_| {
                    StoreError::Corrupt(format!("last_order_reference `{raw}` is negative"))
                })
            })
            .transpose()
    }

    async fn save_high_water_mark(
        &self,
        tenant: &TenantId,
        reference: u64,
    ) -> Result<(), StoreError> {
        let query = sqlx::query(
            "UPDATE api_integrations SET last_order_reference = ?, updated_at = ? WHERE tenant_id = ?",
        )
        .bind(reference_as_i64(reference)?)
        .bind(Utc::now().to_rfc3339())
        .bind(&tenant.0);
        self.update_one(tenant, query).await
    }

    async fn mark_synced(&self, tenant: &TenantId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let query = sqlx::query(
            "UPDATE api_integrations SET last_sync_at = ?, updated_at = ? WHERE tenant_id = ?",
        )
        .bind(at.to_rfc3339())
        .bind(at.to_rfc3339())
        .bind(&tenant.0);
        self.update_one(tenant, query).await
    }
}
