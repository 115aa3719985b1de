use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use thiserror::Error;

use guru_core::campaign::CampaignPlan;
use guru_core::domain::customer::TenantId;
use guru_core::store::StoreError;

pub mod campaign;
pub mod customer;
pub mod integration;
pub mod memory;

pub use campaign::SqlCampaignRepository;
pub use customer::SqlCustomerStore;
pub use integration::SqlIntegrationRepository;
pub use memory::{InMemoryCampaignRepository, InMemoryCustomerStore, InMemoryIntegrationStore};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => Self::Unavailable(error.to_string()),
            RepositoryError::Decode(message) => Self::Corrupt(message),
        }
    }
}

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Stores the campaign and a `pending` delivery log per recipient.
    async fn save_campaign(&self, plan: &CampaignPlan) -> Result<(), RepositoryError>;

    async fn find_campaign(&self, id: &str) -> Result<Option<CampaignPlan>, RepositoryError>;

    /// Newest first.
    async fn list_campaigns(&self, tenant: &TenantId)
        -> Result<Vec<CampaignPlan>, RepositoryError>;
}

pub(crate) fn column<'r, T>(row: &'r sqlx::sqlite::SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(e.to_string()))
}

pub(crate) fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(raw)
        .map_err(|e| RepositoryError::Decode(format!("{field} `{raw}` is not a decimal: {e}")))
}

pub(crate) fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| RepositoryError::Decode(format!("{field} `{raw}` is not a date: {e}")))
}

pub(crate) fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{field} `{raw}` is not a timestamp: {e}")))
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
