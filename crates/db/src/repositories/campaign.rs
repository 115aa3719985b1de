use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;

use guru_core::campaign::{CampaignCriteria, CampaignPlan, CampaignStatus};
use guru_core::domain::customer::{CustomerId, TenantId};

use super::{column, parse_timestamp, CampaignRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCampaignRepository {
    pool: DbPool,
}

impl SqlCampaignRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Delivery status per recipient, in insertion order.
    pub async fn recipient_statuses(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<(CustomerId, String)>, RepositoryError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT customer_id, status FROM whatsapp_campaign_logs WHERE campaign_id = ? ORDER BY id",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id, status)| (CustomerId(id), status)).collect())
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<CampaignPlan, RepositoryError> {
        let id: String = column(row, "id")?;
        let params: String = column(row, "template_params")?;
        let criteria: String = column(row, "criteria")?;
        let status: String = column(row, "status")?;
        let scheduled_at: String = column(row, "scheduled_at")?;
        let created_at: String = column(row, "created_at")?;

        let params: serde_json::Value = serde_json::from_str(&params)
            .map_err(|e| RepositoryError::Decode(format!("template_params: {e}")))?;
        let recipients = self
            .recipient_statuses(&id)
            .await?
            .into_iter()
            .map(|(customer_id, _)| customer_id)
            .collect();

        Ok(CampaignPlan {
            tenant_id: TenantId(column(row, "tenant_id")?),
            name: column(row, "name")?,
            template_name: column(row, "template_name")?,
            message: params.get("message").and_then(|value| value.as_str()).unwrap_or_default().to_string(),
            criteria: serde_json::from_str::<CampaignCriteria>(&criteria)
                .map_err(|e| RepositoryError::Decode(format!("criteria: {e}")))?,
            scheduled_at: parse_timestamp("scheduled_at", &scheduled_at)?,
            status: CampaignStatus::parse(&status)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown campaign status `{status}`")))?,
            recipients,
            created_at: parse_timestamp("created_at", &created_at)?,
            id,
        })
    }
}

#[async_trait]
impl CampaignRepository for SqlCampaignRepository {
    async fn save_campaign(&self, plan: &CampaignPlan) -> Result<(), RepositoryError> {
        let criteria = serde_json::to_string(&plan.criteria)
            .map_err(|e| RepositoryError::Decode(format!("criteria: {e}")))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO whatsapp_campaigns (id, tenant_id, name, template_name, template_params,
                                             criteria, scheduled_at, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&plan.id)
        .bind(&plan.tenant_id.0)
        .bind(&plan.name)
        .bind(&plan.template_name)
        .bind(plan.template_params().to_string())
        .bind(criteria)
        .bind(plan.scheduled_at.to_rfc3339())
        .bind(plan.status.as_str())
        .bind(plan.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for customer_id in &plan.recipients {
            sqlx::query(
                "INSERT INTO whatsapp_campaign_logs (campaign_id, customer_id, status) VALUES (?, ?, 'pending')",
            )
            .bind(&plan.id)
            .bind(&customer_id.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_campaign(&self, id: &str) -> Result<Option<CampaignPlan>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, template_name, template_params, criteria, scheduled_at,
                    status, created_at
             FROM whatsapp_campaigns WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_campaigns(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<CampaignPlan>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, template_name, template_params, criteria, scheduled_at,
                    status, created_at
             FROM whatsapp_campaigns WHERE tenant_id = ? ORDER BY created_at DESC",
        )
        .bind(&tenant.0)
        .fetch_all(&self.pool)
        .await?;

        let mut campaigns = Vec::with_capacity(rows.len());
        for row in &rows {
            campaigns.push(self.hydrate(row).await?);
        }
        Ok(campaigns)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use guru_core::campaign::{CampaignCriteria, CampaignPlan, CampaignStatus};
    use guru_core::domain::customer::{Customer, CustomerId, OriginSystem, Phone, TenantId};
    use guru_core::rfm::Segment;
    use guru_core::store::CustomerStore;

    use super::SqlCampaignRepository;
    use crate::repositories::{CampaignRepository, SqlCustomerStore};
    use crate::{connect_with_settings, migrations};

    fn tenant() -> TenantId {
        TenantId("tenant-a".to_string())
    }

    fn customer(id: &str, phone: &str) -> Customer {
        Customer {
            id: CustomerId(id.to_string()),
            tenant_id: tenant(),
            name: format!("Cliente {id}"),
            phone: Phone::from_stored(phone),
            email: None,
            address: None,
            neighborhood: None,
            city: None,
            created_at: NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"),
            last_order_date: NaiveDate::from_ymd_opt(2024, 4, 26),
            total_orders: 2,
            total_spent: Decimal::from(120),
            origin_system: OriginSystem::ExternalApi,
            updated_at: Utc::now(),
        }
    }

    fn plan() -> CampaignPlan {
        let now = Utc.with_ymd_and_hms(2024, 5, 31, 15, 0, 0).single().expect("timestamp");
        CampaignPlan {
            id: "CMP-1".to_string(),
            tenant_id: tenant(),
            name: "Campanha Em risco - 31/05/2024".to_string(),
            template_name: "volte_sempre".to_string(),
            message: "Sentimos sua falta!".to_string(),
            criteria: CampaignCriteria { segment: Some(Segment::AtRisk), ..CampaignCriteria::default() },
            scheduled_at: now,
            status: CampaignStatus::Sending,
            recipients: vec![CustomerId("C-1".to_string()), CustomerId("C-2".to_string())],
            created_at: now,
        }
    }

    #[tokio::test]
    async fn campaign_is_stored_with_pending_recipients() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let customers = SqlCustomerStore::new(pool.clone());
        customers.upsert_customer(&customer("C-1", "11900000001")).await.expect("customer 1");
        customers.upsert_customer(&customer("C-2", "11900000002")).await.expect("customer 2");

        let repo = SqlCampaignRepository::new(pool);
        repo.save_campaign(&plan()).await.expect("save");

        let found = repo.find_campaign("CMP-1").await.expect("find").expect("should exist");
        assert_eq!(found, plan());

        let statuses = repo.recipient_statuses("CMP-1").await.expect("statuses");
        assert!(statuses.iter().all(|(_, status)| status == "pending"));
        assert_eq!(repo.list_campaigns(&tenant()).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn campaign_for_unknown_customer_is_rejected() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlCampaignRepository::new(pool);

        assert!(repo.save_campaign(&plan()).await.is_err());
        assert!(repo.find_campaign("CMP-1").await.expect("find").is_none());
    }
}
