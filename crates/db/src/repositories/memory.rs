use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tokio::sync::RwLock;

use guru_core::audit::OperationLogEntry;
use guru_core::campaign::CampaignPlan;
use guru_core::domain::customer::{Customer, CustomerId, Phone, TenantId};
use guru_core::domain::integration::Integration;
use guru_core::domain::order::{Order, OrderId, OrderReference};
use guru_core::store::{CustomerStore, IntegrationStore, OrderInsert, StoreError};

use super::{CampaignRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryCustomerStore {
    customers: RwLock<HashMap<String, Customer>>,
    orders: RwLock<Vec<Order>>,
    operations: RwLock<Vec<OperationLogEntry>>,
}

impl InMemoryCustomerStore {
    pub async fn operations(&self) -> Vec<OperationLogEntry> {
        self.operations.read().await.clone()
    }

    pub async fn orders(&self, tenant: &TenantId) -> Vec<Order> {
        self.orders.read().await.iter().filter(|order| &order.tenant_id == tenant).cloned().collect()
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn find_customer_by_phone(
        &self,
        tenant: &TenantId,
        phone: &Phone,
    ) -> Result<Option<Customer>, StoreError> {
        let customers = self.customers.read().await;
        Ok(customers
            .values()
            .find(|customer| &customer.tenant_id == tenant && &customer.phone == phone)
            .cloned())
    }

    async fn find_customer(
        &self,
        tenant: &TenantId,
        id: &CustomerId,
    ) -> Result<Option<Customer>, StoreError> {
        let customers = self.customers.read().await;
        Ok(customers.get(&id.0).filter(|customer| &customer.tenant_id == tenant).cloned())
    }

    async fn upsert_customer(&self, customer: &Customer) -> Result<(), StoreError> {
        let mut customers = self.customers.write().await;
        customers.insert(customer.id.0.clone(), customer.clone());
        Ok(())
    }

    async fn find_order_by_reference(
        &self,
        tenant: &TenantId,
        reference: &OrderReference,
    ) -> Result<Option<OrderId>, StoreError> {
        let orders = self.orders.read().await;
        Ok(orders
            .iter()
            .find(|order| &order.tenant_id == tenant && &order.reference == reference)
            .map(|order| order.id.clone()))
    }

    async fn insert_order(&self, order: &Order) -> Result<OrderInsert, StoreError> {
        let mut orders = self.orders.write().await;
        if orders
            .iter()
            .any(|stored| stored.tenant_id == order.tenant_id && stored.reference == order.reference)
        {
            return Ok(OrderInsert::DuplicateReference);
        }
        orders.push(order.clone());
        Ok(OrderInsert::Inserted)
    }

    async fn list_customers(&self, tenant: &TenantId) -> Result<Vec<Customer>, StoreError> {
        let customers = self.customers.read().await;
        let mut listed: Vec<Customer> =
            customers.values().filter(|customer| &customer.tenant_id == tenant).cloned().collect();
        listed.sort_by(|left, right| {
            left.name.to_lowercase().cmp(&right.name.to_lowercase()).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(listed)
    }

    async fn list_order_dates(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<(CustomerId, DateTime<Utc>)>, StoreError> {
        let orders = self.orders.read().await;
        let mut dates: Vec<(CustomerId, DateTime<Utc>)> = orders
            .iter()
            .filter(|order| &order.tenant_id == tenant)
            .map(|order| (order.customer_id.clone(), order.order_date))
            .collect();
        dates.sort_by(|left, right| left.0 .0.cmp(&right.0 .0).then(left.1.cmp(&right.1)));
        Ok(dates)
    }

    async fn delete_customers(
        &self,
        tenant: &TenantId,
        ids: &[CustomerId],
    ) -> Result<usize, StoreError> {
        let mut customers = self.customers.write().await;
        let mut deleted = Vec::new();
        for id in ids {
            if customers.get(&id.0).is_some_and(|customer| &customer.tenant_id == tenant) {
                customers.remove(&id.0);
                deleted.push(id.clone());
            }
        }
        self.orders.write().await.retain(|order| !deleted.contains(&order.customer_id));
        Ok(deleted.len())
    }

    async fn record_operation(&self, entry: &OperationLogEntry) -> Result<(), StoreError> {
        self.operations.write().await.push(entry.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryIntegrationStore {
    integrations: RwLock<HashMap<TenantId, Integration>>,
}

impl InMemoryIntegrationStore {
    async fn update(
        &self,
        tenant: &TenantId,
        apply: impl FnOnce(&mut Integration) + Send,
    ) -> Result<(), StoreError> {
        let mut integrations = self.integrations.write().await;
        let integration = integrations
            .get_mut(tenant)
            .ok_or_else(|| StoreError::NotFound(format!("no integration for tenant `{}`", tenant.0)))?;
        apply(integration);
        Ok(())
    }
}

#[async_trait]
impl IntegrationStore for InMemoryIntegrationStore {
    async fn find_integration(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<Integration>, StoreError> {
        Ok(self.integrations.read().await.get(tenant).cloned())
    }

    async fn save_integration(&self, integration: &Integration) -> Result<(), StoreError> {
        self.integrations.write().await.insert(integration.tenant_id.clone(), integration.clone());
        Ok(())
    }

    async fn list_integrations(&self) -> Result<Vec<Integration>, StoreError> {
        let mut listed: Vec<Integration> = self.integrations.read().await.values().cloned().collect();
        listed.sort_by(|left, right| left.tenant_id.cmp(&right.tenant_id));
        Ok(listed)
    }

    async fn save_token(
        &self,
        tenant: &TenantId,
        token: &SecretString,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let token = token.clone();
        self.update(tenant, move |integration| {
            integration.token = Some(token);
            integration.expires_at = Some(expires_at);
        })
        .await
    }

    async fn load_high_water_mark(&self, tenant: &TenantId) -> Result<Option<u64>, StoreError> {
        Ok(self.integrations.read().await.get(tenant).and_then(|i| i.last_order_reference))
    }

    async fn save_high_water_mark(
        &self,
        tenant: &TenantId,
        reference: u64,
    ) -> Result<(), StoreError> {
        self.update(tenant, move |integration| integration.last_order_reference = Some(reference))
            .await
    }

    async fn mark_synced(&self, tenant: &TenantId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(tenant, move |integration| integration.last_sync_at = Some(at)).await
    }
}

#[derive(Default)]
pub struct InMemoryCampaignRepository {
    campaigns: RwLock<Vec<CampaignPlan>>,
}

#[async_trait]
impl CampaignRepository for InMemoryCampaignRepository {
    async fn save_campaign(&self, plan: &CampaignPlan) -> Result<(), RepositoryError> {
        let mut campaigns = self.campaigns.write().await;
        campaigns.retain(|stored| stored.id != plan.id);
        campaigns.push(plan.clone());
        Ok(())
    }

    async fn find_campaign(&self, id: &str) -> Result<Option<CampaignPlan>, RepositoryError> {
        Ok(self.campaigns.read().await.iter().find(|plan| plan.id == id).cloned())
    }

    async fn list_campaigns(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<CampaignPlan>, RepositoryError> {
        let mut listed: Vec<CampaignPlan> = self
            .campaigns
            .read()
            .await
            .iter()
            .filter(|plan| &plan.tenant_id == tenant)
            .cloned()
            .collect();
        listed.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use secrecy::SecretString;

    use guru_core::domain::customer::TenantId;
    use guru_core::domain::integration::Integration;
    use guru_core::store::{IntegrationStore, StoreError};

    use super::InMemoryIntegrationStore;

    #[tokio::test]
    async fn in_memory_integration_tracks_token_and_mark() {
        let store = InMemoryIntegrationStore::default();
        let tenant = TenantId("tenant-a".to_string());
        assert!(matches!(
            store.save_high_water_mark(&tenant, 5).await,
            Err(StoreError::NotFound(_))
        ));

        let now = Utc::now();
        store
            .save_integration(&Integration::new(
                tenant.clone(),
                "loja.delmatchcardapio.com",
                "a@b.com",
                SecretString::from("pw".to_string()),
                now,
            ))
            .await
            .expect("save");
        store
            .save_token(&tenant, &SecretString::from("tok".to_string()), now + Duration::hours(2))
            .await
            .expect("token");
        store.save_high_water_mark(&tenant, 77).await.expect("mark");

        let found = store.find_integration(&tenant).await.expect("find").expect("exists");
        assert!(!found.token_expired(now));
        assert_eq!(store.load_high_water_mark(&tenant).await.expect("load"), Some(77));
    }
}
