//! Persistence seams the ingestion pipeline, segmentation and sync depend on.
//!
//! `guru-db` provides the SQLite and in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use thiserror::Error;

use crate::audit::OperationLogEntry;
use crate::domain::customer::{Customer, CustomerId, Phone, TenantId};
use crate::domain::integration::Integration;
use crate::domain::order::{Order, OrderId, OrderReference};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderInsert {
    Inserted,
    /// The tenant already has an order with this reference; nothing was written.
    DuplicateReference,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { orders_inserted: usize },
    /// Nothing was written because one of the orders already exists.
    DuplicateOrder(OrderReference),
}

#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn find_customer_by_phone(
        &self,
        tenant: &TenantId,
        phone: &Phone,
    ) -> Result<Option<Customer>, StoreError>;

    async fn find_customer(
        &self,
        tenant: &TenantId,
        id: &CustomerId,
    ) -> Result<Option<Customer>, StoreError>;

    async fn upsert_customer(&self, customer: &Customer) -> Result<(), StoreError>;

    async fn find_order_by_reference(
        &self,
        tenant: &TenantId,
        reference: &OrderReference,
    ) -> Result<Option<OrderId>, StoreError>;

    async fn insert_order(&self, order: &Order) -> Result<OrderInsert, StoreError>;

    async fn list_customers(&self, tenant: &TenantId) -> Result<Vec<Customer>, StoreError>;

    /// Order timestamps of every customer in the tenant, oldest first per customer.
    async fn list_order_dates(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<(CustomerId, DateTime<Utc>)>, StoreError>;

    /// Deletes the given customers with their orders; returns how many customers went away.
    async fn delete_customers(
        &self,
        tenant: &TenantId,
        ids: &[CustomerId],
    ) -> Result<usize, StoreError>;

    async fn record_operation(&self, entry: &OperationLogEntry) -> Result<(), StoreError>;

    /// Writes one reconciled row: the customer and all of its new orders.
    ///
    /// The default checks every reference first so a duplicate writes nothing.
    /// Transactional stores override this to make the whole row atomic.
    async fn commit_row(
        &self,
        customer: &Customer,
        orders: &[Order],
    ) -> Result<CommitOutcome, StoreError> {
        for order in orders {
            if self.find_order_by_reference(&order.tenant_id, &order.reference).await?.is_some() {
                return Ok(CommitOutcome::DuplicateOrder(order.reference.clone()));
            }
        }

        self.upsert_customer(customer).await?;

        let mut orders_inserted = 0;
        for order in orders {
            match self.insert_order(order).await? {
                OrderInsert::Inserted => orders_inserted += 1,
                OrderInsert::DuplicateReference => {
                    return Ok(CommitOutcome::DuplicateOrder(order.reference.clone()))
                }
            }
        }
        Ok(CommitOutcome::Committed { orders_inserted })
    }
}

#[async_trait]
pub trait IntegrationStore: Send + Sync {
    async fn find_integration(&self, tenant: &TenantId)
        -> Result<Option<Integration>, StoreError>;

    async fn save_integration(&self, integration: &Integration) -> Result<(), StoreError>;

    async fn list_integrations(&self) -> Result<Vec<Integration>, StoreError>;

    async fn save_token(
        &self,
        tenant: &TenantId,
        token: &SecretString,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn load_high_water_mark(&self, tenant: &TenantId) -> Result<Option<u64>, StoreError>;

    async fn save_high_water_mark(&self, tenant: &TenantId, reference: u64)
        -> Result<(), StoreError>;

    async fn mark_synced(&self, tenant: &TenantId, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use secrecy::SecretString;

    use super::{CustomerStore, IntegrationStore, OrderInsert, StoreError};
    use crate::audit::OperationLogEntry;
    use crate::domain::customer::{Customer, CustomerId, Phone, TenantId};
    use crate::domain::integration::Integration;
    use crate::domain::order::{Order, OrderId, OrderReference};

    /// Single-struct fake of both store traits with switchable failures.
    #[derive(Default)]
    pub(crate) struct FakeStore {
        pub customers: Mutex<Vec<Customer>>,
        pub orders: Mutex<Vec<Order>>,
        pub operations: Mutex<Vec<OperationLogEntry>>,
        pub high_water_marks: Mutex<HashMap<TenantId, u64>>,
        pub failing_phone: Option<String>,
        pub fail_high_water_mark_save: bool,
        /// Yield to the scheduler after each phone lookup, so concurrent
        /// runs interleave between read and write.
        pub yield_on_lookup: bool,
    }

    impl FakeStore {
        pub fn failing_for_phone(phone: &str) -> Self {
            Self { failing_phone: Some(phone.to_owned()), ..Self::default() }
        }

        pub fn customer_by_phone(&self, phone: &str) -> Option<Customer> {
            self.customers
                .lock()
                .expect("lock")
                .iter()
                .find(|customer| customer.phone.as_str() == phone)
                .cloned()
        }

        pub fn order_count(&self) -> usize {
            self.orders.lock().expect("lock").len()
        }
    }

    #[async_trait]
    impl CustomerStore for FakeStore {
        async fn find_customer_by_phone(
            &self,
            tenant: &TenantId,
            phone: &Phone,
        ) -> Result<Option<Customer>, StoreError> {
            let found = self
                .customers
                .lock()
                .expect("lock")
                .iter()
                .find(|customer| &customer.tenant_id == tenant && &customer.phone == phone)
                .cloned();
            if self.yield_on_lookup {
                tokio::task::yield_now().await;
            }
            Ok(found)
        }

        async fn find_customer(
            &self,
            tenant: &TenantId,
            id: &CustomerId,
        ) -> Result<Option<Customer>, StoreError> {
            Ok(self
                .customers
                .lock()
                .expect("lock")
                .iter()
                .find(|customer| &customer.tenant_id == tenant && &customer.id == id)
                .cloned())
        }

        async fn upsert_customer(&self, customer: &Customer) -> Result<(), StoreError> {
            if self.failing_phone.as_deref() == Some(customer.phone.as_str()) {
                return Err(StoreError::Unavailable("disk full".to_owned()));
            }
            let mut customers = self.customers.lock().expect("lock");
            match customers.iter_mut().find(|stored| stored.id == customer.id) {
                Some(stored) => *stored = customer.clone(),
                None => customers.push(customer.clone()),
            }
            Ok(())
        }

        async fn find_order_by_reference(
            &self,
            tenant: &TenantId,
            reference: &OrderReference,
        ) -> Result<Option<OrderId>, StoreError> {
            Ok(self
                .orders
                .lock()
                .expect("lock")
                .iter()
                .find(|order| &order.tenant_id == tenant && &order.reference == reference)
                .map(|order| order.id.clone()))
        }

        async fn insert_order(&self, order: &Order) -> Result<OrderInsert, StoreError> {
            let mut orders = self.orders.lock().expect("lock");
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
            Ok(self
                .customers
                .lock()
                .expect("lock")
                .iter()
                .filter(|customer| &customer.tenant_id == tenant)
                .cloned()
                .collect())
        }

        async fn list_order_dates(
            &self,
            tenant: &TenantId,
        ) -> Result<Vec<(CustomerId, DateTime<Utc>)>, StoreError> {
            let mut dates: Vec<(CustomerId, DateTime<Utc>)> = self
                .orders
                .lock()
                .expect("lock")
                .iter()
                .filter(|order| &order.tenant_id == tenant)
                .map(|order| (order.customer_id.clone(), order.order_date))
                .collect();
            dates.sort_by(|left, right| left.1.cmp(&right.1));
            Ok(dates)
        }

        async fn delete_customers(
            &self,
            tenant: &TenantId,
            ids: &[CustomerId],
        ) -> Result<usize, StoreError> {
            let mut customers = self.customers.lock().expect("lock");
            let before = customers.len();
            customers.retain(|customer| !(&customer.tenant_id == tenant && ids.contains(&customer.id)));
            self.orders.lock().expect("lock").retain(|order| !ids.contains(&order.customer_id));
            Ok(before - customers.len())
        }

        async fn record_operation(&self, entry: &OperationLogEntry) -> Result<(), StoreError> {
            self.operations.lock().expect("lock").push(entry.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl IntegrationStore for FakeStore {
        async fn find_integration(
            &self,
            _tenant: &TenantId,
        ) -> Result<Option<Integration>, StoreError> {
            Ok(None)
        }

        async fn save_integration(&self, _integration: &Integration) -> Result<(), StoreError> {
            Ok(())
        }

        async fn list_integrations(&self) -> Result<Vec<Integration>, StoreError> {
            Ok(Vec::new())
        }

        async fn save_token(
            &self,
            _tenant: &TenantId,
            _token: &SecretString,
            _expires_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn load_high_water_mark(&self, tenant: &TenantId) -> Result<Option<u64>, StoreError> {
            Ok(self.high_water_marks.lock().expect("lock").get(tenant).copied())
        }

        async fn save_high_water_mark(
            &self,
            tenant: &TenantId,
            reference: u64,
        ) -> Result<(), StoreError> {
            if self.fail_high_water_mark_save {
                return Err(StoreError::Unavailable("integration table locked".to_owned()));
            }
            self.high_water_marks.lock().expect("lock").insert(tenant.clone(), reference);
            Ok(())
        }

        async fn mark_synced(&self, _tenant: &TenantId, _at: DateTime<Utc>) -> Result<(), StoreError> {
            Ok(())
        }
    }
}
