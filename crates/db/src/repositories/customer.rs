use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use guru_core::audit::{OperationKind, OperationLogEntry};
use guru_core::domain::customer::{Customer, CustomerId, OriginSystem, Phone, TenantId};
use guru_core::domain::order::{Order, OrderId, OrderItem, OrderPayment, OrderReference};
use guru_core::store::{CommitOutcome, CustomerStore, OrderInsert, StoreError};

use super::{column, format_date, parse_date, parse_decimal, parse_timestamp, RepositoryError};
use crate::DbPool;

const CUSTOMER_COLUMNS: &str = "id, tenant_id, name, phone, email, address, neighborhood, city,
     created_at, last_order_date, total_orders, total_spent, origin_system, updated_at";

pub struct SqlCustomerStore {
    pool: DbPool,
}

impl SqlCustomerStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Full order with its items and payments, for inspection and export.
    pub async fn find_order(
        &self,
        tenant: &TenantId,
        reference: &OrderReference,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, customer_id, reference, order_date, order_value, delivery_fee
             FROM orders WHERE tenant_id = ? AND reference = ?",
        )
        .bind(&tenant.0)
        .bind(&reference.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut order = row_to_order(&row)?;

        let items = sqlx::query(
            "SELECT name, quantity, price, total_price, discount, addition, external_code, observations
             FROM order_items WHERE order_id = ? ORDER BY position",
        )
        .bind(&order.id.0)
        .fetch_all(&self.pool)
        .await?;
        order.items = items.iter().map(row_to_item).collect::<Result<Vec<_>, _>>()?;

        let payments = sqlx::query(
            "SELECT name, value, prepaid, issuer FROM order_payments WHERE order_id = ? ORDER BY position",
        )
        .bind(&order.id.0)
        .fetch_all(&self.pool)
        .await?;
        order.payments = payments.iter().map(row_to_payment).collect::<Result<Vec<_>, _>>()?;

        Ok(Some(order))
    }

    /// Most recent operation log entries for a tenant, newest first.
    pub async fn list_operations(
        &self,
        tenant: &TenantId,
        limit: u32,
    ) -> Result<Vec<OperationLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, operation, entity_type, entity_id, details, occurred_at
             FROM operation_logs WHERE tenant_id = ?
             ORDER BY occurred_at DESC, rowid DESC LIMIT ?",
        )
        .bind(&tenant.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_operation).collect()
    }

    async fn customer_where(
        &self,
        filter: &str,
        tenant: &TenantId,
        value: &str,
    ) -> Result<Option<Customer>, RepositoryError> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE tenant_id = ? AND {filter} = ?");
        let row = sqlx::query(&sql).bind(&tenant.0).bind(value).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_customer).transpose()
    }
}

async fn upsert_customer(conn: &mut SqliteConnection, customer: &Customer) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO customers (id, tenant_id, name, phone, email, address, neighborhood, city,
                                created_at, last_order_date, total_orders, total_spent,
                                origin_system, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             email = excluded.email,
             address = excluded.address,
             neighborhood = excluded.neighborhood,
             city = excluded.city,
             created_at = excluded.created_at,
             last_order_date = excluded.last_order_date,
             total_orders = excluded.total_orders,
             total_spent = excluded.total_spent,
             origin_system = excluded.origin_system,
             updated_at = excluded.updated_at",
    )
    .bind(&customer.id.0)
    .bind(&customer.tenant_id.0)
    .bind(&customer.name)
    .bind(customer.phone.as_str())
    .bind(&customer.email)
    .bind(&customer.address)
    .bind(&customer.neighborhood)
    .bind(&customer.city)
    .bind(format_date(customer.created_at))
    .bind(customer.last_order_date.map(format_date))
    .bind(i64::from(customer.total_orders))
    .bind(customer.total_spent.to_string())
    .bind(customer.origin_system.as_str())
    .bind(customer.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_order(conn: &mut SqliteConnection, order: &Order) -> Result<OrderInsert, RepositoryError> {
    let inserted = sqlx::query(
        "INSERT INTO orders (id, tenant_id, customer_id, reference, order_date, order_value, delivery_fee)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(tenant_id, reference) DO NOTHING",
    )
    .bind(&order.id.0)
    .bind(&order.tenant_id.0)
    .bind(&order.customer_id.0)
    .bind(&order.reference.0)
    .bind(order.order_date.to_rfc3339())
    .bind(order.order_value.to_string())
    .bind(order.delivery_fee.to_string())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if inserted == 0 {
        return Ok(OrderInsert::DuplicateReference);
    }

    for (position, item) in order.items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO order_items (order_id, position, name, quantity, price, total_price,
                                      discount, addition, external_code, observations)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.id.0)
        .bind(position as i64)
        .bind(&item.name)
        .bind(item.quantity.to_string())
        .bind(item.price.to_string())
        .bind(item.total_price.to_string())
        .bind(item.discount.to_string())
        .bind(item.addition.to_string())
        .bind(&item.external_code)
        .bind(&item.observations)
        .execute(&mut *conn)
        .await?;
    }

    for (position, payment) in order.payments.iter().enumerate() {
        sqlx::query(
            "INSERT INTO order_payments (order_id, position, name, value, prepaid, issuer)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.id.0)
        .bind(position as i64)
        .bind(&payment.name)
        .bind(payment.value.to_string())
        .bind(payment.prepaid)
        .bind(&payment.issuer)
        .execute(&mut *conn)
        .await?;
    }

    Ok(OrderInsert::Inserted)
}

fn row_to_customer(row: &SqliteRow) -> Result<Customer, RepositoryError> {
    let phone: String = column(row, "phone")?;
    let created_at: String = column(row, "created_at")?;
    let last_order_date: Option<String> = column(row, "last_order_date")?;
    let total_orders: i64 = column(row, "total_orders")?;
    let total_spent: String = column(row, "total_spent")?;
    let origin: String = column(row, "origin_system")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(Customer {
        id: CustomerId(column(row, "id")?),
        tenant_id: TenantId(column(row, "tenant_id")?),
        name: column(row, "name")?,
        phone: Phone::from_stored(phone),
        email: column(row, "email")?,
        address: column(row, "address")?,
        neighborhood: column(row, "neighborhood")?,
        city: column(row, "city")?,
        created_at: parse_date("created_at", &created_at)?,
        last_order_date: last_order_date
            .as_deref()
            .map(|raw| parse_date("last_order_date", raw))
            .transpose()?,
        total_orders: u32::try_from(total_orders)
            .map_err(|_| RepositoryError::Decode(format!("total_orders `{total_orders}` out of range")))?,
        total_spent: parse_decimal("total_spent", &total_spent)?,
        origin_system: OriginSystem::parse(&origin)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown origin_system `{origin}`")))?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn row_to_order(row: &SqliteRow) -> Result<Order, RepositoryError> {
    let order_date: String = column(row, "order_date")?;
    let order_value: String = column(row, "order_value")?;
    let delivery_fee: String = column(row, "delivery_fee")?;

    Ok(Order {
        id: OrderId(column(row, "id")?),
        tenant_id: TenantId(column(row, "tenant_id")?),
        customer_id: CustomerId(column(row, "customer_id")?),
        reference: OrderReference(column(row, "reference")?),
        order_date: parse_timestamp("order_date", &order_date)?,
        order_value: parse_decimal("order_value", &order_value)?,
        delivery_fee: parse_decimal("delivery_fee", &delivery_fee)?,
        items: Vec::new(),
        payments: Vec::new(),
    })
}

fn row_to_item(row: &SqliteRow) -> Result<OrderItem, RepositoryError> {
    let money = |field: &str| -> Result<_, RepositoryError> {
        let raw: String = column(row, field)?;
        parse_decimal(field, &raw)
    };
    Ok(OrderItem {
        name: column(row, "name")?,
        quantity: money("quantity")?,
        price: money("price")?,
        total_price: money("total_price")?,
        discount: money("discount")?,
        addition: money("addition")?,
        external_code: column(row, "external_code")?,
        observations: column(row, "observations")?,
    })
}

fn row_to_payment(row: &SqliteRow) -> Result<OrderPayment, RepositoryError> {
    let value: String = column(row, "value")?;
    Ok(OrderPayment {
        name: column(row, "name")?,
        value: parse_decimal("value", &value)?,
        prepaid: column(row, "prepaid")?,
        issuer: column(row, "issuer")?,
    })
}

fn row_to_operation(row: &SqliteRow) -> Result<OperationLogEntry, RepositoryError> {
    let operation: String = column(row, "operation")?;
    let details: String = column(row, "details")?;
    let occurred_at: String = column(row, "occurred_at")?;

    Ok(OperationLogEntry {
        id: column(row, "id")?,
        tenant_id: TenantId(column(row, "tenant_id")?),
        operation: OperationKind::parse(&operation)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown operation `{operation}`")))?,
        entity_type: column(row, "entity_type")?,
        entity_id: column(row, "entity_id")?,
        details: serde_json::from_str::<BTreeMap<String, String>>(&details)
            .map_err(|e| RepositoryError::Decode(format!("operation details: {e}")))?,
        occurred_at: parse_timestamp("occurred_at", &occurred_at)?,
    })
}

#[async_trait]
impl CustomerStore for SqlCustomerStore {
    async fn find_customer_by_phone(
        &self,
        tenant: &TenantId,
        phone: &Phone,
    ) -> Result<Option<Customer>, StoreError> {
        Ok(self.customer_where("phone", tenant, phone.as_str()).await?)
    }

    async fn find_customer(
        &self,
        tenant: &TenantId,
        id: &CustomerId,
    ) -> Result<Option<Customer>, StoreError> {
        Ok(self.customer_where("id", tenant, &id.0).await?)
    }

    async fn upsert_customer(&self, customer: &Customer) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(upsert_customer(&mut conn, customer).await?)
    }

    async fn find_order_by_reference(
        &self,
        tenant: &TenantId,
        reference: &OrderReference,
    ) -> Result<Option<OrderId>, StoreError> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id FROM orders WHERE tenant_id = ? AND reference = ?")
                .bind(&tenant.0)
                .bind(&reference.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(RepositoryError::from)?;
        Ok(id.map(OrderId))
    }

    async fn insert_order(&self, order: &Order) -> Result<OrderInsert, StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        let outcome = insert_order(&mut tx, order).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(outcome)
    }

    async fn list_customers(&self, tenant: &TenantId) -> Result<Vec<Customer>, StoreError> {
        let sql = format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE tenant_id = ? ORDER BY name COLLATE NOCASE, id"
        );
        let rows = sqlx::query(&sql)
            .bind(&tenant.0)
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(rows.iter().map(row_to_customer).collect::<Result<Vec<_>, _>>()?)
    }

    async fn list_order_dates(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<(CustomerId, DateTime<Utc>)>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT customer_id, order_date FROM orders WHERE tenant_id = ? ORDER BY customer_id, order_date",
        )
        .bind(&tenant.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows
            .into_iter()
            .map(|(customer_id, order_date)| {
                parse_timestamp("order_date", &order_date).map(|at| (CustomerId(customer_id), at))
            })
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn delete_customers(
        &self,
        tenant: &TenantId,
        ids: &[CustomerId],
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        let mut deleted = 0u64;
        for id in ids {
            deleted += sqlx::query("DELETE FROM customers WHERE tenant_id = ? AND id = ?")
                .bind(&tenant.0)
                .bind(&id.0)
                .execute(&mut *tx)
                .await
                .map_err(RepositoryError::from)?
                .rows_affected();
        }
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(deleted as usize)
    }

    async fn record_operation(&self, entry: &OperationLogEntry) -> Result<(), StoreError> {
        let details = serde_json::to_string(&entry.details)
            .map_err(|e| StoreError::Corrupt(format!("operation details: {e}")))?;
        sqlx::query(
            "INSERT INTO operation_logs (id, tenant_id, operation, entity_type, entity_id, details, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.tenant_id.0)
        .bind(entry.operation.as_str())
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(details)
        .bind(entry.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }

    /// Customer and orders in one transaction; a duplicate reference rolls
    /// back the whole row.
    async fn commit_row(
        &self,
        customer: &Customer,
        orders: &[Order],
    ) -> Result<CommitOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        upsert_customer(&mut tx, customer).await?;

        for order in orders {
            if insert_order(&mut tx, order).await? == OrderInsert::DuplicateReference {
                tx.rollback().await.map_err(RepositoryError::from)?;
                return Ok(CommitOutcome::DuplicateOrder(order.reference.clone()));
            }
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(CommitOutcome::Committed { orders_inserted: orders.len() })
    }
}
