use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::customer::{CustomerId, TenantId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Source-system reference, unique per tenant across all orders.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderReference(pub String);

impl OrderReference {
    /// Numeric value of the reference, used for the high-water mark.
    pub fn numeric(&self) -> Option<u64> {
        self.0.parse::<u64>().ok()
    }
}

impl std::fmt::Display for OrderReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub total_price: Decimal,
    pub discount: Decimal,
    pub addition: Decimal,
    pub external_code: Option<String>,
    pub observations: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderPayment {
    pub name: String,
    pub value: Decimal,
    pub prepaid: bool,
    pub issuer: Option<String>,
}

/// Immutable once written; orders are never merged or updated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    pub reference: OrderReference,
    pub order_date: DateTime<Utc>,
    pub order_value: Decimal,
    pub delivery_fee: Decimal,
    pub items: Vec<OrderItem>,
    pub payments: Vec<OrderPayment>,
}
