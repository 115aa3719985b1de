use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

impl CustomerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Digits-only phone number. Only [`crate::normalize::normalize_phone`] builds one
/// from untrusted input, so every stored or looked-up phone is canonical.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phone(String);

impl Phone {
    pub(crate) fn from_canonical(digits: String) -> Self {
        Self(digits)
    }

    /// Rehydrates a phone read back from storage.
    pub fn from_stored(digits: impl Into<String>) -> Self {
        Self(digits.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Phone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginSystem {
    CsvImport,
    ExternalApi,
    Mixed,
}

impl OriginSystem {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CsvImport => "csv_import",
            Self::ExternalApi => "external_api",
            Self::Mixed => "mixed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "csv_import" => Some(Self::CsvImport),
            "external_api" | "delmatch" => Some(Self::ExternalApi),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }

    /// Origin after a new observation from `source`.
    pub fn merged_with(self, source: OriginSystem) -> Self {
        if self == source {
            self
        } else {
            Self::Mixed
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub tenant_id: TenantId,
    pub name: String,
    pub phone: Phone,
    pub email: Option<String>,
    pub address: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<String>,
    /// Customer-since date.
    pub created_at: NaiveDate,
    pub last_order_date: Option<NaiveDate>,
    pub total_orders: u32,
    pub total_spent: Decimal,
    pub origin_system: OriginSystem,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    /// Average order value, `None` when the customer has no orders.
    pub fn ticket(&self) -> Option<Decimal> {
        if self.total_orders == 0 {
            return None;
        }
        Some(self.total_spent / Decimal::from(self.total_orders))
    }
}
