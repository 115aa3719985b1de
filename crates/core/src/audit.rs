//! Operation log entries written alongside every customer and order mutation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::customer::TenantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateCustomer,
    UpdateCustomer,
    DeleteCustomer,
    CreateOrder,
    CreateCampaign,
    PeriodicSync,
    PeriodicSyncError,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateCustomer => "create_customer",
            Self::UpdateCustomer => "update_customer",
            Self::DeleteCustomer => "delete_customer",
            Self::CreateOrder => "create_order",
            Self::CreateCampaign => "create_campaign",
            Self::PeriodicSync => "periodic_sync",
            Self::PeriodicSyncError => "periodic_sync_error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "create_customer" => Some(Self::CreateCustomer),
            "update_customer" => Some(Self::UpdateCustomer),
            "delete_customer" => Some(Self::DeleteCustomer),
            "create_order" => Some(Self::CreateOrder),
            "create_campaign" => Some(Self::CreateCampaign),
            "periodic_sync" => Some(Self::PeriodicSync),
            "periodic_sync_error" => Some(Self::PeriodicSyncError),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub id: String,
    pub tenant_id: TenantId,
    pub operation: OperationKind,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub details: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl OperationLogEntry {
    pub fn new(
        tenant_id: TenantId,
        operation: OperationKind,
        entity_type: impl Into<String>,
        entity_id: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            operation,
            entity_type: entity_type.into(),
            entity_id,
            details: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}
