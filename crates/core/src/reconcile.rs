//! Matches an incoming observation to a stored customer by phone and merges it.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::domain::customer::{Customer, CustomerId, OriginSystem, Phone, TenantId};
use crate::store::{CustomerStore, StoreError};

/// One validated observation of a customer, already normalized.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub source: OriginSystem,
    pub name: String,
    pub phone: Phone,
    pub email: Option<String>,
    pub address: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<String>,
    pub customer_since: NaiveDate,
    pub last_order_date: NaiveDate,
    pub order_count: u32,
    /// Total value of the orders this observation carries.
    pub amount: Decimal,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Merging would push the customer's totals past what can be represented.
    #[error("totals of customer {0} would overflow")]
    TotalsOverflow(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReconcileDecision {
    Insert(Customer),
    Merge { previous: Customer, updated: Customer },
}

impl ReconcileDecision {
    pub fn customer(&self) -> &Customer {
        match self {
            Self::Insert(customer) => customer,
            Self::Merge { updated, .. } => updated,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Self::Insert(_))
    }
}

/// Decides what the customer looks like after `candidate` is applied.
///
/// Counters are additive. Contact fields only change when the candidate has
/// something to say. A CSV row overwrites the last-order date; an API order
/// only moves it forward.
pub fn decide(
    tenant: &TenantId,
    existing: Option<&Customer>,
    candidate: &Candidate,
    now: DateTime<Utc>,
) -> Result<ReconcileDecision, ReconcileError> {
    let Some(previous) = existing else {
        return Ok(ReconcileDecision::Insert(Customer {
            id: CustomerId::generate(),
            tenant_id: tenant.clone(),
            name: candidate.name.clone(),
            phone: candidate.phone.clone(),
            email: candidate.email.clone(),
            address: candidate.address.clone(),
            neighborhood: candidate.neighborhood.clone(),
            city: candidate.city.clone(),
            created_at: candidate.customer_since,
            last_order_date: Some(candidate.last_order_date),
            total_orders: candidate.order_count,
            total_spent: candidate.amount,
            origin_system: candidate.source,
            updated_at: now,
        }));
    };

    let overflow = || ReconcileError::TotalsOverflow(previous.id.0.clone());
    let total_orders = previous.total_orders.checked_add(candidate.order_count).ok_or_else(overflow)?;
    let total_spent = previous.total_spent.checked_add(candidate.amount).ok_or_else(overflow)?;

    let last_order_date = match (candidate.source, previous.last_order_date) {
        (OriginSystem::CsvImport, _) | (_, None) => candidate.last_order_date,
        (_, Some(stored)) => stored.max(candidate.last_order_date),
    };

    let updated = Customer {
        id: previous.id.clone(),
        tenant_id: previous.tenant_id.clone(),
        name: candidate.name.clone(),
        phone: previous.phone.clone(),
        email: candidate.email.clone().or_else(|| previous.email.clone()),
        address: candidate.address.clone().or_else(|| previous.address.clone()),
        neighborhood: candidate.neighborhood.clone().or_else(|| previous.neighborhood.clone()),
        city: candidate.city.clone().or_else(|| previous.city.clone()),
        created_at: previous.created_at.min(candidate.customer_since),
        last_order_date: Some(last_order_date),
        total_orders,
        total_spent,
        origin_system: previous.origin_system.merged_with(candidate.source),
        updated_at: now,
    };

    Ok(ReconcileDecision::Merge { previous: previous.clone(), updated })
}

/// Looks the candidate up in a store and applies [`decide`]. Writes nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct Reconciler;

impl Reconciler {
    pub async fn reconcile(
        &self,
        tenant: &TenantId,
        candidate: &Candidate,
        store: &dyn CustomerStore,
        now: DateTime<Utc>,
    ) -> Result<ReconcileDecision, ReconcileError> {
        let existing = store.find_customer_by_phone(tenant, &candidate.phone).await?;
        let decision = decide(tenant, existing.as_ref(), candidate, now)?;
        debug!(
            event_name = "reconcile.decided",
            tenant_id = %tenant.0,
            phone = %candidate.phone,
            insert = decision.is_insert(),
            "reconciled candidate"
        );
        Ok(decision)
    }
}
