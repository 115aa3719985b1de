//! Campaign targeting: which customers a WhatsApp campaign goes to, and the
//! campaign record that is queued for them. Delivery happens elsewhere.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::customer::{CustomerId, TenantId};
use crate::normalize::{normalize_local_date, normalize_monetary, DateFormat};
use crate::rfm::Segment;
use crate::segments::ScoredCustomer;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CampaignError {
    #[error("no customers match the campaign criteria")]
    NoRecipients,
    #[error("invalid campaign criteria: {0}")]
    InvalidCriteria(String),
    #[error("campaign {0} must not be empty")]
    MissingField(&'static str),
    #[error("scheduled time {0} is in the past")]
    ScheduleInPast(DateTime<Utc>),
}

/// Every set field must match; an empty criteria selects everyone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignCriteria {
    pub segment: Option<Segment>,
    pub min_total_spent: Option<Decimal>,
    pub last_order_date: Option<NaiveDate>,
    pub customer_id: Option<CustomerId>,
}

impl CampaignCriteria {
    /// Builds criteria from operator input: amounts in local notation and the
    /// last-order date as `dd/mm/yyyy`.
    pub fn parse(
        segment: Option<&str>,
        min_total_spent: Option<&str>,
        last_order_date: Option<&str>,
        customer_id: Option<&str>,
    ) -> Result<Self, CampaignError> {
        fn present(value: Option<&str>) -> Option<&str> {
            value.map(str::trim).filter(|value| !value.is_empty())
        }

        let segment = present(segment)
            .map(|raw| raw.parse::<Segment>().map_err(CampaignError::InvalidCriteria))
            .transpose()?;
        let min_total_spent = present(min_total_spent)
            .map(|raw| {
                normalize_monetary(raw)
                    .map_err(|_| CampaignError::InvalidCriteria(format!("invalid amount `{raw}`")))
            })
            .transpose()?;
        let last_order_date = present(last_order_date)
            .map(|raw| {
                normalize_local_date(raw, DateFormat::DayMonthYear)
                    .map_err(|_| CampaignError::InvalidCriteria(format!("invalid date `{raw}`")))
            })
            .transpose()?;

        Ok(Self {
            segment,
            min_total_spent,
            last_order_date,
            customer_id: present(customer_id).map(|raw| CustomerId(raw.to_owned())),
        })
    }

    pub fn matches(&self, scored: &ScoredCustomer) -> bool {
        let customer = &scored.customer;
        self.segment.map_or(true, |segment| scored.segment() == segment)
            && self.min_total_spent.map_or(true, |minimum| customer.total_spent >= minimum)
            && self.last_order_date.map_or(true, |date| customer.last_order_date == Some(date))
            && self.customer_id.as_ref().map_or(true, |id| &customer.id == id)
    }

    /// Matching customer ids in collection order.
    pub fn recipients(&self, customers: &[ScoredCustomer]) -> Vec<CustomerId> {
        customers
            .iter()
            .filter(|scored| self.matches(scored))
            .map(|scored| scored.customer.id.clone())
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "at")]
pub enum SendMode {
    Now,
    Scheduled(DateTime<Utc>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Scheduled,
    Sending,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "scheduled" => Some(Self::Scheduled),
            "sending" => Some(Self::Sending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignDraft {
    pub template_name: String,
    pub message: String,
    pub criteria: CampaignCriteria,
    pub send_mode: SendMode,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignPlan {
    pub id: String,
    pub tenant_id: TenantId,
    pub name: String,
    pub template_name: String,
    pub message: String,
    pub criteria: CampaignCriteria,
    pub scheduled_at: DateTime<Utc>,
    pub status: CampaignStatus,
    /// Each recipient starts with a `pending` delivery log.
    pub recipients: Vec<CustomerId>,
    pub created_at: DateTime<Utc>,
}

impl CampaignPlan {
    /// JSON stored alongside the template: the message and the criteria used.
    pub fn template_params(&self) -> serde_json::Value {
        serde_json::json!({ "message": self.message, "criteria": self.criteria })
    }
}

pub fn plan_campaign(
    tenant: &TenantId,
    draft: CampaignDraft,
    customers: &[ScoredCustomer],
    now: DateTime<Utc>,
) -> Result<CampaignPlan, CampaignError> {
    if draft.template_name.trim().is_empty() {
        return Err(CampaignError::MissingField("template"));
    }
    if draft.message.trim().is_empty() {
        return Err(CampaignError::MissingField("message"));
    }
    let (scheduled_at, status) = match draft.send_mode {
        SendMode::Now => (now, CampaignStatus::Sending),
        SendMode::Scheduled(at) if at < now => return Err(CampaignError::ScheduleInPast(at)),
        SendMode::Scheduled(at) => (at, CampaignStatus::Scheduled),
    };

    let recipients = draft.criteria.recipients(customers);
    if recipients.is_empty() {
        return Err(CampaignError::NoRecipients);
    }

    let audience = draft.criteria.segment.map_or("Todos", Segment::label);
    Ok(CampaignPlan {
        id: Uuid::new_v4().to_string(),
        tenant_id: tenant.clone(),
        name: format!("Campanha {audience} - {}", now.format("%d/%m/%Y")),
        template_name: draft.template_name.trim().to_owned(),
        message: draft.message,
        criteria: draft.criteria,
        scheduled_at,
        status,
        recipients,
        created_at: now,
    })
}
