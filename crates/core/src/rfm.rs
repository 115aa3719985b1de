//! Recency/frequency/monetary scoring.
//!
//! Scoring is a pure function of a customer's aggregates, the cohort baseline
//! ticket and the evaluation instant. Customers whose last order is 30 to 40
//! days old are "at risk" and anything older is inactive; neither is scored.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::Customer;

pub const AT_RISK_FROM_DAYS: i64 = 30;
pub const INACTIVE_AFTER_DAYS: i64 = 40;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    #[serde(rename = "VIP")]
    Vip,
    #[serde(rename = "Frequente")]
    Frequent,
    #[serde(rename = "Ocasional")]
    Occasional,
    #[serde(rename = "Desengajado")]
    Disengaged,
    #[serde(rename = "Em risco")]
    AtRisk,
    #[serde(rename = "Inativo")]
    Inactive,
}

impl Segment {
    /// Display order used by segment listings.
    pub const ALL: [Segment; 6] = [
        Segment::Vip,
        Segment::Frequent,
        Segment::AtRisk,
        Segment::Occasional,
        Segment::Disengaged,
        Segment::Inactive,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Vip => "VIP",
            Self::Frequent => "Frequente",
            Self::Occasional => "Ocasional",
            Self::Disengaged => "Desengajado",
            Self::AtRisk => "Em risco",
            Self::Inactive => "Inativo",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::Vip => "vip",
            Self::Frequent => "frequent",
            Self::Occasional => "occasional",
            Self::Disengaged => "disengaged",
            Self::AtRisk => "at_risk",
            Self::Inactive => "inactive",
        }
    }

    fn from_total(total: i8) -> Self {
        match total {
            13.. => Self::Vip,
            10..=12 => Self::Frequent,
            6..=9 => Self::Occasional,
            _ => Self::Disengaged,
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Segment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_lowercase().replace(['-', ' '], "_");
        Segment::ALL
            .into_iter()
            .find(|segment| {
                segment.slug() == wanted || segment.label().to_lowercase().replace(' ', "_") == wanted
            })
            .ok_or_else(|| format!("unknown segment `{}`", value.trim()))
    }
}

/// Cohort-wide average ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortBaseline {
    pub average_ticket: Decimal,
}

impl CohortBaseline {
    pub fn new(average_ticket: Decimal) -> Self {
        Self { average_ticket }
    }

    /// Total spent over total orders; zero when the cohort has no orders.
    /// Sums saturate at the representable maximum.
    pub fn from_customers<'a>(customers: impl IntoIterator<Item = &'a Customer>) -> Self {
        let (spent, orders) =
            customers.into_iter().fold((Decimal::ZERO, 0u64), |(spent, orders), customer| {
                (
                    spent.saturating_add(customer.total_spent),
                    orders.saturating_add(u64::from(customer.total_orders)),
                )
            });
        if orders == 0 {
            return Self::new(Decimal::ZERO);
        }
        Self::new(spent / Decimal::from(orders))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CustomerStats {
    pub total_orders: u32,
    pub total_spent: Decimal,
    pub last_order_date: Option<NaiveDate>,
}

impl From<&Customer> for CustomerStats {
    fn from(customer: &Customer) -> Self {
        Self {
            total_orders: customer.total_orders,
            total_spent: customer.total_spent,
            last_order_date: customer.last_order_date,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfmScore {
    /// 1..=5 when scored; 0 for inactive and -1 for at-risk customers.
    pub recency: i8,
    pub frequency: i8,
    pub monetary: i8,
    pub total: i8,
    pub segment: Segment,
}

/// Whole days between UTC midnight of `last_order` and `now`, rounded down.
/// A customer without any order counts as last seen at the Unix epoch.
pub fn days_since(last_order: Option<NaiveDate>, now: DateTime<Utc>) -> i64 {
    let last_order = last_order
        .map(|date| date.and_time(NaiveTime::default()).and_utc())
        .unwrap_or_default();
    now.signed_duration_since(last_order).num_hours().div_euclid(24)
}

pub fn recency_score(days: i64) -> i8 {
    match days {
        ..=7 => 5,
        8..=14 => 4,
        15..=21 => 3,
        22..=29 => 2,
        _ => 1,
    }
}

pub fn frequency_score(total_orders: u32) -> i8 {
    match total_orders {
        10.. => 5,
        7..=9 => 4,
        4..=6 => 3,
        2..=3 => 2,
        _ => 1,
    }
}

/// Ticket relative to the baseline. A customer without orders has no ticket and
/// scores the minimum. Against a zero baseline any ticket scores 5.
pub fn monetary_score(total_orders: u32, total_spent: Decimal, baseline: &CohortBaseline) -> i8 {
    if total_orders == 0 {
        return 1;
    }
    let ticket = total_spent / Decimal::from(total_orders);
    let average = baseline.average_ticket;
    if ticket >= average.saturating_mul(Decimal::TWO) {
        5
    } else if ticket >= average.saturating_mul(Decimal::new(15, 1)) {
        4
    } else if ticket >= average {
        3
    } else if ticket >= average.saturating_mul(Decimal::new(5, 1)) {
        2
    } else {
        1
    }
}

pub fn score(stats: &CustomerStats, baseline: &CohortBaseline, now: DateTime<Utc>) -> RfmScore {
    let days = days_since(stats.last_order_date, now);

    if days > INACTIVE_AFTER_DAYS {
        return RfmScore { recency: 0, frequency: 0, monetary: 0, total: 0, segment: Segment::Inactive };
    }
    if days >= AT_RISK_FROM_DAYS {
        return RfmScore { recency: -1, frequency: 0, monetary: 0, total: -1, segment: Segment::AtRisk };
    }

    let recency = recency_score(days);
    let frequency = frequency_score(stats.total_orders);
    let monetary = monetary_score(stats.total_orders, stats.total_spent, baseline);
    let total = recency + frequency + monetary;
    RfmScore { recency, frequency, monetary, total, segment: Segment::from_total(total) }
}
