//! Headline metrics for a tenant's customer base.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerId;
use crate::rfm::CohortBaseline;
use crate::segments::{summarize, ScoredCustomer, SegmentSummary};

pub const RETENTION_WINDOW_DAYS: i64 = 30;
pub const REACTIVATION_GAP_DAYS: i64 = 40;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub total_customers: usize,
    pub total_revenue: Decimal,
    pub average_ticket: Decimal,
    /// Revenue per customer.
    pub average_ltv: Decimal,
    /// Percent of customers with two or more orders and a recent last order.
    pub retention_rate: Decimal,
    /// Customers whose latest order is recent and came after a long gap.
    pub reactivated_customers: usize,
    pub segments: Vec<SegmentSummary>,
}

pub fn dashboard_metrics(
    customers: &[ScoredCustomer],
    baseline: &CohortBaseline,
    order_dates: &[(CustomerId, DateTime<Utc>)],
    now: DateTime<Utc>,
) -> DashboardMetrics {
    let window_start = now - Duration::days(RETENTION_WINDOW_DAYS);
    let total_customers = customers.len();
    let total_revenue = customers
        .iter()
        .fold(Decimal::ZERO, |revenue, scored| revenue.saturating_add(scored.customer.total_spent));

    let average_ltv = if total_customers == 0 {
        Decimal::ZERO
    } else {
        total_revenue / Decimal::from(total_customers)
    };

    let retained = customers
        .iter()
        .filter(|scored| {
            scored.customer.total_orders >= 2
                && scored
                    .customer
                    .last_order_date
                    .is_some_and(|date| date.and_time(NaiveTime::default()).and_utc() >= window_start)
        })
        .count();
    let retention_rate = if total_customers == 0 {
        Decimal::ZERO
    } else {
        (Decimal::from(retained) * Decimal::ONE_HUNDRED / Decimal::from(total_customers))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    };

    DashboardMetrics {
        total_customers,
        total_revenue,
        average_ticket: baseline.average_ticket,
        average_ltv,
        retention_rate,
        reactivated_customers: count_reactivated(order_dates, window_start),
        segments: summarize(customers),
    }
}

fn count_reactivated(order_dates: &[(CustomerId, DateTime<Utc>)], window_start: DateTime<Utc>) -> usize {
    let mut by_customer: HashMap<&CustomerId, Vec<DateTime<Utc>>> = HashMap::new();
    for (customer_id, ordered_at) in order_dates {
        by_customer.entry(customer_id).or_default().push(*ordered_at);
    }

    by_customer
        .into_values()
        .filter(|dates| {
            let mut dates = dates.clone();
            dates.sort_unstable_by(|left, right| right.cmp(left));
            match (dates.first(), dates.get(1)) {
                (Some(latest), Some(previous)) => {
                    *latest >= window_start
                        && latest.signed_duration_since(*previous).num_days() >= REACTIVATION_GAP_DAYS
                }
                _ => false,
            }
        })
        .count()
}
