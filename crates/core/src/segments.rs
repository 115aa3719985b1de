//! Folding scored customers into per-segment summaries, filtered views,
//! bulk selections and export rows. Nothing here touches a store.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::customer::{Customer, CustomerId};
use crate::rfm::{score, CohortBaseline, CustomerStats, RfmScore, Segment};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredCustomer {
    pub customer: Customer,
    pub score: RfmScore,
}

impl ScoredCustomer {
    pub fn segment(&self) -> Segment {
        self.score.segment
    }
}

/// Scores every customer against the baseline of the collection itself.
pub fn score_cohort(customers: Vec<Customer>, now: DateTime<Utc>) -> (CohortBaseline, Vec<ScoredCustomer>) {
    let baseline = CohortBaseline::from_customers(&customers);
    let scored = customers
        .into_iter()
        .map(|customer| {
            let score = score(&CustomerStats::from(&customer), &baseline, now);
            ScoredCustomer { customer, score }
        })
        .collect();
    (baseline, scored)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub segment: Segment,
    pub customers: usize,
    pub revenue: Decimal,
}

/// Per-segment counts and revenue for segments that have customers, highest
/// revenue first. Ties keep the order in which segments first appear.
pub fn summarize(customers: &[ScoredCustomer]) -> Vec<SegmentSummary> {
    let mut summaries: Vec<SegmentSummary> = Vec::new();
    for scored in customers {
        match summaries.iter_mut().find(|summary| summary.segment == scored.segment()) {
            Some(summary) => {
                summary.customers += 1;
                summary.revenue = summary.revenue.saturating_add(scored.customer.total_spent);
            }
            None => summaries.push(SegmentSummary {
                segment: scored.segment(),
                customers: 1,
                revenue: scored.customer.total_spent,
            }),
        }
    }
    summaries.sort_by(|left, right| right.revenue.cmp(&left.revenue));
    summaries
}

/// Count per segment for all six segments, in display order.
pub fn segment_counts(customers: &[ScoredCustomer]) -> Vec<(Segment, usize)> {
    Segment::ALL
        .into_iter()
        .map(|segment| (segment, customers.iter().filter(|scored| scored.segment() == segment).count()))
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerFilter {
    /// Case-insensitive substring of the name, or substring of the phone.
    pub search: Option<String>,
    pub segment: Option<Segment>,
}

impl CustomerFilter {
    pub fn matches(&self, scored: &ScoredCustomer) -> bool {
        if self.segment.is_some_and(|segment| segment != scored.segment()) {
            return false;
        }
        match self.search.as_deref().map(str::trim).filter(|term| !term.is_empty()) {
            None => true,
            Some(term) => {
                scored.customer.name.to_lowercase().contains(&term.to_lowercase())
                    || scored.customer.phone.as_str().contains(term)
            }
        }
    }

    pub fn apply<'a>(&self, customers: &'a [ScoredCustomer]) -> Vec<&'a ScoredCustomer> {
        customers.iter().filter(|scored| self.matches(scored)).collect()
    }
}

/// Ids picked for a bulk action, in the order they were picked.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    ids: Vec<CustomerId>,
}

impl Selection {
    pub fn toggle(&mut self, id: &CustomerId) {
        match self.ids.iter().position(|selected| selected == id) {
            Some(index) => {
                self.ids.remove(index);
            }
            None => self.ids.push(id.clone()),
        }
    }

    /// Selects exactly the visible customers, or clears when all of them are
    /// already selected.
    pub fn toggle_all(&mut self, visible: &[&ScoredCustomer]) {
        let all_selected = !visible.is_empty()
            && visible.iter().all(|scored| self.contains(&scored.customer.id));
        if all_selected {
            self.clear();
        } else {
            self.ids = visible.iter().map(|scored| scored.customer.id.clone()).collect();
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, id: &CustomerId) -> bool {
        self.ids.contains(id)
    }

    pub fn ids(&self) -> &[CustomerId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Selected customers in collection order.
    pub fn selected<'a>(&self, customers: &'a [ScoredCustomer]) -> Vec<&'a ScoredCustomer> {
        customers.iter().filter(|scored| self.contains(&scored.customer.id)).collect()
    }
}

impl FromIterator<CustomerId> for Selection {
    fn from_iter<I: IntoIterator<Item = CustomerId>>(iter: I) -> Self {
        let mut selection = Selection::default();
        for id in iter {
            if !selection.contains(&id) {
                selection.ids.push(id);
            }
        }
        selection
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRow {
    #[serde(rename = "Nome")]
    pub name: String,
    #[serde(rename = "Telefone")]
    pub phone: String,
    #[serde(rename = "Segmento")]
    pub segment: String,
    #[serde(rename = "Cliente Desde")]
    pub customer_since: String,
    #[serde(rename = "Último Pedido")]
    pub last_order: String,
    #[serde(rename = "Total de Pedidos")]
    pub total_orders: u32,
    #[serde(rename = "Total Gasto")]
    pub total_spent: String,
    #[serde(rename = "Cidade")]
    pub city: String,
    #[serde(rename = "Bairro")]
    pub neighborhood: String,
}

impl From<&ScoredCustomer> for ExportRow {
    fn from(scored: &ScoredCustomer) -> Self {
        let customer = &scored.customer;
        Self {
            name: customer.name.clone(),
            phone: customer.phone.to_string(),
            segment: scored.segment().label().to_owned(),
            customer_since: format_date(customer.created_at),
            last_order: customer.last_order_date.map(format_date).unwrap_or_default(),
            total_orders: customer.total_orders,
            total_spent: format_brl(customer.total_spent),
            city: customer.city.clone().unwrap_or_default(),
            neighborhood: customer.neighborhood.clone().unwrap_or_default(),
        }
    }
}

pub fn export_rows(customers: &[&ScoredCustomer]) -> Vec<ExportRow> {
    customers.iter().map(|scored| ExportRow::from(*scored)).collect()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// `R$ 1.234,56`.
pub fn format_brl(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let text = format!("{:.2}", rounded.abs());
    let (whole, cents) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    format!("{sign}R$ {grouped},{cents}")
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{
        export_rows, format_brl, score_cohort, segment_counts, summarize, CustomerFilter,
        ScoredCustomer, Selection,
    };
    use crate::domain::customer::{Customer, CustomerId, OriginSystem, Phone, TenantId};
    use crate::rfm::Segment;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 31, 15, 0, 0).single().expect("valid timestamp")
    }

    fn customer(id: &str, name: &str, phone: &str, orders: u32, spent: i64, days: i64) -> Customer {
        Customer {
            id: CustomerId(id.to_owned()),
            tenant_id: TenantId("tenant-a".to_owned()),
            name: name.to_owned(),
            phone: Phone::from_stored(phone),
            email: None,
            address: None,
            neighborhood: Some("Centro".to_owned()),
            city: Some("Campinas".to_owned()),
            created_at: NaiveDate::from_ymd_opt(2023, 11, 2).expect("valid date"),
            last_order_date: Some((now() - Duration::days(days)).date_naive()),
            total_orders: orders,
            total_spent: Decimal::from(spent),
            origin_system: OriginSystem::CsvImport,
            updated_at: now(),
        }
    }

    fn cohort() -> Vec<ScoredCustomer> {
        let (_, scored) = score_cohort(
            vec![
                customer("c1", "Ana Souza", "11987654321", 10, 3000, 3),
                customer("c2", "Bruno Lima", "11912345678", 1, 40, 35),
                customer("c3", "Carla Dias", "21955554444", 7, 1000, 10),
                customer("c4", "Ana Paula", "21966665555", 1, 20, 90),
            ],
            now(),
        );
        scored
    }

    #[test]
    fn cohort_is_scored_against_its_own_baseline() {
        let (baseline, scored) = score_cohort(
            vec![customer("c1", "Ana", "11987654321", 4, 400, 1), customer("c2", "Bia", "11912345678", 1, 100, 1)],
            now(),
        );
        assert_eq!(baseline.average_ticket, Decimal::from(100));
        assert_eq!(scored[0].score.monetary, 3);
    }

    #[test]
    fn summary_orders_segments_by_revenue() {
        let summaries = summarize(&cohort());
        let order: Vec<Segment> = summaries.iter().map(|summary| summary.segment).collect();
        assert_eq!(order, vec![Segment::Vip, Segment::Frequent, Segment::AtRisk, Segment::Inactive]);
        assert_eq!(summaries[0].revenue, Decimal::from(3000));
        assert_eq!(summaries[0].customers, 1);
    }

    #[test]
    fn summary_ties_keep_first_appearance() {
        let (_, scored) = score_cohort(
            vec![
                customer("c1", "Ana", "11987654321", 1, 50, 90),
                customer("c2", "Bia", "11912345678", 1, 50, 35),
            ],
            now(),
        );
        let order: Vec<Segment> = summarize(&scored).iter().map(|summary| summary.segment).collect();
        assert_eq!(order, vec![Segment::Inactive, Segment::AtRisk]);
    }

    #[test]
    fn counts_cover_every_segment() {
        let counts = segment_counts(&cohort());
        assert_eq!(counts.len(), 6);
        assert_eq!(counts[0], (Segment::Vip, 1));
        assert!(counts.contains(&(Segment::Disengaged, 0)));
    }

    #[test]
    fn filter_matches_name_case_insensitively_or_phone() {
        let customers = cohort();
        let by_name = CustomerFilter { search: Some("ana".to_owned()), segment: None };
        let names: Vec<&str> =
            by_name.apply(&customers).iter().map(|scored| scored.customer.name.as_str()).collect();
        assert_eq!(names, vec!["Ana Souza", "Ana Paula"]);

        let by_phone = CustomerFilter { search: Some("2195".to_owned()), segment: None };
        assert_eq!(by_phone.apply(&customers).len(), 1);

        let by_segment = CustomerFilter { search: Some("ana".to_owned()), segment: Some(Segment::Inactive) };
        assert_eq!(by_segment.apply(&customers)[0].customer.id.0, "c4");

        assert_eq!(CustomerFilter::default().apply(&customers).len(), 4);
    }

    #[test]
    fn selection_toggles_and_selects_visible() {
        let customers = cohort();
        let mut selection = Selection::default();
        selection.toggle(&CustomerId("c3".to_owned()));
        selection.toggle(&CustomerId("c1".to_owned()));
        assert_eq!(selection.len(), 2);

        let selected: Vec<&str> =
            selection.selected(&customers).iter().map(|scored| scored.customer.id.0.as_str()).collect();
        assert_eq!(selected, vec!["c1", "c3"]);

        selection.toggle(&CustomerId("c3".to_owned()));
        assert!(!selection.contains(&CustomerId("c3".to_owned())));

        let visible = CustomerFilter { search: Some("ana".to_owned()), segment: None }.apply(&customers);
        selection.toggle_all(&visible);
        assert_eq!(selection.ids(), &[CustomerId("c1".to_owned()), CustomerId("c4".to_owned())]);
        selection.toggle_all(&visible);
        assert!(selection.is_empty());
    }

    #[test]
    fn export_rows_use_local_formats() {
        let customers = cohort();
        let rows = export_rows(&[&customers[0]]);
        assert_eq!(rows[0].segment, "VIP");
        assert_eq!(rows[0].customer_since, "02/11/2023");
        assert_eq!(rows[0].last_order, "28/05/2024");
        assert_eq!(rows[0].total_spent, "R$ 3.000,00");
    }

    #[test]
    fn brl_formatting_groups_thousands() {
        assert_eq!(format_brl(Decimal::new(123456789, 2)), "R$ 1.234.567,89");
        assert_eq!(format_brl(Decimal::new(5, 1)), "R$ 0,50");
        assert_eq!(format_brl(Decimal::ZERO), "R$ 0,00");
        assert_eq!(format_brl(Decimal::new(999995, 3)), "R$ 1.000,00");
    }
}
