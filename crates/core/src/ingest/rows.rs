//! Per-source planning: turns one raw row into a reconciliation candidate plus
//! the orders it will create. Pure; the pipeline does all store access.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::customer::OriginSystem;
use crate::domain::order::{OrderItem, OrderPayment, OrderReference};
use crate::domain::source::{scalar_text, ApiItem, ApiOrderRow, ApiPayment, CsvRow};
use crate::ingest::CsvImportMode;
use crate::normalize::{
    compose_address, normalize_local_date, normalize_monetary, normalize_monetary_value,
    normalize_name, normalize_order_count, normalize_phone, normalize_timestamp, optional_text,
    DateFormat, RejectionReason,
};
use crate::reconcile::Candidate;

#[derive(Clone, Debug, PartialEq)]
pub struct CsvRowPlan {
    pub candidate: Candidate,
    /// Declared average ticket; each synthesized order carries this value.
    pub ticket: Decimal,
}

impl CsvRowPlan {
    /// References for the synthesized orders, one per declared order.
    pub fn references(&self, mode: CsvImportMode, run_id: &str, row: usize) -> Vec<OrderReference> {
        (1..=self.candidate.order_count)
            .map(|unit| match mode {
                CsvImportMode::Additive => OrderReference(format!("csv:{run_id}:{row}:{unit}")),
                CsvImportMode::NaturalKey => OrderReference(format!(
                    "csv:{}:{}:{}:{unit}",
                    self.candidate.phone,
                    self.candidate.customer_since,
                    self.candidate.last_order_date
                )),
            })
            .collect()
    }

    /// Synthesized orders are dated at UTC midnight of the declared last order.
    pub fn order_date(&self) -> DateTime<Utc> {
        midnight(self.candidate.last_order_date)
    }
}

/// Validates a CSV row in the order name, phone, dates, order count, ticket.
/// A declared count above `max_orders` is rejected before any order exists.
pub fn plan_csv_row(row: &CsvRow, max_orders: u32) -> Result<CsvRowPlan, RejectionReason> {
    let name = normalize_name(row.nome.as_deref().unwrap_or_default())?;
    let phone = normalize_phone(row.celular.as_deref().unwrap_or_default())?;
    let customer_since =
        normalize_local_date(row.cliente_desde.as_deref().unwrap_or_default(), DateFormat::DayMonthYear)?;
    let last_order_date =
        normalize_local_date(row.ultimo_pedido.as_deref().unwrap_or_default(), DateFormat::DayMonthYear)?;
    let order_count = normalize_order_count(row.total.as_deref().unwrap_or_default())?;
    if order_count > max_orders {
        return Err(RejectionReason::InvalidOrderCount);
    }
    let ticket = normalize_monetary(row.ticket_medio.as_deref().unwrap_or_default())?;
    let amount = ticket.checked_mul(Decimal::from(order_count)).ok_or(RejectionReason::InvalidAmount)?;

    let neighborhood = optional_text(row.bairro.as_deref());
    let city = optional_text(row.cidade.as_deref());
    let address = compose_address(
        row.logradouro.as_deref(),
        row.logradouro_numero.as_deref(),
        row.complemento.as_deref(),
        neighborhood.as_deref(),
        city.as_deref(),
    );

    Ok(CsvRowPlan {
        candidate: Candidate {
            source: OriginSystem::CsvImport,
            name,
            phone,
            email: None,
            address,
            neighborhood,
            city,
            customer_since,
            last_order_date,
            order_count,
            amount,
        },
        ticket,
    })
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApiOrderPlan {
    pub candidate: Candidate,
    pub reference: OrderReference,
    pub ordered_at: DateTime<Utc>,
    pub order_value: Decimal,
    pub delivery_fee: Decimal,
    pub items: Vec<OrderItem>,
    pub payments: Vec<OrderPayment>,
}

/// Validates one API order whose reference has already been checked.
pub fn plan_api_order(
    order: &ApiOrderRow,
    reference: OrderReference,
) -> Result<ApiOrderPlan, RejectionReason> {
    let customer = order.customer.clone().unwrap_or_default();
    let name = normalize_name(customer.name.as_deref().unwrap_or_default())?;
    let phone = normalize_phone(customer.phone.as_deref().unwrap_or_default())?;

    let created_at = order.created_at.as_deref().unwrap_or_default();
    let ordered_at = normalize_timestamp(created_at)?;
    let order_day = normalize_local_date(created_at, DateFormat::Iso8601)?;

    let order_value = normalize_monetary_value(order.total_price.as_ref().unwrap_or(&Value::Null))?;
    let delivery_fee = match &order.delivery_fee {
        None | Some(Value::Null) => Decimal::ZERO,
        Some(fee) => normalize_monetary_value(fee)?,
    };

    let delivery = order.delivery_address.clone().unwrap_or_default();
    let neighborhood = optional_text(delivery.neighboardhood.as_deref());
    let city = optional_text(delivery.city.as_deref());
    let street_number = delivery.street_number.as_ref().and_then(scalar_text);
    let address = compose_address(
        delivery.street_name.as_deref(),
        street_number.as_deref(),
        delivery.complement.as_deref(),
        neighborhood.as_deref(),
        city.as_deref(),
    );

    Ok(ApiOrderPlan {
        candidate: Candidate {
            source: OriginSystem::ExternalApi,
            name,
            phone,
            email: optional_text(customer.email.as_deref()),
            address,
            neighborhood,
            city,
            customer_since: order_day,
            last_order_date: order_day,
            order_count: 1,
            amount: order_value,
        },
        reference,
        ordered_at,
        order_value,
        delivery_fee,
        items: order.items.iter().flatten().flat_map(order_items).collect(),
        payments: order.payments.iter().flatten().map(order_payment).collect(),
    })
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::default()).and_utc()
}

fn money_or_zero(value: Option<&Value>) -> Decimal {
    value.and_then(|value| normalize_monetary_value(value).ok()).unwrap_or(Decimal::ZERO)
}

fn quantity(value: Option<&Value>) -> Decimal {
    value
        .and_then(|value| normalize_monetary_value(value).ok())
        .filter(|quantity| !quantity.is_zero())
        .unwrap_or(Decimal::ONE)
}

/// The item itself followed by its sub-items, each sub-item named `"<name> (<group>)"`.
fn order_items(item: &ApiItem) -> Vec<OrderItem> {
    let mut items = vec![OrderItem {
        name: optional_text(item.name.as_deref()).unwrap_or_else(|| "Item".to_owned()),
        quantity: quantity(item.quantity.as_ref()),
        price: money_or_zero(item.price.as_ref()),
        total_price: money_or_zero(item.total_price.as_ref()),
        discount: money_or_zero(item.discount.as_ref()),
        addition: money_or_zero(item.addition.as_ref()),
        external_code: item.id.as_ref().and_then(scalar_text),
        observations: optional_text(item.observations.as_deref()),
    }];

    for sub_item in item.sub_items.iter().flatten() {
        let base = optional_text(sub_item.name.as_deref()).unwrap_or_else(|| "Adicional".to_owned());
        let name = match optional_text(sub_item.group.as_deref()) {
            Some(group) => format!("{base} ({group})"),
            None => base,
        };
        let units = quantity(sub_item.quantity.as_ref());
        let price = sub_item
            .total_price
            .as_ref()
            .and_then(|value| normalize_monetary_value(value).ok())
            .unwrap_or_else(|| money_or_zero(sub_item.price.as_ref()));
        items.push(OrderItem {
            name,
            quantity: units,
            price,
            total_price: price.saturating_mul(units),
            discount: Decimal::ZERO,
            addition: Decimal::ZERO,
            external_code: sub_item.id.as_ref().and_then(scalar_text),
            observations: None,
        });
    }
    items
}

fn order_payment(payment: &ApiPayment) -> OrderPayment {
    OrderPayment {
        name: optional_text(payment.name.as_deref()).unwrap_or_else(|| "Pagamento".to_owned()),
        value: money_or_zero(payment.value.as_ref()),
        prepaid: payment.prepaid.unwrap_or(false),
        issuer: optional_text(payment.issuer.as_deref())
            .or_else(|| optional_text(payment.code.as_deref())),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{plan_api_order, plan_csv_row};
    use crate::domain::order::OrderReference;
    use crate::domain::source::{ApiOrderRow, CsvRow};
    use crate::ingest::{CsvImportMode, DEFAULT_MAX_ORDERS_PER_ROW};
    use crate::normalize::RejectionReason;

    const CAP: u32 = DEFAULT_MAX_ORDERS_PER_ROW;

    fn csv_row() -> CsvRow {
        CsvRow {
            nome: Some(" Ana Souza ".to_owned()),
            celular: Some("(11) 98765-4321".to_owned()),
            logradouro: Some("Rua das Flores".to_owned()),
            logradouro_numero: Some("120".to_owned()),
            complemento: Some("".to_owned()),
            bairro: Some("Centro".to_owned()),
            cidade: Some("Campinas".to_owned()),
            total: Some("3".to_owned()),
            total_pontos: Some("0".to_owned()),
            cliente_desde: Some("10/01/2024".to_owned()),
            ticket_medio: Some("R$ 50,00".to_owned()),
            ultimo_pedido: Some("20/04/2024".to_owned()),
        }
    }

    #[test]
    fn csv_row_becomes_candidate_with_declared_history() {
        let plan = plan_csv_row(&csv_row(), CAP).expect("row should validate");

        assert_eq!(plan.candidate.name, "Ana Souza");
        assert_eq!(plan.candidate.phone.as_str(), "11987654321");
        assert_eq!(plan.candidate.order_count, 3);
        assert_eq!(plan.ticket, Decimal::new(5000, 2));
        assert_eq!(plan.candidate.amount, Decimal::new(15000, 2));
        assert_eq!(
            plan.candidate.address.as_deref(),
            Some("Rua das Flores, nº 120, Centro, Campinas")
        );
        assert_eq!(plan.order_date().date_naive(), NaiveDate::from_ymd_opt(2024, 4, 20).expect("date"));
    }

    #[test]
    fn csv_validation_reports_the_first_failing_field() {
        let mut row = csv_row();
        row.celular = Some("1234".to_owned());
        row.cliente_desde = Some("31/02/2024".to_owned());
        assert_eq!(plan_csv_row(&row, CAP), Err(RejectionReason::InvalidPhone));

        row.celular = Some("11987654321".to_owned());
        assert_eq!(plan_csv_row(&row, CAP), Err(RejectionReason::InvalidDate));

        row.cliente_desde = Some("10/01/2024".to_owned());
        row.total = Some("dois".to_owned());
        assert_eq!(plan_csv_row(&row, CAP), Err(RejectionReason::InvalidOrderCount));

        row.total = Some("2".to_owned());
        row.ticket_medio = Some("-5".to_owned());
        assert_eq!(plan_csv_row(&row, CAP), Err(RejectionReason::InvalidAmount));

        row.nome = None;
        assert_eq!(plan_csv_row(&row, CAP), Err(RejectionReason::InvalidName));
    }

    #[test]
    fn declared_count_above_cap_is_rejected() {
        let mut row = csv_row();
        row.total = Some("4294967295".to_owned());
        assert_eq!(plan_csv_row(&row, CAP), Err(RejectionReason::InvalidOrderCount));

        row.total = Some("4".to_owned());
        assert_eq!(plan_csv_row(&row, 3), Err(RejectionReason::InvalidOrderCount));
        assert_eq!(plan_csv_row(&row, 4).map(|plan| plan.candidate.order_count), Ok(4));
    }

    #[test]
    fn ticket_times_count_past_decimal_range_is_invalid_amount() {
        let mut row = csv_row();
        row.total = Some("2".to_owned());
        row.ticket_medio = Some("50000000000000000000000000000".to_owned());
        assert_eq!(plan_csv_row(&row, CAP), Err(RejectionReason::InvalidAmount));
    }

    #[test]
    fn synthesized_references_depend_on_mode() {
        let plan = plan_csv_row(&csv_row(), CAP).expect("row should validate");

        let additive = plan.references(CsvImportMode::Additive, "run-1", 4);
        assert_eq!(additive.len(), 3);
        assert_eq!(additive[0].0, "csv:run-1:4:1");

        let natural = plan.references(CsvImportMode::NaturalKey, "run-1", 4);
        assert_eq!(natural[2].0, "csv:11987654321:2024-01-10:2024-04-20:3");
        assert_eq!(natural, plan.references(CsvImportMode::NaturalKey, "run-2", 9));
    }

    #[test]
    fn api_order_flattens_sub_items_and_payment_issuer() {
        let order: ApiOrderRow = serde_json::from_value(json!({
            "reference": 1201,
            "createdAt": "2024-05-02T21:30:00-03:00",
            "totalPrice": "89.90",
            "customer": { "name": "Bia", "phone": "+55 11 91234-5678", "email": " bia@mail.com " },
            "items": [{
                "id": 77,
                "name": "Pizza",
                "quantity": 1,
                "price": 60,
                "totalPrice": 70,
                "subItems": [{ "name": "Borda", "group": "Extras", "totalPrice": "10.00", "quantity": 1 }]
            }],
            "payments": [{ "name": "Cartão", "code": "VISA", "value": 89.9, "prepaid": true }],
            "deliveryAddress": { "streetName": "Av. Brasil", "streetNumber": 900, "neighboardhood": "Jardim", "city": "Santos" }
        }))
        .expect("order should decode");

        let plan = plan_api_order(&order, OrderReference("1201".to_owned())).expect("order should validate");

        assert_eq!(plan.delivery_fee, Decimal::ZERO);
        assert_eq!(plan.order_value, Decimal::new(8990, 2));
        assert_eq!(plan.candidate.email.as_deref(), Some("bia@mail.com"));
        // Local calendar day of the order, not the UTC one.
        assert_eq!(plan.candidate.last_order_date, NaiveDate::from_ymd_opt(2024, 5, 2).expect("date"));
        assert_eq!(plan.ordered_at.to_rfc3339(), "2024-05-03T00:30:00+00:00");
        assert_eq!(plan.items.len(), 2);
        assert_eq!(plan.items[1].name, "Borda (Extras)");
        assert_eq!(plan.items[1].price, Decimal::new(1000, 2));
        assert_eq!(plan.items[0].external_code.as_deref(), Some("77"));
        assert_eq!(plan.payments[0].issuer.as_deref(), Some("VISA"));
        assert_eq!(
            plan.candidate.address.as_deref(),
            Some("Av. Brasil, nº 900, Jardim, Santos")
        );
    }

    #[test]
    fn api_order_without_customer_phone_is_rejected() {
        let order: ApiOrderRow = serde_json::from_value(json!({
            "reference": 1202,
            "createdAt": "2024-05-02T21:30:00-03:00",
            "totalPrice": 10,
            "customer": { "name": "Caio" }
        }))
        .expect("order should decode");

        assert_eq!(
            plan_api_order(&order, OrderReference("1202".to_owned())),
            Err(RejectionReason::InvalidPhone)
        );
    }
}
