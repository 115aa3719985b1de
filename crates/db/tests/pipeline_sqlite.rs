use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{json, Value};

use guru_core::domain::customer::{OriginSystem, Phone, TenantId};
use guru_core::domain::integration::Integration;
use guru_core::domain::order::OrderReference;
use guru_core::ingest::{IngestSettings, IngestionPipeline, SyncMode};
use guru_core::store::{CustomerStore, IntegrationStore};
use guru_db::{connect_with_settings, migrations, SqlCustomerStore, SqlIntegrationRepository};

const CSV: &str = "nome;celular;logradouro;logradouro_numero;complemento;bairro;cidade;total;total_pontos;cliente_desde;ticket_medio;ultimo_pedido
Ana Souza;(11) 98765-4321;Rua A;10;;Centro;Campinas;3;0;10/01/2024;50,00;20/04/2024
Sem Telefone;;;;;;;1;0;10/01/2024;10,00;20/04/2024
";

struct Harness {
    customers: Arc<SqlCustomerStore>,
    integrations: Arc<SqlIntegrationRepository>,
    pipeline: IngestionPipeline,
}

async fn harness() -> Harness {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    let customers = Arc::new(SqlCustomerStore::new(pool.clone()));
    let integrations = Arc::new(SqlIntegrationRepository::new(pool));
    let pipeline =
        IngestionPipeline::new(customers.clone(), integrations.clone(), IngestSettings::default());
    Harness { customers, integrations, pipeline }
}

fn tenant() -> TenantId {
    TenantId("pizzaria-centro".to_string())
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("timestamp")
}

fn api_order(reference: u64, phone: &str) -> Value {
    json!({
        "reference": reference,
        "createdAt": "2024-04-30T20:15:00-03:00",
        "totalPrice": "42,50",
        "deliveryFee": 6,
        "customer": { "name": "Ana Souza", "phone": phone, "email": "ana@example.com" },
        "deliveryAddress": {
            "streetName": "Rua A",
            "streetNumber": "10",
            "neighboardhood": "Centro",
            "city": "Campinas"
        },
        "items": [{
            "name": "Pizza Grande",
            "quantity": 1,
            "price": 36.5,
            "totalPrice": 36.5,
            "subItems": [{ "name": "Borda Catupiry", "group": "Bordas", "totalPrice": "6,00" }]
        }],
        "payments": [{ "name": "Cartão", "value": 42.5, "prepaid": true, "code": "VISA" }]
    })
}

#[tokio::test]
async fn csv_then_api_merges_into_one_mixed_customer() {
    let h = harness().await;

    let report = h.pipeline.import_csv(&tenant(), CSV.as_bytes(), now()).await.expect("csv import");
    assert_eq!(report.customers_created, 1);
    assert_eq!(report.orders_created, 3);
    assert_eq!(report.rejections.invalid_phone, 1);

    let mut integration = Integration::new(
        tenant(),
        "pizzaria.delmatchcardapio.com",
        "dono@pizzaria.com",
        SecretString::from("pw".to_string()),
        now(),
    );
    integration.last_order_reference = Some(100);
    h.integrations.save_integration(&integration).await.expect("save integration");

    let report = h
        .pipeline
        .ingest_api_orders(
            &tenant(),
            vec![api_order(99, "11987654321"), api_order(101, "(11) 98765-4321")],
            SyncMode::Incremental,
            now(),
        )
        .await;
    assert_eq!(report.orders_skipped, 1, "reference below the mark is skipped");
    assert_eq!(report.customers_updated, 1);
    assert_eq!(report.orders_created, 1);
    assert_eq!(report.high_water_mark, Some(101));

    let ana = h
        .customers
        .find_customer_by_phone(&tenant(), &Phone::from_stored("11987654321"))
        .await
        .expect("find")
        .expect("customer exists");
    assert_eq!(ana.total_orders, 4);
    assert_eq!(ana.total_spent, Decimal::new(19250, 2));
    assert_eq!(ana.origin_system, OriginSystem::Mixed);
    assert_eq!(ana.email.as_deref(), Some("ana@example.com"));

    let order = h
        .customers
        .find_order(&tenant(), &OrderReference("101".to_string()))
        .await
        .expect("find order")
        .expect("order exists");
    assert_eq!(order.items.len(), 2);
    assert_eq!(order.items[1].name, "Borda Catupiry (Bordas)");
    assert_eq!(order.payments[0].issuer.as_deref(), Some("VISA"));

    assert_eq!(h.integrations.load_high_water_mark(&tenant()).await.expect("mark"), Some(101));
}

#[tokio::test]
async fn replayed_api_batch_changes_nothing() {
    let h = harness().await;
    let batch = vec![api_order(500, "11911112222"), api_order(501, "11911112222")];

    let first = h.pipeline.ingest_api_orders(&tenant(), batch.clone(), SyncMode::Historical, now()).await;
    assert_eq!(first.orders_created, 2);

    let second = h.pipeline.ingest_api_orders(&tenant(), batch, SyncMode::Historical, now()).await;
    assert_eq!(second.orders_created, 0);
    assert_eq!(second.orders_skipped, 2);

    let customers = h.customers.list_customers(&tenant()).await.expect("list");
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0].total_orders, 2);

    let operations = h.customers.list_operations(&tenant(), 50).await.expect("operations");
    assert_eq!(operations.len(), 4, "one customer create, one update and two orders");
}
