//! Loosely-typed rows exactly as the sources deliver them.
//!
//! Nothing in here is trusted. Every field is optional and numeric fields are kept
//! as raw JSON values; [`crate::normalize`] is the only way into the typed domain.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The fixed column set of the CSV export, after header trimming and lowercasing.
pub const CSV_COLUMNS: [&str; 12] = [
    "nome",
    "celular",
    "logradouro",
    "logradouro_numero",
    "complemento",
    "bairro",
    "cidade",
    "total",
    "total_pontos",
    "cliente_desde",
    "ticket_medio",
    "ultimo_pedido",
];

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvRow {
    pub nome: Option<String>,
    pub celular: Option<String>,
    pub logradouro: Option<String>,
    pub logradouro_numero: Option<String>,
    pub complemento: Option<String>,
    pub bairro: Option<String>,
    pub cidade: Option<String>,
    pub total: Option<String>,
    pub total_pontos: Option<String>,
    pub cliente_desde: Option<String>,
    pub ticket_medio: Option<String>,
    pub ultimo_pedido: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiOrderRow {
    pub id: Option<Value>,
    pub reference: Option<Value>,
    pub created_at: Option<String>,
    pub total_price: Option<Value>,
    pub delivery_fee: Option<Value>,
    pub customer: Option<ApiCustomer>,
    pub items: Option<Vec<ApiItem>>,
    pub payments: Option<Vec<ApiPayment>>,
    pub delivery_address: Option<ApiAddress>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiCustomer {
    pub id: Option<Value>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiItem {
    pub id: Option<Value>,
    pub name: Option<String>,
    pub quantity: Option<Value>,
    pub price: Option<Value>,
    pub total_price: Option<Value>,
    pub discount: Option<Value>,
    pub addition: Option<Value>,
    pub observations: Option<String>,
    pub sub_items: Option<Vec<ApiSubItem>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiSubItem {
    pub id: Option<Value>,
    pub name: Option<String>,
    pub quantity: Option<Value>,
    pub price: Option<Value>,
    pub total_price: Option<Value>,
    pub group: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiPayment {
    pub name: Option<String>,
    pub code: Option<String>,
    pub value: Option<Value>,
    pub prepaid: Option<bool>,
    pub issuer: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiAddress {
    pub city: Option<String>,
    // The API spells it `neighboardhood`.
    #[serde(alias = "neighborhood")]
    pub neighboardhood: Option<String>,
    pub street_name: Option<String>,
    pub street_number: Option<Value>,
    pub complement: Option<String>,
}

/// One raw input row, tagged by the source that produced it.
#[derive(Clone, Debug, PartialEq)]
pub enum RawRow {
    Csv(CsvRow),
    Api(Value),
    /// A record the source reader could not split into fields.
    Unreadable(String),
}

/// Text form of a scalar JSON value; blank strings, arrays and objects yield `None`.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Bool(value) => Some(value.to_string()),
        Value::Number(value) => Some(value.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
