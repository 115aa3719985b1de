use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::Args;
use serde::Serialize;

use guru_core::audit::{OperationKind, OperationLogEntry};
use guru_core::config::ConfigOverrides;
use guru_core::domain::customer::{CustomerId, TenantId};
use guru_core::errors::ApplicationError;
use guru_core::rfm::Segment;
use guru_core::segments::{export_rows, score_cohort, CustomerFilter, ScoredCustomer, Selection};
use guru_core::store::CustomerStore;

use crate::commands::{execute, CommandResult, Failure, Outcome, Stores};

#[derive(Debug, Args)]
pub struct CustomersArgs {
    #[arg(long)]
    pub tenant: String,
    #[arg(long, help = "Only customers in this segment (label or slug, e.g. \"Em risco\" or at_risk)")]
    pub segment: Option<Segment>,
    #[arg(long, help = "Case-insensitive match on name or phone")]
    pub search: Option<String>,
    #[arg(long, value_delimiter = ',', help = "Customer ids to select; defaults to every listed customer")]
    pub ids: Vec<String>,
    #[arg(long, help = "Write the selected customers to this CSV file")]
    pub export: Option<PathBuf>,
    #[arg(long, requires = "ids", help = "Delete the selected customers and their orders")]
    pub delete: bool,
}

#[derive(Debug, Serialize)]
struct CustomerLine<'a> {
    id: &'a str,
    name: &'a str,
    phone: &'a str,
    segment: &'static str,
    total_orders: u32,
    total_spent: String,
    last_order_date: Option<String>,
}

impl<'a> From<&'a ScoredCustomer> for CustomerLine<'a> {
    fn from(scored: &'a ScoredCustomer) -> Self {
        Self {
            id: &scored.customer.id.0,
            name: &scored.customer.name,
            phone: scored.customer.phone.as_str(),
            segment: scored.segment().label(),
            total_orders: scored.customer.total_orders,
            total_spent: scored.customer.total_spent.to_string(),
            last_order_date: scored.customer.last_order_date.map(|date| date.to_string()),
        }
    }
}

pub fn run(args: CustomersArgs) -> CommandResult {
    execute("customers", ConfigOverrides::default(), move |_config, pool| async move {
        let tenant = TenantId(args.tenant);
        let store = Stores::new(&pool).customers;
        let now = Utc::now();

        let customers = store.list_customers(&tenant).await.map_err(ApplicationError::from)?;
        let (_, scored) = score_cohort(customers, now);
        let filter = CustomerFilter { search: args.search, segment: args.segment };
        let visible = filter.apply(&scored);

        let mut selection = Selection::default();
        if args.ids.is_empty() {
            selection.toggle_all(&visible);
        } else {
            let wanted: Vec<CustomerId> = args.ids.iter().map(|id| CustomerId(id.trim().to_string())).collect();
            for scored in &visible {
                if wanted.contains(&scored.customer.id) {
                    selection.toggle(&scored.customer.id);
                }
            }
        }
        let selected = selection.selected(&scored);

        if let Some(path) = &args.export {
            write_export(path, &selected)?;
        }

        if args.delete {
            let deleted = store
                .delete_customers(&tenant, selection.ids())
                .await
                .map_err(ApplicationError::from)?;
            for id in selection.ids() {
                let entry = OperationLogEntry::new(
                    tenant.clone(),
                    OperationKind::DeleteCustomer,
                    "customer",
                    Some(id.0.clone()),
                    now,
                );
                store.record_operation(&entry).await.map_err(ApplicationError::from)?;
            }
            return Outcome::with_data(
                format!("deleted {deleted} customers"),
                &serde_json::json!({ "deleted": deleted }),
            );
        }

        let lines: Vec<CustomerLine<'_>> = selected.iter().map(|scored| CustomerLine::from(*scored)).collect();
        let message = match &args.export {
            Some(path) => format!("exported {} customers to {}", lines.len(), path.display()),
            None => format!("{} customers", lines.len()),
        };
        Outcome::with_data(message, &lines)
    })
}

fn write_export(path: &Path, selected: &[&ScoredCustomer]) -> Result<(), Failure> {
    let mut writer = csv::Writer::from_path(path).map_err(|error| export_failure(path, error))?;
    for row in export_rows(selected) {
        writer.serialize(row).map_err(|error| export_failure(path, error))?;
    }
    writer.flush().map_err(|error| export_failure(path, error))
}

fn export_failure(path: &Path, error: impl std::fmt::Display) -> Failure {
    Failure::new("export", format!("could not write `{}`: {error}", path.display()), 9)
}
