use chrono::Utc;
use clap::Args;

use guru_core::config::ConfigOverrides;
use guru_core::dashboard::dashboard_metrics;
use guru_core::domain::customer::TenantId;
use guru_core::errors::ApplicationError;
use guru_core::segments::{format_brl, score_cohort};
use guru_core::store::CustomerStore;

use crate::commands::{execute, CommandResult, Outcome, Stores};

#[derive(Debug, Args)]
pub struct SegmentsArgs {
    #[arg(long)]
    pub tenant: String,
}

pub fn run(args: SegmentsArgs) -> CommandResult {
    execute("segments", ConfigOverrides::default(), move |_config, pool| async move {
        let tenant = TenantId(args.tenant);
        let stores = Stores::new(&pool);
        let customers = stores.customers.list_customers(&tenant).await.map_err(ApplicationError::from)?;
        let order_dates =
            stores.customers.list_order_dates(&tenant).await.map_err(ApplicationError::from)?;

        let now = Utc::now();
        let (baseline, scored) = score_cohort(customers, now);
        let metrics = dashboard_metrics(&scored, &baseline, &order_dates, now);

        let message = format!(
            "{} customers, average ticket {}, retention {}%",
            metrics.total_customers,
            format_brl(metrics.average_ticket),
            metrics.retention_rate
        );
        Outcome::with_data(message, &metrics)
    })
}
