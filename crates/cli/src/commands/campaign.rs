use chrono::{DateTime, Utc};
use clap::Args;
use serde_json::json;

use guru_core::audit::{OperationKind, OperationLogEntry};
use guru_core::campaign::{plan_campaign, CampaignCriteria, CampaignDraft, SendMode};
use guru_core::config::ConfigOverrides;
use guru_core::domain::customer::TenantId;
use guru_core::errors::ApplicationError;
use guru_core::segments::score_cohort;
use guru_core::store::CustomerStore;
use guru_db::{CampaignRepository, SqlCampaignRepository};

use crate::commands::{execute, CommandResult, Failure, Outcome, Stores};

#[derive(Debug, Args)]
pub struct CampaignArgs {
    #[arg(long)]
    pub tenant: String,
    #[arg(long, help = "Approved WhatsApp template name")]
    pub template: String,
    #[arg(long)]
    pub message: String,
    #[arg(long)]
    pub segment: Option<String>,
    #[arg(long, help = "Minimum total spent, e.g. 150,00")]
    pub min_spent: Option<String>,
    #[arg(long, help = "Exact last order date, dd/mm/yyyy")]
    pub last_order: Option<String>,
    #[arg(long)]
    pub customer: Option<String>,
    #[arg(long, help = "RFC 3339 send time; omitted means send now")]
    pub schedule: Option<String>,
    #[arg(long, help = "Show the audience without storing the campaign")]
    pub dry_run: bool,
}

pub fn run(args: CampaignArgs) -> CommandResult {
    execute("campaign", ConfigOverrides::default(), move |_config, pool| async move {
        let criteria = CampaignCriteria::parse(
            args.segment.as_deref(),
            args.min_spent.as_deref(),
            args.last_order.as_deref(),
            args.customer.as_deref(),
        )
        .map_err(ApplicationError::from)?;
        let send_mode = match args.schedule.as_deref() {
            None => SendMode::Now,
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|at| SendMode::Scheduled(at.with_timezone(&Utc)))
                .map_err(|error| Failure::invalid_input(format!("invalid schedule `{raw}`: {error}")))?,
        };

        let tenant = TenantId(args.tenant);
        let store = Stores::new(&pool).customers;
        let now = Utc::now();
        let customers = store.list_customers(&tenant).await.map_err(ApplicationError::from)?;
        let (_, scored) = score_cohort(customers, now);

        let draft = CampaignDraft {
            template_name: args.template,
            message: args.message,
            criteria,
            send_mode,
        };
        let plan = plan_campaign(&tenant, draft, &scored, now).map_err(ApplicationError::from)?;

        if args.dry_run {
            return Outcome::with_data(
                format!("{} recipients would receive `{}`", plan.recipients.len(), plan.name),
                &plan,
            );
        }

        SqlCampaignRepository::new(pool.clone())
            .save_campaign(&plan)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        let entry = OperationLogEntry::new(
            tenant,
            OperationKind::CreateCampaign,
            "whatsapp_campaign",
            Some(plan.id.clone()),
            now,
        )
        .with_detail("recipients", plan.recipients.len().to_string())
        .with_detail("status", plan.status.as_str());
        store.record_operation(&entry).await.map_err(ApplicationError::from)?;

        Outcome::with_data(
            format!("campaign `{}` queued for {} recipients", plan.name, plan.recipients.len()),
            &json!({
                "id": plan.id,
                "name": plan.name,
                "status": plan.status.as_str(),
                "scheduled_at": plan.scheduled_at,
                "recipients": plan.recipients.len(),
            }),
        )
    })
}
