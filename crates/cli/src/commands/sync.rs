use chrono::Utc;
use clap::Args;

use guru_core::config::ConfigOverrides;
use guru_core::domain::customer::TenantId;
use guru_core::errors::ApplicationError;
use guru_core::ingest::SyncMode;
use guru_core::store::IntegrationStore;
use guru_delmatch::{sync_integration, DelMatchClient, TokenProvider};

use crate::commands::{execute, CommandResult, Outcome, Stores};

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[arg(long)]
    pub tenant: String,
    #[arg(long, help = "Backfill from the configured historical orders URL")]
    pub historical: bool,
}

pub fn run(args: SyncArgs) -> CommandResult {
    execute("sync", ConfigOverrides::default(), move |config, pool| async move {
        let tenant = TenantId(args.tenant);
        let stores = Stores::new(&pool);
        let integration = stores
            .integrations
            .find_integration(&tenant)
            .await
            .map_err(ApplicationError::from)?
            .ok_or_else(|| {
                ApplicationError::NotFound(format!("no Del Match integration for tenant `{}`", tenant.0))
            })?;

        let mode = if args.historical { SyncMode::Historical } else { SyncMode::Incremental };
        let tokens = TokenProvider::new(DelMatchClient::new(&config.delmatch)?, stores.integrations.clone());
        let pipeline = stores.pipeline(&config);
        let report = sync_integration(&pipeline, &tokens, integration, mode, Utc::now()).await?;
        Outcome::with_data(report.summary(), &report)
    })
}
