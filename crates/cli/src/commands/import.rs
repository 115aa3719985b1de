use std::path::PathBuf;

use chrono::Utc;
use clap::Args;

use guru_core::config::ConfigOverrides;
use guru_core::domain::customer::TenantId;
use guru_core::ingest::CsvImportMode;

use crate::commands::{execute, CommandResult, Failure, Outcome, Stores};

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[arg(long, help = "Tenant that owns the imported customers")]
    pub tenant: String,
    #[arg(long, help = "Path to the CSV export")]
    pub file: PathBuf,
    #[arg(long, help = "Repeat-import behaviour: additive or natural_key")]
    pub csv_mode: Option<CsvImportMode>,
}

pub fn run(args: ImportArgs) -> CommandResult {
    let overrides = ConfigOverrides { csv_mode: args.csv_mode, ..ConfigOverrides::default() };
    execute("import", overrides, move |config, pool| async move {
        let input = tokio::fs::read(&args.file).await.map_err(|error| {
            Failure::invalid_input(format!("could not read `{}`: {error}", args.file.display()))
        })?;

        let pipeline = Stores::new(&pool).pipeline(&config);
        let report = pipeline.import_csv(&TenantId(args.tenant), &input, Utc::now()).await?;
        Outcome::with_data(report.summary(), &report)
    })
}
