pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::campaign::CampaignArgs;
use commands::connect::ConnectArgs;
use commands::customers::CustomersArgs;
use commands::import::ImportArgs;
use commands::segments::SegmentsArgs;
use commands::sync::SyncArgs;

#[derive(Debug, Parser)]
#[command(
    name = "guru",
    about = "Delivery Guru operator CLI",
    long_about = "Import customer exports, sync Del Match orders, inspect RFM segments and queue WhatsApp campaigns.",
    after_help = "Examples:\n  guru migrate\n  guru import --tenant loja-1 --file clientes.csv\n  guru sync --tenant loja-1\n  guru segments --tenant loja-1"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Import a customer CSV export (semicolon or comma separated)")]
    Import(ImportArgs),
    #[command(about = "Connect a tenant to its Del Match store and store the access token")]
    Connect(ConnectArgs),
    #[command(about = "Pull Del Match orders for a tenant (recent feed or historical export)")]
    Sync(SyncArgs),
    #[command(about = "Show segment totals and dashboard metrics for a tenant")]
    Segments(SegmentsArgs),
    #[command(about = "List, export or delete a tenant's customers")]
    Customers(CustomersArgs),
    #[command(about = "Preview or create a WhatsApp campaign for a customer audience")]
    Campaign(CampaignArgs),
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Import(args) => commands::import::run(args),
        Command::Connect(args) => commands::connect::run(args),
        Command::Sync(args) => commands::sync::run(args),
        Command::Segments(args) => commands::segments::run(args),
        Command::Customers(args) => commands::customers::run(args),
        Command::Campaign(args) => commands::campaign::run(args),
        Command::Config => commands::config::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
