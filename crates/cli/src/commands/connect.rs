use std::env;

use chrono::Utc;
use clap::Args;
use secrecy::SecretString;
use serde_json::json;

use guru_core::config::ConfigOverrides;
use guru_core::domain::customer::TenantId;
use guru_delmatch::{connect_integration, ConnectRequest, DelMatchClient};

use crate::commands::{execute, CommandResult, Failure, Outcome, Stores};

pub const PASSWORD_ENV: &str = "GURU_DELMATCH_PASSWORD";

#[derive(Debug, Args)]
pub struct ConnectArgs {
    #[arg(long)]
    pub tenant: String,
    #[arg(long, help = "Store address, e.g. https://loja.delmatchcardapio.com")]
    pub url: String,
    #[arg(long)]
    pub email: String,
    #[arg(long, help = "Account password; falls back to GURU_DELMATCH_PASSWORD")]
    pub password: Option<String>,
    #[arg(long, help = "Feed URL used by `guru sync --historical`")]
    pub historical_url: Option<String>,
}

pub fn run(args: ConnectArgs) -> CommandResult {
    let password = match args.password.clone().or_else(|| env::var(PASSWORD_ENV).ok()) {
        Some(password) if !password.is_empty() => SecretString::from(password),
        _ => {
            return CommandResult::failure(
                "connect",
                "invalid_input",
                format!("password is required (--password or {PASSWORD_ENV})"),
                6,
            );
        }
    };

    execute("connect", ConfigOverrides::default(), move |config, pool| async move {
        let client = DelMatchClient::new(&config.delmatch)?;
        let stores = Stores::new(&pool);
        let request = ConnectRequest {
            tenant: TenantId(args.tenant),
            api_base_url: args.url,
            email: args.email,
            password,
            historical_orders_url: args.historical_url.filter(|url| !url.trim().is_empty()),
            sync_interval_minutes: Some(config.sync.interval_minutes),
        };
        let integration =
            connect_integration(&client, stores.integrations.as_ref(), request, Utc::now())
                .await
                .map_err(Failure::from)?;

        Outcome::with_data(
            format!("connected to {}", integration.api_base_url),
            &json!({
                "tenant": integration.tenant_id.0,
                "api_base_url": integration.api_base_url,
                "token_expires_at": integration.expires_at,
                "historical_orders_url": integration.historical_orders_url,
                "sync_enabled": integration.sync_enabled,
            }),
        )
    })
}
