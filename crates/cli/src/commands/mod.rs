pub mod campaign;
pub mod config;
pub mod connect;
pub mod customers;
pub mod import;
pub mod migrate;
pub mod segments;
pub mod sync;

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use guru_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat, LoggingConfig};
use guru_core::errors::ApplicationError;
use guru_core::ingest::{IngestionPipeline, SourceError};
use guru_db::{connect_with_settings, migrations, DbPool, SqlCustomerStore, SqlIntegrationRepository};
use guru_delmatch::DelMatchError;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Why a command stopped, with the exit code it maps to.
#[derive(Debug)]
pub(crate) struct Failure {
    error_class: &'static str,
    message: String,
    exit_code: u8,
}

impl Failure {
    pub(crate) fn new(error_class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self { error_class, message: message.into(), exit_code }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::new("invalid_input", message, 6)
    }
}

impl From<ApplicationError> for Failure {
    fn from(error: ApplicationError) -> Self {
        let (error_class, exit_code) = match &error {
            ApplicationError::Configuration(_) => ("config_validation", 2),
            ApplicationError::Persistence(_) => ("db_connectivity", 4),
            ApplicationError::Domain(_) => ("invalid_input", 6),
            ApplicationError::NotFound(_) => ("not_found", 7),
            ApplicationError::Integration(_) => ("integration", 8),
        };
        Self::new(error_class, error.to_string(), exit_code)
    }
}

impl From<SourceError> for Failure {
    fn from(error: SourceError) -> Self {
        ApplicationError::from(error).into()
    }
}

impl From<DelMatchError> for Failure {
    fn from(error: DelMatchError) -> Self {
        SourceError::from(error).into()
    }
}

/// What a successful command reports.
pub(crate) struct Outcome {
    message: String,
    data: Option<Value>,
}

impl Outcome {
    pub(crate) fn message(message: impl Into<String>) -> Self {
        Self { message: message.into(), data: None }
    }

    pub(crate) fn with_data(message: impl Into<String>, data: &impl Serialize) -> Result<Self, Failure> {
        let data = serde_json::to_value(data)
            .map_err(|error| Failure::new("serialization", error.to_string(), 1))?;
        Ok(Self { message: message.into(), data: Some(data) })
    }
}

/// Loads configuration, connects, applies pending migrations and runs `body`
/// on a fresh single-threaded runtime.
pub(crate) fn execute<F, Fut>(command: &str, overrides: ConfigOverrides, body: F) -> CommandResult
where
    F: FnOnce(AppConfig, DbPool) -> Fut,
    Fut: Future<Output = Result<Outcome, Failure>>,
{
    let config = match AppConfig::load(LoadOptions { overrides, ..LoadOptions::default() }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    init_logging(&config.logging);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| Failure::new("db_connectivity", error.to_string(), 4))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| Failure::new("migration", error.to_string(), 5))?;
        let outcome = body(config, pool.clone()).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(outcome) => CommandResult::success_with_data(command, outcome.message, outcome.data),
        Err(failure) => {
            CommandResult::failure(command, failure.error_class, failure.message, failure.exit_code)
        }
    }
}

/// Logs go to stderr so stdout carries only the JSON payload.
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let _ = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub(crate) struct Stores {
    pub customers: Arc<SqlCustomerStore>,
    pub integrations: Arc<SqlIntegrationRepository>,
}

impl Stores {
    pub(crate) fn new(pool: &DbPool) -> Self {
        Self {
            customers: Arc::new(SqlCustomerStore::new(pool.clone())),
            integrations: Arc::new(SqlIntegrationRepository::new(pool.clone())),
        }
    }

    pub(crate) fn pipeline(&self, config: &AppConfig) -> IngestionPipeline {
        IngestionPipeline::new(
            self.customers.clone(),
            self.integrations.clone(),
            config.ingest_settings(),
        )
    }
}
