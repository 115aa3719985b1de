use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ingest::{CsvImportMode, IngestSettings};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    pub delmatch: DelMatchConfig,
    pub sync: SyncConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub chunk_size: usize,
    pub csv_mode: CsvImportMode,
    pub max_orders_per_row: u32,
}

#[derive(Clone, Debug)]
pub struct DelMatchConfig {
    pub request_timeout_secs: u64,
    pub scheme: UrlScheme,
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub enabled: bool,
    /// Default interval for integrations created without one.
    pub interval_minutes: u32,
    pub tick_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlScheme {
    Https,
    Http,
}

impl UrlScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Http => "http",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub chunk_size: Option<usize>,
    pub csv_mode: Option<CsvImportMode>,
    pub sync_enabled: Option<bool>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        let ingest = IngestSettings::default();
        Self {
            database: DatabaseConfig {
                url: "sqlite://guru.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            ingest: IngestConfig {
                chunk_size: ingest.chunk_size,
                csv_mode: ingest.csv_mode,
                max_orders_per_row: ingest.max_orders_per_row,
            },
            delmatch: DelMatchConfig { request_timeout_secs: 30, scheme: UrlScheme::Https },
            sync: SyncConfig { enabled: true, interval_minutes: 60, tick_secs: 300 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl std::str::FromStr for UrlScheme {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "https" => Ok(Self::Https),
            "http" => Ok(Self::Http),
            other => Err(ConfigError::Validation(format!(
                "unsupported delmatch scheme `{other}` (expected https|http)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("guru.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Pipeline settings handed to `IngestionPipeline::new`.
    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            chunk_size: self.ingest.chunk_size,
            csv_mode: self.ingest.csv_mode,
            max_orders_per_row: self.ingest.max_orders_per_row,
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(ingest) = patch.ingest {
            if let Some(chunk_size) = ingest.chunk_size {
                self.ingest.chunk_size = chunk_size;
            }
            if let Some(csv_mode) = ingest.csv_mode {
                self.ingest.csv_mode = csv_mode;
            }
            if let Some(max_orders_per_row) = ingest.max_orders_per_row {
                self.ingest.max_orders_per_row = max_orders_per_row;
            }
        }

        if let Some(delmatch) = patch.delmatch {
            if let Some(request_timeout_secs) = delmatch.request_timeout_secs {
                self.delmatch.request_timeout_secs = request_timeout_secs;
            }
            if let Some(scheme) = delmatch.scheme {
                self.delmatch.scheme = scheme;
            }
        }

        if let Some(sync) = patch.sync {
            if let Some(enabled) = sync.enabled {
                self.sync.enabled = enabled;
            }
            if let Some(interval_minutes) = sync.interval_minutes {
                self.sync.interval_minutes = interval_minutes;
            }
            if let Some(tick_secs) = sync.tick_secs {
                self.sync.tick_secs = tick_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("GURU_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("GURU_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("GURU_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("GURU_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("GURU_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("GURU_INGEST_CHUNK_SIZE") {
            self.ingest.chunk_size = parse_usize("GURU_INGEST_CHUNK_SIZE", &value)?;
        }
        if let Some(value) = read_env("GURU_INGEST_MAX_ORDERS_PER_ROW") {
            self.ingest.max_orders_per_row = parse_u32("GURU_INGEST_MAX_ORDERS_PER_ROW", &value)?;
        }
        if let Some(value) = read_env("GURU_INGEST_CSV_MODE") {
            self.ingest.csv_mode = value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                key: "GURU_INGEST_CSV_MODE".to_string(),
                value: value.clone(),
            })?;
        }

        if let Some(value) = read_env("GURU_DELMATCH_REQUEST_TIMEOUT_SECS") {
            self.delmatch.request_timeout_secs =
                parse_u64("GURU_DELMATCH_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("GURU_DELMATCH_SCHEME") {
            self.delmatch.scheme = value.parse()?;
        }

        if let Some(value) = read_env("GURU_SYNC_ENABLED") {
            self.sync.enabled = parse_bool("GURU_SYNC_ENABLED", &value)?;
        }
        if let Some(value) = read_env("GURU_SYNC_INTERVAL_MINUTES") {
            self.sync.interval_minutes = parse_u32("GURU_SYNC_INTERVAL_MINUTES", &value)?;
        }
        if let Some(value) = read_env("GURU_SYNC_TICK_SECS") {
            self.sync.tick_secs = parse_u64("GURU_SYNC_TICK_SECS", &value)?;
        }

        if let Some(value) = read_env("GURU_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("GURU_SERVER_PORT") {
            self.server.port = parse_u16("GURU_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("GURU_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("GURU_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("GURU_LOGGING_LEVEL").or_else(|| read_env("GURU_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("GURU_LOGGING_FORMAT").or_else(|| read_env("GURU_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(chunk_size) = overrides.chunk_size {
            self.ingest.chunk_size = chunk_size;
        }
        if let Some(csv_mode) = overrides.csv_mode {
            self.ingest.csv_mode = csv_mode;
        }
        if let Some(enabled) = overrides.sync_enabled {
            self.sync.enabled = enabled;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_ingest(&self.ingest)?;
        validate_delmatch(&self.delmatch)?;
        validate_sync(&self.sync)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("guru.toml"), PathBuf::from("config/guru.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_ingest(ingest: &IngestConfig) -> Result<(), ConfigError> {
    if ingest.chunk_size == 0 {
        return Err(ConfigError::Validation(
            "ingest.chunk_size must be greater than zero".to_string(),
        ));
    }
    if ingest.max_orders_per_row == 0 {
        return Err(ConfigError::Validation(
            "ingest.max_orders_per_row must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_delmatch(delmatch: &DelMatchConfig) -> Result<(), ConfigError> {
    if delmatch.request_timeout_secs == 0 || delmatch.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "delmatch.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    Ok(())
}

fn validate_sync(sync: &SyncConfig) -> Result<(), ConfigError> {
    if sync.interval_minutes == 0 {
        return Err(ConfigError::Validation(
            "sync.interval_minutes must be greater than zero".to_string(),
        ));
    }
    if sync.tick_secs == 0 {
        return Err(ConfigError::Validation(
            "sync.tick_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    ingest: Option<IngestPatch>,
    delmatch: Option<DelMatchPatch>,
    sync: Option<SyncPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct IngestPatch {
    chunk_size: Option<usize>,
    csv_mode: Option<CsvImportMode>,
    max_orders_per_row: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct DelMatchPatch {
    request_timeout_secs: Option<u64>,
    scheme: Option<UrlScheme>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncPatch {
    enabled: Option<bool>,
    interval_minutes: Option<u32>,
    tick_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, UrlScheme};
    use crate::ingest::CsvImportMode;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;
        ensure(config.ingest.chunk_size == 50, "default chunk size should be 50")?;
        ensure(
            config.ingest.max_orders_per_row == 1000,
            "rows should declare at most 1000 orders by default",
        )?;
        ensure(
            config.ingest.csv_mode == CsvImportMode::Additive,
            "csv imports should be additive by default",
        )?;
        ensure(config.sync.enabled, "periodic sync should be enabled by default")?;
        ensure(config.delmatch.scheme == UrlScheme::Https, "delmatch should default to https")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_GURU_DB_PATH", "/var/lib/guru/tenants.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("guru.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://${TEST_GURU_DB_PATH}"

[ingest]
chunk_size = 200
csv_mode = "natural_key"
max_orders_per_row = 250
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite:///var/lib/guru/tenants.db",
                "database url should be interpolated from environment",
            )?;
            let settings = config.ingest_settings();
            ensure(settings.chunk_size == 200, "chunk size should come from file")?;
            ensure(settings.max_orders_per_row == 250, "order cap should come from file")?;
            ensure(
                settings.csv_mode == CsvImportMode::NaturalKey,
                "csv mode should come from file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_GURU_DB_PATH"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("guru.toml");
        fs::write(&path, "[database]\nurl = \"${GURU_TEST_UNSET_VARIABLE}\"\n")
            .map_err(|err| err.to_string())?;

        let error =
            match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            {
                Ok(_) => return Err("expected interpolation failure".to_string()),
                Err(error) => error,
            };
        ensure(
            matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "GURU_TEST_UNSET_VARIABLE"),
            "error should name the missing variable",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("GURU_LOG_LEVEL", "warn");
        env::set_var("GURU_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["GURU_LOG_LEVEL", "GURU_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("GURU_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("GURU_SYNC_INTERVAL_MINUTES", "15");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("guru.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[sync]
interval_minutes = 30
tick_secs = 60

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.sync.interval_minutes == 15, "env interval should win over file")?;
            ensure(config.sync.tick_secs == 60, "file tick should win over defaults")?;
            Ok(())
        })();

        clear_vars(&["GURU_DATABASE_URL", "GURU_SYNC_INTERVAL_MINUTES"]);
        result
    }

    #[test]
    fn invalid_env_override_names_the_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("GURU_INGEST_CHUNK_SIZE", "lots");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "GURU_INGEST_CHUNK_SIZE"),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["GURU_INGEST_CHUNK_SIZE"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides { chunk_size: Some(0), ..ConfigOverrides::default() },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("ingest.chunk_size")),
            "validation failure should mention ingest.chunk_size",
        )?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/guru".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected database url validation failure".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("database.url")),
            "validation failure should mention database.url",
        )
    }

    #[test]
    fn zero_order_cap_from_env_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("GURU_INGEST_MAX_ORDERS_PER_ROW", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected validation failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::Validation(ref message) if message.contains("ingest.max_orders_per_row")),
                "validation failure should mention ingest.max_orders_per_row",
            )
        })();

        clear_vars(&["GURU_INGEST_MAX_ORDERS_PER_ROW"]);
        result
    }

    #[test]
    fn required_file_must_exist() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("absent.toml");
        let result = AppConfig::load(LoadOptions {
            config_path: Some(path),
            require_file: true,
            ..LoadOptions::default()
        });
        ensure(
            matches!(result, Err(ConfigError::MissingConfigFile(_))),
            "missing required file should fail",
        )
    }
}
