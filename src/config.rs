use std::path::PathBuf;

use once_cell::sync::OnceCell;
use serde::Deserialize;

pub mod app_env;

pub use app_env::app_env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub dispatch: DispatchSettings,
    pub rates: RatesSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl ApplicationSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub db_name: String,
}

impl DatabaseSettings {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.db_name
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    pub redis_url: String,
    pub presence_ttl_seconds: u64,
    pub offline_after_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSettings {
    pub default_shard_size: usize,
    pub push_timeout_ms: u64,
    pub dispatch_timeout_ms: u64,
    pub stale_shard_seconds: i64,
    pub reclaim_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RatesSettings {
    pub default_send_price: f64,
    pub default_fail_price: f64,
}

static SETTINGS: OnceCell<Settings> = OnceCell::new();

/// Loads settings once, from an optional explicit config directory (falling
/// back to `./config`), the `APP_ENV`-named overlay, then `SHARDHUB_`-prefixed
/// environment variables. Subsequent calls are no-ops; use `settings()` to
/// read the already-loaded value.
pub fn load_settings(
    config_path: Option<PathBuf>,
) -> Result<&'static Settings, config::ConfigError> {
    if let Some(settings) = SETTINGS.get() {
        return Ok(settings);
    }

    let config_dir = config_path.unwrap_or_else(|| {
        std::env::current_dir()
            .expect("the current directory to be available")
            .join("config")
    });

    let settings = config::Config::builder()
        .add_source(config::File::from(config_dir.join("base")).required(true))
        .add_source(config::File::from(config_dir.join(app_env().as_str())).required(true))
        .add_source(config::Environment::with_prefix("SHARDHUB").separator("__"))
        .build()?
        .try_deserialize()?;

    Ok(SETTINGS.get_or_init(|| settings))
}

/// Reads already-loaded settings. Panics if `load_settings` has not run --
/// every entrypoint (`serve`, `migrate`, `seed`, tests) calls it first.
pub fn settings() -> &'static Settings {
    SETTINGS.get().expect("settings to have been loaded")
}
