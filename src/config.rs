use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub streams: StreamsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub preferences: PreferencesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamsConfig {
    #[serde(default = "default_signal_url")]
    pub signal_url: String,
    #[serde(default = "default_progress_url")]
    pub progress_url: String,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_true")]
    pub reconnect: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_max_signals")]
    pub max_signals: usize,
    #[serde(default = "default_min_conviction")]
    pub min_conviction: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanSettings {
    #[serde(default = "default_watchdog")]
    pub watchdog_secs: u64,
    #[serde(default = "default_grace")]
    pub completion_grace_secs: u64,
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

/// Filters sent with the snapshot request.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_risk")]
    pub risk: String,
    #[serde(default = "default_horizon")]
    pub horizon: String,
    #[serde(default)]
    pub sectors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreferencesConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_base_url() -> String { "http://localhost:8000/api".to_string() }
fn default_signal_url() -> String { "ws://localhost:8000/ws/recommendations".to_string() }
fn default_progress_url() -> String { "ws://localhost:8000/ws/scan-progress".to_string() }
fn default_reconnect_delay() -> u64 { 5 }
fn default_true() -> bool { true }
fn default_max_signals() -> usize { 50 }
fn default_min_conviction() -> f64 { 0.0 }
fn default_watchdog() -> u64 { 120 }
fn default_grace() -> u64 { 3 }
fn default_log_capacity() -> usize { 150 }
fn default_risk() -> String { "moderate".to_string() }
fn default_horizon() -> String { "swing".to_string() }
fn default_database_path() -> String { "signal_desk.db".to_string() }

impl Default for ApiConfig {
    fn default() -> Self {
        Self { base_url: default_base_url() }
    }
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            signal_url: default_signal_url(),
            progress_url: default_progress_url(),
            reconnect_delay_secs: default_reconnect_delay(),
            reconnect: true,
        }
    }
}

impl StreamsConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_signals: default_max_signals(),
            min_conviction: default_min_conviction(),
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            watchdog_secs: default_watchdog(),
            completion_grace_secs: default_grace(),
            log_capacity: default_log_capacity(),
        }
    }
}

impl ScanSettings {
    pub fn watchdog(&self) -> Duration {
        Duration::from_secs(self.watchdog_secs)
    }

    pub fn completion_grace(&self) -> Duration {
        Duration::from_secs(self.completion_grace_secs)
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            risk: default_risk(),
            horizon: default_horizon(),
            sectors: Vec::new(),
        }
    }
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self { database_path: default_database_path() }
    }
}

/// Deployment overrides read from the environment (and `.env`).
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub api_base_url: Option<String>,
    pub signal_stream_url: Option<String>,
    pub progress_stream_url: Option<String>,
    pub preferences_db_path: Option<String>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            tracing::warn!("Config file {} not found, using defaults", path);
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }

    /// Environment values win over the file.
    pub fn apply_env(mut self, env: EnvConfig) -> Self {
        if let Some(url) = env.api_base_url {
            self.api.base_url = url;
        }
        if let Some(url) = env.signal_stream_url {
            self.streams.signal_url = url;
        }
        if let Some(url) = env.progress_stream_url {
            self.streams.progress_url = url;
        }
        if let Some(path) = env.preferences_db_path {
            self.preferences.database_path = path;
        }
        self
    }
}

impl EnvConfig {
    pub fn load() -> Self {
        dotenv::dotenv().ok();

        Self {
            api_base_url: std::env::var("SIGNAL_API_BASE_URL").ok(),
            signal_stream_url: std::env::var("SIGNAL_STREAM_URL").ok(),
            progress_stream_url: std::env::var("PROGRESS_STREAM_URL").ok(),
            preferences_db_path: std::env::var("PREFERENCES_DB_PATH").ok(),
        }
    }
}
