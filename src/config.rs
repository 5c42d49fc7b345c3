use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::{ClientConfig, EventLoopConfig, ReconnectConfig};
use crate::esl::EslConnectorConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub esl: EslConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EslConfig {
    pub addr: String,
    pub password: String,
    pub connect_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub liveness_interval_ms: u64,
    pub read_failure_pause_ms: u64,
    pub idle_poll_ms: u64,
    pub max_in_flight: usize,
    pub shutdown_grace_ms: u64,
}

impl Default for EslConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8021".to_string(),
            password: "ClueCon".to_string(),
            connect_timeout_ms: 10000,
            retry_delay_ms: 5000,
            liveness_interval_ms: 15000,
            read_failure_pause_ms: 1000,
            idle_poll_ms: 5000,
            max_in_flight: 256,
            shutdown_grace_ms: 5000,
        }
    }
}

impl EslConfig {
    pub fn connector(&self) -> EslConnectorConfig {
        EslConnectorConfig::new(&self.addr, &self.password)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
    }

    pub fn client(&self) -> ClientConfig {
        ClientConfig {
            reconnect: ReconnectConfig::new(
                Duration::from_millis(self.retry_delay_ms),
                Duration::from_millis(self.liveness_interval_ms),
            ),
            event_loop: EventLoopConfig {
                read_failure_pause: Duration::from_millis(self.read_failure_pause_ms),
                idle_poll: Duration::from_millis(self.idle_poll_ms),
                max_in_flight: self.max_in_flight,
            },
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("callsink")
                .join("calls.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ApiConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            esl: EslConfig::default(),
            storage: StorageConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain, then apply environment overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file(config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn load_file(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Primary ~/.config/<project>/<project>.yml, then ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let mut candidates = Vec::new();
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join(project_name).join(format!("{}.yml", project_name)));
        }
        candidates.push(PathBuf::from(format!("{}.yml", project_name)));

        Ok(Self::load_first(&candidates))
    }

    /// First candidate that exists and parses; a broken one is logged and skipped.
    fn load_first(candidates: &[PathBuf]) -> Self {
        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => {
                    log::warn!("Failed to load config from {}: {:#}", path.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Self::default()
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Level from `log_level`; unset means info.
    pub fn log_filter(&self) -> Result<log::LevelFilter> {
        match self.log_level.as_deref() {
            None => Ok(log::LevelFilter::Info),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| eyre::eyre!("Invalid log_level '{}'", raw)),
        }
    }

    /// Apply `ESL_ADDR`, `ESL_PASS`, `DATABASE_PATH` and `API_PORT` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("ESL_ADDR") {
            log::debug!("ESL_ADDR overrides esl.addr");
            self.esl.addr = addr;
        }
        if let Some(password) = lookup("ESL_PASS") {
            log::debug!("ESL_PASS overrides esl.password");
            self.esl.password = password;
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            log::debug!("DATABASE_PATH overrides storage.database_path");
            self.storage.database_path = PathBuf::from(path);
        }
        if let Some(port) = lookup("API_PORT") {
            self.api.port = port
                .trim()
                .parse()
                .map_err(|e| eyre::eyre!("Invalid API_PORT '{}': {}", port, e))?;
        }
        Ok(())
    }
}
