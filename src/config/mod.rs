//! Typed configuration.
//!
//! Process settings load once at startup from environment variables and
//! fail fast if required vars are missing. Engine tunables come from an
//! optional TOML file; every field has a default.

pub mod secrets;

use crate::error::{Error, Result};
use chrono::Duration;
use secrets::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Path to the engine tunables file, if any.
    pub rotation_config: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            rotation_config: std::env::var("ROTATION_CONFIG").ok().map(PathBuf::from),
        })
    }

    /// Engine tunables from `ROTATION_CONFIG`, or defaults when unset.
    pub fn engine(&self) -> Result<EngineConfig> {
        match self.rotation_config {
            Some(ref path) => EngineConfig::load(path),
            None => Ok(EngineConfig::default()),
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct EngineConfigFile {
    #[serde(default)]
    rotation: EngineConfig,
}

/// SLA windows, scan thresholds and batching limits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hours an accepted solicitor has to complete the search.
    pub sla_window_hours: i64,
    /// Hours after acceptance before a reminder goes out.
    pub reminder_after_hours: i64,
    /// Hours each candidate has to respond; also the stagger between the
    /// scheduled turns of consecutive candidates.
    pub response_window_hours: i64,
    /// Slack added on top of the response window before rerouting.
    pub reroute_grace_minutes: i64,
    /// Rows per page in bulk flag updates.
    pub bulk_page_size: usize,
    /// Attempts a conditional write gets before a conflict is surfaced.
    pub cas_max_attempts: u32,
    /// Period of the control plane's tick.
    pub tick_interval_secs: u64,
    /// Capacity of the control plane's command channel.
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sla_window_hours: 72,
            reminder_after_hours: 24,
            response_window_hours: 24,
            reroute_grace_minutes: 5,
            bulk_page_size: 20_000,
            cas_max_attempts: 3,
            tick_interval_secs: 60,
            command_buffer: 256,
        }
    }
}

impl EngineConfig {
    /// Parse a `[rotation]` table from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read rotation config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("bad rotation config {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: EngineConfigFile =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        file.rotation.validate()?;
        Ok(file.rotation)
    }

    fn validate(&self) -> Result<()> {
        if self.sla_window_hours <= 0 || self.response_window_hours <= 0 {
            return Err(Error::Config("windows must be positive".to_string()));
        }
        if self.reminder_after_hours < 0 || self.reminder_after_hours >= self.sla_window_hours {
            return Err(Error::Config(
                "reminder_after_hours must fall inside the SLA window".to_string(),
            ));
        }
        if self.bulk_page_size == 0 || self.cas_max_attempts == 0 {
            return Err(Error::Config(
                "bulk_page_size and cas_max_attempts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sla_window(&self) -> Duration {
        Duration::hours(self.sla_window_hours)
    }

    pub fn reminder_after(&self) -> Duration {
        Duration::hours(self.reminder_after_hours)
    }

    pub fn response_window(&self) -> Duration {
        Duration::hours(self.response_window_hours)
    }

    pub fn reroute_grace(&self) -> Duration {
        Duration::minutes(self.reroute_grace_minutes)
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_interval_secs.max(1))
    }
}
