//! Festa configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FestaError, Result};
use crate::types::LeapDayPolicy;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FestaConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retraction: RetractionConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
}

impl FestaConfig {
    /// Load config from the default path (~/.festa/config.toml), falling back
    /// to defaults, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FestaError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| FestaError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| FestaError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Festa home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".festa")
    }

    /// `BOT_TOKEN`, `TIMEZONE` and `FESTA_ADMIN` take precedence over the file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("BOT_TOKEN").filter(|v| !v.is_empty()) {
            self.telegram.bot_token = token;
        }
        if let Some(tz) = lookup("TIMEZONE").filter(|v| !v.is_empty()) {
            self.scheduler.timezone = tz;
        }
        if let Some(admin) = lookup("FESTA_ADMIN").filter(|v| !v.is_empty()) {
            self.retraction.admin = admin;
        }
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.tz()?;
        if self.scheduler.fire_hour > 23 || self.scheduler.fire_minute > 59 {
            return Err(FestaError::Config(format!(
                "Invalid fire time {:02}:{:02}",
                self.scheduler.fire_hour, self.scheduler.fire_minute
            )));
        }
        if self.scheduler.guard_secs < 60 {
            return Err(FestaError::Config(
                "scheduler.guard_secs must be at least 60".into(),
            ));
        }
        if self.scheduler.guard_secs > MAX_GUARD_SECS {
            return Err(FestaError::Config(format!(
                "scheduler.guard_secs must be at most {MAX_GUARD_SECS}"
            )));
        }
        // Every trigger minute has to see at least one poll.
        if !(1..60).contains(&self.scheduler.poll_interval_secs) {
            return Err(FestaError::Config(
                "scheduler.poll_interval_secs must be between 1 and 59".into(),
            ));
        }
        if self.retraction.capacity == 0 {
            return Err(FestaError::Config(
                "retraction.capacity must be positive".into(),
            ));
        }
        if self.tracking.log_capacity == 0 {
            return Err(FestaError::Config(
                "tracking.log_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_api_base() -> String { "https://api.telegram.org".into() }
fn default_poll_timeout() -> u64 { 30 }
fn default_poll_interval() -> u64 { 1 }

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Daily firing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub fire_hour: u32,
    #[serde(default)]
    pub fire_minute: u32,
    #[serde(default = "default_scheduler_poll")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_guard")]
    pub guard_secs: u64,
    #[serde(default = "default_send_delay")]
    pub send_delay_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub leap_day_policy: LeapDayPolicy,
}

/// Upper bound for the re-fire guard; a day can be 23h long around DST.
const MAX_GUARD_SECS: u64 = 12 * 60 * 60;

fn default_timezone() -> String { "Europe/Moscow".into() }
fn default_scheduler_poll() -> u64 { 30 }
fn default_guard() -> u64 { 60 }
fn default_send_delay() -> u64 { 1000 }
fn default_request_timeout() -> u64 { 10 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            fire_hour: 0,
            fire_minute: 0,
            poll_interval_secs: default_scheduler_poll(),
            guard_secs: default_guard(),
            send_delay_ms: default_send_delay(),
            request_timeout_secs: default_request_timeout(),
            leap_day_policy: LeapDayPolicy::Skip,
        }
    }
}

impl SchedulerConfig {
    /// Parsed timezone.
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| FestaError::Config(format!("Unknown timezone '{}': {e}", self.timezone)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn guard(&self) -> Duration {
        Duration::from_secs(self.guard_secs)
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Bot message retraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetractionConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_delete_delay")]
    pub delete_delay_ms: u64,
    /// Numeric user id or @username of the only principal allowed to delete.
    #[serde(default)]
    pub admin: String,
}

fn default_capacity() -> usize { 100 }
fn default_delete_delay() -> u64 { 100 }

impl Default for RetractionConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            delete_delay_ms: default_delete_delay(),
            admin: String::new(),
        }
    }
}

/// Chat activity tracking ("alarm") settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Messages kept per chat; the oldest are dropped first.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Characters of message text kept in the log and shown in alerts.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

fn default_log_capacity() -> usize { 1000 }
fn default_preview_chars() -> usize { 100 }

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            log_capacity: default_log_capacity(),
            preview_chars: default_preview_chars(),
        }
    }
}

/// Record storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String { "~/.festa".into() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// Data directory with `~` expanded.
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).to_string())
    }
}

/// Optional congratulation template overrides. Empty lists keep the
/// built-in templates. Placeholders: `{name}`, `{years}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default)]
    pub birthday: Vec<String>,
    #[serde(default)]
    pub wedding: Vec<String>,
    #[serde(default)]
    pub wedding_without_years: Vec<String>,
}
