//! SnackBell configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SnackBellError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnackBellConfig {
    #[serde(default)]
    pub reminder: ReminderConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl SnackBellConfig {
    /// Load config from the default path (~/.snackbell/config.toml).
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
            .map_err(|e| SnackBellError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SnackBellError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| SnackBellError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the SnackBell home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".snackbell")
    }

    /// Secrets and deployment-specific URLs may come from the environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("SNACKBELL_VAPID_PUBLIC_KEY")
            && !key.is_empty()
        {
            self.push.vapid_public_key = key;
        }
        if let Ok(url) = std::env::var("SNACKBELL_PUSH_RELAY_URL")
            && !url.is_empty()
        {
            tracing::debug!("push.relay_url taken from SNACKBELL_PUSH_RELAY_URL");
            self.push.relay_url = url;
        }
        if let Ok(token) = std::env::var("SNACKBELL_ADMIN_TOKEN")
            && !token.is_empty()
        {
            tracing::debug!("gateway.admin_token taken from SNACKBELL_ADMIN_TOKEN");
            self.gateway.admin_token = Some(token);
        }
    }

    /// Range checks that don't need the timezone database.
    /// The timezone itself is resolved when the schedule is built.
    pub fn validate(&self) -> Result<()> {
        let r = &self.reminder;
        if r.cron.is_none() {
            if r.day_of_week > 6 {
                return Err(SnackBellError::Config(format!(
                    "reminder.day_of_week must be 0-6 (0 = Sunday), got {}",
                    r.day_of_week
                )));
            }
            if r.hour > 23 || r.minute > 59 {
                return Err(SnackBellError::Config(format!(
                    "reminder time {:02}:{:02} is not a valid time of day",
                    r.hour, r.minute
                )));
            }
        }
        if r.tick_secs == 0 {
            return Err(SnackBellError::Config("reminder.tick_secs must be > 0".into()));
        }
        if r.concurrency == 0 {
            return Err(SnackBellError::Config("reminder.concurrency must be > 0".into()));
        }
        Ok(())
    }

    /// Database path with `~` expanded.
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.store.db_path).to_string())
    }
}

/// When reminders go out and how the fan-out behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// 0 = Sunday … 6 = Saturday.
    #[serde(default = "default_day_of_week")]
    pub day_of_week: u8,
    #[serde(default = "default_hour")]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Optional cron form ("0 11 * * 5" or "0 0 11 * * 5"); wins over the fields above.
    #[serde(default)]
    pub cron: Option<String>,
    /// Scheduler tick period.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// How far back from a tick an occurrence still counts as due.
    /// Defaults to twice `tick_secs` so consecutive windows overlap.
    #[serde(default)]
    pub tolerance_secs: Option<u64>,
    /// Max simultaneous outbound push calls.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Clear expired endpoints right after a run.
    #[serde(default)]
    pub auto_deregister: bool,
}

fn bool_true() -> bool { true }
fn default_day_of_week() -> u8 { 5 }
fn default_hour() -> u32 { 11 }
fn default_timezone() -> String { "Europe/Amsterdam".into() }
fn default_tick_secs() -> u64 { 60 }
fn default_concurrency() -> usize { 10 }

impl ReminderConfig {
    pub fn tolerance_secs(&self) -> u64 {
        self.tolerance_secs.unwrap_or(self.tick_secs * 2)
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            day_of_week: default_day_of_week(),
            hour: default_hour(),
            minute: 0,
            timezone: default_timezone(),
            cron: None,
            tick_secs: default_tick_secs(),
            tolerance_secs: None,
            concurrency: default_concurrency(),
            auto_deregister: false,
        }
    }
}

/// Reminder copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_body")]
    pub body: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default = "default_icon")]
    pub badge: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "bool_true")]
    pub require_interaction: bool,
}

fn default_title() -> String { "Lekker Bezig - Snack Reminder! 🍟".into() }
fn default_body() -> String {
    "Don't forget to select your snack for today! Selection closes at 12:00 PM.".into()
}
fn default_icon() -> String { "/icons/icon-192x192.png".into() }
fn default_tag() -> String { "snack-reminder".into() }
fn default_url() -> String { "/".into() }

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            body: default_body(),
            icon: default_icon(),
            badge: default_icon(),
            tag: default_tag(),
            url: default_url(),
            require_interaction: true,
        }
    }
}

/// Push transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Web Push relay that signs and encrypts on our behalf. Empty = dry run.
    #[serde(default)]
    pub relay_url: String,
    /// Bearer token for the relay.
    #[serde(default)]
    pub relay_token: Option<String>,
    /// Public VAPID key handed to browsers when they subscribe.
    #[serde(default)]
    pub vapid_public_key: String,
    #[serde(default = "default_push_timeout")]
    pub timeout_secs: u64,
    /// How long the push service may hold the message for an offline device.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
}

fn default_push_timeout() -> u64 { 10 }
fn default_ttl() -> u64 { 3600 }

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            relay_url: String::new(),
            relay_token: None,
            vapid_public_key: String::new(),
            timeout_secs: default_push_timeout(),
            ttl_secs: default_ttl(),
        }
    }
}

/// Subscriber store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String { "~/.snackbell/snackbell.db".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Required in `X-Admin-Token` for `/api/v1/*` when set.
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_port() -> u16 { 3000 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            admin_token: None,
        }
    }
}
