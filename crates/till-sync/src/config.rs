//! # Till Configuration
//!
//! Configuration management for the ledger engines, the hub and the
//! automatic closing scheduler.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TILL_TIMEZONE=America/Argentina/Cordoba                            │
//! │     TILL_HUB_PORT=9000                                                 │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/ledger/till.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.till.ledger/till.toml (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # till.toml
//! [ledger]
//! database_path = "till.db"
//! timezone = "America/Argentina/Cordoba"
//! cash_method = "efectivo"
//!
//! [hub]
//! bind_addr = "0.0.0.0"
//! port = 8765
//! ping_interval_secs = 30
//! outgoing_buffer = 64
//!
//! [closing]
//! enabled = true
//! schedule = "59 23 * * *"
//! max_attempts = 3
//! retry_delay_ms = 2000
//! ```

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::schedule::DailySchedule;
use till_core::day::parse_timezone;

// =============================================================================
// Ledger Settings
// =============================================================================

/// Where the ledger lives and how its days and buckets are computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// IANA timezone of the business. Every "today" is computed in it.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Payment method counted in the cash bucket (case-insensitive).
    #[serde(default = "default_cash_method")]
    pub cash_method: String,
}

fn default_database_path() -> String {
    "till.db".to_string()
}

fn default_timezone() -> String {
    till_core::DEFAULT_TIMEZONE.to_string()
}

fn default_cash_method() -> String {
    "efectivo".to_string()
}

impl Default for LedgerSettings {
    fn default() -> Self {
        LedgerSettings {
            database_path: default_database_path(),
            timezone: default_timezone(),
            cash_method: default_cash_method(),
        }
    }
}

// =============================================================================
// Hub Server Settings
// =============================================================================

/// Configuration for the real-time hub.
///
/// ## Liveness
/// ```text
///   every ping_interval_secs:
///     answered last ping? ── yes ──► ping again
///            │
///            no
///            ▼
///     close the connection
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Port for the WebSocket server.
    #[serde(default = "default_hub_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0 for all interfaces).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Interval between liveness probes (seconds).
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Messages buffered per connection before sends are dropped.
    #[serde(default = "default_outgoing_buffer")]
    pub outgoing_buffer: usize,
}

fn default_hub_port() -> u16 {
    8765
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_ping_interval() -> u64 {
    30
}

fn default_outgoing_buffer() -> usize {
    64
}

impl Default for HubSettings {
    fn default() -> Self {
        HubSettings {
            port: default_hub_port(),
            bind_addr: default_bind_addr(),
            ping_interval_secs: default_ping_interval(),
            outgoing_buffer: default_outgoing_buffer(),
        }
    }
}

impl HubSettings {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

// =============================================================================
// Closing Settings
// =============================================================================

/// Automatic end-of-day closing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosingSettings {
    /// Run the daily scheduler at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Daily cron expression `M H * * *`, in the ledger timezone.
    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// Attempts per register before the register is reported as failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts (milliseconds).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_schedule() -> String {
    "59 23 * * *".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2000
}

impl Default for ClosingSettings {
    fn default() -> Self {
        ClosingSettings {
            enabled: true,
            schedule: default_schedule(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl ClosingSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete till configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TillConfig {
    #[serde(default)]
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub closing: ClosingSettings,
}

impl TillConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (till.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading till config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load till config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Till config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        self.timezone()?;
        self.schedule()?;

        if self.ledger.cash_method.trim().is_empty() {
            return Err(SyncError::InvalidConfig("cash_method must not be empty".into()));
        }

        if self.closing.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max_attempts must be greater than 0".into(),
            ));
        }

        if self.hub.ping_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "ping_interval_secs must be greater than 0".into(),
            ));
        }

        if self.hub.outgoing_buffer == 0 {
            return Err(SyncError::InvalidConfig(
                "outgoing_buffer must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("TILL_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.ledger.database_path = path;
        }

        if let Ok(tz) = std::env::var("TILL_TIMEZONE") {
            debug!(timezone = %tz, "Overriding timezone from environment");
            self.ledger.timezone = tz;
        }

        if let Ok(method) = std::env::var("TILL_CASH_METHOD") {
            self.ledger.cash_method = method;
        }

        if let Ok(port) = std::env::var("TILL_HUB_PORT") {
            match port.parse::<u16>() {
                Ok(p) => {
                    debug!(port = p, "Overriding hub port from environment");
                    self.hub.port = p;
                }
                Err(_) => warn!(port = %port, "Ignoring non-numeric TILL_HUB_PORT"),
            }
        }

        if let Ok(addr) = std::env::var("TILL_HUB_BIND_ADDR") {
            self.hub.bind_addr = addr;
        }

        if let Ok(schedule) = std::env::var("TILL_CLOSING_SCHEDULE") {
            debug!(schedule = %schedule, "Overriding closing schedule from environment");
            self.closing.schedule = schedule;
        }

        if let Ok(enabled) = std::env::var("TILL_CLOSING_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.closing.enabled = true,
                "0" | "false" | "no" | "off" => self.closing.enabled = false,
                _ => warn!(value = %enabled, "Unknown TILL_CLOSING_ENABLED value"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "till", "ledger")
            .map(|dirs| dirs.config_dir().join("till.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Parsed ledger timezone.
    pub fn timezone(&self) -> SyncResult<Tz> {
        parse_timezone(&self.ledger.timezone)
            .map_err(|e| SyncError::InvalidConfig(format!("timezone: {e}")))
    }

    /// Parsed closing schedule.
    pub fn schedule(&self) -> SyncResult<DailySchedule> {
        self.closing.schedule.parse()
    }

    pub fn cash_method(&self) -> &str {
        &self.ledger.cash_method
    }
}
