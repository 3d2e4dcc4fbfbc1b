//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//! Every section and field is optional; an empty file yields the defaults.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PwrctlError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub update: UpdateConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial link to the power controller
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Per-call response timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Largest declared frame length the receiver accepts
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

/// Unix socket telemetry service
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Idle time after which a session receives an unrequested battery block
    #[serde(default = "default_push_interval_ms")]
    pub push_interval_ms: u64,

    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

/// Background battery poller
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_enabled")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_log_enabled")]
    pub log_enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Firmware update timing
#[derive(Debug, Deserialize, Clone)]
pub struct UpdateConfig {
    /// Pause after JUMP_TO_BOOTLOADER while the controller reboots
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

/// What to run when the controller asks the host to power down
#[derive(Debug, Deserialize, Clone)]
pub struct ShutdownConfig {
    #[serde(default = "default_shutdown_command")]
    pub command: Vec<String>,
}

/// Log output
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; stderr when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyO0".to_string() }
fn default_baud_rate() -> u32 { 57600 }
fn default_timeout_ms() -> u64 { 1000 }
fn default_max_frame_len() -> usize { 144 }

fn default_socket_path() -> PathBuf { PathBuf::from("/tmp/pcUtil.socket") }
fn default_push_interval_ms() -> u64 { 1000 }
fn default_max_clients() -> usize { 20 }

fn default_monitor_enabled() -> bool { true }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_log_enabled() -> bool { false }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

fn default_settle_delay_ms() -> u64 { 100 }

fn default_shutdown_command() -> Vec<String> {
    ["/sbin/shutdown", "-h", "now"].iter().map(|s| s.to_string()).collect()
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            push_interval_ms: default_push_interval_ms(),
            max_clients: default_max_clients(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_monitor_enabled(),
            poll_interval_ms: default_poll_interval_ms(),
            log_enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            command: default_shutdown_command(),
        }
    }
}

impl TelemetryConfig {
    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms)
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn invalid(msg: impl std::fmt::Display) -> PwrctlError {
    PwrctlError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use pwrctl::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if ![9600, 19200, 38400, 57600, 115200].contains(&self.serial.baud_rate) {
            return Err(invalid("baud_rate must be one of: 9600, 19200, 38400, 57600, 115200"));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(invalid("timeout_ms must be between 1 and 10000"));
        }

        // Length field covers at least the command byte plus one payload byte
        if self.serial.max_frame_len < 2 || self.serial.max_frame_len > 65535 {
            return Err(invalid("max_frame_len must be between 2 and 65535"));
        }

        if self.telemetry.socket_path.as_os_str().is_empty() {
            return Err(invalid("telemetry socket_path cannot be empty"));
        }

        if self.telemetry.push_interval_ms == 0 || self.telemetry.push_interval_ms > 60000 {
            return Err(invalid("push_interval_ms must be between 1 and 60000"));
        }

        if self.telemetry.max_clients == 0 {
            return Err(invalid("max_clients must be greater than 0"));
        }

        if self.monitor.poll_interval_ms == 0 || self.monitor.poll_interval_ms > 60000 {
            return Err(invalid("poll_interval_ms must be between 1 and 60000"));
        }

        if self.monitor.log_enabled && self.monitor.log_dir.is_empty() {
            return Err(invalid("monitor log_dir cannot be empty when logging is enabled"));
        }

        if self.monitor.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.monitor.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.update.settle_delay_ms > 10000 {
            return Err(invalid("settle_delay_ms must be at most 10000"));
        }

        if self.shutdown.command.first().map_or(true, |program| program.is_empty()) {
            return Err(invalid("shutdown command cannot be empty"));
        }

        Ok(())
    }
}
