//! Configuration types for cardwatch.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::Error;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CardwatchConfig {
    /// Card session timing
    pub session: SessionSettings,
    /// Logging settings
    pub logging: LoggingSettings,
    /// Simulated card script used by the binary
    pub simulation: SimulationSettings,
}

impl CardwatchConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config: CardwatchConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        self.session.validate()?;

        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(Error::Config(format!(
                "logging.level '{}' is not one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        if self.simulation.poll_interval_ms == 0 {
            return Err(Error::Config(
                "simulation.poll_interval_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Card session timing, as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Sleep between presence checks while a read card sits idle
    pub idle_wait_ms: u64,
    /// Pause in the error state before returning to idle
    pub error_pause_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_wait_ms: 1000,
            error_pause_ms: 1000,
        }
    }
}

impl SessionSettings {
    /// Validate timing values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.idle_wait_ms == 0 {
            return Err(Error::Config("session.idle_wait_ms must be > 0".to_string()));
        }
        if self.error_pause_ms == 0 {
            return Err(Error::Config(
                "session.error_pause_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Convert to the runtime session configuration.
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            idle_wait: Duration::from_millis(self.idle_wait_ms),
            error_pause: Duration::from_millis(self.error_pause_ms),
        }
    }
}

/// Runtime timing for a card session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Sleep between presence checks while a read card sits idle
    pub idle_wait: Duration,
    /// Pause in the error state before returning to idle
    pub error_pause: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionSettings::default().to_session_config()
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Script for the simulated card used by the `cardwatch` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Longest a simulated wait blocks before returning to re-probe
    pub poll_interval_ms: u64,
    /// Delay before the reader is attached
    pub reader_delay_ms: u64,
    /// Delay after the reader is attached before the card is inserted
    pub insert_delay_ms: u64,
    /// Remove the card this long after insertion (None = leave it in)
    pub remove_after_ms: Option<u64>,
    /// Request a PIN change once the card has been read
    pub change_pin: bool,
    /// Make the simulated PIN change fail
    pub pin_change_fails: bool,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            reader_delay_ms: 500,
            insert_delay_ms: 1000,
            remove_after_ms: Some(5000),
            change_pin: false,
            pin_change_fails: false,
        }
    }
}

impl SimulationSettings {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
