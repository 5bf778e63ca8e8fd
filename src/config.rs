//! Configuration loading and validation
//!
//! YAML config with defaults for every field; a missing file simply
//! means defaults. Configuration is read-only input - nothing is
//! written back at runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::fs;
use tracing::debug;

use crate::link::{ControlFilter, PollTiming};

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub osd: OsdConfig,
    #[serde(default)]
    pub tray: TrayConfig,
    #[serde(default)]
    pub hotkeys: HotkeysConfig,
}

/// Which control is the volume slider
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MidiConfig {
    /// MIDI channel, 1-16 (human numbering)
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Controller number, 0-127
    #[serde(default = "default_control")]
    pub control: u8,
}

/// Dispatch loop intervals and retry policy
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollingConfig {
    #[serde(default = "default_idle_backoff")]
    pub idle_backoff_ms: u64,
    #[serde(default = "default_drain_pause")]
    pub drain_pause_ms: u64,
    #[serde(default = "default_error_cooldown")]
    pub error_cooldown_ms: u64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

/// Transient volume indicator
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OsdConfig {
    /// How long the indicator stays up after the last change
    #[serde(default = "default_osd_duration")]
    pub duration_ms: u64,
    /// Width of the filled-proportion bar in characters
    #[serde(default = "default_bar_width")]
    pub bar_width: usize,
}

/// System tray UI
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tray_poll")]
    pub poll_interval_ms: u64,
}

/// Global keyboard chords
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HotkeysConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MidiConfig {
    fn default() -> Self {
        // Controller 9 on channel 11: the volume slider on layer A of
        // the X-Touch Mini.
        Self { channel: default_channel(), control: default_control() }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            idle_backoff_ms: default_idle_backoff(),
            drain_pause_ms: default_drain_pause(),
            error_cooldown_ms: default_error_cooldown(),
            max_consecutive_errors: default_max_consecutive_errors(),
        }
    }
}

impl Default for OsdConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_osd_duration(),
            bar_width: default_bar_width(),
        }
    }
}

impl Default for TrayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: default_tray_poll(),
        }
    }
}

impl Default for HotkeysConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AppConfig {
    /// Load configuration from a file with validation
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load from an explicit path, or from the platform config dir,
    /// falling back to defaults when no file exists.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path).await,
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    debug!("Loading config from {}", default_path.display());
                    Self::load(&default_path).await
                } else {
                    debug!("No config file found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Validate for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.midi.channel == 0 || self.midi.channel > 16 {
            anyhow::bail!(
                "Invalid MIDI channel {} (must be 1-16)",
                self.midi.channel
            );
        }
        if self.midi.control > 127 {
            anyhow::bail!(
                "Invalid controller number {} (must be 0-127)",
                self.midi.control
            );
        }
        if self.polling.max_consecutive_errors == 0 {
            anyhow::bail!("max_consecutive_errors must be at least 1");
        }
        if self.osd.duration_ms == 0 {
            anyhow::bail!("OSD duration_ms must be nonzero");
        }
        if self.osd.bar_width == 0 {
            anyhow::bail!("OSD bar_width must be nonzero");
        }
        if self.tray.poll_interval_ms == 0 {
            anyhow::bail!("Tray poll_interval_ms must be nonzero");
        }
        Ok(())
    }

    /// The (channel, controller) filter pair in wire numbering
    pub fn filter(&self) -> ControlFilter {
        ControlFilter {
            channel: self.midi.channel - 1,
            control: self.midi.control,
        }
    }

    pub fn poll_timing(&self) -> PollTiming {
        PollTiming {
            idle_backoff: Duration::from_millis(self.polling.idle_backoff_ms),
            drain_pause: Duration::from_millis(self.polling.drain_pause_ms),
            error_cooldown: Duration::from_millis(self.polling.error_cooldown_ms),
            max_consecutive_errors: self.polling.max_consecutive_errors,
        }
    }

    pub fn osd_duration(&self) -> Duration {
        Duration::from_millis(self.osd.duration_ms)
    }

    pub fn tray_poll_interval(&self) -> Duration {
        Duration::from_millis(self.tray.poll_interval_ms)
    }
}

/// Default config location in the platform config dir
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("xtouch-volume")
        .join("config.yaml")
}

// Default value functions
fn default_channel() -> u8 { 11 }
fn default_control() -> u8 { 9 }
fn default_idle_backoff() -> u64 { 100 }
fn default_drain_pause() -> u64 { 1 }
fn default_error_cooldown() -> u64 { 1000 }
fn default_max_consecutive_errors() -> u32 { 3 }
fn default_osd_duration() -> u64 { 1500 }
fn default_bar_width() -> usize { 20 }
fn default_true() -> bool { true }
fn default_tray_poll() -> u64 { 50 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();

        assert_eq!(config.midi.channel, 11);
        assert_eq!(config.midi.control, 9);
        assert_eq!(config.polling.max_consecutive_errors, 3);
        assert_eq!(config.osd.duration_ms, 1500);
    }

    #[test]
    fn test_filter_uses_wire_numbering() {
        let config = AppConfig::default();
        let filter = config.filter();

        // Human channel 11 is wire channel 10
        assert_eq!(filter.channel, 10);
        assert_eq!(filter.control, 9);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "midi:\n  channel: 2\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.midi.channel, 2);
        assert_eq!(config.midi.control, 9);
        assert!(config.tray.enabled);
    }

    #[test]
    fn test_invalid_channel_rejected() {
        let yaml = "midi:\n  channel: 17\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());

        let yaml = "midi:\n  channel: 0\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let yaml = "midi:\n  channel: 2\n  bogus: 1\n";
        assert!(serde_yaml::from_str::<AppConfig>(yaml).is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "osd:\n  duration_ms: 500").unwrap();

        let config = AppConfig::load(file.path()).await.unwrap();
        assert_eq!(config.osd.duration_ms, 500);
        assert_eq!(config.osd_duration(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.yaml");
        assert!(AppConfig::load(&path).await.is_err());
    }
}
