//! Host Configuration
//!
//! # Configuration Sources (in priority order)
//!
//! 1. Command line: `-iOS` selects the handheld mono view configuration
//! 2. Config file named by `STREAMING_SESSION_CONFIG`
//! 3. `streaming_session.toml` in the working directory
//! 4. Built-in defaults
//!
//! # Example Config File
//!
//! ```toml
//! [xr]
//! application_name = "StreamingSession OpenXR App"
//! view_mode = "immersive"   # immersive, handheld
//! max_consecutive_frame_failures = 90
//! idle_sleep_ms = 250
//!
//! [channel]
//! enabled = true
//! connect_timeout_ms = 30000
//! connect_poll_ms = 100
//! receive_poll_ms = 1
//! receive_buffer_size = 4096
//!
//! [host]
//! message_interval_frames = 90
//! window_width = 600
//! window_height = 600
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use stream_channel::ChannelConfig;
use stream_xr::{SessionConfig, ViewMode};

use crate::error::HostError;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "STREAMING_SESSION_CONFIG";
/// Config file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "streaming_session.toml";
/// Command line flag for handheld mono
pub const HANDHELD_FLAG: &str = "-iOS";

/// View configuration as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewModeSetting {
    /// Head-mounted stereo
    #[default]
    Immersive,
    /// Handheld mono
    Handheld,
}

impl std::fmt::Display for ViewModeSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immersive => write!(f, "immersive"),
            Self::Handheld => write!(f, "handheld"),
        }
    }
}

impl std::str::FromStr for ViewModeSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "immersive" | "stereo" | "hmd" => Ok(Self::Immersive),
            "handheld" | "mono" | "ios" => Ok(Self::Handheld),
            _ => Err(format!("Unknown view mode: {}", s)),
        }
    }
}

impl From<ViewModeSetting> for ViewMode {
    fn from(setting: ViewModeSetting) -> Self {
        match setting {
            ViewModeSetting::Immersive => ViewMode::Immersive,
            ViewModeSetting::Handheld => ViewMode::Handheld,
        }
    }
}

/// `[xr]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XrSection {
    pub application_name: String,
    pub view_mode: ViewModeSetting,
    /// Forward runtime diagnostics to the log
    pub debug_messenger: bool,
    /// Consecutive failed frames before the host exits
    pub max_consecutive_frame_failures: u32,
    /// Sleep while the session is not showing our layers
    pub idle_sleep_ms: u64,
}

impl Default for XrSection {
    fn default() -> Self {
        Self {
            application_name: "StreamingSession OpenXR App".to_string(),
            view_mode: ViewModeSetting::Immersive,
            debug_messenger: true,
            max_consecutive_frame_failures: 90,
            idle_sleep_ms: 250,
        }
    }
}

/// `[channel]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSection {
    /// Create the data channel when the runtime offers it
    pub enabled: bool,
    pub connect_timeout_ms: u64,
    pub connect_poll_ms: u64,
    pub receive_poll_ms: u64,
    pub receive_buffer_size: usize,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            enabled: true,
            connect_timeout_ms: 30_000,
            connect_poll_ms: 100,
            receive_poll_ms: 1,
            receive_buffer_size: 4096,
        }
    }
}

/// `[host]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSection {
    /// Frames between application messages
    pub message_interval_frames: u64,
    pub window_width: u32,
    pub window_height: u32,
    pub window_title: String,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            message_interval_frames: 90,
            window_width: 600,
            window_height: 600,
            window_title: "StreamingSession OpenXR App".to_string(),
        }
    }
}

/// Complete host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub xr: XrSection,
    pub channel: ChannelSection,
    pub host: HostSection,
    /// Config file path (for the summary)
    #[serde(skip)]
    pub config_path: Option<String>,
}

impl HostConfig {
    /// Load from the config file sources, then apply the process arguments
    pub fn load() -> Result<Self, HostError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => {
                let loaded = Self::load_from_file(&path)?;
                log::info!("Loaded config from {} ({})", path, CONFIG_ENV);
                loaded
            }
            _ if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                let loaded = Self::load_from_file(DEFAULT_CONFIG_FILE)?;
                log::info!("Loaded config from {}", DEFAULT_CONFIG_FILE);
                loaded
            }
            _ => Self::default(),
        };

        config.apply_args(std::env::args().skip(1));
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &str) -> Result<Self, HostError> {
        let content = std::fs::read_to_string(path).map_err(|source| HostError::ConfigRead {
            path: path.to_string(),
            source,
        })?;

        let mut config = Self::from_toml_str(&content).map_err(|source| {
            HostError::ConfigParse {
                path: path.to_string(),
                source,
            }
        })?;
        config.config_path = Some(path.to_string());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply command line arguments. Unknown arguments are ignored.
    pub fn apply_args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            match arg.as_ref() {
                HANDHELD_FLAG => {
                    self.xr.view_mode = ViewModeSetting::Handheld;
                    log::info!("Running in handheld mode: handheld display + primary mono");
                }
                other => log::debug!("Ignoring argument {:?}", other),
            }
        }

        if self.xr.view_mode == ViewModeSetting::Immersive {
            log::info!("Running in immersive mode: head-mounted display + primary stereo");
        }
    }

    pub fn view_mode(&self) -> ViewMode {
        self.xr.view_mode.into()
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_consecutive_frame_failures: self.xr.max_consecutive_frame_failures.max(1),
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            connect_timeout: Duration::from_millis(self.channel.connect_timeout_ms),
            connect_poll_interval: Duration::from_millis(self.channel.connect_poll_ms),
            receive_poll_interval: Duration::from_millis(self.channel.receive_poll_ms),
            receive_buffer_size: self
                .channel
                .receive_buffer_size
                .max(stream_channel::MIN_RECEIVE_BUFFER),
        }
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.xr.idle_sleep_ms)
    }

    /// Settings for the OpenXR backend
    #[cfg(feature = "d3d11")]
    pub fn openxr_config(&self) -> stream_xr::OpenXrConfig {
        let mut optional_extensions = Vec::new();
        if self.channel.enabled {
            optional_extensions.push(stream_channel::EXTENSION_NAME.to_string());
        }

        stream_xr::OpenXrConfig {
            application_name: self.xr.application_name.clone(),
            view_mode: self.view_mode(),
            debug_messenger: self.xr.debug_messenger,
            optional_extensions,
            ..Default::default()
        }
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        log::info!("Host Configuration:");
        log::info!("  View mode: {} ({})", self.xr.view_mode, self.view_mode());
        log::info!(
            "  Channel: {}, connect timeout {} ms",
            if self.channel.enabled { "enabled" } else { "disabled" },
            self.channel.connect_timeout_ms
        );
        log::info!("  Message every {} frames", self.host.message_interval_frames);
        if let Some(path) = &self.config_path {
            log::info!("  Config: {}", path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_mode_parse() {
        assert_eq!("immersive".parse::<ViewModeSetting>().unwrap(), ViewModeSetting::Immersive);
        assert_eq!("Handheld".parse::<ViewModeSetting>().unwrap(), ViewModeSetting::Handheld);
        assert_eq!("ios".parse::<ViewModeSetting>().unwrap(), ViewModeSetting::Handheld);
        assert!("cardboard".parse::<ViewModeSetting>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.view_mode(), ViewMode::Immersive);
        assert_eq!(config.host.message_interval_frames, 90);
        assert_eq!(config.idle_sleep(), Duration::from_millis(250));

        let channel = config.channel_config();
        assert_eq!(channel.connect_timeout, Duration::from_secs(30));
        assert_eq!(channel.connect_poll_interval, Duration::from_millis(100));
        assert_eq!(channel.receive_poll_interval, Duration::from_millis(1));
        assert_eq!(channel.receive_buffer_size, 4096);
    }

    #[test]
    fn test_handheld_flag() {
        let mut config = HostConfig::default();
        config.apply_args(["--verbose", "-iOS", "extra"]);
        assert_eq!(config.view_mode(), ViewMode::Handheld);
        assert_eq!(config.view_mode().view_count(), 1);
    }

    #[test]
    fn test_unknown_args_ignored() {
        let mut config = HostConfig::default();
        config.apply_args(["-ios", "--iOS", "foo"]);
        assert_eq!(config.view_mode(), ViewMode::Immersive);
    }

    #[test]
    fn test_partial_toml() {
        let config = HostConfig::from_toml_str(
            r#"
            [xr]
            view_mode = "handheld"

            [channel]
            connect_timeout_ms = 500
            receive_buffer_size = 64
            "#,
        )
        .unwrap();

        assert_eq!(config.view_mode(), ViewMode::Handheld);
        assert_eq!(config.xr.max_consecutive_frame_failures, 90);
        assert_eq!(config.channel_config().connect_timeout, Duration::from_millis(500));
        // Never below the minimum receive buffer
        assert_eq!(config.channel_config().receive_buffer_size, 4096);
        assert_eq!(config.host.window_width, 600);
    }

    #[test]
    fn test_bad_toml() {
        assert!(HostConfig::from_toml_str("[xr]\nview_mode = 3").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = HostConfig::load_from_file("/nonexistent/streaming_session.toml").unwrap_err();
        assert!(matches!(err, HostError::ConfigRead { .. }));
    }
}
