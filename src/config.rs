//! Configuration management for allegro-enricher
//!
//! All configuration is loaded from `./config/allegro-enricher.toml` (or the
//! path given with `--config`). Defaults live only in the config template.

use serde::Deserialize;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::pacing::DelayRange;

/// Configuration file path relative to working directory
pub const CONFIG_PATH: &str = "./config/allegro-enricher.toml";

/// Default configuration file content - this is the ONLY place defaults exist
pub const DEFAULT_CONFIG: &str = include_str!("../config/allegro-enricher.toml");

/// Placeholder substituted with the seller login in `target.profile_url`
pub const LOGIN_PLACEHOLDER: &str = "{login}";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Configuration field '{field}' cannot be empty")]
    EmptyRequired { field: String },

    #[error("Configuration field '{field}' must be at least {min}")]
    TooSmall { field: String, min: u64 },

    #[error("Invalid range in '{field}': minimum {min} exceeds maximum {max}")]
    InvalidRange { field: String, min: u64, max: u64 },

    #[error("'target.profile_url' must contain the {placeholder} placeholder: {url}")]
    MissingPlaceholder { url: String, placeholder: &'static str },
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub files: FilesConfig,
    pub pool: PoolConfig,
    pub pacing: PacingConfig,
    pub target: TargetConfig,
    pub detection: DetectionConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
}

/// Input and output dataset locations
#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Worker pool sizing and session lifecycle
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Number of parallel sessions
    pub size: usize,
    /// Seconds between starting consecutive workers
    pub start_delay_secs: u64,
    /// Replace a session after this many written records
    pub restart_after: u32,
    /// Session replacements allowed per item before it is abandoned
    pub max_retries: u32,
}

impl PoolConfig {
    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_secs)
    }
}

/// Human-like pacing between navigations and session restarts
#[derive(Debug, Clone, Deserialize)]
pub struct PacingConfig {
    pub settle_min_ms: u64,
    pub settle_max_ms: u64,
    pub cooldown_min_ms: u64,
    pub cooldown_max_ms: u64,
    pub navigation_timeout_secs: u64,
}

impl PacingConfig {
    pub fn settle(&self) -> DelayRange {
        DelayRange::from_millis(self.settle_min_ms, self.settle_max_ms)
    }

    pub fn cooldown(&self) -> DelayRange {
        DelayRange::from_millis(self.cooldown_min_ms, self.cooldown_max_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
}

/// Target site navigation sequence
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub profile_url: String,
    pub offer_link_selector: String,
    pub seller_anchor: String,
}

impl TargetConfig {
    /// Profile page URL for a seller login
    pub fn profile_url_for(&self, login: &str) -> String {
        self.profile_url.replace(LOGIN_PLACEHOLDER, login)
    }
}

/// Anti-automation markers
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    pub url_markers: Vec<String>,
    pub text_markers: Vec<String>,
}

/// Browser launch options
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_profile_root")]
    pub profile_root: PathBuf,
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    #[serde(default = "default_stealth")]
    pub stealth: bool,
}

fn default_profile_root() -> PathBuf {
    PathBuf::from("./chrome_profiles")
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

fn default_stealth() -> bool {
    true
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            profile_root: default_profile_root(),
            chrome_path: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
            stealth: default_stealth(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.files.input.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRequired { field: "files.input".to_string() });
        }
        if self.files.output.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRequired { field: "files.output".to_string() });
        }

        Self::at_least("pool.size", self.pool.size as u64, 1)?;
        Self::at_least("pool.restart_after", self.pool.restart_after as u64, 1)?;
        Self::at_least("pool.max_retries", self.pool.max_retries as u64, 1)?;
        Self::at_least("pacing.navigation_timeout_secs", self.pacing.navigation_timeout_secs, 1)?;

        Self::ordered("pacing.settle_*_ms", self.pacing.settle_min_ms, self.pacing.settle_max_ms)?;
        Self::ordered("pacing.cooldown_*_ms", self.pacing.cooldown_min_ms, self.pacing.cooldown_max_ms)?;

        if !self.target.profile_url.contains(LOGIN_PLACEHOLDER) {
            return Err(ConfigError::MissingPlaceholder {
                url: self.target.profile_url.clone(),
                placeholder: LOGIN_PLACEHOLDER,
            });
        }
        if self.target.offer_link_selector.trim().is_empty() {
            return Err(ConfigError::EmptyRequired { field: "target.offer_link_selector".to_string() });
        }
        if self.detection.url_markers.is_empty() && self.detection.text_markers.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "detection.url_markers / detection.text_markers".to_string(),
            });
        }

        Ok(())
    }

    fn at_least(field: &str, value: u64, min: u64) -> Result<(), ConfigError> {
        if value < min {
            return Err(ConfigError::TooSmall { field: field.to_string(), min });
        }
        Ok(())
    }

    fn ordered(field: &str, min: u64, max: u64) -> Result<(), ConfigError> {
        if min > max {
            return Err(ConfigError::InvalidRange { field: field.to_string(), min, max });
        }
        Ok(())
    }

    /// Create default configuration file at the given location
    pub fn create_default_config(path: &Path) -> Result<PathBuf, ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;

        Ok(path.to_path_buf())
    }

    /// Check if stdin is a TTY (interactive terminal)
    pub fn is_interactive() -> bool {
        io::stdin().is_terminal()
    }

    /// Prompt user to create default config (only in interactive mode)
    pub fn prompt_create_config(path: &Path) -> Result<Option<PathBuf>, ConfigError> {
        if !Self::is_interactive() {
            return Ok(None);
        }

        print!("Configuration file not found. Create default config? [Y/n] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim().to_lowercase();

        if input.is_empty() || input == "y" || input == "yes" {
            let path = Self::create_default_config(path)?;
            Ok(Some(path))
        } else {
            Ok(None)
        }
    }
}
