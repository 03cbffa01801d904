/// Configuration management for the debug bridge.
/// Handles loading, parsing and validation of debridge/config.toml
use crate::errors::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Top-level configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Configuration file version (for future migrations)
    #[serde(default = "default_version")]
    pub version: String,

    /// Debugger installation and suspend behavior
    #[serde(default)]
    pub debugger: DebuggerConfig,

    /// Event dispatch settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            debugger: DebuggerConfig::default(),
            dispatch: DispatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Debugger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebuggerConfig {
    /// Display name of the debug target
    #[serde(default = "default_target_name")]
    pub target_name: String,

    /// Breakpoint kind this debugger accepts
    #[serde(default = "default_breakpoint_model_id")]
    pub breakpoint_model_id: String,

    /// Suspend on the first executed line
    #[serde(default)]
    pub suspend_on_startup: bool,

    /// Suspend whenever a new source file starts executing
    #[serde(default)]
    pub suspend_on_script_load: bool,

    /// Report inline (file-less) scripts to the IDE
    #[serde(default)]
    pub show_dynamic_code: bool,

    /// Directory holding the interpreter-side debugger support code
    #[serde(default = "default_support_dir")]
    pub support_dir: PathBuf,

    /// Setup script inside `support_dir`
    #[serde(default = "default_setup_script")]
    pub setup_script: String,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            target_name: default_target_name(),
            breakpoint_model_id: default_breakpoint_model_id(),
            suspend_on_startup: false,
            suspend_on_script_load: false,
            show_dynamic_code: false,
            support_dir: default_support_dir(),
            setup_script: default_setup_script(),
        }
    }
}

fn default_target_name() -> String {
    "Script Debugger".to_string()
}

fn default_breakpoint_model_id() -> String {
    "debridge.python".to_string()
}

fn default_support_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("debridge").join("support"))
        .unwrap_or_else(|| PathBuf::from(".debridge/support"))
}

fn default_setup_script() -> String {
    "setup_debugger.py".to_string()
}

/// Event dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Name of the dispatch thread
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            thread_name: default_thread_name(),
        }
    }
}

fn default_thread_name() -> String {
    "debridge-dispatch".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, compact, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["text", "compact", "pretty"];

/// Configuration loader and manager
pub struct ConfigManager {
    config: BridgeConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Load configuration from file or use defaults
    pub fn load(config_path: Option<&Path>) -> BridgeResult<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);

        let config = if path.exists() {
            info!("Loading config from {:?}", path);
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content).map_err(|e| {
                BridgeError::ConfigError(format!("{}: {}", path.display(), e))
            })?
        } else {
            warn!("No config at {:?}, using defaults", path);
            BridgeConfig::default()
        };

        Ok(ConfigManager {
            config,
            config_path: path,
        })
    }

    /// `debridge/config.toml` in the user config dir when present, else
    /// `.debridge/config.toml` in the working directory
    fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("debridge/config.toml"))
            .filter(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from(".debridge/config.toml"))
    }

    pub fn with_config(config: BridgeConfig, config_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            config_path: config_path.into(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut BridgeConfig {
        &mut self.config
    }

    pub fn save(&self) -> BridgeResult<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| BridgeError::ConfigError(e.to_string()))?;
        std::fs::write(&self.config_path, content)?;

        debug!("Saved config to {:?}", self.config_path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> BridgeResult<()> {
        let debugger = &self.config.debugger;

        if debugger.breakpoint_model_id.trim().is_empty() {
            return Err(BridgeError::ConfigError(
                "Breakpoint model id must not be empty".to_string(),
            ));
        }

        if debugger.setup_script.trim().is_empty() {
            return Err(BridgeError::ConfigError(
                "Setup script must not be empty".to_string(),
            ));
        }

        if !debugger.support_dir.is_absolute() {
            warn!(
                "Support directory {:?} is relative, resolving against the working directory",
                debugger.support_dir
            );
        }

        if self.config.dispatch.thread_name.trim().is_empty() {
            return Err(BridgeError::ConfigError(
                "Dispatch thread name must not be empty".to_string(),
            ));
        }

        let level = self.config.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(BridgeError::ConfigError(format!(
                "Unknown log level: {}",
                self.config.logging.level
            )));
        }

        if !LOG_FORMATS.contains(&self.config.logging.format.as_str()) {
            return Err(BridgeError::ConfigError(format!(
                "Unknown log format: {}",
                self.config.logging.format
            )));
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Load configuration overrides from environment variables
    pub fn load_from_env(&mut self) -> BridgeResult<()> {
        if let Ok(value) = std::env::var("DEBRIDGE_SUSPEND_ON_STARTUP") {
            self.config.debugger.suspend_on_startup =
                parse_flag("DEBRIDGE_SUSPEND_ON_STARTUP", &value)?;
        }

        if let Ok(value) = std::env::var("DEBRIDGE_SUSPEND_ON_SCRIPT_LOAD") {
            self.config.debugger.suspend_on_script_load =
                parse_flag("DEBRIDGE_SUSPEND_ON_SCRIPT_LOAD", &value)?;
        }

        if let Ok(level) = std::env::var("DEBRIDGE_LOG_LEVEL") {
            self.config.logging.level = level;
        }

        if let Ok(dir) = std::env::var("DEBRIDGE_SUPPORT_DIR") {
            self.config.debugger.support_dir = PathBuf::from(dir);
        }

        info!("Configuration loaded from environment variables");
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

fn parse_flag(name: &str, value: &str) -> BridgeResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(BridgeError::ConfigError(format!(
            "{} must be a boolean, got {:?}",
            name, other
        ))),
    }
}
