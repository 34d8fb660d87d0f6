//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use crate::discovery::DetectionMode;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SOLID_SERIAL";

/// Config file name in the working directory
const LOCAL_CONFIG_FILE: &str = "solid-serial.toml";

/// Config file name inside the platform config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SOLID_SERIAL_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SOLID_SERIAL_CONFIG` environment variable (explicit path)
    /// 2. `./solid-serial.toml` (current directory)
    /// 3. `config.toml` in the platform config directory
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables override file values. The result is validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        // Overrides apply all-or-nothing: one bad value discards them all.
        if let Err(e) = apply_env_overrides(&mut config) {
            warn!(error = %e, "Ignoring environment overrides");
            config = Config::default();
        }

        Self {
            config_path: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(&self.config)?)
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(LOCAL_CONFIG_FILE);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. Platform config directory
    get_default_config_path().filter(|path| path.exists())
}

/// Get the default config directory for creating new config files.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "solid-serial").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
        path: path.to_path_buf(),
        source: e,
    })
}

fn env_key(key: &str) -> String {
    format!("{}_{}", ENV_PREFIX, key)
}

fn parse_env<T: FromStr>(var: &str, value: &str, message: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse(var, message))
}

fn parse_bool(var: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::env_parse(var, "Expected a boolean")),
    }
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `SOLID_SERIAL_<SECTION>_<KEY>`
/// For example:
/// - `SOLID_SERIAL_SERIAL_DEFAULT_BAUD=115200`
/// - `SOLID_SERIAL_DISCOVERY_MODE=all_ports`
/// - `SOLID_SERIAL_TESTING_PORT=COM15` (or the legacy `TEST_PORT`)
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Serial overrides
    let var = env_key("SERIAL_DEFAULT_BAUD");
    if let Ok(val) = std::env::var(&var) {
        config.serial.default_baud = parse_env(&var, &val, "Invalid baud rate")?;
    }
    let var = env_key("SERIAL_READ_TIMEOUT_MS");
    if let Ok(val) = std::env::var(&var) {
        config.serial.read_timeout_ms = parse_env(&var, &val, "Invalid timeout")?;
    }
    let var = env_key("SERIAL_WRITE_TIMEOUT_MS");
    if let Ok(val) = std::env::var(&var) {
        config.serial.write_timeout_ms = parse_env(&var, &val, "Invalid timeout")?;
    }
    let var = env_key("SERIAL_REPAIR_BEFORE_OPEN");
    if let Ok(val) = std::env::var(&var) {
        config.serial.repair_before_open = parse_bool(&var, &val)?;
    }

    // Discovery overrides
    let var = env_key("DISCOVERY_MODE");
    if let Ok(val) = std::env::var(&var) {
        config.discovery.mode = match val.trim().to_lowercase().as_str() {
            "usb_identity" => DetectionMode::UsbIdentity,
            "all_ports" => DetectionMode::AllPorts,
            _ => {
                return Err(ConfigError::env_parse(
                    var,
                    "Expected 'usb_identity' or 'all_ports'",
                ))
            }
        };
    }

    // Logging overrides
    if let Ok(val) = std::env::var(env_key("LOGGING_LEVEL")) {
        config.logging.level = val;
    }
    let var = env_key("LOGGING_FORMAT");
    if let Ok(val) = std::env::var(&var) {
        config.logging.format = match val.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => {
                return Err(ConfigError::env_parse(
                    var,
                    "Expected 'json', 'pretty' or 'compact'",
                ))
            }
        };
    }

    // Testing overrides (also support legacy TEST_PORT)
    if let Ok(val) = std::env::var(env_key("TESTING_PORT")).or_else(|_| std::env::var("TEST_PORT"))
    {
        config.testing.port = Some(val);
    }

    Ok(())
}
