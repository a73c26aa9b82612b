//! Configuration management

use anyhow::Result;
use serde::Deserialize;

use crate::dreambox::types::{
    DEFAULT_NAME, DEFAULT_PASSWORD, DEFAULT_PICON_PATH, DEFAULT_PORT, DEFAULT_SSL,
    DEFAULT_USERNAME,
};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between two polls of each box
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Run SSDP discovery for boxes on the local network
    #[serde(default = "default_ssdp")]
    pub ssdp: bool,

    #[serde(default)]
    pub mqtt: Option<MqttConfig>,

    /// Boxes imported as config entries at startup
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

fn default_port() -> u16 {
    8099
}

fn default_scan_interval() -> u64 {
    10
}

fn default_ssdp() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

/// One `devices` item, fed to the import flow
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub host: String,
    #[serde(default = "default_device_name")]
    pub name: String,
    #[serde(default = "default_device_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_ssl")]
    pub ssl: bool,
    #[serde(default = "default_picon_path")]
    pub picon_path: String,
}

fn default_device_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_device_port() -> u16 {
    DEFAULT_PORT
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

fn default_password() -> String {
    DEFAULT_PASSWORD.to_string()
}

fn default_ssl() -> bool {
    DEFAULT_SSL
}

fn default_picon_path() -> String {
    DEFAULT_PICON_PATH.to_string()
}

/// Subdirectory name for persisted bridge files
const CONFIG_SUBDIR_NAME: &str = "dreambox-bridge";

/// Get config directory (DBB_CONFIG_DIR, XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> std::path::PathBuf {
    if let Ok(dir) = std::env::var("DBB_CONFIG_DIR") {
        return std::path::PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home).join("Library/Application Support");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return std::path::PathBuf::from(xdg);
        }
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home).join(".config");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return std::path::PathBuf::from(appdata);
        }
    }

    // Fallback to current directory
    std::path::PathBuf::from(".")
}

/// Get config subdirectory holding the bridge files
pub fn get_config_subdir() -> std::path::PathBuf {
    get_config_dir().join(CONFIG_SUBDIR_NAME)
}

/// Get the path for a config file (always in subdirectory for new writes)
pub fn get_config_file_path(filename: &str) -> std::path::PathBuf {
    get_config_subdir().join(filename)
}

/// Read a file from the bridge's config subdirectory
pub fn read_config_file(filename: &str) -> Option<String> {
    let path = get_config_file_path(filename);
    match std::fs::read_to_string(&path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

pub fn load_config() -> Result<Config> {
    let mut builder = ::config::Config::builder()
        // Start with defaults
        .set_default("port", default_port() as i64)?
        .set_default("scan_interval_secs", default_scan_interval() as i64)?
        // Load from config file if it exists (config.toml, config.yaml, ...)
        .add_source(
            ::config::File::with_name(&get_config_subdir().join("config").to_string_lossy())
                .required(false),
        )
        // Override with environment variables (DBB_PORT, DBB_MQTT__HOST, etc.)
        .add_source(
            ::config::Environment::with_prefix("DBB")
                .separator("__")
                .try_parsing(true),
        );

    // Precedence: DBB_PORT > PORT > config > default
    if let Ok(port) = std::env::var("DBB_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    } else if let Ok(port) = std::env::var("PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    }

    let config = builder.build()?;

    Ok(config.try_deserialize()?)
}
