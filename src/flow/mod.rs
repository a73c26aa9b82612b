//! Config flows: turn user input, imported config or an SSDP hit into a config entry
//!
//! A flow is a small state machine. Every step returns a [`FlowResult`]: a form to
//! (re)display, a created entry, or an abort. Duplicate detection happens against
//! both the stored entries and the other flows in progress.

pub mod config_flow;
pub mod manager;
pub mod options;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::dreambox::types::{
    DEFAULT_NAME, DEFAULT_PASSWORD, DEFAULT_PICON_PATH, DEFAULT_PORT, DEFAULT_SSL,
    DEFAULT_USERNAME,
};
use crate::entries::ConfigEntry;

pub use config_flow::ConfigFlow;
pub use manager::{FlowEnv, FlowManager, FlowProgress};
pub use options::{OptionsFlow, OptionsInput, OptionsResult};

/// Where a flow was started from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowSource {
    User,
    Import,
    Ssdp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    User,
    Confirm,
    Dreambox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    AlreadyConfigured,
    AlreadyInProgress,
    /// Discovery payload without a usable presentation URL
    InvalidDiscoveryInfo,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AlreadyConfigured => "already_configured",
            Self::AlreadyInProgress => "already_in_progress",
            Self::InvalidDiscoveryInfo => "invalid_discovery_info",
        };
        f.write_str(s)
    }
}

/// Validation error shown on a redisplayed form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormError {
    InvalidAuth,
    CannotConnect,
}

/// Field values a form is prefilled with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormValues {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub name: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub ssl: bool,
    pub picon_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    Form {
        flow_id: String,
        step_id: StepId,
        values: FormValues,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        errors: BTreeMap<String, FormError>,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        description_placeholders: BTreeMap<String, String>,
    },
    CreateEntry {
        flow_id: String,
        title: String,
        entry: ConfigEntry,
    },
    Abort {
        flow_id: String,
        reason: AbortReason,
        /// Entry whose data the flow changed; the hub reloads it
        #[serde(skip)]
        reload_entry: Option<String>,
    },
}

impl FlowResult {
    pub fn flow_id(&self) -> &str {
        match self {
            Self::Form { flow_id, .. }
            | Self::CreateEntry { flow_id, .. }
            | Self::Abort { flow_id, .. } => flow_id,
        }
    }

    pub fn is_form(&self) -> bool {
        matches!(self, Self::Form { .. })
    }
}

/// Input of the `user` and `import` steps
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInput {
    pub host: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_port")]
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

impl UserInput {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            name: default_name(),
            port: default_port(),
            username: default_username(),
            password: default_password(),
            ssl: default_ssl(),
            picon_path: default_picon_path(),
        }
    }
}

impl From<crate::config::DeviceConfig> for UserInput {
    fn from(device: crate::config::DeviceConfig) -> Self {
        Self {
            host: device.host,
            name: device.name,
            port: device.port,
            username: device.username,
            password: device.password,
            ssl: device.ssl,
            picon_path: device.picon_path,
        }
    }
}

/// Input of the `confirm` step; missing fields keep the discovered values
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfirmInput {
    pub name: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl: Option<bool>,
    pub picon_path: Option<String>,
}

/// SSDP discovery payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    pub presentation_url: Option<String>,
    pub model_name: Option<String>,
    pub udn: Option<String>,
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Unknown flow: {0}")]
    UnknownFlow(String),

    #[error("Invalid input for step {step:?}: {message}")]
    InvalidInput { step: StepId, message: String },
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_port() -> u16 {
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
