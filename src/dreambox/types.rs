//! Data model shared by the client, the flows and the media player

use serde::{Deserialize, Serialize};

pub const DEFAULT_NAME: &str = "Dreambox";
pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_USERNAME: &str = "root";
pub const DEFAULT_PASSWORD: &str = "dreambox";
pub const DEFAULT_SSL: bool = false;
pub const DEFAULT_PICON_PATH: &str = "/picon/";

/// Everything needed to reach one physical box
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
    pub picon_path: String,
}

impl ConnectionDescriptor {
    /// Base URL of the box web interface, without trailing slash
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Identity of a box, fetched once at setup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_name: String,
    pub enigma_version: String,
    pub mac: Option<String>,
}

/// Currently airing programme on a service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpgEvent {
    pub title: String,
    pub description: String,
    /// `HH:MM`, empty when unknown
    pub start: String,
    /// `HH:MM`, empty when unknown
    pub end: String,
    /// Seconds, 0 when unknown
    pub duration: u32,
}

/// One playable channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub reference: String,
    pub name: String,
    #[serde(default)]
    pub now: EpgEvent,
}

impl Service {
    pub fn new(reference: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            name: name.into(),
            now: EpgEvent::default(),
        }
    }
}

/// Named, ordered channel group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bouquet {
    pub reference: String,
    pub name: String,
    pub services: Vec<Service>,
}

impl Bouquet {
    pub fn find_service(&self, reference: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.reference == reference)
    }
}
