//! Capability contract of a Dreambox client
//!
//! The media player, the flows and the hub only talk to a box through this trait.
//! Reads return the state cached by the last `update()` / `fetch_device_info()`;
//! actions go to the box.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use super::types::{Bouquet, ConnectionDescriptor, DeviceInfo, Service};

#[derive(Debug, Error)]
pub enum ClientError {
    /// Box rejected the credentials (HTTP 401)
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Device unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    Xml(String),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[async_trait]
pub trait DreamboxClient: Send + Sync {
    /// Whether the last request to the box succeeded
    fn available(&self) -> bool;

    fn mac(&self) -> Option<String>;

    fn device_info(&self) -> Option<DeviceInfo>;

    fn standby(&self) -> bool;

    fn current(&self) -> Option<Service>;

    fn muted(&self) -> bool;

    /// 0..=100
    fn volume(&self) -> u8;

    /// Bouquet the current service belongs to
    fn bouquet(&self) -> Option<Bouquet>;

    /// All bouquets, in box order
    fn bouquets(&self) -> Vec<Bouquet>;

    /// Picon URL for `service`, or for the current service when `None`
    fn picon(&self, service: Option<&Service>) -> Option<String>;

    /// Populate `device_info`/`mac`. Leaves them absent when the box cannot be
    /// reached; only bad credentials are reported as an error.
    async fn fetch_device_info(&self) -> ClientResult<()>;

    /// Re-read the whole playback state from the box
    async fn update(&self) -> ClientResult<()>;

    async fn set_standby(&self, standby: bool) -> ClientResult<()>;

    async fn set_muted(&self, muted: bool) -> ClientResult<()>;

    async fn set_volume(&self, volume: u8) -> ClientResult<()>;

    async fn volume_up(&self) -> ClientResult<()>;

    async fn volume_down(&self) -> ClientResult<()>;

    async fn toggle_play_pause(&self) -> ClientResult<()>;

    async fn stop(&self) -> ClientResult<()>;

    async fn channel_up(&self) -> ClientResult<()>;

    async fn channel_down(&self) -> ClientResult<()>;

    async fn play_service(&self, service: &Service, bouquet: &Bouquet) -> ClientResult<()>;
}

pub type SharedClient = Arc<dyn DreamboxClient>;

/// Builds clients from connection descriptors (the flows and the hub never
/// construct a concrete client themselves)
pub trait ClientFactory: Send + Sync {
    fn create(&self, descriptor: &ConnectionDescriptor) -> SharedClient;
}
