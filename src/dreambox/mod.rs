//! Dreambox / Enigma2 client: data model, capability trait and HTTP implementation

pub mod api;
pub mod client;
pub mod types;
pub mod xml;

pub use api::{DreamboxApi, HttpClientFactory};
pub use client::{ClientError, ClientFactory, ClientResult, DreamboxClient, SharedClient};
pub use types::{Bouquet, ConnectionDescriptor, DeviceInfo, EpgEvent, Service};

#[cfg(test)]
pub(crate) mod testing;
