//! SSDP discovery of Enigma2 boxes
//!
//! Searches for UPnP root devices, reads their device description and starts an
//! `ssdp` config flow for every box that looks like a Dreambox.

use futures::StreamExt;
use quick_xml::de::from_str as xml_from_str;
use reqwest::Client;
use serde::Deserialize;
use ssdp_client::SearchTarget;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::flow::DiscoveryInfo;
use crate::hub::Hub;

const SSDP_SEARCH_INTERVAL: Duration = Duration::from_secs(300);
const SSDP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Default, Deserialize)]
struct Root {
    device: DeviceDescription,
}

/// Fields of a UPnP device description we look at
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeviceDescription {
    #[serde(rename = "friendlyName")]
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
    #[serde(rename = "modelName")]
    pub model_name: Option<String>,
    #[serde(rename = "UDN")]
    pub udn: Option<String>,
    #[serde(rename = "presentationURL")]
    pub presentation_url: Option<String>,
}

impl DeviceDescription {
    pub fn parse(xml: &str) -> anyhow::Result<Self> {
        let root: Root = xml_from_str(xml)?;
        Ok(root.device)
    }

    /// Dream Multimedia boxes and other Enigma2 receivers
    pub fn is_dreambox(&self) -> bool {
        let matches = |field: &Option<String>, needles: &[&str]| {
            field.as_deref().is_some_and(|value| {
                let value = value.to_lowercase();
                needles.iter().any(|n| value.contains(n))
            })
        };
        matches(&self.manufacturer, &["dream"])
            || matches(&self.model_name, &["dreambox", "enigma"])
            || matches(&self.friendly_name, &["dreambox", "enigma"])
    }

    /// Discovery payload for the flow. A relative or missing presentation URL
    /// is resolved against the description location.
    pub fn discovery_info(&self, location: &str) -> DiscoveryInfo {
        let base = Url::parse(location).ok();
        let presentation_url = match (&self.presentation_url, &base) {
            (Some(url), Some(base)) => base.join(url).ok().map(|u| u.to_string()),
            (Some(url), None) => Some(url.clone()),
            (None, Some(base)) => base.join("/").ok().map(|u| u.to_string()),
            (None, None) => None,
        };
        DiscoveryInfo {
            presentation_url,
            model_name: self.model_name.clone(),
            udn: self.udn.clone(),
        }
    }
}

pub struct SsdpDiscovery {
    hub: Arc<Hub>,
    http: Client,
    shutdown: CancellationToken,
}

impl SsdpDiscovery {
    pub fn new(hub: Arc<Hub>, shutdown: CancellationToken) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            hub,
            http,
            shutdown,
        }
    }

    /// Search periodically until shutdown
    pub async fn run(self) {
        let mut search_interval = interval(SSDP_SEARCH_INTERVAL);
        // Description locations already turned into a flow
        let mut seen = HashSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("SSDP discovery shutting down");
                    break;
                }
                _ = search_interval.tick() => {
                    if let Err(e) = self.perform_search(&mut seen).await {
                        tracing::warn!("SSDP search failed: {}", e);
                    }
                }
            }
        }
    }

    async fn perform_search(&self, seen: &mut HashSet<String>) -> anyhow::Result<()> {
        let responses =
            ssdp_client::search(&SearchTarget::RootDevice, SSDP_TIMEOUT, 2, None).await?;
        futures::pin_mut!(responses);

        let mut locations = Vec::new();
        while let Some(response) = responses.next().await {
            match response {
                Ok(r) => locations.push(r.location().to_string()),
                Err(e) => tracing::debug!("SSDP response error: {}", e),
            }
        }

        for location in locations {
            if seen.contains(&location) {
                continue;
            }
            let description = match self.fetch_description(&location).await {
                Ok(d) => d,
                Err(e) => {
                    tracing::debug!("Failed to fetch device description {}: {}", location, e);
                    continue;
                }
            };
            seen.insert(location.clone());
            if !description.is_dreambox() {
                continue;
            }

            tracing::info!(
                "Found {} at {}",
                description.model_name.as_deref().unwrap_or("Dreambox"),
                location
            );
            self.hub
                .start_ssdp_flow(description.discovery_info(&location))
                .await;
        }
        Ok(())
    }

    async fn fetch_description(&self, location: &str) -> anyhow::Result<DeviceDescription> {
        let xml = self
            .http
            .get(location)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        DeviceDescription::parse(&xml)
    }
}
