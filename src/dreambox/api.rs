//! Enigma2 web interface client
//!
//! Talks to the `/web/*` XML endpoints of the box over HTTP(S) with basic auth.
//! Reads are served from the state cached by the last successful refresh.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, warn};

use super::client::{ClientError, ClientFactory, ClientResult, DreamboxClient, SharedClient};
use super::types::{Bouquet, ConnectionDescriptor, DeviceInfo, Service};
use super::xml;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote control key codes accepted by `/web/remotecontrol`
const KEY_STOP: u16 = 128;
const KEY_PLAYPAUSE: u16 = 164;
const KEY_CHANNELUP: u16 = 402;
const KEY_CHANNELDOWN: u16 = 403;

/// `/web/powerstate?newstate=` values
const POWER_WAKEUP: u8 = 4;
const POWER_STANDBY: u8 = 5;

#[derive(Default)]
struct ApiState {
    available: bool,
    device_info: Option<DeviceInfo>,
    standby: bool,
    current: Option<Service>,
    muted: bool,
    volume: u8,
    bouquet: Option<Bouquet>,
    bouquets: Vec<Bouquet>,
}

/// Picon file name for a service reference: `1:0:19:283D:...:` -> `1_0_19_283D_...`
pub fn picon_name(reference: &str) -> String {
    reference.trim_end_matches(':').replace(':', "_")
}

/// Normalise a configured picon path to `/path/`
fn normalize_picon_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

pub struct DreamboxApi {
    base_url: String,
    username: String,
    password: String,
    picon_path: String,
    http: Client,
    state: RwLock<ApiState>,
}

impl DreamboxApi {
    pub fn new(descriptor: &ConnectionDescriptor) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            // Boxes ship self-signed certificates
            .danger_accept_invalid_certs(descriptor.use_tls)
            .build()
            .unwrap_or_default();
        Self {
            base_url: descriptor.base_url(),
            username: descriptor.username.clone(),
            password: descriptor.password.clone(),
            picon_path: normalize_picon_path(&descriptor.picon_path),
            http,
            state: RwLock::new(ApiState::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ApiState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ApiState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn set_available(&self, available: bool) {
        self.write().available = available;
    }

    async fn request(&self, path: &str, query: &[(&str, String)]) -> ClientResult<String> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, query = ?query, "Dreambox request");

        let mut request = self.http.get(&url).query(query);
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                self.set_available(false);
                return Err(ClientError::Unavailable(e.to_string()));
            }
        };

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::AuthenticationFailed);
        }
        if !response.status().is_success() {
            self.set_available(false);
            return Err(ClientError::Unavailable(format!(
                "{} returned {}",
                path,
                response.status()
            )));
        }

        let body = response.text().await?;
        self.set_available(true);
        Ok(body)
    }

    async fn remote_control(&self, key: u16) -> ClientResult<()> {
        self.request("/web/remotecontrol", &[("command", key.to_string())])
            .await?;
        Ok(())
    }

    async fn volume_command(&self, command: String) -> ClientResult<()> {
        let body = self.request("/web/vol", &[("set", command)]).await?;
        let volume = xml::parse_volume(&body)?;
        let mut state = self.write();
        state.volume = volume.volume;
        state.muted = volume.muted;
        Ok(())
    }

    async fn fetch_bouquets(&self) -> ClientResult<Vec<Bouquet>> {
        let body = self.request("/web/getservices", &[]).await?;
        let mut bouquets = Vec::new();
        for entry in xml::parse_service_list(&body)? {
            let body = self
                .request("/web/getservices", &[("sRef", entry.reference.clone())])
                .await?;
            bouquets.push(Bouquet {
                reference: entry.reference,
                name: entry.name,
                services: xml::parse_service_list(&body)?,
            });
        }
        Ok(bouquets)
    }
}

#[async_trait]
impl DreamboxClient for DreamboxApi {
    fn available(&self) -> bool {
        self.read().available
    }

    fn mac(&self) -> Option<String> {
        self.read().device_info.as_ref().and_then(|i| i.mac.clone())
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        self.read().device_info.clone()
    }

    fn standby(&self) -> bool {
        self.read().standby
    }

    fn current(&self) -> Option<Service> {
        self.read().current.clone()
    }

    fn muted(&self) -> bool {
        self.read().muted
    }

    fn volume(&self) -> u8 {
        self.read().volume
    }

    fn bouquet(&self) -> Option<Bouquet> {
        self.read().bouquet.clone()
    }

    fn bouquets(&self) -> Vec<Bouquet> {
        self.read().bouquets.clone()
    }

    fn picon(&self, service: Option<&Service>) -> Option<String> {
        let reference = match service {
            Some(s) => s.reference.clone(),
            None => self.read().current.as_ref()?.reference.clone(),
        };
        if reference.is_empty() {
            return None;
        }
        Some(format!(
            "{}{}{}.png",
            self.base_url,
            self.picon_path,
            picon_name(&reference)
        ))
    }

    async fn fetch_device_info(&self) -> ClientResult<()> {
        let body = match self.request("/web/deviceinfo", &[]).await {
            Ok(body) => body,
            Err(ClientError::AuthenticationFailed) => return Err(ClientError::AuthenticationFailed),
            Err(e) => {
                warn!("Failed to fetch device info from {}: {}", self.base_url, e);
                return Ok(());
            }
        };
        match xml::parse_device_info(&body) {
            Ok(info) => {
                debug!(
                    device = %info.device_name,
                    version = %info.enigma_version,
                    "Dreambox device info"
                );
                self.write().device_info = Some(info);
            }
            Err(e) => warn!("Unreadable device info from {}: {}", self.base_url, e),
        }
        Ok(())
    }

    async fn update(&self) -> ClientResult<()> {
        let standby = xml::parse_standby(&self.request("/web/powerstate", &[]).await?)?;
        let volume = xml::parse_volume(&self.request("/web/vol", &[]).await?)?;
        let current = xml::parse_current(&self.request("/web/getcurrent", &[]).await?)?;
        let bouquets = self.fetch_bouquets().await?;

        let bouquet = current.as_ref().and_then(|service| {
            bouquets
                .iter()
                .find(|b| b.find_service(&service.reference).is_some())
                .cloned()
        });

        let mut state = self.write();
        state.standby = standby;
        state.volume = volume.volume;
        state.muted = volume.muted;
        state.current = current;
        state.bouquet = bouquet;
        state.bouquets = bouquets;
        Ok(())
    }

    async fn set_standby(&self, standby: bool) -> ClientResult<()> {
        let newstate = if standby { POWER_STANDBY } else { POWER_WAKEUP };
        let body = self
            .request("/web/powerstate", &[("newstate", newstate.to_string())])
            .await?;
        self.write().standby = xml::parse_standby(&body)?;
        Ok(())
    }

    async fn set_muted(&self, muted: bool) -> ClientResult<()> {
        // The box only offers a mute toggle
        if self.muted() == muted {
            return Ok(());
        }
        self.volume_command("mute".to_string()).await
    }

    async fn set_volume(&self, volume: u8) -> ClientResult<()> {
        self.volume_command(format!("set{}", volume.min(100))).await
    }

    async fn volume_up(&self) -> ClientResult<()> {
        self.volume_command("up".to_string()).await
    }

    async fn volume_down(&self) -> ClientResult<()> {
        self.volume_command("down".to_string()).await
    }

    async fn toggle_play_pause(&self) -> ClientResult<()> {
        self.remote_control(KEY_PLAYPAUSE).await
    }

    async fn stop(&self) -> ClientResult<()> {
        self.remote_control(KEY_STOP).await
    }

    async fn channel_up(&self) -> ClientResult<()> {
        self.remote_control(KEY_CHANNELUP).await
    }

    async fn channel_down(&self) -> ClientResult<()> {
        self.remote_control(KEY_CHANNELDOWN).await
    }

    async fn play_service(&self, service: &Service, bouquet: &Bouquet) -> ClientResult<()> {
        self.request(
            "/web/zap",
            &[
                ("sRef", service.reference.clone()),
                ("root", bouquet.reference.clone()),
            ],
        )
        .await?;
        Ok(())
    }
}

/// Creates [`DreamboxApi`] clients
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn create(&self, descriptor: &ConnectionDescriptor) -> SharedClient {
        Arc::new(DreamboxApi::new(descriptor))
    }
}
