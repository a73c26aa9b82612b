//! In-memory client and factory for unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::api::picon_name;
use super::client::{ClientError, ClientFactory, ClientResult, DreamboxClient, SharedClient};
use super::types::{Bouquet, ConnectionDescriptor, DeviceInfo, Service};

#[derive(Debug, Clone, Default)]
pub struct FakeState {
    pub available: bool,
    pub device_info: Option<DeviceInfo>,
    pub standby: bool,
    pub current: Option<Service>,
    pub muted: bool,
    pub volume: u8,
    pub bouquets: Vec<Bouquet>,
    pub reachable: bool,
    pub auth_failure: bool,
    pub fail_update: bool,
    pub fail_actions: bool,
    /// How long `fetch_device_info` takes
    pub fetch_delay: Duration,
}

pub struct FakeClient {
    state: Mutex<FakeState>,
    calls: Mutex<Vec<String>>,
    mac: Option<String>,
}

impl FakeClient {
    fn with_state(state: FakeState, mac: Option<String>) -> Self {
        Self {
            state: Mutex::new(state),
            calls: Mutex::new(Vec::new()),
            mac,
        }
    }

    pub fn online(mac: &str) -> Self {
        Self::with_state(
            FakeState {
                reachable: true,
                volume: 50,
                ..Default::default()
            },
            Some(mac.to_string()),
        )
    }

    pub fn online_without_mac() -> Self {
        Self::with_state(
            FakeState {
                reachable: true,
                ..Default::default()
            },
            None,
        )
    }

    pub fn unreachable() -> Self {
        Self::with_state(FakeState::default(), None)
    }

    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        self.state().fetch_delay = delay;
        self
    }

    pub fn with_auth_failure(self) -> Self {
        self.state().auth_failure = true;
        self
    }

    pub fn with_bouquets(self, bouquets: Vec<Bouquet>) -> Self {
        self.state().bouquets = bouquets;
        self
    }

    pub fn with_current(self, service: Service) -> Self {
        self.state().current = Some(service);
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: impl Into<String>) -> ClientResult<MutexGuard<'_, FakeState>> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call.into());
        let state = self.state();
        if state.fail_actions {
            return Err(ClientError::Unavailable("action failed".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl DreamboxClient for FakeClient {
    fn available(&self) -> bool {
        self.state().available
    }

    fn mac(&self) -> Option<String> {
        self.state().device_info.as_ref().and(self.mac.clone())
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        self.state().device_info.clone()
    }

    fn standby(&self) -> bool {
        self.state().standby
    }

    fn current(&self) -> Option<Service> {
        self.state().current.clone()
    }

    fn muted(&self) -> bool {
        self.state().muted
    }

    fn volume(&self) -> u8 {
        self.state().volume
    }

    fn bouquet(&self) -> Option<Bouquet> {
        let state = self.state();
        let current = state.current.as_ref()?;
        state
            .bouquets
            .iter()
            .find(|b| b.find_service(&current.reference).is_some())
            .cloned()
    }

    fn bouquets(&self) -> Vec<Bouquet> {
        self.state().bouquets.clone()
    }

    fn picon(&self, service: Option<&Service>) -> Option<String> {
        let reference = match service {
            Some(service) => service.reference.clone(),
            None => self.state().current.as_ref()?.reference.clone(),
        };
        Some(format!("http://fake/picon/{}.png", picon_name(&reference)))
    }

    async fn fetch_device_info(&self) -> ClientResult<()> {
        let delay = self.state().fetch_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        if state.auth_failure {
            return Err(ClientError::AuthenticationFailed);
        }
        let reachable = state.reachable;
        state.available = reachable;
        if reachable {
            state.device_info = Some(DeviceInfo {
                device_name: "dm920".to_string(),
                enigma_version: "2.8.3".to_string(),
                mac: self.mac.clone(),
            });
        }
        Ok(())
    }

    async fn update(&self) -> ClientResult<()> {
        let mut state = self.state();
        if state.auth_failure {
            state.available = false;
            return Err(ClientError::AuthenticationFailed);
        }
        if !state.reachable || state.fail_update {
            state.available = false;
            return Err(ClientError::Unavailable("unreachable".to_string()));
        }
        state.available = true;
        Ok(())
    }

    async fn set_standby(&self, standby: bool) -> ClientResult<()> {
        self.record(format!("set_standby:{}", standby))?.standby = standby;
        Ok(())
    }

    async fn set_muted(&self, muted: bool) -> ClientResult<()> {
        self.record(format!("set_muted:{}", muted))?.muted = muted;
        Ok(())
    }

    async fn set_volume(&self, volume: u8) -> ClientResult<()> {
        self.record(format!("set_volume:{}", volume))?.volume = volume.min(100);
        Ok(())
    }

    async fn volume_up(&self) -> ClientResult<()> {
        let mut state = self.record("volume_up")?;
        state.volume = state.volume.saturating_add(5).min(100);
        Ok(())
    }

    async fn volume_down(&self) -> ClientResult<()> {
        let mut state = self.record("volume_down")?;
        state.volume = state.volume.saturating_sub(5);
        Ok(())
    }

    async fn toggle_play_pause(&self) -> ClientResult<()> {
        self.record("toggle_play_pause").map(|_| ())
    }

    async fn stop(&self) -> ClientResult<()> {
        self.record("stop").map(|_| ())
    }

    async fn channel_up(&self) -> ClientResult<()> {
        self.record("channel_up").map(|_| ())
    }

    async fn channel_down(&self) -> ClientResult<()> {
        self.record("channel_down").map(|_| ())
    }

    async fn play_service(&self, service: &Service, bouquet: &Bouquet) -> ClientResult<()> {
        let mut state =
            self.record(format!("play_service:{}@{}", service.reference, bouquet.reference))?;
        state.current = Some(service.clone());
        Ok(())
    }
}

/// Hands out registered fakes by host; unknown hosts get an unreachable client
#[derive(Default)]
pub struct FakeFactory {
    boxes: Mutex<HashMap<String, Arc<FakeClient>>>,
    created: Mutex<Vec<ConnectionDescriptor>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_box(&self, host: &str, client: FakeClient) -> Arc<FakeClient> {
        let client = Arc::new(client);
        self.boxes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(host.to_string(), client.clone());
        client
    }

    /// Number of clients built so far
    pub fn created(&self) -> usize {
        self.created.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn descriptors(&self) -> Vec<ConnectionDescriptor> {
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ClientFactory for FakeFactory {
    fn create(&self, descriptor: &ConnectionDescriptor) -> SharedClient {
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(descriptor.clone());
        let known = self
            .boxes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&descriptor.host)
            .cloned();
        match known {
            Some(client) => client,
            None => Arc::new(FakeClient::unreachable()),
        }
    }
}
