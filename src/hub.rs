//! Hub - owns config entries and the entities built from them
//!
//! Setting up an entry builds a client, checks the box answers, registers the
//! client and starts one poll task for its media player. Entries whose box is not
//! ready are retried with exponential backoff; bad credentials are not retried.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{BusEvent, SharedBus};
use crate::config::DeviceConfig;
use crate::dreambox::{ClientError, ClientFactory};
use crate::entries::{ConfigEntry, EntryStore};
use crate::flow::{
    DiscoveryInfo, FlowError, FlowManager, FlowProgress, FlowResult, OptionsFlow, OptionsInput,
    OptionsResult, UserInput,
};
use crate::media_player::{
    self, BrowseError, BrowseNode, EntitySnapshot, MediaCommand, MediaPlayer, MediaPlayerError,
    PlayerDescription,
};
use crate::registry::ConnectionRegistry;

/// Retry configuration for entry setup
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Initial delay between retry attempts
    pub initial_delay: Duration,
    /// Maximum delay (backoff caps at this value)
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubOptions {
    pub scan_interval: Duration,
    pub retry: RetryConfig,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Unknown entry: {0}")]
    UnknownEntry(String),

    /// Unloaded while setup was in flight
    #[error("Setup cancelled: {0}")]
    Cancelled(String),
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Unknown entry: {0}")]
    UnknownEntry(String),

    #[error("Entry not loaded: {0}")]
    NotLoaded(String),

    #[error(transparent)]
    MediaPlayer(#[from] MediaPlayerError),

    #[error(transparent)]
    Browse(#[from] BrowseError),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    NotLoaded,
    Loaded,
    SetupRetry,
    SetupError,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryView {
    #[serde(flatten)]
    pub entry: ConfigEntry,
    pub state: EntryState,
}

struct LoadedEntry {
    player: Arc<Mutex<MediaPlayer>>,
    poll: CancellationToken,
}

pub struct Hub {
    entries: Arc<RwLock<EntryStore>>,
    registry: RwLock<ConnectionRegistry>,
    loaded: RwLock<HashMap<String, LoadedEntry>>,
    states: RwLock<HashMap<String, EntryState>>,
    retries: RwLock<HashMap<String, CancellationToken>>,
    factory: Arc<dyn ClientFactory>,
    flows: FlowManager,
    bus: SharedBus,
    options: HubOptions,
    shutdown: CancellationToken,
}

impl Hub {
    pub fn new(
        entries: EntryStore,
        factory: Arc<dyn ClientFactory>,
        bus: SharedBus,
        options: HubOptions,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let entries = Arc::new(RwLock::new(entries));
        Arc::new(Self {
            flows: FlowManager::new(entries.clone(), factory.clone()),
            entries,
            registry: RwLock::new(ConnectionRegistry::new()),
            loaded: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            retries: RwLock::new(HashMap::new()),
            factory,
            bus,
            options,
            shutdown,
        })
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }

    /// Load every stored entry
    pub async fn start(self: &Arc<Self>) {
        let ids: Vec<String> = self
            .entries
            .read()
            .await
            .entries()
            .iter()
            .map(|e| e.entry_id.clone())
            .collect();
        info!("Loading {} config entries", ids.len());
        for entry_id in ids {
            self.load_entry(&entry_id).await;
        }
    }

    /// Start an `import` flow per configured device
    pub async fn import_devices(self: &Arc<Self>, devices: Vec<DeviceConfig>) {
        for device in devices {
            let host = device.host.clone();
            let result = self.flows.start_import(UserInput::from(device)).await;
            match &result {
                FlowResult::Form { errors, .. } => {
                    warn!("Import of {} needs attention: {:?}", host, errors)
                }
                FlowResult::Abort { reason, .. } => debug!("Import of {} skipped: {}", host, reason),
                FlowResult::CreateEntry { .. } => {}
            }
            self.after_flow(&result).await;
        }
    }

    // =========================================================================
    // Entry setup / unload
    // =========================================================================

    /// Set up one entry. Does not retry; see [`Hub::load_entry`].
    pub async fn setup_entry(&self, entry_id: &str) -> Result<(), SetupError> {
        self.setup_entry_unless(entry_id, None).await
    }

    /// Set up one entry unless `cancel` fires or the entry is deleted while the
    /// box is being queried. The checks and the install happen under the
    /// `loaded` lock, which unload takes after cancelling.
    async fn setup_entry_unless(
        &self,
        entry_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), SetupError> {
        let mut entry = self
            .entries
            .read()
            .await
            .get(entry_id)
            .cloned()
            .ok_or_else(|| SetupError::UnknownEntry(entry_id.to_string()))?;

        if let Some(options) = entry.options_with_backfill() {
            debug!("Backfilling options of entry {}", entry_id);
            self.entries
                .write()
                .await
                .update_options(entry_id, options.clone());
            entry.options = options;
        }

        let descriptor = entry.descriptor();
        let client = self.factory.create(&descriptor);
        match client.fetch_device_info().await {
            Ok(()) => {}
            Err(ClientError::AuthenticationFailed) => return Err(SetupError::AuthenticationFailed),
            Err(e) => return Err(SetupError::NotReady(e.to_string())),
        }
        if client.device_info().is_none() {
            return Err(SetupError::NotReady(format!(
                "Could not retrieve device information from {}",
                descriptor.host
            )));
        }

        let mut loaded = self.loaded.write().await;
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(SetupError::Cancelled(entry_id.to_string()));
        }
        if self.entries.read().await.get(entry_id).is_none() {
            return Err(SetupError::UnknownEntry(entry_id.to_string()));
        }

        let player = {
            let mut registry = self.registry.write().await;
            registry.put(entry_id, client);
            media_player::setup_entry(&entry, &registry)
        }
        .ok_or_else(|| SetupError::NotReady("client not registered".to_string()))?;

        let player = Arc::new(Mutex::new(player));
        let poll = self.shutdown.child_token();
        tokio::spawn(poll_loop(
            entry_id.to_string(),
            player.clone(),
            self.bus.clone(),
            self.options.scan_interval,
            poll.clone(),
        ));

        if let Some(previous) = loaded.insert(entry_id.to_string(), LoadedEntry { player, poll }) {
            previous.poll.cancel();
        }
        self.set_state(entry_id, EntryState::Loaded).await;
        drop(loaded);
        info!("Entry '{}' ({}) loaded", entry.title, entry_id);
        self.bus.publish(BusEvent::EntryLoaded {
            entry_id: entry_id.to_string(),
            title: entry.title,
        });
        Ok(())
    }

    /// Set up an entry, retrying in the background while the box is not ready
    pub async fn load_entry(self: &Arc<Self>, entry_id: &str) -> EntryState {
        match self.setup_entry(entry_id).await {
            Ok(()) => EntryState::Loaded,
            Err(SetupError::NotReady(reason)) => {
                self.spawn_setup_retry(entry_id, reason).await;
                EntryState::SetupRetry
            }
            Err(SetupError::UnknownEntry(_) | SetupError::Cancelled(_)) => {
                debug!("{}: entry gone before setup finished", entry_id);
                EntryState::NotLoaded
            }
            Err(e) => {
                self.mark_setup_error(entry_id, &e).await;
                EntryState::SetupError
            }
        }
    }

    async fn mark_setup_error(&self, entry_id: &str, e: &SetupError) {
        error!("Setup of entry {} failed: {}", entry_id, e);
        self.set_state(entry_id, EntryState::SetupError).await;
        self.bus.publish(BusEvent::EntrySetupError {
            entry_id: entry_id.to_string(),
            error: e.to_string(),
        });
    }

    async fn spawn_setup_retry(self: &Arc<Self>, entry_id: &str, reason: String) {
        let token = self.shutdown.child_token();
        if let Some(previous) = self
            .retries
            .write()
            .await
            .insert(entry_id.to_string(), token.clone())
        {
            previous.cancel();
        }
        self.set_state(entry_id, EntryState::SetupRetry).await;

        let hub = self.clone();
        let entry_id = entry_id.to_string();
        tokio::spawn(async move {
            let config = hub.options.retry.clone();
            let mut delay = config.initial_delay;
            let mut reason = reason;
            loop {
                warn!("{}: not ready ({}), retrying in {:?}", entry_id, reason, delay);
                hub.bus.publish(BusEvent::EntrySetupRetry {
                    entry_id: entry_id.clone(),
                    error: reason.clone(),
                    retry_in_secs: delay.as_secs(),
                });

                // Wait with shutdown check
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("{}: setup retry cancelled", entry_id);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {
                        // Exponential backoff capped at max_delay
                        delay = (delay * 2).min(config.max_delay);
                    }
                }

                match hub.setup_entry_unless(&entry_id, Some(&token)).await {
                    Ok(()) => break,
                    Err(SetupError::NotReady(r)) => reason = r,
                    Err(SetupError::Cancelled(_) | SetupError::UnknownEntry(_)) => {
                        debug!("{}: entry unloaded during setup retry", entry_id);
                        return;
                    }
                    Err(e) => {
                        hub.mark_setup_error(&entry_id, &e).await;
                        break;
                    }
                }
            }
            // A cancelled token was already removed or replaced by a newer retry
            if !token.is_cancelled() {
                hub.retries.write().await.remove(&entry_id);
            }
        });
    }

    /// Stop the entity of an entry and drop its client. Returns whether
    /// anything was loaded or pending.
    pub async fn unload_entry(&self, entry_id: &str) -> bool {
        let retry = self.retries.write().await.remove(entry_id);
        if let Some(token) = &retry {
            token.cancel();
        }

        let loaded = self.loaded.write().await.remove(entry_id);
        if let Some(loaded) = &loaded {
            loaded.poll.cancel();
            self.registry.write().await.remove(entry_id);
            info!("Entry {} unloaded", entry_id);
            self.bus.publish(BusEvent::EntryUnloaded {
                entry_id: entry_id.to_string(),
            });
        }

        self.set_state(entry_id, EntryState::NotLoaded).await;
        loaded.is_some() || retry.is_some()
    }

    pub async fn reload_entry(self: &Arc<Self>, entry_id: &str) -> EntryState {
        self.unload_entry(entry_id).await;
        self.load_entry(entry_id).await
    }

    /// Unload and delete an entry
    pub async fn remove_entry(&self, entry_id: &str) -> Result<(), HubError> {
        self.unload_entry(entry_id).await;
        self.entries
            .write()
            .await
            .remove(entry_id)
            .ok_or_else(|| HubError::UnknownEntry(entry_id.to_string()))?;
        self.states.write().await.remove(entry_id);
        info!("Entry {} removed", entry_id);
        self.bus.publish(BusEvent::EntryRemoved {
            entry_id: entry_id.to_string(),
        });
        Ok(())
    }

    /// Run the options flow for an entry; a finished flow persists and reloads it
    pub async fn update_options(
        self: &Arc<Self>,
        entry_id: &str,
        input: Option<OptionsInput>,
    ) -> Result<OptionsResult, HubError> {
        let entry = self
            .entries
            .read()
            .await
            .get(entry_id)
            .cloned()
            .ok_or_else(|| HubError::UnknownEntry(entry_id.to_string()))?;

        let result = OptionsFlow::new(&entry).step_init(input);
        if let OptionsResult::Done { options, .. } = &result {
            let changed = self
                .entries
                .write()
                .await
                .update_options(entry_id, options.clone());
            if changed {
                info!("Options of entry {} changed, reloading", entry_id);
                self.reload_entry(entry_id).await;
            }
        }
        Ok(result)
    }

    async fn set_state(&self, entry_id: &str, state: EntryState) {
        self.states.write().await.insert(entry_id.to_string(), state);
    }

    pub async fn entry_state(&self, entry_id: &str) -> EntryState {
        self.states
            .read()
            .await
            .get(entry_id)
            .copied()
            .unwrap_or(EntryState::NotLoaded)
    }

    pub async fn entries(&self) -> Vec<EntryView> {
        let entries = self.entries.read().await.entries().to_vec();
        let states = self.states.read().await;
        entries
            .into_iter()
            .map(|entry| EntryView {
                state: states
                    .get(&entry.entry_id)
                    .copied()
                    .unwrap_or(EntryState::NotLoaded),
                entry,
            })
            .collect()
    }

    // =========================================================================
    // Flows
    // =========================================================================

    pub async fn start_user_flow(self: &Arc<Self>, input: Option<UserInput>) -> FlowResult {
        let result = self.flows.start_user(input).await;
        self.after_flow(&result).await;
        result
    }

    pub async fn start_ssdp_flow(self: &Arc<Self>, info: DiscoveryInfo) -> FlowResult {
        let result = self.flows.start_ssdp(info).await;
        if let FlowResult::Form {
            flow_id, values, ..
        } = &result
        {
            let host = self
                .flows
                .in_progress()
                .await
                .into_iter()
                .find(|p| &p.flow_id == flow_id)
                .and_then(|p| p.host);
            info!("Discovered {} at {:?}", values.name, host);
            self.bus.publish(BusEvent::FlowDiscovered {
                flow_id: flow_id.clone(),
                name: values.name.clone(),
                host,
            });
        }
        self.after_flow(&result).await;
        result
    }

    pub async fn configure_flow(
        self: &Arc<Self>,
        flow_id: &str,
        input: Value,
    ) -> Result<FlowResult, HubError> {
        let result = self.flows.configure(flow_id, input).await?;
        self.after_flow(&result).await;
        Ok(result)
    }

    pub async fn abort_flow(&self, flow_id: &str) -> bool {
        self.flows.abort(flow_id).await
    }

    pub async fn flows_in_progress(&self) -> Vec<FlowProgress> {
        self.flows.in_progress().await
    }

    async fn after_flow(self: &Arc<Self>, result: &FlowResult) {
        match result {
            FlowResult::CreateEntry { entry, .. } => {
                self.load_entry(&entry.entry_id).await;
            }
            FlowResult::Abort {
                reload_entry: Some(entry_id),
                ..
            } => {
                self.reload_entry(entry_id).await;
            }
            _ => {}
        }
    }

    // =========================================================================
    // Players
    // =========================================================================

    async fn player(&self, entry_id: &str) -> Result<Arc<Mutex<MediaPlayer>>, HubError> {
        self.loaded
            .read()
            .await
            .get(entry_id)
            .map(|l| l.player.clone())
            .ok_or_else(|| HubError::NotLoaded(entry_id.to_string()))
    }

    pub async fn players(&self) -> Vec<PlayerDescription> {
        let players: Vec<(String, Arc<Mutex<MediaPlayer>>)> = self
            .loaded
            .read()
            .await
            .iter()
            .map(|(id, l)| (id.clone(), l.player.clone()))
            .collect();
        let mut out = Vec::with_capacity(players.len());
        for (entry_id, player) in players {
            out.push(player.lock().await.describe(&entry_id));
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn describe_player(&self, entry_id: &str) -> Result<PlayerDescription, HubError> {
        let player = self.player(entry_id).await?;
        let description = player.lock().await.describe(entry_id);
        Ok(description)
    }

    /// Run a service call on an entity, then refresh it
    pub async fn control(
        &self,
        entry_id: &str,
        action: &str,
        value: Option<&Value>,
    ) -> Result<EntitySnapshot, HubError> {
        let command = MediaCommand::parse(action, value)?;
        let player = self.player(entry_id).await?;
        let mut player = player.lock().await;
        debug!("{}: {:?}", entry_id, command);
        player.execute(command).await?;
        Ok(refresh(entry_id, &mut player, &self.bus).await)
    }

    pub async fn browse(
        &self,
        entry_id: &str,
        content_type: Option<&str>,
        content_id: Option<&str>,
    ) -> Result<BrowseNode, HubError> {
        let player = self.player(entry_id).await?;
        let node = player.lock().await.browse_media(content_type, content_id)?;
        Ok(node)
    }

    pub async fn play_media(
        &self,
        entry_id: &str,
        media_type: &str,
        media_id: &str,
    ) -> Result<EntitySnapshot, HubError> {
        let player = self.player(entry_id).await?;
        let mut player = player.lock().await;
        player.play_media(media_type, media_id).await?;
        Ok(refresh(entry_id, &mut player, &self.bus).await)
    }

    /// Dispatch `ControlCommand`s from the bus until shutdown
    pub async fn run_command_listener(self: Arc<Self>) {
        let mut rx = self.bus.subscribe();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = rx.recv() => match result {
                    Ok(BusEvent::ControlCommand { entry_id, action, value }) => {
                        if let Err(e) = self.control(&entry_id, &action, value.as_ref()).await {
                            warn!("{}: command '{}' failed: {}", entry_id, action, e);
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Command listener lagged by {} events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("Command listener stopped");
    }

    /// Stop every poll and retry task
    pub async fn shutdown(&self) {
        self.bus.publish(BusEvent::ShuttingDown {
            reason: Some("shutdown".to_string()),
        });
        self.shutdown.cancel();
        self.loaded.write().await.clear();
        self.retries.write().await.clear();
    }
}

/// Update an entity, publishing its snapshot. A failed update marks it unavailable.
async fn refresh(entry_id: &str, player: &mut MediaPlayer, bus: &SharedBus) -> EntitySnapshot {
    if let Err(e) = player.update().await {
        warn!("{}: update failed: {}", entry_id, e);
        player.mark_unavailable();
    }
    let snapshot = player.snapshot().clone();
    bus.publish(BusEvent::EntityUpdated {
        entry_id: entry_id.to_string(),
        name: player.name().to_string(),
        snapshot: snapshot.clone(),
    });
    snapshot
}

async fn poll_loop(
    entry_id: String,
    player: Arc<Mutex<MediaPlayer>>,
    bus: SharedBus,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        {
            let mut player = player.lock().await;
            refresh(&entry_id, &mut player, &bus).await;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!("{}: poll task stopped", entry_id);
}
