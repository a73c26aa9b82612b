//! Flow manager: owns the flows in progress and the environment they check against

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::config_flow::ConfigFlow;
use super::{
    ConfirmInput, DiscoveryInfo, FlowError, FlowResult, FlowSource, StepId, UserInput,
};
use crate::dreambox::ClientFactory;
use crate::entries::{ConfigEntry, EntryStore};

/// What other flows can see about a flow in progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowProgress {
    pub flow_id: String,
    pub source: FlowSource,
    pub step_id: Option<StepId>,
    pub host: Option<String>,
    pub unique_id: Option<String>,
    /// Display name for discovered boxes awaiting confirmation
    pub title_placeholder: Option<String>,
}

/// Shared state consulted by flow steps. Every method takes its lock briefly;
/// nothing is held while a step talks to a box.
#[derive(Clone)]
pub struct FlowEnv {
    entries: Arc<RwLock<EntryStore>>,
    progress: Arc<RwLock<HashMap<String, FlowProgress>>>,
    factory: Arc<dyn ClientFactory>,
}

impl FlowEnv {
    pub fn new(entries: Arc<RwLock<EntryStore>>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            entries,
            progress: Arc::new(RwLock::new(HashMap::new())),
            factory,
        }
    }

    pub fn factory(&self) -> &Arc<dyn ClientFactory> {
        &self.factory
    }

    pub async fn entry_with_host(&self, host: &str) -> Option<ConfigEntry> {
        self.entries.read().await.find_by_host(host).cloned()
    }

    pub async fn entry_with_unique_id(&self, unique_id: &str) -> Option<ConfigEntry> {
        self.entries.read().await.find_by_unique_id(unique_id).cloned()
    }

    pub async fn update_entry_host(&self, entry_id: &str, host: &str) -> bool {
        self.entries.write().await.update_host(entry_id, host)
    }

    pub async fn update_entry_unique_id(&self, entry_id: &str, unique_id: &str) -> bool {
        self.entries.write().await.update_unique_id(entry_id, unique_id)
    }

    pub async fn add_entry(&self, entry: ConfigEntry) {
        self.entries.write().await.add(entry);
    }

    /// Another flow in progress targets `host`
    pub async fn host_in_progress(&self, flow_id: &str, host: &str) -> bool {
        self.progress
            .read()
            .await
            .values()
            .any(|p| p.flow_id != flow_id && p.host.as_deref() == Some(host))
    }

    /// Another flow in progress claimed `unique_id`
    pub async fn unique_id_in_progress(&self, flow_id: &str, unique_id: &str) -> bool {
        self.progress
            .read()
            .await
            .values()
            .any(|p| p.flow_id != flow_id && p.unique_id.as_deref() == Some(unique_id))
    }

    async fn track(&self, progress: FlowProgress) {
        self.progress
            .write()
            .await
            .insert(progress.flow_id.clone(), progress);
    }

    async fn forget(&self, flow_id: &str) {
        self.progress.write().await.remove(flow_id);
    }

    async fn snapshot(&self) -> Vec<FlowProgress> {
        self.progress.read().await.values().cloned().collect()
    }
}

/// Runs flows to completion across API calls
pub struct FlowManager {
    env: FlowEnv,
    flows: Mutex<HashMap<String, ConfigFlow>>,
}

impl FlowManager {
    pub fn new(entries: Arc<RwLock<EntryStore>>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            env: FlowEnv::new(entries, factory),
            flows: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start_user(&self, input: Option<UserInput>) -> FlowResult {
        let mut flow = ConfigFlow::new(FlowSource::User);
        self.env.track(flow.progress()).await;
        let result = flow.step_user(&self.env, input).await;
        self.finish_step(flow, result).await
    }

    pub async fn start_import(&self, input: UserInput) -> FlowResult {
        let mut flow = ConfigFlow::new(FlowSource::Import);
        self.env.track(flow.progress()).await;
        let result = flow.step_import(&self.env, input).await;
        self.finish_step(flow, result).await
    }

    pub async fn start_ssdp(&self, info: DiscoveryInfo) -> FlowResult {
        let mut flow = ConfigFlow::new(FlowSource::Ssdp);
        self.env.track(flow.progress()).await;
        let result = flow.step_ssdp(&self.env, info).await;
        self.finish_step(flow, result).await
    }

    /// Submit input for the step a flow is waiting on
    pub async fn configure(&self, flow_id: &str, input: Value) -> Result<FlowResult, FlowError> {
        let mut flow = self
            .flows
            .lock()
            .await
            .remove(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;

        let step = flow.pending_step().unwrap_or(StepId::User);
        let result = match step {
            StepId::Confirm => match serde_json::from_value::<ConfirmInput>(input) {
                Ok(input) => flow.step_confirm(&self.env, Some(input)).await,
                Err(e) => return self.reject(flow, step, e).await,
            },
            _ => match serde_json::from_value::<UserInput>(input) {
                Ok(input) => flow.step_user(&self.env, Some(input)).await,
                Err(e) => return self.reject(flow, step, e).await,
            },
        };
        Ok(self.finish_step(flow, result).await)
    }

    /// Drop a flow without finishing it
    pub async fn abort(&self, flow_id: &str) -> bool {
        let removed = self.flows.lock().await.remove(flow_id).is_some();
        self.env.forget(flow_id).await;
        removed
    }

    pub async fn in_progress(&self) -> Vec<FlowProgress> {
        self.env.snapshot().await
    }

    async fn reject(
        &self,
        flow: ConfigFlow,
        step: StepId,
        error: serde_json::Error,
    ) -> Result<FlowResult, FlowError> {
        self.flows
            .lock()
            .await
            .insert(flow.flow_id().to_string(), flow);
        Err(FlowError::InvalidInput {
            step,
            message: error.to_string(),
        })
    }

    async fn finish_step(&self, flow: ConfigFlow, result: FlowResult) -> FlowResult {
        match &result {
            FlowResult::Form { step_id, .. } => {
                debug!(flow_id = %flow.flow_id(), step = ?step_id, "Flow waiting for input");
                self.env.track(flow.progress()).await;
                self.flows
                    .lock()
                    .await
                    .insert(flow.flow_id().to_string(), flow);
            }
            FlowResult::CreateEntry { entry, .. } => {
                info!(
                    "Flow {} created entry '{}' for {}",
                    flow.flow_id(),
                    entry.title,
                    entry.data.host
                );
                self.env.add_entry(entry.clone()).await;
                self.env.forget(flow.flow_id()).await;
            }
            FlowResult::Abort { reason, .. } => {
                info!("Flow {} aborted: {}", flow.flow_id(), reason);
                self.env.forget(flow.flow_id()).await;
            }
        }
        result
    }
}
