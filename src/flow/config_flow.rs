//! Config flow steps: `user`, `import`, `ssdp`, `confirm`

use std::collections::BTreeMap;
use tracing::{debug, warn};
use url::Url;

use super::manager::{FlowEnv, FlowProgress};
use super::{
    AbortReason, ConfirmInput, DiscoveryInfo, FlowResult, FlowSource, FormError, FormValues,
    StepId, UserInput,
};
use crate::dreambox::types::{
    DEFAULT_NAME, DEFAULT_PASSWORD, DEFAULT_PICON_PATH, DEFAULT_PORT, DEFAULT_SSL,
    DEFAULT_USERNAME,
};
use crate::dreambox::{ClientError, ConnectionDescriptor, SharedClient};
use crate::entries::{new_id, ConfigEntry, EntryData};

/// Strip the `uuid:` prefix SSDP puts in front of a UDN
pub fn udn_to_unique_id(udn: &str) -> String {
    udn.strip_prefix("uuid:").unwrap_or(udn).to_string()
}

/// Host and port from a presentation URL, port 80 when the URL has none
pub fn host_port_from_url(presentation_url: &str) -> Option<(String, u16)> {
    let url = Url::parse(presentation_url).ok()?;
    let host = url.host_str()?.to_string();
    Some((host, url.port().unwrap_or(DEFAULT_PORT)))
}

pub struct ConfigFlow {
    flow_id: String,
    source: FlowSource,
    pending_step: Option<StepId>,
    unique_id: Option<String>,
    title_placeholder: Option<String>,
    host: Option<String>,
    name: String,
    port: u16,
    username: String,
    password: String,
    ssl: bool,
    picon_path: String,
}

impl ConfigFlow {
    pub fn new(source: FlowSource) -> Self {
        Self {
            flow_id: new_id(),
            source,
            pending_step: None,
            unique_id: None,
            title_placeholder: None,
            host: None,
            name: DEFAULT_NAME.to_string(),
            port: DEFAULT_PORT,
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            ssl: DEFAULT_SSL,
            picon_path: DEFAULT_PICON_PATH.to_string(),
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn source(&self) -> FlowSource {
        self.source
    }

    /// Step whose form was shown last
    pub fn pending_step(&self) -> Option<StepId> {
        self.pending_step
    }

    pub fn progress(&self) -> FlowProgress {
        FlowProgress {
            flow_id: self.flow_id.clone(),
            source: self.source,
            step_id: self.pending_step,
            host: self.host.clone(),
            unique_id: self.unique_id.clone(),
            title_placeholder: self.title_placeholder.clone(),
        }
    }

    /// Configuration by a `devices` list in the process config
    pub async fn step_import(&mut self, env: &FlowEnv, input: UserInput) -> FlowResult {
        self.step_user(env, Some(input)).await
    }

    pub async fn step_user(&mut self, env: &FlowEnv, input: Option<UserInput>) -> FlowResult {
        let Some(input) = input else {
            return self.show_form(StepId::User, BTreeMap::new());
        };

        self.host = Some(input.host.clone());
        self.name = input.name;
        self.port = input.port;
        self.username = input.username;
        self.password = input.password;
        self.ssl = input.ssl;
        self.picon_path = input.picon_path;

        if env.entry_with_host(&input.host).await.is_some() {
            return self.abort(AbortReason::AlreadyConfigured, None);
        }

        let client = match self.check_connection(env).await {
            Ok(client) => client,
            Err(error) => return self.show_form(StepId::User, base_error(error)),
        };
        let mac = client.mac();

        if let Some(abort) = self.set_unique_id(env, mac.clone()).await {
            return abort;
        }
        if let Some(abort) = self.abort_if_unique_id_configured(env).await {
            return abort;
        }
        if env.host_in_progress(&self.flow_id, &input.host).await {
            return self.abort(AbortReason::AlreadyInProgress, None);
        }
        if let Some(abort) = self.abort_if_host_configured(env, mac.as_deref()).await {
            return abort;
        }

        self.create_entry()
    }

    pub async fn step_ssdp(&mut self, env: &FlowEnv, info: DiscoveryInfo) -> FlowResult {
        let Some((host, port)) = info
            .presentation_url
            .as_deref()
            .and_then(host_port_from_url)
        else {
            return self.abort(AbortReason::InvalidDiscoveryInfo, None);
        };
        self.host = Some(host.clone());
        self.port = port;
        self.name = info
            .model_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_NAME.to_string());

        let unique_id = info.udn.as_deref().map(udn_to_unique_id);
        if let Some(abort) = self.set_unique_id(env, unique_id.clone()).await {
            return abort;
        }
        if let Some(abort) = self.abort_if_unique_id_configured(env).await {
            return abort;
        }
        if env.host_in_progress(&self.flow_id, &host).await {
            return self.abort(AbortReason::AlreadyInProgress, None);
        }
        if let Some(abort) = self.abort_if_host_configured(env, unique_id.as_deref()).await {
            return abort;
        }

        self.title_placeholder = Some(self.name.clone());
        self.step_confirm(env, None).await
    }

    /// User confirmation of a discovered box
    pub async fn step_confirm(&mut self, env: &FlowEnv, input: Option<ConfirmInput>) -> FlowResult {
        let mut errors = BTreeMap::new();
        if let Some(input) = input {
            if let Some(name) = input.name {
                self.name = name;
            }
            if let Some(port) = input.port {
                self.port = port;
            }
            if let Some(username) = input.username {
                self.username = username;
            }
            if let Some(password) = input.password {
                self.password = password;
            }
            if let Some(ssl) = input.ssl {
                self.ssl = ssl;
            }
            if let Some(picon_path) = input.picon_path {
                self.picon_path = picon_path;
            }
            match self.check_connection(env).await {
                Ok(_) => return self.create_entry(),
                Err(error) => errors = base_error(error),
            }
        }
        self.show_form(StepId::Confirm, errors)
    }

    fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: self.host.clone().unwrap_or_default(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            use_tls: self.ssl,
            picon_path: self.picon_path.clone(),
        }
    }

    /// Build a client and fetch the device info once
    async fn check_connection(&self, env: &FlowEnv) -> Result<SharedClient, FormError> {
        let client = env.factory().create(&self.descriptor());
        match client.fetch_device_info().await {
            Err(ClientError::AuthenticationFailed) => return Err(FormError::InvalidAuth),
            Err(e) => warn!("Connection check for {:?} failed: {}", self.host, e),
            Ok(()) => {}
        }
        if !client.available() {
            return Err(FormError::CannotConnect);
        }
        Ok(client)
    }

    async fn set_unique_id(&mut self, env: &FlowEnv, unique_id: Option<String>) -> Option<FlowResult> {
        self.unique_id = unique_id;
        let unique_id = self.unique_id.as_deref()?;
        if env.unique_id_in_progress(&self.flow_id, unique_id).await {
            return Some(self.abort(AbortReason::AlreadyInProgress, None));
        }
        None
    }

    /// An entry already owns this unique id: point it at the current host and stop
    async fn abort_if_unique_id_configured(&self, env: &FlowEnv) -> Option<FlowResult> {
        let unique_id = self.unique_id.as_deref()?;
        let entry = env.entry_with_unique_id(unique_id).await?;
        let host = self.host.as_deref().unwrap_or_default();
        let reload = env.update_entry_host(&entry.entry_id, host).await;
        if reload {
            debug!("Entry {} moved to host {}", entry.entry_id, host);
        }
        Some(self.abort(
            AbortReason::AlreadyConfigured,
            reload.then(|| entry.entry_id.clone()),
        ))
    }

    /// An entry already targets this host: backfill its unique id and stop
    async fn abort_if_host_configured(&self, env: &FlowEnv, unique_id: Option<&str>) -> Option<FlowResult> {
        let host = self.host.as_deref()?;
        let entry = env.entry_with_host(host).await?;
        if let (Some(unique_id), None) = (unique_id, entry.unique_id.as_deref()) {
            env.update_entry_unique_id(&entry.entry_id, unique_id).await;
        }
        Some(self.abort(AbortReason::AlreadyConfigured, None))
    }

    fn create_entry(&self) -> FlowResult {
        let data = EntryData {
            host: self.host.clone().unwrap_or_default(),
            name: self.name.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            ssl: self.ssl,
            picon_path: Some(self.picon_path.clone()),
        };
        FlowResult::CreateEntry {
            flow_id: self.flow_id.clone(),
            title: self.name.clone(),
            entry: ConfigEntry::new(self.name.clone(), data, self.unique_id.clone()),
        }
    }

    fn show_form(&mut self, step_id: StepId, errors: BTreeMap<String, FormError>) -> FlowResult {
        self.pending_step = Some(step_id);
        let mut description_placeholders = BTreeMap::new();
        if step_id == StepId::Confirm {
            description_placeholders.insert("name".to_string(), self.name.clone());
        }
        FlowResult::Form {
            flow_id: self.flow_id.clone(),
            step_id,
            values: FormValues {
                host: match step_id {
                    StepId::User => self.host.clone(),
                    _ => None,
                },
                name: self.name.clone(),
                port: self.port,
                username: self.username.clone(),
                password: self.password.clone(),
                ssl: self.ssl,
                picon_path: self.picon_path.clone(),
            },
            errors,
            description_placeholders,
        }
    }

    fn abort(&self, reason: AbortReason, reload_entry: Option<String>) -> FlowResult {
        FlowResult::Abort {
            flow_id: self.flow_id.clone(),
            reason,
            reload_entry,
        }
    }
}

fn base_error(error: FormError) -> BTreeMap<String, FormError> {
    BTreeMap::from([("base".to_string(), error)])
}
