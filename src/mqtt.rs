//! MQTT bridge
//!
//! Publishes entity state to MQTT for Home Assistant and turns messages on the
//! control topics into bus commands.

use anyhow::{anyhow, Result};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusEvent, SharedBus};
use crate::config::MqttConfig;

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TOPIC_PREFIX: &str = "dreambox-bridge";
const CLIENT_ID: &str = "dreambox-bridge";

/// MQTT connection status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttStatus {
    pub connected: bool,
    pub host: Option<String>,
    pub port: u16,
    pub topic_prefix: String,
}

/// Internal state
struct MqttState {
    host: Option<String>,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    topic_prefix: String,
    connected: bool,
}

impl Default for MqttState {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            username: None,
            password: None,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            connected: false,
        }
    }
}

/// A message to publish: topic below the prefix, payload, retained flag
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub topic: String,
    pub payload: Value,
    pub retain: bool,
}

/// Messages a bus event maps to; most events publish nothing
pub fn messages_for_event(event: &BusEvent) -> Vec<OutgoingMessage> {
    let availability = |entry_id: &str, online: bool| OutgoingMessage {
        topic: format!("players/{}/availability", entry_id),
        payload: Value::String(if online { "online" } else { "offline" }.to_string()),
        retain: true,
    };

    match event {
        BusEvent::EntityUpdated {
            entry_id,
            name,
            snapshot,
        } => {
            let mut state = serde_json::to_value(snapshot).unwrap_or(Value::Null);
            if let Value::Object(map) = &mut state {
                map.insert("name".to_string(), Value::String(name.clone()));
            }
            vec![
                OutgoingMessage {
                    topic: format!("players/{}/state", entry_id),
                    payload: state,
                    retain: true,
                },
                availability(entry_id, snapshot.available),
            ]
        }
        BusEvent::EntryUnloaded { entry_id } => vec![availability(entry_id, false)],
        BusEvent::EntryRemoved { entry_id } => vec![
            availability(entry_id, false),
            // Empty retained payload clears the stored state
            OutgoingMessage {
                topic: format!("players/{}/state", entry_id),
                payload: Value::Null,
                retain: true,
            },
        ],
        BusEvent::ShuttingDown { reason } => vec![OutgoingMessage {
            topic: "system/shutdown".to_string(),
            payload: serde_json::json!({
                "shutting_down": true,
                "reason": reason
            }),
            retain: false,
        }],
        _ => Vec::new(),
    }
}

/// Parse a control message on `{prefix}/players/{entry_id}/control`
pub fn parse_control(prefix: &str, topic: &str, payload: &[u8]) -> Option<BusEvent> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix("/players/")?;
    let entry_id = rest.strip_suffix("/control")?;
    if entry_id.is_empty() || entry_id.contains('/') {
        return None;
    }

    let cmd: Value = serde_json::from_slice(payload).ok()?;
    let action = cmd.get("action")?.as_str()?.to_string();
    let value = cmd.get("value").cloned();
    Some(BusEvent::ControlCommand {
        entry_id: entry_id.to_string(),
        action,
        value,
    })
}

/// MQTT bridge
pub struct MqttBridge {
    state: Arc<RwLock<MqttState>>,
    client: Arc<RwLock<Option<AsyncClient>>>,
    bus: SharedBus,
    shutdown: CancellationToken,
}

impl MqttBridge {
    pub fn new(bus: SharedBus, shutdown: CancellationToken) -> Self {
        Self {
            state: Arc::new(RwLock::new(MqttState::default())),
            client: Arc::new(RwLock::new(None)),
            bus,
            shutdown,
        }
    }

    /// Configure the MQTT connection
    pub async fn configure(&self, config: &MqttConfig) {
        let mut state = self.state.write().await;
        state.host = Some(config.host.clone());
        state.port = config.port;
        state.username = config.username.clone();
        state.password = config.password.clone();
        if let Some(prefix) = &config.topic_prefix {
            state.topic_prefix = prefix.trim_end_matches('/').to_string();
        }
    }

    /// Check if configured
    pub async fn is_configured(&self) -> bool {
        self.state.read().await.host.is_some()
    }

    /// Get connection status
    pub async fn get_status(&self) -> MqttStatus {
        let state = self.state.read().await;
        MqttStatus {
            connected: state.connected,
            host: state.host.clone(),
            port: state.port,
            topic_prefix: state.topic_prefix.clone(),
        }
    }

    /// Start MQTT connection and bridge
    pub async fn start(&self) -> Result<()> {
        let (host, port, username, password, topic_prefix) = {
            let state = self.state.read().await;
            let host = state
                .host
                .clone()
                .ok_or_else(|| anyhow!("MQTT host not configured"))?;
            (
                host,
                state.port,
                state.username.clone(),
                state.password.clone(),
                state.topic_prefix.clone(),
            )
        };

        let mut options = MqttOptions::new(CLIENT_ID, &host, port);
        options.set_keep_alive(Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&username, &password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 100);

        {
            let mut client_guard = self.client.write().await;
            *client_guard = Some(client.clone());
        }

        // Subscribe to control topics
        let control_topic = format!("{}/players/+/control", topic_prefix);
        client.subscribe(&control_topic, QoS::AtMostOnce).await?;

        tracing::info!("MQTT connecting to {}:{}...", host, port);

        // Connected state is set when ConnAck is received
        let state = self.state.clone();
        let bus = self.bus.clone();
        let prefix = topic_prefix.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("MQTT event loop shutting down");
                        break;
                    }
                    result = eventloop.poll() => {
                        match result {
                            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                                match parse_control(&prefix, &publish.topic, &publish.payload) {
                                    Some(command) => bus.publish(command),
                                    None => tracing::debug!("Ignoring MQTT message on {}", publish.topic),
                                }
                            }
                            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                                tracing::info!("MQTT connected (code: {:?})", ack.code);
                                state.write().await.connected = true;
                            }
                            Ok(Event::Incoming(Incoming::Disconnect)) => {
                                tracing::warn!("MQTT disconnected");
                                state.write().await.connected = false;
                            }
                            Err(e) => {
                                tracing::error!("MQTT error: {}", e);
                                state.write().await.connected = false;
                                // Check shutdown before sleeping
                                tokio::select! {
                                    _ = shutdown.cancelled() => break,
                                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        // Spawn bus event forwarder
        let client_clone = self.client.clone();
        let bus_clone = self.bus.clone();
        let shutdown2 = self.shutdown.clone();

        tokio::spawn(async move {
            let mut rx = bus_clone.subscribe();

            loop {
                tokio::select! {
                    _ = shutdown2.cancelled() => {
                        tracing::info!("MQTT bus forwarder shutting down");
                        break;
                    }
                    result = rx.recv() => {
                        match result {
                            Ok(event) => {
                                if let Some(client) = client_clone.read().await.as_ref() {
                                    for message in messages_for_event(&event) {
                                        if let Err(e) = Self::publish_message(client, &topic_prefix, &message).await {
                                            tracing::debug!("MQTT publish to {} failed: {}", message.topic, e);
                                        }
                                    }
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                tracing::warn!("MQTT forwarder lagged by {} events", n);
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn publish_message(
        client: &AsyncClient,
        prefix: &str,
        message: &OutgoingMessage,
    ) -> Result<()> {
        let topic = format!("{}/{}", prefix, message.topic);
        let payload = match &message.payload {
            Value::Null => Vec::new(),
            Value::String(s) => s.as_bytes().to_vec(),
            other => serde_json::to_vec(other)?,
        };
        client
            .publish(&topic, QoS::AtLeastOnce, message.retain, payload)
            .await?;
        Ok(())
    }

    /// Stop MQTT connection
    pub async fn stop(&self) {
        // Cancel background tasks first
        self.shutdown.cancel();

        // Then disconnect client
        let mut client = self.client.write().await;
        if let Some(c) = client.take() {
            let _ = c.disconnect().await;
        }

        self.state.write().await.connected = false;

        tracing::info!("MQTT bridge stopped");
    }
}
