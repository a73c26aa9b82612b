//! Media player entity for one Dreambox
//!
//! Wraps a [`DreamboxClient`] and turns its cached playback state into an
//! [`EntitySnapshot`]. Controls forward straight to the client; browsing walks
//! the client's bouquets and remembers the last opened one in a [`BrowseSession`]
//! so `play_media` can resolve channel references.

pub mod browse;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::dreambox::{ClientError, SharedClient};
use crate::entries::ConfigEntry;
use crate::registry::ConnectionRegistry;

pub use browse::{BrowseError, BrowseNode, BrowseSession, MediaClass, TVSHOW};

pub const DOMAIN: &str = "dreambox";
pub const MANUFACTURER: &str = "Leontech Ltd.";
pub const ICON: &str = "mdi:set-top-box";

pub const ATTR_MEDIA_DESCRIPTION: &str = "media_description";
pub const ATTR_MEDIA_START_TIME: &str = "media_start_time";
pub const ATTR_MEDIA_END_TIME: &str = "media_end_time";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaState {
    #[default]
    Off,
    On,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    BrowseMedia,
    Pause,
    Play,
    PlayMedia,
    Stop,
    TurnOff,
    TurnOn,
    VolumeMute,
    VolumeStep,
    VolumeSet,
}

pub const SUPPORTED_FEATURES: &[Feature] = &[
    Feature::BrowseMedia,
    Feature::Pause,
    Feature::Play,
    Feature::PlayMedia,
    Feature::Stop,
    Feature::TurnOff,
    Feature::TurnOn,
    Feature::VolumeMute,
    Feature::VolumeStep,
    Feature::VolumeSet,
];

#[derive(Debug, Error)]
pub enum MediaPlayerError {
    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error(transparent)]
    Browse(#[from] BrowseError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Device registry record for the box behind an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityDeviceInfo {
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub sw_version: String,
}

/// Entity state as of the last successful update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub available: bool,
    pub state: MediaState,
    pub media_title: Option<String>,
    pub media_channel: Option<String>,
    pub media_content_id: Option<String>,
    pub media_content_type: String,
    pub media_series_title: Option<String>,
    pub media_duration: Option<u32>,
    pub is_volume_muted: bool,
    pub volume_level: f64,
    pub media_playlist: Option<String>,
    pub media_image_url: Option<String>,
    pub extra_attributes: BTreeMap<String, String>,
}

/// Everything the API and MQTT expose about one entity
#[derive(Debug, Clone, Serialize)]
pub struct PlayerDescription {
    pub entry_id: String,
    pub name: String,
    pub unique_id: Option<String>,
    pub icon: &'static str,
    pub supported_features: &'static [Feature],
    pub device_info: Option<EntityDeviceInfo>,
    #[serde(flatten)]
    pub snapshot: EntitySnapshot,
}

/// Service call on an entity, parsed from `{action, value}`
#[derive(Debug, Clone, PartialEq)]
pub enum MediaCommand {
    TurnOn,
    TurnOff,
    VolumeUp,
    VolumeDown,
    VolumeSet(f64),
    VolumeMute(bool),
    Play,
    Pause,
    PlayPause,
    Stop,
    NextTrack,
    PreviousTrack,
}

impl MediaCommand {
    pub fn parse(action: &str, value: Option<&Value>) -> Result<Self, MediaPlayerError> {
        let command = match action {
            "turn_on" => Self::TurnOn,
            "turn_off" => Self::TurnOff,
            "volume_up" => Self::VolumeUp,
            "volume_down" => Self::VolumeDown,
            "volume_set" => Self::VolumeSet(
                value
                    .and_then(Value::as_f64)
                    .ok_or_else(|| invalid(action, "expected volume level 0..1"))?,
            ),
            "volume_mute" => Self::VolumeMute(
                value
                    .and_then(Value::as_bool)
                    .ok_or_else(|| invalid(action, "expected boolean"))?,
            ),
            "media_play" => Self::Play,
            "media_pause" => Self::Pause,
            "media_play_pause" => Self::PlayPause,
            "media_stop" => Self::Stop,
            "media_next_track" => Self::NextTrack,
            "media_previous_track" => Self::PreviousTrack,
            other => {
                return Err(MediaPlayerError::InvalidCommand(format!(
                    "unknown action '{}'",
                    other
                )))
            }
        };
        Ok(command)
    }
}

fn invalid(action: &str, reason: &str) -> MediaPlayerError {
    MediaPlayerError::InvalidCommand(format!("{}: {}", action, reason))
}

pub struct MediaPlayer {
    name: String,
    client: SharedClient,
    snapshot: EntitySnapshot,
    session: BrowseSession,
}

impl MediaPlayer {
    pub fn new(name: impl Into<String>, client: SharedClient) -> Self {
        Self {
            name: name.into(),
            client,
            snapshot: EntitySnapshot {
                media_content_type: TVSHOW.to_string(),
                ..Default::default()
            },
            session: BrowseSession::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> Option<String> {
        self.client.mac()
    }

    pub fn device_info(&self) -> Option<EntityDeviceInfo> {
        let info = self.client.device_info()?;
        let mac = self.client.mac().unwrap_or_default();
        Some(EntityDeviceInfo {
            identifiers: vec![(DOMAIN.to_string(), mac)],
            name: self.name.clone(),
            manufacturer: MANUFACTURER.to_string(),
            model: format!("Dreambox {}", info.device_name)
                .trim_end()
                .to_string(),
            sw_version: info.enigma_version,
        })
    }

    pub fn snapshot(&self) -> &EntitySnapshot {
        &self.snapshot
    }

    pub fn session(&self) -> &BrowseSession {
        &self.session
    }

    pub fn describe(&self, entry_id: &str) -> PlayerDescription {
        PlayerDescription {
            entry_id: entry_id.to_string(),
            name: self.name.clone(),
            unique_id: self.unique_id(),
            icon: ICON,
            supported_features: SUPPORTED_FEATURES,
            device_info: self.device_info(),
            snapshot: self.snapshot.clone(),
        }
    }

    /// Mark the entity unavailable after a failed update, keeping the last values
    pub fn mark_unavailable(&mut self) {
        self.snapshot.available = false;
    }

    /// Refresh the client and recompute the snapshot
    pub async fn update(&mut self) -> Result<&EntitySnapshot, MediaPlayerError> {
        self.client.update().await?;
        self.snapshot = self.compute_snapshot();
        Ok(&self.snapshot)
    }

    fn compute_snapshot(&self) -> EntitySnapshot {
        let client = &self.client;
        let current = client.current();
        let standby = client.standby();

        let state = if standby {
            MediaState::Off
        } else if current.is_some() {
            MediaState::Playing
        } else {
            MediaState::On
        };

        let mut extra_attributes = BTreeMap::new();
        if let (MediaState::Playing, Some(service)) = (state, &current) {
            extra_attributes.insert(ATTR_MEDIA_DESCRIPTION.to_string(), service.now.title.clone());
            extra_attributes.insert(ATTR_MEDIA_START_TIME.to_string(), service.now.start.clone());
            extra_attributes.insert(ATTR_MEDIA_END_TIME.to_string(), service.now.end.clone());
        }

        EntitySnapshot {
            available: client.available(),
            state,
            media_title: current.as_ref().map(|s| s.name.clone()),
            media_channel: current.as_ref().map(|s| s.name.clone()),
            media_content_id: current.as_ref().map(|s| s.reference.clone()),
            media_content_type: TVSHOW.to_string(),
            media_series_title: current.as_ref().map(|s| s.now.title.clone()),
            media_duration: current
                .as_ref()
                .map(|s| s.now.duration)
                .filter(|d| *d > 0),
            is_volume_muted: client.muted(),
            volume_level: f64::from(client.volume()) / 100.0,
            media_playlist: client.bouquet().map(|b| b.name),
            media_image_url: client.picon(None),
            extra_attributes,
        }
    }

    pub async fn turn_on(&self) -> Result<(), MediaPlayerError> {
        Ok(self.client.set_standby(false).await?)
    }

    pub async fn turn_off(&self) -> Result<(), MediaPlayerError> {
        Ok(self.client.set_standby(true).await?)
    }

    pub async fn volume_up(&self) -> Result<(), MediaPlayerError> {
        Ok(self.client.volume_up().await?)
    }

    pub async fn volume_down(&self) -> Result<(), MediaPlayerError> {
        Ok(self.client.volume_down().await?)
    }

    /// `volume` in 0..1, truncated to whole percent
    pub async fn set_volume_level(&self, volume: f64) -> Result<(), MediaPlayerError> {
        let percent = (volume.clamp(0.0, 1.0) * 100.0) as u8;
        Ok(self.client.set_volume(percent).await?)
    }

    pub async fn mute_volume(&self, mute: bool) -> Result<(), MediaPlayerError> {
        Ok(self.client.set_muted(mute).await?)
    }

    // Play, pause and play/pause all send the same toggle key
    pub async fn media_play(&self) -> Result<(), MediaPlayerError> {
        Ok(self.client.toggle_play_pause().await?)
    }

    pub async fn media_pause(&self) -> Result<(), MediaPlayerError> {
        Ok(self.client.toggle_play_pause().await?)
    }

    pub async fn media_play_pause(&self) -> Result<(), MediaPlayerError> {
        Ok(self.client.toggle_play_pause().await?)
    }

    pub async fn media_stop(&self) -> Result<(), MediaPlayerError> {
        Ok(self.client.stop().await?)
    }

    pub async fn media_next_track(&self) -> Result<(), MediaPlayerError> {
        Ok(self.client.channel_up().await?)
    }

    pub async fn media_previous_track(&self) -> Result<(), MediaPlayerError> {
        Ok(self.client.channel_down().await?)
    }

    pub async fn execute(&self, command: MediaCommand) -> Result<(), MediaPlayerError> {
        match command {
            MediaCommand::TurnOn => self.turn_on().await,
            MediaCommand::TurnOff => self.turn_off().await,
            MediaCommand::VolumeUp => self.volume_up().await,
            MediaCommand::VolumeDown => self.volume_down().await,
            MediaCommand::VolumeSet(level) => self.set_volume_level(level).await,
            MediaCommand::VolumeMute(mute) => self.mute_volume(mute).await,
            MediaCommand::Play => self.media_play().await,
            MediaCommand::Pause => self.media_pause().await,
            MediaCommand::PlayPause => self.media_play_pause().await,
            MediaCommand::Stop => self.media_stop().await,
            MediaCommand::NextTrack => self.media_next_track().await,
            MediaCommand::PreviousTrack => self.media_previous_track().await,
        }
    }

    pub fn browse_media(
        &mut self,
        content_type: Option<&str>,
        content_id: Option<&str>,
    ) -> Result<BrowseNode, BrowseError> {
        self.session
            .browse(self.client.as_ref(), content_type, content_id)
    }

    /// Tune to a channel of the bouquet opened by the last bouquet browse
    pub async fn play_media(&self, media_type: &str, media_id: &str) -> Result<(), MediaPlayerError> {
        let bouquet = match self.session.selected() {
            Some(bouquet) if media_type == TVSHOW => bouquet,
            _ => {
                return Err(MediaPlayerError::Unsupported(format!(
                    "Media not supported: {} / {}",
                    media_type, media_id
                )))
            }
        };
        let service = bouquet.find_service(media_id).ok_or_else(|| {
            MediaPlayerError::NotFound(format!("Channel not found: {} / {}", media_type, media_id))
        })?;
        Ok(self.client.play_service(service, bouquet).await?)
    }
}

/// Create the media player entity of a loaded entry from its registered client
pub fn setup_entry(entry: &ConfigEntry, registry: &ConnectionRegistry) -> Option<MediaPlayer> {
    let client = registry.get(&entry.entry_id)?;
    Some(MediaPlayer::new(entry.data.name.clone(), client))
}
