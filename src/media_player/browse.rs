//! Media browsing: the bouquet library and the channels of one bouquet

use serde::Serialize;
use thiserror::Error;

use crate::dreambox::{Bouquet, DreamboxClient};

pub const LIBRARY: &str = "library";
pub const BOUQUET: &str = "bouquet";
pub const TVSHOW: &str = "tvshow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaClass {
    Directory,
    Playlist,
    Channel,
    Video,
}

/// One node of a browse tree, rebuilt on every request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowseNode {
    pub title: String,
    pub media_class: MediaClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children_media_class: Option<MediaClass>,
    pub media_content_id: String,
    pub media_content_type: String,
    pub can_play: bool,
    pub can_expand: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub children: Vec<BrowseNode>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrowseError {
    #[error("Media not found: {0}")]
    NotFound(String),
}

/// Bouquet picked by the last bouquet browse; `play_media` resolves channels in it
#[derive(Debug, Clone, Default)]
pub struct BrowseSession {
    selected: Option<Bouquet>,
}

impl BrowseSession {
    pub fn selected(&self) -> Option<&Bouquet> {
        self.selected.as_ref()
    }

    pub fn select(&mut self, bouquet: Bouquet) {
        self.selected = Some(bouquet);
    }

    pub fn clear(&mut self) {
        self.selected = None;
    }

    /// Browse `content_type` / `content_id` against the client's bouquets
    pub fn browse(
        &mut self,
        client: &dyn DreamboxClient,
        content_type: Option<&str>,
        content_id: Option<&str>,
    ) -> Result<BrowseNode, BrowseError> {
        match content_type {
            None | Some(LIBRARY) => {
                self.clear();
                Ok(library(&client.bouquets()))
            }
            Some(BOUQUET) => {
                // Last bouquet wins when references repeat
                let bouquet = content_id
                    .and_then(|id| client.bouquets().into_iter().rev().find(|b| b.reference == id))
                    .ok_or_else(|| not_found(content_type, content_id))?;
                let node = bouquet_node(client, &bouquet);
                self.select(bouquet);
                Ok(node)
            }
            Some(_) => Err(not_found(content_type, content_id)),
        }
    }
}

fn not_found(content_type: Option<&str>, content_id: Option<&str>) -> BrowseError {
    BrowseError::NotFound(format!(
        "{} / {}",
        content_type.unwrap_or("None"),
        content_id.unwrap_or("None")
    ))
}

fn library(bouquets: &[Bouquet]) -> BrowseNode {
    BrowseNode {
        title: "Favorites".to_string(),
        media_class: MediaClass::Directory,
        children_media_class: Some(MediaClass::Playlist),
        media_content_id: LIBRARY.to_string(),
        media_content_type: LIBRARY.to_string(),
        can_play: false,
        can_expand: true,
        thumbnail: None,
        children: bouquets
            .iter()
            .map(|bouquet| BrowseNode {
                title: bouquet.name.clone(),
                media_class: MediaClass::Playlist,
                children_media_class: Some(MediaClass::Channel),
                media_content_id: bouquet.reference.clone(),
                media_content_type: BOUQUET.to_string(),
                can_play: false,
                can_expand: true,
                thumbnail: None,
                children: Vec::new(),
            })
            .collect(),
    }
}

fn bouquet_node(client: &dyn DreamboxClient, bouquet: &Bouquet) -> BrowseNode {
    BrowseNode {
        title: bouquet.name.clone(),
        media_class: MediaClass::Playlist,
        children_media_class: Some(MediaClass::Video),
        media_content_id: bouquet.reference.clone(),
        media_content_type: BOUQUET.to_string(),
        can_play: false,
        can_expand: true,
        thumbnail: None,
        children: bouquet
            .services
            .iter()
            .map(|service| BrowseNode {
                title: service.name.clone(),
                media_class: MediaClass::Video,
                children_media_class: None,
                media_content_id: service.reference.clone(),
                media_content_type: TVSHOW.to_string(),
                can_play: true,
                can_expand: false,
                thumbnail: client.picon(Some(service)),
                children: Vec::new(),
            })
            .collect(),
    }
}
