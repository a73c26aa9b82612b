//! Dreambox Bridge
//!
//! Exposes Enigma2 / Dreambox set-top boxes as media player entities for Home Assistant.
//!
//! This library provides:
//! - An async client for the Enigma2 web interface
//! - Config flows (manual, imported and SSDP-discovered boxes) and persisted entries
//! - A media player entity with polling, controls, bouquet browsing and channel zapping
//! - MQTT integration and an HTTP API with Server-Sent Events

pub mod api;
pub mod bus;
pub mod config;
pub mod discovery;
pub mod dreambox;
pub mod entries;
pub mod flow;
pub mod hub;
pub mod media_player;
pub mod mqtt;
pub mod registry;
