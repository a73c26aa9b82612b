//! Enigma2 web interface documents
//!
//! Every `/web/*` endpoint answers with a small `e2*` XML document. Boxes pad
//! values with whitespace and write "None" for missing numbers, so everything is
//! read as text and normalised here.

use chrono::{Local, TimeZone};
use quick_xml::de::from_str as xml_from_str;
use serde::Deserialize;

use super::client::{ClientError, ClientResult};
use super::types::{DeviceInfo, EpgEvent, Service};

/// `isMarker` bit of the flags field (second field, decimal) of a service reference
const MARKER_FLAG: u32 = 64;

/// Separator entries inside a bouquet carry the marker flag
fn is_marker(reference: &str) -> bool {
    reference
        .split(':')
        .nth(1)
        .and_then(|flags| flags.trim().parse::<u32>().ok())
        .is_some_and(|flags| flags & MARKER_FLAG != 0)
}

fn parse<'de, T: Deserialize<'de>>(xml: &'de str) -> ClientResult<T> {
    xml_from_str(xml).map_err(|e| ClientError::Xml(e.to_string()))
}

fn text(value: Option<String>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

fn flag(value: Option<String>) -> bool {
    text(value).eq_ignore_ascii_case("true")
}

fn number<T: std::str::FromStr + Default>(value: Option<String>) -> T {
    text(value).parse().unwrap_or_default()
}

/// Unix timestamp as local `HH:MM`, empty for 0
fn format_clock(timestamp: i64) -> String {
    if timestamp <= 0 {
        return String::new();
    }
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_default()
}

// =============================================================================
// /web/deviceinfo
// =============================================================================

#[derive(Deserialize)]
struct DeviceInfoDoc {
    e2enigmaversion: Option<String>,
    e2devicename: Option<String>,
    e2network: Option<NetworkDoc>,
}

#[derive(Deserialize)]
struct NetworkDoc {
    #[serde(rename = "e2interface", default)]
    interfaces: Vec<InterfaceDoc>,
}

#[derive(Deserialize)]
struct InterfaceDoc {
    e2mac: Option<String>,
}

pub fn parse_device_info(xml: &str) -> ClientResult<DeviceInfo> {
    let doc: DeviceInfoDoc = parse(xml)?;
    let mac = doc
        .e2network
        .map(|n| n.interfaces)
        .unwrap_or_default()
        .into_iter()
        .map(|i| text(i.e2mac))
        .find(|mac| !mac.is_empty());

    Ok(DeviceInfo {
        device_name: text(doc.e2devicename),
        enigma_version: text(doc.e2enigmaversion),
        mac,
    })
}

// =============================================================================
// /web/powerstate
// =============================================================================

#[derive(Deserialize)]
struct PowerStateDoc {
    e2instandby: Option<String>,
}

pub fn parse_standby(xml: &str) -> ClientResult<bool> {
    let doc: PowerStateDoc = parse(xml)?;
    Ok(flag(doc.e2instandby))
}

// =============================================================================
// /web/vol
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeState {
    pub volume: u8,
    pub muted: bool,
}

#[derive(Deserialize)]
struct VolumeDoc {
    e2current: Option<String>,
    e2ismuted: Option<String>,
}

pub fn parse_volume(xml: &str) -> ClientResult<VolumeState> {
    let doc: VolumeDoc = parse(xml)?;
    let volume: u32 = number(doc.e2current);
    Ok(VolumeState {
        volume: volume.min(100) as u8,
        muted: flag(doc.e2ismuted),
    })
}

// =============================================================================
// /web/getcurrent
// =============================================================================

#[derive(Deserialize)]
struct CurrentDoc {
    e2service: Option<ServiceDoc>,
    e2eventlist: Option<EventListDoc>,
}

#[derive(Deserialize)]
struct ServiceDoc {
    e2servicereference: Option<String>,
    e2servicename: Option<String>,
}

#[derive(Deserialize)]
struct EventListDoc {
    #[serde(rename = "e2event", default)]
    events: Vec<EventDoc>,
}

#[derive(Deserialize)]
struct EventDoc {
    e2eventtitle: Option<String>,
    e2eventname: Option<String>,
    e2eventdescription: Option<String>,
    e2eventstart: Option<String>,
    e2eventduration: Option<String>,
}

impl EventDoc {
    fn into_event(self) -> EpgEvent {
        let title = match text(self.e2eventtitle) {
            t if t.is_empty() || t == "None" => text(self.e2eventname),
            t => t,
        };
        let start: i64 = number(self.e2eventstart);
        let duration: u32 = number(self.e2eventduration);
        let end = if start > 0 && duration > 0 {
            format_clock(start + i64::from(duration))
        } else {
            String::new()
        };
        EpgEvent {
            title,
            description: text(self.e2eventdescription),
            start: format_clock(start),
            end,
            duration,
        }
    }
}

/// Current service with its now-airing event; `None` when nothing is tuned
pub fn parse_current(xml: &str) -> ClientResult<Option<Service>> {
    let doc: CurrentDoc = parse(xml)?;
    let Some(service) = doc.e2service else {
        return Ok(None);
    };
    let reference = text(service.e2servicereference);
    if reference.is_empty() || reference == "N/A" {
        return Ok(None);
    }
    let now = doc
        .e2eventlist
        .and_then(|list| list.events.into_iter().next())
        .map(EventDoc::into_event)
        .unwrap_or_default();

    Ok(Some(Service {
        reference,
        name: text(service.e2servicename),
        now,
    }))
}

// =============================================================================
// /web/getservices
// =============================================================================

#[derive(Deserialize)]
struct ServiceListDoc {
    #[serde(rename = "e2service", default)]
    services: Vec<ServiceDoc>,
}

/// Entries of a service list, in box order, without separator markers.
/// Used for both the bouquet list and the services of one bouquet.
pub fn parse_service_list(xml: &str) -> ClientResult<Vec<Service>> {
    let doc: ServiceListDoc = parse(xml)?;
    Ok(doc
        .services
        .into_iter()
        .map(|s| Service::new(text(s.e2servicereference), text(s.e2servicename)))
        .filter(|s| !s.reference.is_empty() && !is_marker(&s.reference))
        .collect())
}
