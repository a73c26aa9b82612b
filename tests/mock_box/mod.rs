//! Mock Enigma2 box for testing
//!
//! Simulates the `/web/*` XML endpoints of the Enigma2 web interface.

#![allow(dead_code)]

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Mock channel
#[derive(Debug, Clone)]
pub struct MockService {
    pub reference: String,
    pub name: String,
}

impl MockService {
    pub fn new(reference: &str, name: &str) -> Self {
        Self {
            reference: reference.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockBouquet {
    pub reference: String,
    pub name: String,
    pub services: Vec<MockService>,
}

/// Mock box state
#[derive(Debug, Clone)]
pub struct MockBoxState {
    pub device_name: String,
    pub enigma_version: String,
    pub mac: String,
    pub standby: bool,
    pub volume: u8,
    pub muted: bool,
    pub current: Option<MockService>,
    pub event_title: String,
    pub event_duration: u32,
    pub bouquets: Vec<MockBouquet>,
    /// Answer every request with 401
    pub reject_auth: bool,
    /// `path?query` of every request, in order
    pub requests: Vec<String>,
    pub saw_basic_auth: bool,
}

impl Default for MockBoxState {
    fn default() -> Self {
        Self {
            device_name: "dm920".to_string(),
            enigma_version: "4.3.2r1".to_string(),
            mac: "00:09:34:aa:bb:cc".to_string(),
            standby: false,
            volume: 40,
            muted: false,
            current: None,
            event_title: String::new(),
            event_duration: 0,
            bouquets: Vec::new(),
            reject_auth: false,
            requests: Vec::new(),
            saw_basic_auth: false,
        }
    }
}

type SharedState = Arc<RwLock<MockBoxState>>;

/// Mock Enigma2 box
pub struct MockBox {
    addr: SocketAddr,
    state: SharedState,
    handle: JoinHandle<()>,
}

impl MockBox {
    /// Start a mock box on a random port
    pub async fn start() -> Self {
        let state = Arc::new(RwLock::new(MockBoxState::default()));

        let app = Router::new()
            .route("/web/deviceinfo", get(deviceinfo))
            .route("/web/powerstate", get(powerstate))
            .route("/web/vol", get(vol))
            .route("/web/getcurrent", get(getcurrent))
            .route("/web/getservices", get(getservices))
            .route("/web/zap", get(zap))
            .route("/web/remotecontrol", get(remotecontrol))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn update<F: FnOnce(&mut MockBoxState)>(&self, f: F) {
        f(&mut *self.state.write().await);
    }

    pub async fn snapshot(&self) -> MockBoxState {
        self.state.read().await.clone()
    }

    /// Bouquet "Favs" (B1) with News (S1) and Sport (S2), tuned to News
    pub async fn with_favourites(&self) {
        self.update(|s| {
            s.bouquets = vec![MockBouquet {
                reference: "B1".to_string(),
                name: "Favs".to_string(),
                services: vec![MockService::new("S1", "News"), MockService::new("S2", "Sport")],
            }];
            s.current = Some(MockService::new("S1", "News"));
            s.event_title = "Evening News".to_string();
            s.event_duration = 900;
        })
        .await;
    }

    pub async fn stop(self) {
        self.handle.abort();
    }
}

fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/xml; charset=UTF-8")], body).into_response()
}

/// Record the request; `Err` when the box rejects credentials
async fn record(
    state: &SharedState,
    headers: &HeaderMap,
    path: &str,
    query: &HashMap<String, String>,
) -> Result<(), Response> {
    let mut s = state.write().await;
    let mut keys: Vec<_> = query.iter().collect();
    keys.sort();
    let query = keys
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    s.requests.push(if query.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, query)
    });
    if headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Basic "))
    {
        s.saw_basic_auth = true;
    }
    if s.reject_auth {
        return Err(StatusCode::UNAUTHORIZED.into_response());
    }
    Ok(())
}

fn bool_text(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn volume_xml(s: &MockBoxState) -> Response {
    xml(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<e2volume><e2result>True</e2result>\
         <e2resulttext>State</e2resulttext><e2current>{}</e2current>\
         <e2ismuted>{}</e2ismuted></e2volume>",
        s.volume,
        bool_text(s.muted)
    ))
}

fn services_xml(services: &[MockService]) -> String {
    let items: String = services
        .iter()
        .map(|svc| {
            format!(
                "<e2service><e2servicereference>{}</e2servicereference>\
                 <e2servicename>{}</e2servicename></e2service>",
                svc.reference, svc.name
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<e2servicelist>{}</e2servicelist>",
        items
    )
}

async fn deviceinfo(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(r) = record(&state, &headers, "/web/deviceinfo", &query).await {
        return r;
    }
    let s = state.read().await;
    xml(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<e2deviceinfo>\
         <e2enigmaversion>{}</e2enigmaversion><e2devicename>{}</e2devicename>\
         <e2network><e2interface><e2name>eth0</e2name><e2mac>{}</e2mac></e2interface></e2network>\
         </e2deviceinfo>",
        s.enigma_version, s.device_name, s.mac
    ))
}

async fn powerstate(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(r) = record(&state, &headers, "/web/powerstate", &query).await {
        return r;
    }
    let mut s = state.write().await;
    match query.get("newstate").map(String::as_str) {
        Some("4") => s.standby = false,
        Some("5") => s.standby = true,
        _ => {}
    }
    xml(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<e2powerstate>\
         <e2instandby>{}</e2instandby></e2powerstate>",
        if s.standby { "true" } else { "false" }
    ))
}

async fn vol(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(r) = record(&state, &headers, "/web/vol", &query).await {
        return r;
    }
    let mut s = state.write().await;
    match query.get("set").map(String::as_str) {
        Some("up") => s.volume = (s.volume + 5).min(100),
        Some("down") => s.volume = s.volume.saturating_sub(5),
        Some("mute") => s.muted = !s.muted,
        Some(set) => {
            if let Some(level) = set.strip_prefix("set").and_then(|v| v.parse::<u8>().ok()) {
                s.volume = level.min(100);
            }
        }
        None => {}
    }
    volume_xml(&s)
}

async fn getcurrent(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(r) = record(&state, &headers, "/web/getcurrent", &query).await {
        return r;
    }
    let s = state.read().await;
    let (reference, name) = s
        .current
        .as_ref()
        .map(|c| (c.reference.clone(), c.name.clone()))
        .unwrap_or_default();
    xml(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<e2currentserviceinformation>\
         <e2service><e2servicereference>{}</e2servicereference>\
         <e2servicename>{}</e2servicename></e2service>\
         <e2eventlist><e2event><e2eventtitle>{}</e2eventtitle>\
         <e2eventdescription></e2eventdescription>\
         <e2eventstart>1600000000</e2eventstart>\
         <e2eventduration>{}</e2eventduration></e2event></e2eventlist>\
         </e2currentserviceinformation>",
        reference, name, s.event_title, s.event_duration
    ))
}

async fn getservices(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(r) = record(&state, &headers, "/web/getservices", &query).await {
        return r;
    }
    let s = state.read().await;
    match query.get("sRef") {
        None => {
            let bouquets: Vec<MockService> = s
                .bouquets
                .iter()
                .map(|b| MockService::new(&b.reference, &b.name))
                .collect();
            xml(services_xml(&bouquets))
        }
        Some(reference) => {
            let services = s
                .bouquets
                .iter()
                .find(|b| &b.reference == reference)
                .map(|b| b.services.clone())
                .unwrap_or_default();
            xml(services_xml(&services))
        }
    }
}

async fn zap(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(r) = record(&state, &headers, "/web/zap", &query).await {
        return r;
    }
    let mut s = state.write().await;
    let target = query.get("sRef").and_then(|reference| {
        s.bouquets
            .iter()
            .flat_map(|b| b.services.iter())
            .find(|svc| &svc.reference == reference)
            .cloned()
    });
    let ok = target.is_some();
    if target.is_some() {
        s.current = target;
    }
    xml(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<e2simplexmlresult>\
         <e2state>{}</e2state><e2statetext>zap</e2statetext></e2simplexmlresult>",
        bool_text(ok)
    ))
}

async fn remotecontrol(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(r) = record(&state, &headers, "/web/remotecontrol", &query).await {
        return r;
    }
    xml("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<e2remotecontrol>\
         <e2result>True</e2result><e2resulttext>RC command sent</e2resulttext></e2remotecontrol>"
        .to_string())
}
