//! HTTP and WebSocket surface: read queries over the vessel population,
//! the subscriber stream, and the test-injection endpoints.
//!
//! Injections build the same envelope shape the upstream feed produces, tag
//! it `injected: true`, and enqueue it on the dispatch queue, so downstream
//! they are indistinguishable from live traffic.

use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Duration, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::ais::ShipTypeCode;
use crate::dispatch::SharedStore;
use crate::hub::{Hub, vessel_update_frame};
use crate::store::{HistoryPoint, Vessel};

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub hub: Hub,
    pub queue: mpsc::Sender<Value>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .route("/history/:mmsi", get(get_history))
        .route("/spatial_query", get(spatial_query))
        .route("/reset_data", post(reset_data))
        .route("/inject/static_data", post(inject_static_data))
        .route("/inject/dark_period", post(inject_dark_period))
        .route("/inject/teleport", post(inject_teleport))
        .route("/inject/identity_swap", post(inject_identity_swap))
        .route("/inject/telemetry", post(inject_telemetry))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

// ---- queries ---------------------------------------------------------------

async fn get_history(
    Path(mmsi): Path<u32>,
    State(state): State<AppState>,
) -> Json<Vec<HistoryPoint>> {
    Json(state.store.read().unwrap().read_history(mmsi))
}

#[derive(Debug, Deserialize)]
struct BboxParams {
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
}

async fn spatial_query(
    Query(params): Query<BboxParams>,
    State(state): State<AppState>,
) -> Json<Vec<Vessel>> {
    let vessels = state.store.read().unwrap().spatial_query(
        params.min_lat,
        params.max_lat,
        params.min_lon,
        params.max_lon,
    );
    Json(vessels)
}

async fn reset_data(State(state): State<AppState>) -> Json<Value> {
    state.store.write().unwrap().reset();
    info!("vessel state reset");
    Json(json!({ "status": "reset complete" }))
}

// ---- subscriber stream -----------------------------------------------------

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| subscriber_session(socket, state))
}

async fn subscriber_session(socket: WebSocket, state: AppState) {
    let (id, mut rx) = state.hub.subscribe();
    info!("subscriber {id} connected");
    let (mut sender, mut receiver) = socket.split();

    // Replay the backlog in chronological order before live frames. The
    // subscriber is registered first, so nothing published meanwhile is lost;
    // it may see a point twice across the replay boundary.
    let backlog: Vec<String> = {
        let store = state.store.read().unwrap();
        store.backlog().iter().map(vessel_update_frame).collect()
    };
    for frame in backlog {
        if sender.send(Message::Text(frame)).await.is_err() {
            state.hub.unsubscribe(&id);
            return;
        }
    }

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(frame) => {
                    if sender.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = receiver.next() => match incoming {
                // Clients may send keepalives; contents are ignored.
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }

    state.hub.unsubscribe(&id);
    info!("subscriber {id} disconnected");
}

// ---- injection frame builders ----------------------------------------------

/// One synthetic PositionReport envelope, shaped like the upstream feed.
#[allow(clippy::too_many_arguments)]
pub fn position_report_frame(
    mmsi: u32,
    ship_name: &str,
    lat: f64,
    lon: f64,
    sog: f64,
    heading: f64,
    navigational_status: i64,
    timestamp: DateTime<Utc>,
) -> Value {
    json!({
        "MessageType": "PositionReport",
        "Message": { "PositionReport": {
            "Latitude": lat,
            "Longitude": lon,
            "Sog": sog,
            "Cog": heading,
            "TrueHeading": heading,
            "NavigationalStatus": navigational_status,
            "MessageID": 1,
            "UserID": mmsi,
        }},
        "MetaData": {
            "MMSI": mmsi,
            "ShipName": ship_name,
            "latitude": lat,
            "longitude": lon,
            "time_utc": timestamp.to_rfc3339(),
        },
        "injected": true,
    })
}

/// Two reports at nearly the same spot separated by `gap_seconds`.
pub fn dark_period_frames(
    mmsi: u32,
    lat: f64,
    lon: f64,
    gap_seconds: i64,
    now: DateTime<Utc>,
) -> [Value; 2] {
    let name = format!("TestVessel{mmsi}");
    [
        position_report_frame(mmsi, &name, lat, lon, 10.0, 45.0, 0, now),
        position_report_frame(
            mmsi,
            &name,
            lat + 0.001,
            lon + 0.001,
            10.0,
            45.0,
            0,
            now + Duration::seconds(gap_seconds),
        ),
    ]
}

/// Two reports teleporting between two positions `seconds_apart` apart.
pub fn teleport_frames(
    mmsi: u32,
    lat1: f64,
    lon1: f64,
    lat2: f64,
    lon2: f64,
    seconds_apart: i64,
    now: DateTime<Utc>,
) -> [Value; 2] {
    let name = format!("TestVessel{mmsi}");
    [
        position_report_frame(mmsi, &name, lat1, lon1, 12.0, 90.0, 0, now),
        position_report_frame(
            mmsi,
            &name,
            lat2,
            lon2,
            12.0,
            90.0,
            0,
            now + Duration::seconds(seconds_apart),
        ),
    ]
}

/// Two reports in which the broadcast name changes mid-track.
pub fn identity_swap_frames(mmsi: u32, lat: f64, lon: f64, now: DateTime<Utc>) -> [Value; 2] {
    let name = format!("TestVessel{mmsi}");
    [
        position_report_frame(mmsi, &name, lat, lon, 10.0, 45.0, 0, now),
        position_report_frame(
            mmsi,
            &format!("{name}_SWAP"),
            lat + 0.001,
            lon + 0.001,
            10.0,
            45.0,
            0,
            now + Duration::seconds(60),
        ),
    ]
}

/// One plain telemetry report.
pub fn telemetry_frame(
    mmsi: u32,
    lat: f64,
    lon: f64,
    navigational_status: i64,
    sog: Option<f64>,
    heading: Option<f64>,
    now: DateTime<Utc>,
) -> Value {
    position_report_frame(
        mmsi,
        &format!("TestVessel{mmsi}"),
        lat,
        lon,
        sog.unwrap_or(0.0),
        heading.unwrap_or(0.0),
        navigational_status,
        now,
    )
}

/// One synthetic static-data envelope.
pub fn static_data_frame(req: &StaticDataRequest, now: DateTime<Utc>) -> Value {
    json!({
        "MessageType": "StaticDataReport",
        "Message": { "StaticDataReport": {
            "IMO": req.imo,
            "Callsign": req.callsign,
            "ShipName": req.name,
            "ShipType": req.ship_type,
            "Destination": req.destination,
            "Eta": req.eta,
            "Draught": req.draught,
            "ToBow": req.dim_a,
            "ToStern": req.dim_b,
            "ToPort": req.dim_c,
            "ToStarboard": req.dim_d,
            "UserID": req.mmsi,
        }},
        "MetaData": {
            "MMSI": req.mmsi,
            "ShipName": req.name,
            "time_utc": now.to_rfc3339(),
        },
        "injected": true,
    })
}

// ---- injection endpoints ---------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StaticDataRequest {
    pub mmsi: u32,
    pub name: String,
    pub imo: i64,
    pub callsign: String,
    pub ship_type: ShipTypeCode,
    pub destination: String,
    pub eta: String,
    pub draught: f64,
    pub dim_a: i64,
    pub dim_b: i64,
    pub dim_c: i64,
    pub dim_d: i64,
}

async fn inject_static_data(
    State(state): State<AppState>,
    Json(req): Json<StaticDataRequest>,
) -> Json<Value> {
    let frame = static_data_frame(&req, Utc::now());
    enqueue(&state, frame).await;
    Json(json!({
        "status": "static data injected",
        "mmsi": req.mmsi,
        "name": req.name,
    }))
}

#[derive(Debug, Deserialize)]
struct DarkPeriodRequest {
    mmsi: u32,
    lat: f64,
    lon: f64,
    #[serde(default = "default_gap_seconds")]
    gap_seconds: i64,
}

fn default_gap_seconds() -> i64 {
    7200
}

async fn inject_dark_period(
    State(state): State<AppState>,
    Json(req): Json<DarkPeriodRequest>,
) -> Json<Value> {
    for frame in dark_period_frames(req.mmsi, req.lat, req.lon, req.gap_seconds, Utc::now()) {
        enqueue(&state, frame).await;
    }
    Json(json!({ "status": "dark period anomaly injected" }))
}

#[derive(Debug, Deserialize)]
struct TeleportRequest {
    mmsi: u32,
    lat1: f64,
    lon1: f64,
    lat2: f64,
    lon2: f64,
    #[serde(default = "default_seconds_apart")]
    seconds_apart: i64,
}

fn default_seconds_apart() -> i64 {
    60
}

async fn inject_teleport(
    State(state): State<AppState>,
    Json(req): Json<TeleportRequest>,
) -> Json<Value> {
    let frames = teleport_frames(
        req.mmsi,
        req.lat1,
        req.lon1,
        req.lat2,
        req.lon2,
        req.seconds_apart,
        Utc::now(),
    );
    for frame in frames {
        enqueue(&state, frame).await;
    }
    Json(json!({ "status": "teleport anomaly injected" }))
}

#[derive(Debug, Deserialize)]
struct IdentitySwapRequest {
    mmsi: u32,
    lat: f64,
    lon: f64,
}

async fn inject_identity_swap(
    State(state): State<AppState>,
    Json(req): Json<IdentitySwapRequest>,
) -> Json<Value> {
    for frame in identity_swap_frames(req.mmsi, req.lat, req.lon, Utc::now()) {
        enqueue(&state, frame).await;
    }
    Json(json!({ "status": "identity swap anomaly injected" }))
}

#[derive(Debug, Deserialize)]
struct TelemetryRequest {
    mmsi: u32,
    lat: f64,
    lon: f64,
    #[serde(default)]
    navigational_status: i64,
    #[serde(default)]
    sog: Option<f64>,
    #[serde(default)]
    heading: Option<f64>,
}

async fn inject_telemetry(
    State(state): State<AppState>,
    Json(req): Json<TelemetryRequest>,
) -> Json<Value> {
    let frame = telemetry_frame(
        req.mmsi,
        req.lat,
        req.lon,
        req.navigational_status,
        req.sog,
        req.heading,
        Utc::now(),
    );
    enqueue(&state, frame).await;
    Json(json!({ "status": "telemetry injected" }))
}

async fn enqueue(state: &AppState, frame: Value) {
    if state.queue.send(frame).await.is_err() {
        warn!("dispatch queue closed; dropping injected frame");
    }
}
