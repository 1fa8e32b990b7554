//! Decoding of aisstream.io envelopes into typed internal events.
//!
//! One inbound frame is a JSON object `{MessageType, Message, MetaData}`.
//! Position and static kinds get typed extraction; everything else on the
//! subscription filter is kept verbatim as an opaque pass-through event.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::lookup;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unrecognised message kind: {0}")]
    UnknownKind(String),
    #[error("no MMSI in MetaData or message body")]
    MissingIdentity,
    #[error("latitude/longitude missing or out of range")]
    InvalidCoordinates,
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionKind {
    PositionReport,
    StandardClassBPositionReport,
    ExtendedClassBPositionReport,
}

impl PositionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PositionReport => "PositionReport",
            Self::StandardClassBPositionReport => "StandardClassBPositionReport",
            Self::ExtendedClassBPositionReport => "ExtendedClassBPositionReport",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticKind {
    StaticDataReport,
    ShipStaticData,
}

impl StaticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StaticDataReport => "StaticDataReport",
            Self::ShipStaticData => "ShipStaticData",
        }
    }
}

/// Kinds retained as opaque history entries. Matches the upstream
/// subscription filter minus the kinds that get typed extraction.
const PASSTHROUGH_KINDS: &[&str] = &[
    "AidsToNavigationReport",
    "BaseStationReport",
    "SafetyBroadcastMessage",
    "AddressedSafetyMessage",
    "DataLinkManagementMessage",
    "UnknownMessage",
    "AddressedBinaryMessage",
    "AssignedModeCommand",
    "BinaryAcknowledge",
    "BinaryBroadcastMessage",
    "ChannelManagement",
    "CoordinatedUTCInquiry",
    "DataLinkManagementMessageData",
    "GroupAssignmentCommand",
    "GnssBroadcastBinaryMessage",
    "Interrogation",
    "LongRangeAisBroadcastMessage",
    "MultiSlotBinaryMessage",
    "SingleSlotBinaryMessage",
    "StandardSearchAndRescueAircraftReport",
];

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawMetaData {
    #[serde(rename = "MMSI")]
    pub mmsi: Option<u32>,
    #[serde(rename = "MMSI_String", default, deserialize_with = "de_mmsi_string")]
    pub mmsi_string: Option<u32>,
    #[serde(rename = "ShipName")]
    pub ship_name: Option<String>,
    #[serde(rename = "time_utc")]
    pub time_utc: Option<String>,
}

/// `MMSI_String` shows up both as a JSON number and as a string.
fn de_mmsi_string<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPositionPayload {
    #[serde(rename = "Latitude")]
    pub latitude: Option<f64>,
    #[serde(rename = "Longitude")]
    pub longitude: Option<f64>,
    #[serde(rename = "Sog")]
    pub sog: Option<f64>,
    #[serde(rename = "Cog")]
    pub cog: Option<f64>,
    #[serde(rename = "TrueHeading")]
    pub true_heading: Option<f64>,
    #[serde(rename = "NavigationalStatus")]
    pub navigational_status: Option<i64>,
    #[serde(rename = "RateOfTurn")]
    pub rate_of_turn: Option<f64>,
    #[serde(rename = "UserID")]
    pub user_id: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawStaticPayload {
    #[serde(rename = "IMO")]
    pub imo: Option<i64>,
    #[serde(rename = "Callsign")]
    pub callsign: Option<String>,
    #[serde(rename = "ShipName")]
    pub ship_name: Option<String>,
    #[serde(rename = "ShipType", alias = "Type")]
    pub ship_type: Option<ShipTypeCode>,
    #[serde(rename = "Destination")]
    pub destination: Option<String>,
    #[serde(rename = "Eta", alias = "ETA")]
    pub eta: Option<Value>,
    #[serde(rename = "Draught")]
    pub draught: Option<f64>,
    #[serde(rename = "ToBow")]
    pub to_bow: Option<i64>,
    #[serde(rename = "ToStern")]
    pub to_stern: Option<i64>,
    #[serde(rename = "ToPort")]
    pub to_port: Option<i64>,
    #[serde(rename = "ToStarboard")]
    pub to_starboard: Option<i64>,
    #[serde(rename = "UserID")]
    pub user_id: Option<u32>,
}

/// Ship type as seen on the wire: a numeric ITU code on real traffic, free
/// text on some injected frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShipTypeCode {
    Code(u32),
    Text(String),
}

impl ShipTypeCode {
    pub fn meaning(&self) -> String {
        match self {
            Self::Code(code) => lookup::shiptype_meaning(*code),
            Self::Text(text) => text.clone(),
        }
    }
}

/// Voyage/static fields merged per vessel: a later message replaces fields it
/// carries, fields it omits keep their previous value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ship_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imo: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ship_type: Option<ShipTypeCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ship_type_meaning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draught: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dim_bow: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dim_stern: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dim_port: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dim_starboard: Option<i64>,
}

impl StaticFields {
    pub fn from_raw(raw: &RawStaticPayload) -> Self {
        Self {
            ship_name: raw.ship_name.clone(),
            imo: raw.imo,
            callsign: raw.callsign.clone(),
            ship_type: raw.ship_type.clone(),
            ship_type_meaning: raw.ship_type.as_ref().map(ShipTypeCode::meaning),
            destination: raw.destination.clone(),
            eta: raw.eta.clone(),
            draught: raw.draught,
            dim_bow: raw.to_bow,
            dim_stern: raw.to_stern,
            dim_port: raw.to_port,
            dim_starboard: raw.to_starboard,
        }
    }

    /// Field-wise overlay: `newer` wins where it has a value.
    pub fn merge(&mut self, newer: &StaticFields) {
        macro_rules! take {
            ($field:ident) => {
                if newer.$field.is_some() {
                    self.$field = newer.$field.clone();
                }
            };
        }
        take!(ship_name);
        take!(imo);
        take!(callsign);
        take!(ship_type);
        take!(ship_type_meaning);
        take!(destination);
        take!(eta);
        take!(draught);
        take!(dim_bow);
        take!(dim_stern);
        take!(dim_port);
        take!(dim_starboard);
    }
}

#[derive(Debug, Clone)]
pub struct PositionEvent {
    pub mmsi: u32,
    pub kind: PositionKind,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub raw_sog: Option<f64>,
    pub cog: Option<f64>,
    pub true_heading: Option<f64>,
    pub navigational_status: Option<i64>,
    pub rate_of_turn: Option<f64>,
    pub ship_name: Option<String>,
    pub envelope: Value,
}

#[derive(Debug, Clone)]
pub struct StaticEvent {
    pub mmsi: u32,
    pub kind: StaticKind,
    pub timestamp: DateTime<Utc>,
    pub fields: StaticFields,
    pub ship_name: Option<String>,
    pub envelope: Value,
}

#[derive(Debug, Clone)]
pub struct PassthroughEvent {
    pub mmsi: u32,
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub ship_name: Option<String>,
    pub envelope: Value,
}

#[derive(Debug, Clone)]
pub enum AisEvent {
    Position(PositionEvent),
    Static(StaticEvent),
    Passthrough(PassthroughEvent),
}

impl AisEvent {
    pub fn mmsi(&self) -> u32 {
        match self {
            Self::Position(ev) => ev.mmsi,
            Self::Static(ev) => ev.mmsi,
            Self::Passthrough(ev) => ev.mmsi,
        }
    }
}

/// Normalises one envelope into a typed event. The envelope itself travels
/// with the event so every history point can quote it verbatim.
pub fn decode(envelope: Value) -> Result<AisEvent, DecodeError> {
    let kind = envelope
        .get("MessageType")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::UnknownKind("<missing MessageType>".into()))?
        .to_string();

    let meta: RawMetaData = match envelope.get("MetaData") {
        Some(v) => serde_json::from_value(v.clone())?,
        None => RawMetaData::default(),
    };
    let body = envelope
        .get("Message")
        .and_then(|m| m.get(&kind))
        .cloned()
        .unwrap_or(Value::Null);

    // Resolution order: MetaData.MMSI, Message.<kind>.UserID, MMSI_String.
    let mmsi = meta
        .mmsi
        .or_else(|| {
            body.get("UserID")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
        })
        .or(meta.mmsi_string)
        .ok_or(DecodeError::MissingIdentity)?;

    let timestamp = parse_time_utc(meta.time_utc.as_deref());

    match kind.as_str() {
        "PositionReport" | "StandardClassBPositionReport" | "ExtendedClassBPositionReport" => {
            let raw: RawPositionPayload = serde_json::from_value(body)?;
            let (lat, lon) = match (raw.latitude, raw.longitude) {
                (Some(lat), Some(lon))
                    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) =>
                {
                    (lat, lon)
                }
                _ => return Err(DecodeError::InvalidCoordinates),
            };
            let position_kind = match kind.as_str() {
                "PositionReport" => PositionKind::PositionReport,
                "StandardClassBPositionReport" => PositionKind::StandardClassBPositionReport,
                _ => PositionKind::ExtendedClassBPositionReport,
            };
            Ok(AisEvent::Position(PositionEvent {
                mmsi,
                kind: position_kind,
                timestamp,
                lat,
                lon,
                raw_sog: raw.sog,
                cog: raw.cog,
                true_heading: raw.true_heading,
                navigational_status: raw.navigational_status,
                rate_of_turn: raw.rate_of_turn,
                ship_name: meta.ship_name,
                envelope,
            }))
        }
        "StaticDataReport" | "ShipStaticData" => {
            let raw: RawStaticPayload = serde_json::from_value(body)?;
            let static_kind = if kind == "StaticDataReport" {
                StaticKind::StaticDataReport
            } else {
                StaticKind::ShipStaticData
            };
            Ok(AisEvent::Static(StaticEvent {
                mmsi,
                kind: static_kind,
                timestamp,
                fields: StaticFields::from_raw(&raw),
                ship_name: meta.ship_name,
                envelope,
            }))
        }
        k if PASSTHROUGH_KINDS.contains(&k) => Ok(AisEvent::Passthrough(PassthroughEvent {
            mmsi,
            kind,
            timestamp,
            ship_name: meta.ship_name,
            envelope,
        })),
        other => Err(DecodeError::UnknownKind(other.to_string())),
    }
}

/// `time_utc` arrives as RFC 3339 (injected frames), the aisstream shape
/// `2024-05-01 12:00:00.000 +0000 UTC`, or a bare ISO timestamp. Anything
/// else falls back to now.
pub fn parse_time_utc(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw else { return Utc::now() };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f %z %Z") {
        return dt.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_utc();
    }
    Utc::now()
}
