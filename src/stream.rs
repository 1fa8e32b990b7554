//! Upstream aisstream.io client: connect, subscribe for the bounding box,
//! and pump raw frames onto the dispatch queue, reconnecting with capped
//! exponential backoff.

use anyhow::{Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{error, info, warn};
use url::Url;

use crate::config::{BBOX_SF_BAY, UPSTREAM_URL};

/// The subscription frame must reach the server shortly after the socket
/// opens or the upstream drops us.
pub const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(3);
pub const BACKOFF_INITIAL: Duration = Duration::from_secs(5);
pub const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Everything we subscribe to. Position and static kinds get typed handling
/// downstream; the rest is retained as opaque history.
const FILTER_MESSAGE_TYPES: &[&str] = &[
    "PositionReport",
    "UnknownMessage",
    "AddressedSafetyMessage",
    "AddressedBinaryMessage",
    "AidsToNavigationReport",
    "AssignedModeCommand",
    "BaseStationReport",
    "BinaryAcknowledge",
    "BinaryBroadcastMessage",
    "ChannelManagement",
    "CoordinatedUTCInquiry",
    "DataLinkManagementMessage",
    "DataLinkManagementMessageData",
    "ExtendedClassBPositionReport",
    "GroupAssignmentCommand",
    "GnssBroadcastBinaryMessage",
    "Interrogation",
    "LongRangeAisBroadcastMessage",
    "MultiSlotBinaryMessage",
    "SafetyBroadcastMessage",
    "ShipStaticData",
    "SingleSlotBinaryMessage",
    "StandardClassBPositionReport",
    "StandardSearchAndRescueAircraftReport",
    "StaticDataReport",
];

pub struct AisStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl AisStream {
    /// Opens the socket and sends the subscription frame within
    /// `SUBSCRIBE_TIMEOUT` of the connection coming up.
    pub async fn connect(url: &Url, api_key: &str) -> Result<Self> {
        let (mut socket, _) = connect_async(url.as_str()).await?;

        let subscription = serde_json::json!({
            "APIKey": api_key,
            "BoundingBoxes": [BBOX_SF_BAY],
            "FilterMessageTypes": FILTER_MESSAGE_TYPES,
        });
        tokio::time::timeout(
            SUBSCRIBE_TIMEOUT,
            socket.send(Message::Text(subscription.to_string())),
        )
        .await
        .map_err(|_| anyhow!("timed out sending subscription frame"))??;

        Ok(Self { socket })
    }

    /// Next parseable JSON frame. Unparseable frames are logged and skipped;
    /// an upstream error frame, a close frame, or a transport error ends the
    /// connection. `Ok(None)` means the stream finished cleanly.
    pub async fn next_frame(&mut self) -> Result<Option<Value>> {
        while let Some(message) = self.socket.next().await {
            let parsed = match message? {
                Message::Text(text) => serde_json::from_str::<Value>(&text),
                Message::Binary(bytes) => serde_json::from_slice::<Value>(&bytes),
                Message::Close(_) => return Err(anyhow!("connection closed by upstream")),
                _ => continue,
            };
            match parsed {
                Ok(frame) => {
                    // aisstream reports auth failures as an error frame on
                    // the open socket.
                    if let Some(err) = frame.get("error").and_then(Value::as_str) {
                        return Err(anyhow!("upstream rejected subscription: {err}"));
                    }
                    return Ok(Some(frame));
                }
                Err(e) => {
                    warn!("failed to parse AIS frame: {e}");
                    continue;
                }
            }
        }
        Ok(None)
    }
}

/// Runs until the dispatch queue closes: connect, subscribe, forward frames;
/// on any failure sleep and retry, doubling the delay up to `BACKOFF_MAX`
/// and resetting it after each successful subscription.
pub async fn run_ingest(api_key: String, tx: mpsc::Sender<Value>) {
    let url = match Url::parse(UPSTREAM_URL) {
        Ok(url) => url,
        Err(e) => {
            error!("invalid upstream URL {UPSTREAM_URL}: {e}");
            return;
        }
    };

    let mut delay = BACKOFF_INITIAL;
    loop {
        match AisStream::connect(&url, &api_key).await {
            Ok(mut stream) => {
                info!("subscribed to AIS stream for the SF Bay bounding box");
                delay = BACKOFF_INITIAL;
                loop {
                    match stream.next_frame().await {
                        Ok(Some(frame)) => {
                            if tx.send(frame).await.is_err() {
                                info!("dispatch queue closed, stopping ingest");
                                return;
                            }
                        }
                        Ok(None) => {
                            warn!("upstream stream ended");
                            break;
                        }
                        Err(e) => {
                            warn!("upstream read failed: {e}");
                            break;
                        }
                    }
                }
            }
            Err(e) => error!("AIS stream connection failed: {e}"),
        }

        info!("reconnecting to upstream in {}s", delay.as_secs());
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(BACKOFF_MAX);
    }
}
