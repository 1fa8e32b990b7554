//! Fan-out of enriched history points to WebSocket subscribers.
//!
//! Each subscriber owns a small bounded channel. Frames are serialised once
//! per event; the subscriber set is snapshot before iterating so attach and
//! detach during a broadcast never invalidate the sweep. A subscriber whose
//! send misses the deadline is evicted rather than blocked on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::HistoryPoint;

pub const SEND_DEADLINE: Duration = Duration::from_secs(1);
pub const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Serialize)]
struct VesselUpdate<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    history_point: &'a HistoryPoint,
}

/// Serialised wire frame for one history point.
pub fn vessel_update_frame(point: &HistoryPoint) -> String {
    serde_json::to_string(&VesselUpdate {
        kind: "vessel_update",
        history_point: point,
    })
    .unwrap_or_else(|e| {
        warn!("failed to serialise history point: {e}");
        String::from("{\"type\":\"vessel_update\"}")
    })
}

#[derive(Clone, Default)]
pub struct Hub {
    subscribers: Arc<Mutex<HashMap<Uuid, mpsc::Sender<String>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and hands back its frame channel.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().unwrap().insert(id, tx);
        debug!("subscriber {id} registered");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: &Uuid) {
        self.subscribers.lock().unwrap().remove(id);
        debug!("subscriber {id} removed");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Delivers one event to every live subscriber, evicting any that are
    /// closed or too slow to accept within `SEND_DEADLINE`.
    pub async fn publish(&self, point: &HistoryPoint) {
        let frame = vessel_update_frame(point);

        let targets: Vec<(Uuid, mpsc::Sender<String>)> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        if targets.is_empty() {
            return;
        }

        let mut dead = Vec::new();
        for (id, tx) in targets {
            match tokio::time::timeout(SEND_DEADLINE, tx.send(frame.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => dead.push(id),
                Err(_) => {
                    warn!("subscriber {id} missed the send deadline");
                    dead.push(id);
                }
            }
        }
        if !dead.is_empty() {
            let mut subscribers = self.subscribers.lock().unwrap();
            for id in dead {
                subscribers.remove(&id);
                warn!("evicted subscriber {id}");
            }
        }
    }

    /// Drops every subscriber channel; their sessions see end-of-stream.
    pub fn close_all(&self) {
        self.subscribers.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn point() -> HistoryPoint {
        HistoryPoint {
            mmsi: 366123456,
            timestamp: Utc::now(),
            message_type: "PositionReport".into(),
            lat: Some(37.8),
            lon: Some(-122.4),
            sog: Some(10.0),
            heading: Some(45.0),
            true_heading: Some(45.0),
            navigational_status: Some(0),
            rate_of_turn: None,
            ship_name: None,
            time_diff: None,
            delta_speed: None,
            delta_heading: None,
            normal_profile: None,
            statics: None,
            flag: None,
            mid: None,
            alert: None,
            full_message: json!({"MessageType": "PositionReport"}),
        }
    }

    #[tokio::test]
    async fn delivers_frames_to_live_subscribers() {
        let hub = Hub::new();
        let (_id, mut rx) = hub.subscribe();
        hub.publish(&point()).await;
        let frame = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["type"], "vessel_update");
        assert_eq!(parsed["history_point"]["mmsi"], 366123456);
    }

    #[tokio::test]
    async fn evicts_dropped_subscribers() {
        let hub = Hub::new();
        let (_id, rx) = hub.subscribe();
        drop(rx);
        hub.publish(&point()).await;
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let hub = Hub::new();
        let (id, _rx) = hub.subscribe();
        hub.unsubscribe(&id);
        hub.unsubscribe(&id);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
