//! The single consumer of the internal frame queue.
//!
//! Every mutation of the vessel store on the ingest path happens here, in
//! arrival order: decode, enrich, commit, run the anomaly chain over the
//! post-append history, then publish the final point to the hub. Upstream
//! frames and injected test frames travel the same path and are
//! indistinguishable beyond the `injected` flag inside the raw payload.

use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::ais::{self, AisEvent};
use crate::anomaly;
use crate::enrich;
use crate::hub::Hub;
use crate::store::{HistoryPoint, VesselStore};

pub type SharedStore = Arc<RwLock<VesselStore>>;

pub const QUEUE_CAPACITY: usize = 1024;
/// How long a shutdown waits for already-queued frames.
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Decodes one envelope and commits it to the store. Returns the final
/// history point (alert attached) for publication, or `None` for dropped
/// frames.
pub fn process_envelope(store: &SharedStore, envelope: Value) -> Option<HistoryPoint> {
    let event = match ais::decode(envelope) {
        Ok(event) => event,
        Err(e) => {
            warn!("dropping frame: {e}");
            return None;
        }
    };

    let mut guard = store.write().unwrap();
    match event {
        AisEvent::Position(ev) => {
            let mut point = enrich::enrich(&ev, &guard);
            if let Err(e) = guard.upsert_position(ev.mmsi, ev.lat, ev.lon, ev.timestamp) {
                warn!(mmsi = ev.mmsi, "dropping position report: {e}");
                return None;
            }
            guard.update_dynamic(&point);
            guard.append_history(ev.mmsi, point.clone());

            if let Some(alert) = guard.history(ev.mmsi).and_then(anomaly::evaluate) {
                info!("{}", alert.message);
                guard.set_last_alert(ev.mmsi, alert.clone());
                point.alert = Some(alert);
            }
            Some(point)
        }
        AisEvent::Static(ev) => {
            guard.merge_statics(ev.mmsi, &ev.fields);
            let point = HistoryPoint::from_static(&ev);
            guard.append_history(ev.mmsi, point.clone());
            Some(point)
        }
        AisEvent::Passthrough(ev) => {
            debug!(mmsi = ev.mmsi, kind = %ev.kind, "pass-through message");
            let point = HistoryPoint::from_passthrough(&ev);
            guard.append_history(ev.mmsi, point.clone());
            Some(point)
        }
    }
}

/// Drains the queue until it closes or shutdown is signalled; on shutdown,
/// already-queued frames are processed up to `DRAIN_DEADLINE` before the
/// subscriber channels close.
pub async fn run_dispatcher(
    store: SharedStore,
    hub: Hub,
    mut rx: mpsc::Receiver<Value>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let next = tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(envelope) => Some(envelope),
                None => break,
            },
            _ = shutdown.changed() => None,
        };

        match next {
            Some(envelope) => {
                if let Some(point) = process_envelope(&store, envelope) {
                    hub.publish(&point).await;
                }
            }
            None => {
                // Shutdown: finish what is already queued, then stop.
                let deadline = Instant::now() + DRAIN_DEADLINE;
                let mut drained = 0usize;
                while Instant::now() < deadline {
                    match rx.try_recv() {
                        Ok(envelope) => {
                            if let Some(point) = process_envelope(&store, envelope) {
                                hub.publish(&point).await;
                            }
                            drained += 1;
                        }
                        Err(_) => break,
                    }
                }
                info!("dispatcher drained {drained} queued frames on shutdown");
                break;
            }
        }
    }
    hub.close_all();
    info!("dispatcher stopped");
}
