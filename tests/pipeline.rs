//! End-to-end scenarios through the real dispatch path: every frame here is
//! built by the same envelope builders the injection endpoints use, then
//! pushed through decode → enrich → commit → detect exactly as live traffic.

use std::f64::consts::TAU;
use std::sync::{Arc, RwLock};

use chrono::{Duration, Utc};
use serde_json::Value;

use driftwatch::dispatch::{self, SharedStore};
use driftwatch::hub::Hub;
use driftwatch::server::{
    StaticDataRequest, dark_period_frames, identity_swap_frames, position_report_frame,
    static_data_frame, telemetry_frame, teleport_frames,
};
use driftwatch::store::{AlertKind, HistoryPoint, VesselStore};

fn new_store() -> SharedStore {
    Arc::new(RwLock::new(VesselStore::new()))
}

fn process(store: &SharedStore, frame: Value) -> Option<HistoryPoint> {
    dispatch::process_envelope(store, frame)
}

#[test]
fn dark_period_raises_transmission_gap() {
    let store = new_store();
    let now = Utc::now();
    let [first, second] = dark_period_frames(1011701, 37.8, -122.4, 7200, now);

    let p1 = process(&store, first).unwrap();
    assert!(p1.alert.is_none());

    let p2 = process(&store, second).unwrap();
    let alert = p2.alert.expect("second point must carry an alert");
    assert_eq!(alert.kind, AlertKind::TransmissionGap);
    assert!(alert.message.contains("120 min"), "got: {}", alert.message);
    assert_eq!(alert.mmsi, 1011701);
}

#[test]
fn teleport_raises_position_jump() {
    let store = new_store();
    let base = Utc::now();

    // A prior point exists before the teleport pair arrives.
    process(
        &store,
        telemetry_frame(1074656, 37.8, -122.4, 0, Some(12.0), Some(90.0), base),
    )
    .unwrap();

    let [first, second] = teleport_frames(
        1074656,
        37.8,
        -122.4,
        38.8,
        -123.4,
        60,
        base + Duration::seconds(60),
    );
    process(&store, first).unwrap();
    let p2 = process(&store, second).unwrap();

    let alert = p2.alert.expect("teleport endpoint point must alert");
    assert_eq!(alert.kind, AlertKind::PositionJump);
    assert!(alert.message.contains("NM"), "got: {}", alert.message);
}

#[test]
fn renamed_vessel_raises_identity_swap() {
    let store = new_store();
    let now = Utc::now();

    // The endpoint synthesises the TestVessel names.
    let [first, second] = identity_swap_frames(1074205, 37.8, -122.4, now);
    process(&store, first).unwrap();
    let p2 = process(&store, second).unwrap();
    let alert = p2.alert.unwrap();
    assert_eq!(alert.kind, AlertKind::IdentitySwap);
    assert!(alert.message.contains("'TestVessel1074205'"));
    assert!(alert.message.contains("'TestVessel1074205_SWAP'"));

    // Arbitrary broadcast names behave the same.
    let store = new_store();
    process(
        &store,
        position_report_frame(1011701, "USS Enterprise", 37.8, -122.4, 10.0, 45.0, 0, now),
    )
    .unwrap();
    let p2 = process(
        &store,
        position_report_frame(
            1011701,
            "USS Enterprise_SWAP",
            37.801,
            -122.401,
            10.0,
            45.0,
            0,
            now + Duration::seconds(60),
        ),
    )
    .unwrap();
    let alert = p2.alert.unwrap();
    assert_eq!(alert.kind, AlertKind::IdentitySwap);
    assert!(alert.message.contains("'USS Enterprise'"));
    assert!(alert.message.contains("'USS Enterprise_SWAP'"));
}

#[test]
fn implausible_speed_raises_speed_anomaly() {
    let store = new_store();
    let base = Utc::now();

    process(
        &store,
        telemetry_frame(1103101, 37.8, -122.4, 0, Some(12.0), None, base),
    )
    .unwrap();
    let p2 = process(
        &store,
        telemetry_frame(
            1103101,
            37.81,
            -122.39,
            0,
            Some(50.0),
            None,
            base + Duration::seconds(10),
        ),
    )
    .unwrap();

    let alert = p2.alert.unwrap();
    assert_eq!(alert.kind, AlertKind::SpeedAnomaly);
    assert!(alert.message.contains("50.0 knots"));
    assert_eq!(p2.delta_speed, Some(38.0));
}

#[test]
fn heading_reversal_raises_course_change() {
    let store = new_store();
    let base = Utc::now();

    process(
        &store,
        telemetry_frame(1200000, 37.8, -122.4, 0, Some(8.0), Some(90.0), base),
    )
    .unwrap();
    let p2 = process(
        &store,
        telemetry_frame(
            1200000,
            37.81,
            -122.39,
            0,
            Some(8.0),
            Some(270.0),
            base + Duration::seconds(10),
        ),
    )
    .unwrap();

    let alert = p2.alert.unwrap();
    assert_eq!(alert.kind, AlertKind::CourseChangeAnomaly);
    // Canonical half-turn: +180.
    assert_eq!(p2.delta_heading, Some(180.0));
}

#[test]
fn circular_track_raises_circle_spoofing() {
    let store = new_store();
    let base = Utc::now();
    let mmsi = 1186400;
    let radius_deg = 0.5 / 60.0;
    let n = 40;

    let mut points = Vec::new();
    for i in 0..n {
        let theta = TAU * i as f64 / n as f64;
        let lat = 37.8 + radius_deg * theta.cos();
        let lon = -122.4 + radius_deg * theta.sin();
        let heading = (theta.to_degrees() + 90.0).rem_euclid(360.0);
        let frame = telemetry_frame(
            mmsi,
            lat,
            lon,
            0,
            Some(6.0),
            Some(heading),
            base + Duration::seconds(30 * i as i64),
        );
        points.push(process(&store, frame).unwrap());
    }

    // The last several points all carry the circle alert.
    for point in &points[n - 5..] {
        let alert = point.alert.as_ref().expect("circle alert expected");
        assert_eq!(alert.kind, AlertKind::CircleSpoofing);
        assert!(alert.message.contains("r=0.50nm"), "got: {}", alert.message);
    }
    // And the store kept the alert on the stored copy too.
    let stored = store.read().unwrap().read_history(mmsi);
    assert_eq!(
        stored.last().unwrap().alert.as_ref().unwrap().kind,
        AlertKind::CircleSpoofing
    );
}

#[test]
fn spatial_query_returns_exactly_the_boxed_vessels() {
    let store = new_store();
    let now = Utc::now();
    for (mmsi, lat, lon) in [
        (201000001u32, 37.5, -122.5),
        (201000002, 37.9, -122.1),
        (201000003, 38.3, -122.5),
    ] {
        process(
            &store,
            telemetry_frame(mmsi, lat, lon, 0, Some(5.0), None, now),
        )
        .unwrap();
    }

    let hits = store
        .read()
        .unwrap()
        .spatial_query(37.4, 37.95, -122.6, -122.0);
    let mut mmsis: Vec<u32> = hits.iter().map(|v| v.mmsi).collect();
    mmsis.sort_unstable();
    assert_eq!(mmsis, vec![201000001, 201000002]);
}

#[test]
fn reset_is_idempotent() {
    let store = new_store();
    let now = Utc::now();
    process(
        &store,
        telemetry_frame(1011701, 37.8, -122.4, 0, None, None, now),
    )
    .unwrap();

    for _ in 0..2 {
        store.write().unwrap().reset();
        let guard = store.read().unwrap();
        assert_eq!(guard.vessel_count(), 0);
        assert!(guard.read_history(1011701).is_empty());
        assert!(guard.spatial_query(-90.0, 90.0, -180.0, 180.0).is_empty());
    }
}

#[test]
fn full_message_round_trips_with_injected_flag() {
    let store = new_store();
    let frame = telemetry_frame(1011701, 37.8, -122.4, 15, Some(3.0), Some(10.0), Utc::now());
    let point = process(&store, frame.clone()).unwrap();
    assert_eq!(point.full_message, frame);
    assert_eq!(point.full_message["injected"], Value::Bool(true));
}

#[test]
fn repeated_static_injection_does_not_duplicate_state() {
    let store = new_store();
    let now = Utc::now();
    let req = StaticDataRequest {
        mmsi: 1011701,
        name: "USS Enterprise NCC-1701".into(),
        imo: 2011701,
        callsign: "USSENTE".into(),
        ship_type: serde_json::from_value(serde_json::json!(70)).unwrap(),
        destination: "Risa".into(),
        eta: "2025-05-01T12:00:00Z".into(),
        draught: 8.0,
        dim_a: 100,
        dim_b: 20,
        dim_c: 10,
        dim_d: 10,
    };
    let frame = static_data_frame(&req, now);

    process(&store, frame.clone()).unwrap();
    let first = store.read().unwrap().vessel(1011701).unwrap().clone();
    process(&store, frame).unwrap();
    let second = store.read().unwrap().vessel(1011701).unwrap().clone();

    assert_eq!(first.statics, second.statics);
    assert_eq!(
        second.statics.ship_type_meaning.as_deref(),
        Some("Cargo, all ships of this type")
    );
    // History records both messages; latest state does not duplicate.
    assert_eq!(store.read().unwrap().read_history(1011701).len(), 2);
}

#[test]
fn statics_overlay_reaches_later_position_points() {
    let store = new_store();
    let now = Utc::now();
    let req = StaticDataRequest {
        mmsi: 366123456,
        name: "EVER FORWARD".into(),
        imo: 9321483,
        callsign: "WDE9999".into(),
        ship_type: serde_json::from_value(serde_json::json!(70)).unwrap(),
        destination: "OAKLAND".into(),
        eta: "2025-06-01T00:00:00Z".into(),
        draught: 12.5,
        dim_a: 200,
        dim_b: 100,
        dim_c: 20,
        dim_d: 20,
    };
    process(&store, static_data_frame(&req, now)).unwrap();

    let point = process(
        &store,
        telemetry_frame(
            366123456,
            37.8,
            -122.4,
            0,
            Some(10.0),
            Some(45.0),
            now + Duration::seconds(30),
        ),
    )
    .unwrap();

    let statics = point.statics.expect("statics overlay expected");
    assert_eq!(statics.destination.as_deref(), Some("OAKLAND"));
    assert_eq!(statics.imo, Some(9321483));
    assert_eq!(point.flag.as_deref(), Some("United States"));
    assert_eq!(point.mid, Some(366));
}

#[test]
fn malformed_and_unknown_frames_are_dropped() {
    let store = new_store();
    assert!(process(&store, serde_json::json!({"not": "an envelope"})).is_none());
    assert!(
        process(
            &store,
            serde_json::json!({
                "MessageType": "WarpFieldReport",
                "Message": {"WarpFieldReport": {}},
                "MetaData": {"MMSI": 1011701},
            })
        )
        .is_none()
    );
    // Out-of-range coordinates never reach the store.
    let mut frame = telemetry_frame(1011701, 37.8, -122.4, 0, None, None, Utc::now());
    frame["Message"]["PositionReport"]["Latitude"] = serde_json::json!(95.0);
    assert!(process(&store, frame).is_none());
    assert_eq!(store.read().unwrap().vessel_count(), 0);
}

#[test]
fn history_timestamps_are_non_decreasing() {
    let store = new_store();
    let base = Utc::now();
    for i in 0..20 {
        process(
            &store,
            telemetry_frame(
                1011701,
                37.8 + 0.001 * i as f64,
                -122.4,
                0,
                Some(10.0),
                None,
                base + Duration::seconds(10 * i),
            ),
        )
        .unwrap();
    }
    let history = store.read().unwrap().read_history(1011701);
    assert_eq!(history.len(), 20);
    assert!(
        history
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp)
    );
    // At most one alert per point.
    assert!(history.iter().all(|p| p.alert.iter().count() <= 1));
}

#[tokio::test]
async fn dispatcher_publishes_to_subscribers() {
    let store = new_store();
    let hub = Hub::new();
    let (tx, rx) = tokio::sync::mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let dispatcher = tokio::spawn(dispatch::run_dispatcher(
        store.clone(),
        hub.clone(),
        rx,
        shutdown_rx,
    ));

    let (_id, mut sub_rx) = hub.subscribe();
    tx.send(telemetry_frame(
        1011701,
        37.8,
        -122.4,
        0,
        Some(10.0),
        Some(45.0),
        Utc::now(),
    ))
    .await
    .unwrap();

    let frame = tokio::time::timeout(std::time::Duration::from_secs(5), sub_rx.recv())
        .await
        .expect("timed out waiting for broadcast")
        .expect("subscriber channel closed early");
    let parsed: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(parsed["type"], "vessel_update");
    assert_eq!(parsed["history_point"]["mmsi"], 1011701);
    assert_eq!(parsed["history_point"]["lat"], 37.8);

    // Shutdown closes the subscriber stream.
    shutdown_tx.send(true).unwrap();
    drop(tx);
    dispatcher.await.unwrap();
    assert!(
        tokio::time::timeout(std::time::Duration::from_secs(1), sub_rx.recv())
            .await
            .expect("hub close should end the stream")
            .is_none()
    );
}
