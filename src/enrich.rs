//! Turns a decoded position event into an enriched history point: resolved
//! heading and speed, deltas against the previous point, the rolling normal
//! profile, the latest static-data overlay, and flag/MID attribution.

use crate::ais::PositionEvent;
use crate::lookup;
use crate::store::{HistoryPoint, NormalProfile, VesselStore};

/// Number of trailing history points feeding the normal profile.
pub const PROFILE_WINDOW: usize = 100;
/// AIS "speed not available" threshold; 102.3 is the raw sentinel.
pub const SOG_MAX_VALID: f64 = 102.2;
/// AIS "true heading not available" sentinel.
pub const HEADING_UNAVAILABLE: f64 = 511.0;

/// True heading unless absent or 511, otherwise course over ground.
pub fn resolve_heading(true_heading: Option<f64>, cog: Option<f64>) -> Option<f64> {
    match true_heading {
        Some(h) if h != HEADING_UNAVAILABLE => Some(h),
        _ => cog,
    }
}

/// Speed over ground, normalised to `None` when unusable.
pub fn resolve_sog(raw: Option<f64>) -> Option<f64> {
    raw.filter(|s| s.is_finite() && *s >= 0.0 && *s < SOG_MAX_VALID)
}

/// Signed angular difference in (−180, +180]; an exact half-turn reports as
/// +180.
pub fn signed_heading_delta(heading: f64, previous: f64) -> f64 {
    let delta = (heading - previous + 180.0).rem_euclid(360.0) - 180.0;
    if delta == -180.0 { 180.0 } else { delta }
}

/// Mean/std of speed and true heading over the last `PROFILE_WINDOW` points,
/// skipping unavailable and out-of-range samples. Population standard
/// deviation, matching the baseline the detectors compare against.
pub fn compute_profile<'a, I>(recent: I) -> NormalProfile
where
    I: Iterator<Item = &'a HistoryPoint>,
{
    let mut speeds = Vec::new();
    let mut headings = Vec::new();
    for point in recent {
        if let Some(s) = point.sog {
            if s >= 0.0 && s < SOG_MAX_VALID {
                speeds.push(s);
            }
        }
        if let Some(h) = point.true_heading {
            if h != HEADING_UNAVAILABLE && (0.0..360.0).contains(&h) {
                headings.push(h);
            }
        }
    }

    let (speed_mean, speed_std) = mean_std(&speeds);
    let (heading_mean, heading_std) = mean_std(&headings);
    NormalProfile {
        speed_mean,
        speed_std,
        heading_mean,
        heading_std,
        n: speeds.len(),
    }
}

fn mean_std(values: &[f64]) -> (Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    (Some(mean), Some(std))
}

/// Builds the enriched history point for a position event. Reads the store
/// but never writes it; the profile and deltas are computed against the
/// history as it stands *before* this point is appended.
pub fn enrich(event: &PositionEvent, store: &VesselStore) -> HistoryPoint {
    let heading = resolve_heading(event.true_heading, event.cog);
    let sog = resolve_sog(event.raw_sog);

    let previous = store.last_point(event.mmsi);

    let time_diff = previous.map(|prev| {
        (event.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0
    });
    let delta_speed = match (sog, previous.and_then(|p| p.sog)) {
        (Some(now), Some(before)) => Some(now - before),
        _ => None,
    };
    let delta_heading = match (heading, previous.and_then(|p| p.heading)) {
        (Some(now), Some(before)) => Some(signed_heading_delta(now, before)),
        _ => None,
    };

    let profile = store
        .history(event.mmsi)
        .map(|track| {
            let skip = track.len().saturating_sub(PROFILE_WINDOW);
            compute_profile(track.iter().skip(skip))
        })
        .unwrap_or_default();

    let statics = store.vessel(event.mmsi).map(|v| v.statics.clone());
    let (mid, flag) = lookup::parse_mmsi(event.mmsi);

    HistoryPoint {
        mmsi: event.mmsi,
        timestamp: event.timestamp,
        message_type: event.kind.as_str().to_string(),
        lat: Some(event.lat),
        lon: Some(event.lon),
        sog,
        heading,
        true_heading: event.true_heading,
        navigational_status: event.navigational_status,
        rate_of_turn: event.rate_of_turn,
        ship_name: event.ship_name.clone(),
        time_diff,
        delta_speed,
        delta_heading,
        normal_profile: Some(profile),
        statics,
        flag: flag.map(str::to_string),
        mid,
        alert: None,
        full_message: event.envelope.clone(),
    }
}
