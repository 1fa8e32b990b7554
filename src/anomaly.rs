//! The six-detector anomaly chain.
//!
//! The chain runs once per accepted position report, against the vessel's
//! history with the fresh point already appended: the last entry is the point
//! under evaluation and the penultimate entry is its predecessor. Detectors
//! run in a fixed order and each later hit overwrites the earlier one, so at
//! most one alert survives per point and circle spoofing outranks the simpler
//! checks.

use std::collections::VecDeque;
use std::f64::consts::TAU;

use tracing::debug;

use crate::circle;
use crate::store::{Alert, AlertKind, HistoryPoint};

/// Silence longer than this raises a transmission gap.
pub const GAP_SECONDS: f64 = 600.0;
/// Displacement beyond this (flat-earth NM against the predecessor) raises a
/// position jump.
pub const JUMP_NM: f64 = 10.0;
/// Reported speeds above this are treated as implausible.
pub const SPEED_MAX_KNOTS: f64 = 40.0;
/// Heading swings beyond this many degrees between reports are flagged.
pub const COURSE_CHANGE_DEG: f64 = 90.0;

/// Sliding window the circle detector examines, ending at the current point.
pub const CIRCLE_WINDOW_SECS: i64 = 60 * 45;
pub const CIRCLE_MIN_POINTS: usize = 3;
/// Degrees; roughly 10 m of radial scatter.
pub const CIRCLE_MAX_RESIDUAL: f64 = 1e-4;
/// Degrees, ~0.1 NM.
pub const CIRCLE_MIN_RADIUS: f64 = 0.1 / 60.0;
/// Degrees, ~2 NM.
pub const CIRCLE_MAX_RADIUS: f64 = 2.0 / 60.0;
/// Radians; angular spacing must be this uniform.
pub const CIRCLE_UNIFORMITY_STD: f64 = 0.03;
/// Knots; speed around the loop must be this steady.
pub const CIRCLE_SOG_STD: f64 = 0.5;

/// Runs the detector chain. `history` must end with the point under
/// evaluation; returns the single surviving alert, if any.
pub fn evaluate(history: &VecDeque<HistoryPoint>) -> Option<Alert> {
    let current = history.back()?;
    let previous = history.len().checked_sub(2).and_then(|i| history.get(i));

    let mut alert: Option<Alert> = None;

    // 1. Transmission gap ("dark" period).
    if let (Some(time_diff), Some(lat), Some(lon)) = (current.time_diff, current.lat, current.lon)
    {
        if time_diff > GAP_SECONDS {
            alert = Some(make_alert(
                current,
                AlertKind::TransmissionGap,
                format!(
                    "ALERT: Vessel {} went dark for {} min near ({:.5},{:.5})",
                    current.mmsi,
                    time_diff as i64 / 60,
                    lat,
                    lon
                ),
            ));
        }
    }

    // 2. Position jump against the predecessor.
    if let Some(prev) = previous {
        if let (Some(lat), Some(lon), Some(prev_lat), Some(prev_lon)) =
            (current.lat, current.lon, prev.lat, prev.lon)
        {
            let dist_nm = (lat - prev_lat).hypot(lon - prev_lon) * 60.0;
            if dist_nm > JUMP_NM {
                alert = Some(make_alert(
                    current,
                    AlertKind::PositionJump,
                    format!(
                        "ALERT: Vessel {} jumped {:.1} NM at {} (possible spoofing)",
                        current.mmsi,
                        dist_nm,
                        current.timestamp.to_rfc3339()
                    ),
                ));
            }
        }
    }

    // 3. Identity swap: the broadcast name changed between reports.
    if let Some(prev) = previous {
        if let (Some(prev_name), Some(curr_name)) =
            (prev.ship_name.as_deref(), current.ship_name.as_deref())
        {
            if !prev_name.is_empty() && !curr_name.is_empty() && prev_name != curr_name {
                alert = Some(make_alert(
                    current,
                    AlertKind::IdentitySwap,
                    format!(
                        "ALERT: Vessel {} changed name from '{}' to '{}' at {}",
                        current.mmsi,
                        prev_name,
                        curr_name,
                        current.timestamp.to_rfc3339()
                    ),
                ));
            }
        }
    }

    // 4. Implausible speed.
    if let Some(sog) = current.sog {
        if sog > SPEED_MAX_KNOTS {
            alert = Some(make_alert(
                current,
                AlertKind::SpeedAnomaly,
                format!(
                    "ALERT: Vessel {} reported implausible speed {:.1} knots at {}",
                    current.mmsi,
                    sog,
                    current.timestamp.to_rfc3339()
                ),
            ));
        }
    }

    // 5. Sudden course change.
    if let Some(delta_heading) = current.delta_heading {
        if delta_heading.abs() > COURSE_CHANGE_DEG {
            alert = Some(make_alert(
                current,
                AlertKind::CourseChangeAnomaly,
                format!(
                    "ALERT: Vessel {} changed heading by {:.1}\u{b0} at {}",
                    current.mmsi,
                    delta_heading,
                    current.timestamp.to_rfc3339()
                ),
            ));
        }
    }

    // 6. Circle spoofing wins over everything else.
    if let Some(circle_alert) = detect_circle_spoofing(history) {
        debug!(mmsi = current.mmsi, "circle spoofing pattern detected");
        alert = Some(circle_alert);
    }

    alert
}

/// Checks whether the recent track forms a suspiciously perfect circle:
/// a tight Kåsa fit in the 0.1–2 NM radius band, uniform angular spacing,
/// and near-constant speed.
fn detect_circle_spoofing(history: &VecDeque<HistoryPoint>) -> Option<Alert> {
    let current = history.back()?;
    let cutoff = current.timestamp - chrono::Duration::seconds(CIRCLE_WINDOW_SECS);

    let points: Vec<&HistoryPoint> = history
        .iter()
        .filter(|p| p.timestamp >= cutoff && p.lat.is_some() && p.lon.is_some())
        .collect();
    if points.len() < CIRCLE_MIN_POINTS {
        return None;
    }

    let xs: Vec<f64> = points.iter().map(|p| p.lat.unwrap()).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.lon.unwrap()).collect();
    let fit = circle::fit_circle(&xs, &ys).ok()?;

    if !(CIRCLE_MIN_RADIUS..=CIRCLE_MAX_RADIUS).contains(&fit.r) {
        return None;
    }
    if fit.residual > CIRCLE_MAX_RESIDUAL {
        return None;
    }

    // Angular spacing around the fitted centre must be uniform.
    let thetas: Vec<f64> = xs
        .iter()
        .zip(&ys)
        .map(|(&x, &y)| (fit.yc - y).atan2(fit.xc - x))
        .collect();
    let dthetas = unwrapped_diffs(&thetas);
    if dthetas.is_empty() || std_dev(&dthetas) > CIRCLE_UNIFORMITY_STD {
        return None;
    }

    // So must the reported speed.
    let sogs: Vec<f64> = points.iter().filter_map(|p| p.sog).collect();
    if sogs.len() < CIRCLE_MIN_POINTS || std_dev(&sogs) > CIRCLE_SOG_STD {
        return None;
    }

    Some(make_alert(
        current,
        AlertKind::CircleSpoofing,
        format!(
            "ALERT: Vessel {} detected with possible circle spoofing pattern (r={:.2}nm)",
            current.mmsi,
            fit.r * 60.0
        ),
    ))
}

fn make_alert(current: &HistoryPoint, kind: AlertKind, message: String) -> Alert {
    Alert {
        mmsi: current.mmsi,
        timestamp: current.timestamp,
        kind,
        message,
    }
}

/// Consecutive angle differences with each step wrapped into [−π, π], i.e.
/// the diffs of the unwrapped angle sequence.
fn unwrapped_diffs(thetas: &[f64]) -> Vec<f64> {
    thetas
        .windows(2)
        .map(|w| {
            let d = w[1] - w[0];
            d - TAU * (d / TAU).round()
        })
        .collect()
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}
