use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Number of consecutive sample pairs averaged for the velocity estimate.
pub const VELOCITY_SEGMENTS: usize = 4;

/// Position of the strongest source reported by the renderer for one image.
///
/// The timestamp is kept as the renderer wrote it; it is only parsed when
/// the velocity is estimated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrackingSample {
    pub timestamp: String,
    pub lat: f64,
    pub lon: f64,
    pub x_m: f64,
    pub y_m: f64,
    pub power_db: f64,
    pub subband: u32,
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

fn segment_speed(older: &TrackingSample, newer: &TrackingSample) -> Option<f64> {
    let t1 = parse_timestamp(&older.timestamp)?;
    let t2 = parse_timestamp(&newer.timestamp)?;
    let dt = (t2 - t1).num_microseconds()? as f64 / 1e6;
    if dt <= 0.0 {
        return None;
    }
    let dx = newer.x_m - older.x_m;
    let dy = newer.y_m - older.y_m;
    Some((dx * dx + dy * dy).sqrt() / dt)
}

/// Mean planar speed in m/s over the most recent consecutive sample pairs.
///
/// Pairs are taken newest first; pairs with a non-positive time step or an
/// unparseable timestamp are skipped. At most [`VELOCITY_SEGMENTS`] speeds are
/// averaged. `None` when no pair is usable.
pub fn estimate_velocity(history: &[TrackingSample]) -> Option<f64> {
    let speeds: Vec<f64> = history
        .windows(2)
        .rev()
        .filter_map(|pair| {
            let speed = segment_speed(&pair[0], &pair[1]);
            if speed.is_none() {
                log::debug!(
                    "Skipped velocity segment {} -> {}",
                    pair[0].timestamp,
                    pair[1].timestamp
                );
            }
            speed
        })
        .take(VELOCITY_SEGMENTS)
        .collect();

    if speeds.is_empty() {
        None
    } else {
        Some(speeds.iter().sum::<f64>() / speeds.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp: &str, x_m: f64, y_m: f64) -> TrackingSample {
        TrackingSample {
            timestamp: timestamp.to_string(),
            lat: 56.9,
            lon: 24.1,
            x_m,
            y_m,
            power_db: -40.0,
            subband: 284,
        }
    }

    #[test]
    fn mean_of_last_four_segments() {
        // Segment speeds oldest to newest: 1, 2, 3, 4 and the newest 5 m/s.
        // The oldest segment falls outside the window.
        let history = vec![
            sample("2025-03-01T12:00:00", 0.0, 0.0),
            sample("2025-03-01T12:00:01", 1.0, 0.0),
            sample("2025-03-01T12:00:03", 1.0, 4.0),
            sample("2025-03-01T12:00:04", 4.0, 4.0),
            sample("2025-03-01T12:00:06", 4.0, 12.0),
            sample("2025-03-01T12:00:08", 10.0, 20.0),
        ];
        let expected = (2.0 + 3.0 + 4.0 + 5.0) / 4.0;
        let v = estimate_velocity(&history).unwrap();
        assert!((v - expected).abs() < 1e-9, "got {v}");
    }

    #[test]
    fn five_samples_give_four_segments() {
        let history = vec![
            sample("2025-03-01T12:00:00Z", 0.0, 0.0),
            sample("2025-03-01T12:00:02Z", 6.0, 8.0),
            sample("2025-03-01T12:00:04Z", 6.0, 8.0),
            sample("2025-03-01T12:00:05Z", 9.0, 12.0),
            sample("2025-03-01T12:00:09Z", 9.0, 0.0),
        ];
        // 10/2, 0/2, 5/1, 12/4
        let expected = (5.0 + 0.0 + 5.0 + 3.0) / 4.0;
        assert!((estimate_velocity(&history).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn zero_dt_pair_is_skipped() {
        let history = vec![
            sample("2025-03-01 12:00:00", 0.0, 0.0),
            sample("2025-03-01 12:00:02", 0.0, 4.0),
            sample("2025-03-01 12:00:02", 3.0, 4.0),
        ];
        assert!((estimate_velocity(&history).unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn malformed_timestamp_is_skipped() {
        let history = vec![
            sample("2025-03-01T12:00:00", 0.0, 0.0),
            sample("2025-03-01T12:00:10", 30.0, 40.0),
            sample("yesterday", 0.0, 0.0),
        ];
        assert!((estimate_velocity(&history).unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn empty_or_single_sample_is_undefined() {
        assert!(estimate_velocity(&[]).is_none());
        assert!(estimate_velocity(&[sample("2025-03-01T12:00:00", 1.0, 1.0)]).is_none());
    }

    #[test]
    fn only_invalid_pairs_is_undefined() {
        let history = vec![
            sample("2025-03-01T12:00:05", 0.0, 0.0),
            sample("2025-03-01T12:00:05", 1.0, 0.0),
            sample("2025-03-01T12:00:01", 2.0, 0.0),
        ];
        assert!(estimate_velocity(&history).is_none());
    }
}
