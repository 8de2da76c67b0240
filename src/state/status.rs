use serde::Serialize;
use utoipa::ToSchema;

use crate::acquisition::SubbandRange;

use super::shared::{SharedState, SystemStatus};
use super::tracking::{estimate_velocity, TrackingSample};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatusSnapshot {
    pub status: SystemStatus,
    pub last_block: u64,
    pub last_subband: Option<u32>,
    pub pending_tasks: usize,
    pub avg_processing_time: f64,
    pub current_file: Option<String>,
    pub subband_range: Option<SubbandRange>,
    pub session: Option<String>,
    pub threads: Option<usize>,
    pub step: Option<u64>,
    pub height_m: Option<f64>,
    pub extent_m: Option<f64>,
    pub tracking: Option<TrackingSample>,
    pub velocity_mps: Option<f64>,
}

pub fn average_processing_time(durations: &[f64]) -> f64 {
    if durations.is_empty() {
        return 0.0;
    }
    round2(durations.iter().sum::<f64>() / durations.len() as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl SharedState {
    /// Point-in-time view for status readers.
    ///
    /// Each lock is held only long enough to copy what is needed.
    pub fn snapshot(&self) -> StatusSnapshot {
        let (mut snapshot, durations) = {
            let live = self.live();
            let params = live.params.as_ref();
            let snapshot = StatusSnapshot {
                status: live.status,
                last_block: live.last_block,
                last_subband: live.last_subband,
                pending_tasks: live.pending,
                avg_processing_time: 0.0,
                current_file: live.current_file.clone(),
                subband_range: live.subband_range,
                session: live.session.as_ref().map(|s| s.name.clone()),
                threads: params.map(|p| p.threads),
                step: params.map(|p| p.step),
                height_m: params.map(|p| p.height_m),
                extent_m: params.map(|p| p.extent_m),
                tracking: None,
                velocity_mps: None,
            };
            let durations: Vec<f64> = live.processing_times.iter().copied().collect();
            (snapshot, durations)
        };

        let history = self.tracking_history();

        snapshot.avg_processing_time = average_processing_time(&durations);
        snapshot.tracking = history.last().cloned();
        snapshot.velocity_mps = estimate_velocity(&history).map(round2);
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::ObservationParams;
    use crate::state::ObservationSession;
    use chrono::Utc;
    use std::path::PathBuf;

    fn sample(timestamp: &str, x_m: f64) -> TrackingSample {
        TrackingSample {
            timestamp: timestamp.to_string(),
            lat: 56.95,
            lon: 24.1,
            x_m,
            y_m: 0.0,
            power_db: -31.5,
            subband: 101,
        }
    }

    #[test]
    fn average_of_window() {
        assert_eq!(average_processing_time(&[]), 0.0);
        assert_eq!(average_processing_time(&[1.0, 2.0, 4.0]), 2.33);
    }

    #[test]
    fn idle_snapshot() {
        let state = SharedState::new();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.status, SystemStatus::Idle);
        assert_eq!(snapshot.pending_tasks, 0);
        assert_eq!(snapshot.avg_processing_time, 0.0);
        assert!(snapshot.tracking.is_none());
        assert!(snapshot.velocity_mps.is_none());
        assert!(snapshot.threads.is_none());
    }

    #[test]
    fn snapshot_reflects_live_state() {
        let state = SharedState::new();
        state.begin_observation(
            ObservationSession {
                name: "20250301_120000".into(),
                root: PathBuf::from("/tmp/20250301_120000"),
                created_at: Utc::now(),
            },
            ObservationParams {
                folder: PathBuf::from("/data/stream"),
                threads: 3,
                step: 2,
                height_m: 1.5,
                extent_m: 60.0,
            },
        );
        state.set_source(
            "20230111_072042_xst.dat".into(),
            SubbandRange { min: 100, max: 102 },
        );
        state.record_block(7);
        state.record_duration(2.0);
        state.record_duration(3.0);
        state.push_tracking(sample("2025-03-01T12:00:00", 0.0));
        state.push_tracking(sample("2025-03-01T12:00:03", 10.0));
        let _task = state.begin_task();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.status, SystemStatus::Running);
        assert_eq!(snapshot.last_block, 7);
        assert_eq!(snapshot.pending_tasks, 1);
        assert_eq!(snapshot.avg_processing_time, 2.5);
        assert_eq!(snapshot.subband_range, Some(SubbandRange { min: 100, max: 102 }));
        assert_eq!(snapshot.session.as_deref(), Some("20250301_120000"));
        assert_eq!(snapshot.threads, Some(3));
        assert_eq!(snapshot.tracking.unwrap().x_m, 10.0);
        assert_eq!(snapshot.velocity_mps, Some(3.33));
    }
}
