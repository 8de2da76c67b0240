use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use utoipa::ToSchema;

use crate::acquisition::SubbandRange;
use crate::observation::ObservationParams;

use super::session::{load_log, newest_first, ImageLogEntry, ObservationSession};
use super::tracking::TrackingSample;

/// Number of completed render durations kept for the status average.
pub const PROCESSING_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Idle,
    WaitingForFile,
    Running,
    Stopping,
}

#[derive(Debug)]
pub(super) struct Live {
    pub observing: bool,
    pub shutdown_requested: bool,
    pub status: SystemStatus,
    pub last_block: u64,
    pub last_subband: Option<u32>,
    pub processing_times: VecDeque<f64>,
    pub pending: usize,
    pub current_file: Option<String>,
    pub subband_range: Option<SubbandRange>,
    pub image_log: Vec<ImageLogEntry>,
    pub session: Option<ObservationSession>,
    pub params: Option<ObservationParams>,
}

impl Default for Live {
    fn default() -> Self {
        Self {
            observing: false,
            shutdown_requested: false,
            status: SystemStatus::Idle,
            last_block: 0,
            last_subband: None,
            processing_times: VecDeque::with_capacity(PROCESSING_WINDOW + 1),
            pending: 0,
            current_file: None,
            subband_range: None,
            image_log: Vec::new(),
            session: None,
            params: None,
        }
    }
}

/// Live state of the acquisition pipeline, shared by the producer, the
/// render workers and status readers.
///
/// Counters, the duration window and the image log sit behind one lock; the
/// tracking history has its own. No method holds both at once.
#[derive(Debug, Default)]
pub struct SharedState {
    live: Mutex<Live>,
    tracking: Mutex<Vec<TrackingSample>>,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(super) fn live(&self) -> MutexGuard<'_, Live> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn tracking(&self) -> MutexGuard<'_, Vec<TrackingSample>> {
        self.tracking.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resets per-observation state. Fails if an observation is active.
    pub fn begin_observation(
        &self,
        session: ObservationSession,
        params: ObservationParams,
    ) -> bool {
        {
            let mut live = self.live();
            if live.observing {
                return false;
            }
            let pending = live.pending;
            *live = Live {
                observing: true,
                status: SystemStatus::Running,
                session: Some(session),
                params: Some(params),
                // Workers of a previous observation have all been joined, but
                // keep the counter honest regardless.
                pending,
                ..Live::default()
            };
        }
        self.tracking().clear();
        true
    }

    pub fn request_stop(&self) {
        let mut live = self.live();
        live.observing = false;
        live.shutdown_requested = true;
        if live.status != SystemStatus::Idle {
            live.status = SystemStatus::Stopping;
        }
    }

    /// Marks the observation as over once the pipeline has drained.
    pub fn finish_observation(&self) {
        let mut live = self.live();
        live.observing = false;
        live.status = SystemStatus::Idle;
    }

    pub fn status(&self) -> SystemStatus {
        self.live().status
    }

    pub fn set_status(&self, status: SystemStatus) {
        let mut live = self.live();
        // A stop request wins over progress updates from the producer.
        if live.shutdown_requested && status != SystemStatus::Idle {
            return;
        }
        live.status = status;
    }

    pub fn set_source(&self, file_name: String, range: SubbandRange) {
        let mut live = self.live();
        live.current_file = Some(file_name);
        live.subband_range = Some(range);
    }

    pub fn record_block(&self, number: u64) {
        self.live().last_block = number;
    }

    /// Registers a render task; the count drops when the returned guard is
    /// dropped.
    pub fn begin_task(self: &Arc<Self>) -> PendingTask {
        self.live().pending += 1;
        PendingTask {
            state: Arc::clone(self),
        }
    }

    pub fn pending(&self) -> usize {
        self.live().pending
    }

    pub fn record_duration(&self, seconds: f64) {
        let mut live = self.live();
        live.processing_times.push_back(seconds);
        while live.processing_times.len() > PROCESSING_WINDOW {
            live.processing_times.pop_front();
        }
    }

    pub fn processing_times(&self) -> Vec<f64> {
        self.live().processing_times.iter().copied().collect()
    }

    pub fn add_image_entry(&self, entry: ImageLogEntry) {
        let mut live = self.live();
        live.last_subband = Some(entry.subband);
        live.image_log.push(entry);
    }

    /// Image log in append (completion) order.
    pub fn image_log(&self) -> Vec<ImageLogEntry> {
        self.live().image_log.clone()
    }

    /// The `limit` newest images of the current observation. Falls back to
    /// the saved session log when nothing is held in memory.
    pub fn recent_images(&self, limit: usize) -> Vec<ImageLogEntry> {
        let (entries, session) = {
            let live = self.live();
            (live.image_log.clone(), live.session.clone())
        };
        if !entries.is_empty() {
            return newest_first(&entries, limit);
        }
        let Some(session) = session else {
            return Vec::new();
        };
        match load_log(&session.log_path()) {
            Ok(saved) => newest_first(&saved, limit),
            Err(e) => {
                log::warn!("Could not read image log of {}: {}", session.name, e);
                Vec::new()
            }
        }
    }

    pub fn push_tracking(&self, sample: TrackingSample) {
        self.tracking().push(sample);
    }

    pub fn tracking_history(&self) -> Vec<TrackingSample> {
        self.tracking().clone()
    }
}

/// Guard for one submitted render task; dropping it releases the pending
/// slot on every exit path, including unwinding.
#[derive(Debug)]
pub struct PendingTask {
    state: Arc<SharedState>,
}

impl Drop for PendingTask {
    fn drop(&mut self) {
        let mut live = self.state.live();
        match live.pending.checked_sub(1) {
            Some(n) => live.pending = n,
            None => log::error!("Pending task counter underflow"),
        }
    }
}
