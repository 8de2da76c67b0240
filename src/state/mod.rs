mod session;
mod shared;
mod status;
mod tracking;

pub use session::{
    load_all_logs, load_log, newest_first, save_log, ImageLogEntry, ObservationSession,
    SessionError, SESSION_LOG_FILE,
};
pub use shared::{PendingTask, SharedState, SystemStatus, PROCESSING_WINDOW};
pub use status::{average_processing_time, StatusSnapshot};
pub use tracking::{estimate_velocity, TrackingSample, VELOCITY_SEGMENTS};
