use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::acquisition::{
    wait_for_range, wait_for_source, Block, BlockPersister, StreamTailer, SubbandError,
    SubbandRange, TailerError,
};
use crate::config::Config;
use crate::dispatch::{DispatchSettings, DispatchSummary, Dispatcher, RenderContext, Renderer};
use crate::state::{save_log, ObservationSession, SessionError, SharedState, SystemStatus};

#[derive(Debug, Error)]
pub enum ObservationError {
    #[error("an observation is already running")]
    AlreadyRunning,
    #[error("invalid observation parameters: {0}")]
    InvalidParams(String),
    #[error("stream error: {0}")]
    Tailer(#[from] TailerError),
    #[error("subband error: {0}")]
    Subband(#[from] SubbandError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("failed to start render workers: {0}")]
    Workers(#[source] std::io::Error),
    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("acquisition thread panicked")]
    Panicked,
}

/// Knobs an operator may change per observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ObservationParams {
    #[schema(value_type = String)]
    pub folder: PathBuf,
    pub threads: usize,
    pub step: u64,
    pub height_m: f64,
    pub extent_m: f64,
}

impl ObservationParams {
    pub fn validate(&self) -> Result<(), ObservationError> {
        if self.threads == 0 {
            return Err(ObservationError::InvalidParams("threads must be at least 1".into()));
        }
        if self.step == 0 {
            return Err(ObservationError::InvalidParams("step must be at least 1".into()));
        }
        if self.extent_m.is_nan() || self.extent_m <= 0.0 {
            return Err(ObservationError::InvalidParams("extent must be positive".into()));
        }
        Ok(())
    }
}

/// Runs one observation to completion on the calling thread.
///
/// Waits for the stream file, resolves the subband range, then reads,
/// archives and dispatches blocks until `cancel` fires. Outstanding renders
/// are always drained and the image log saved before returning, also when
/// the stream fails mid-way.
pub fn run_observation(
    config: &Config,
    params: &ObservationParams,
    session: &ObservationSession,
    state: &Arc<SharedState>,
    renderer: Arc<dyn Renderer>,
    cancel: CancellationToken,
) -> Result<DispatchSummary, ObservationError> {
    let result = acquire(config, params, session, state, renderer, cancel);
    if let Err(e) = &result {
        log::error!("Observation {} aborted: {}", session.name, e);
    }
    state.finish_observation();
    log::info!("Observation {} finished. System is now idle.", session.name);
    result
}

fn acquire(
    config: &Config,
    params: &ObservationParams,
    session: &ObservationSession,
    state: &Arc<SharedState>,
    renderer: Arc<dyn Renderer>,
    cancel: CancellationToken,
) -> Result<DispatchSummary, ObservationError> {
    state.set_status(SystemStatus::WaitingForFile);
    let Some(path) = wait_for_source(
        &params.folder,
        &config.input.suffix,
        config.input.poll_interval,
        &cancel,
    )?
    else {
        log::info!("Observation stopped before the stream appeared");
        save_log(&session.log_path(), &state.image_log())?;
        return Ok(DispatchSummary::default());
    };
    log::info!("File {} detected.", path.display());

    let range = wait_for_range(
        &params.folder,
        &config.subbands,
        config.input.descriptor_wait,
        config.input.poll_interval,
        &cancel,
    )?;
    state.set_source(file_name(&path), range);
    state.set_status(SystemStatus::Running);

    let station = config.station(params);
    let mut tailer = StreamTailer::open(
        &path,
        station.block_bytes(),
        config.input.poll_interval,
        cancel.clone(),
    )?;
    let persister = BlockPersister::new(session.blocks_dir(), range);
    let mut dispatcher = Dispatcher::new(
        DispatchSettings {
            step: params.step,
            threads: params.threads,
            queue_capacity: config.queue_capacity(params.threads),
        },
        RenderContext {
            state: Arc::clone(state),
            renderer,
            station: station.clone(),
            session: session.clone(),
            cancel,
        },
    )
    .map_err(ObservationError::Workers)?;

    log::info!(
        "Starting real-time block reader ({} bytes per block, step {}, {} threads)",
        station.block_bytes(),
        params.step,
        params.threads
    );
    let pumped = pump_blocks(
        &mut tailer,
        &persister,
        &mut dispatcher,
        state,
        range,
        station.block_dimension(),
        Utc::now,
    );

    let summary = dispatcher.drain();
    log::info!(
        "Dispatch summary: {} blocks, {} submitted, {} completed, {} failed, {} cancelled",
        summary.blocks_seen,
        summary.submitted,
        summary.completed,
        summary.failed,
        summary.cancelled
    );
    save_log(&session.log_path(), &state.image_log())?;
    pumped?;
    Ok(summary)
}

/// Block `n` (1-based) samples subband `range.subband(n - 1)`.
fn pump_blocks<R: std::io::Read>(
    tailer: &mut StreamTailer<R>,
    persister: &BlockPersister,
    dispatcher: &mut Dispatcher,
    state: &SharedState,
    range: SubbandRange,
    dimension: usize,
    clock: impl Fn() -> DateTime<Utc>,
) -> Result<(), TailerError> {
    let mut number = 0u64;
    while let Some(data) = tailer.next_block()? {
        let subband = range.subband(number);
        number += 1;

        let block = Block::new(number, clock(), subband, dimension, data);
        persister.persist(&block);
        state.record_block(number);
        dispatcher.dispatch(block);
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

struct ActiveObservation {
    cancel: CancellationToken,
    join: JoinHandle<Result<DispatchSummary, ObservationError>>,
}

/// Starts and stops observations, one at a time, each on its own thread.
pub struct ObservationController {
    config: Arc<Config>,
    renderer: Arc<dyn Renderer>,
    state: Arc<SharedState>,
    active: Mutex<Option<ActiveObservation>>,
}

impl ObservationController {
    pub fn new(config: Arc<Config>, renderer: Arc<dyn Renderer>, state: Arc<SharedState>) -> Self {
        Self {
            config,
            renderer,
            state,
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn start(&self, params: ObservationParams) -> Result<ObservationSession, ObservationError> {
        params.validate()?;

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = active.as_ref() {
            if !previous.join.is_finished() {
                log::warn!("Observation is already running. Ignoring new request.");
                return Err(ObservationError::AlreadyRunning);
            }
        }
        if let Some(previous) = active.take() {
            if let Err(e) = join_observation(&self.state, previous) {
                log::warn!("Previous observation ended with error: {}", e);
            }
        }

        let session = ObservationSession::create(&self.config.output.base_folder)?;
        if !self.state.begin_observation(session.clone(), params.clone()) {
            return Err(ObservationError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let worker = {
            let config = Arc::clone(&self.config);
            let renderer = Arc::clone(&self.renderer);
            let state = Arc::clone(&self.state);
            let session = session.clone();
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("xst-acquisition".into())
                .spawn(move || {
                    run_observation(&config, &params, &session, &state, renderer, cancel)
                })
        };

        let join = match worker {
            Ok(join) => join,
            Err(e) => {
                self.state.finish_observation();
                return Err(ObservationError::Spawn(e));
            }
        };

        *active = Some(ActiveObservation { cancel, join });
        log::info!("Observation {} started", session.name);
        Ok(session)
    }

    /// Requests a cooperative stop. Returns true while an observation is
    /// running or still draining, also when a stop was already requested.
    pub fn stop(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(observation) if !observation.join.is_finished() => {
                if !observation.cancel.is_cancelled() {
                    log::info!("Stop requested.");
                    self.state.request_stop();
                    observation.cancel.cancel();
                }
                true
            }
            _ => false,
        }
    }

    /// Blocks until the current observation has drained.
    pub fn wait(&self) -> Option<Result<DispatchSummary, ObservationError>> {
        let observation = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        Some(join_observation(&self.state, observation))
    }
}

fn join_observation(
    state: &SharedState,
    observation: ActiveObservation,
) -> Result<DispatchSummary, ObservationError> {
    match observation.join.join() {
        Ok(result) => result,
        Err(_) => {
            log::error!("Acquisition thread panicked");
            state.finish_observation();
            Err(ObservationError::Panicked)
        }
    }
}
