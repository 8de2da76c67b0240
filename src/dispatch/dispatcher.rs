use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::acquisition::Block;
use crate::state::{ImageLogEntry, ObservationSession, PendingTask, SharedState};
use crate::station::Station;

use super::pool::WorkerPool;
use super::render::{RenderError, RenderJob, Renderer};

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub step: u64,
    pub threads: usize,
    pub queue_capacity: usize,
}

/// What happened to a block handed to [`Dispatcher::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Skipped by the decimation step.
    Decimated,
    /// Arrived after a stop request.
    Discarded,
    Submitted,
    /// The pool was gone; the block was dropped.
    Rejected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed {
        block: u64,
        subband: u32,
        duration: Duration,
        image: Option<PathBuf>,
    },
    Failed {
        block: u64,
        subband: u32,
        error: String,
    },
    Cancelled {
        block: u64,
        subband: u32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub blocks_seen: u64,
    pub decimated: u64,
    pub discarded: u64,
    pub rejected: u64,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl DispatchSummary {
    fn record(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Completed { .. } => self.completed += 1,
            TaskOutcome::Failed { .. } => self.failed += 1,
            TaskOutcome::Cancelled { .. } => self.cancelled += 1,
        }
    }
}

/// Shared by every render worker of one observation.
pub struct RenderContext {
    pub state: Arc<SharedState>,
    pub renderer: Arc<dyn Renderer>,
    pub station: Station,
    pub session: ObservationSession,
    pub cancel: CancellationToken,
}

struct RenderTask {
    block: Block,
    pending: PendingTask,
}

/// Decimates blocks and fans the survivors out to the render workers.
pub struct Dispatcher {
    step: u64,
    pool: WorkerPool<RenderTask>,
    outcomes: Receiver<TaskOutcome>,
    summary: DispatchSummary,
    state: Arc<SharedState>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(settings: DispatchSettings, context: RenderContext) -> io::Result<Self> {
        let (outcome_tx, outcomes) = unbounded();
        let state = Arc::clone(&context.state);
        let cancel = context.cancel.clone();
        let context = Arc::new(context);

        let pool = WorkerPool::new(
            "render",
            settings.threads,
            settings.queue_capacity,
            move |task: RenderTask| run_task(&context, task, &outcome_tx),
        )?;

        Ok(Self {
            step: settings.step.max(1),
            pool,
            outcomes,
            summary: DispatchSummary::default(),
            state,
            cancel,
        })
    }

    pub fn dispatch(&mut self, block: Block) -> Admission {
        self.summary.blocks_seen += 1;
        self.collect_outcomes();

        if block.number % self.step != 0 {
            self.summary.decimated += 1;
            return Admission::Decimated;
        }

        if self.cancel.is_cancelled() {
            log::info!("[STOP] Block {} skipped.", block.number);
            self.summary.discarded += 1;
            return Admission::Discarded;
        }

        log::info!(
            "Submitting block {}, subband {}",
            block.number,
            block.subband
        );
        let pending = self.state.begin_task();
        match self.pool.submit(RenderTask { block, pending }) {
            Ok(()) => {
                self.summary.submitted += 1;
                log::info!(
                    "Pending tasks: {} ({} queued)",
                    self.state.pending(),
                    self.pool.queued()
                );
                Admission::Submitted
            }
            Err(task) => {
                log::error!("Render pool closed, block {} dropped", task.block.number);
                self.summary.rejected += 1;
                Admission::Rejected
            }
        }
    }

    /// Waits for every submitted task and returns the final tally.
    pub fn drain(self) -> DispatchSummary {
        log::info!("Waiting for remaining render tasks to finish...");
        let Dispatcher {
            pool,
            outcomes,
            mut summary,
            ..
        } = self;
        pool.join();
        for outcome in outcomes.try_iter() {
            summary.record(&outcome);
        }
        log::info!("All render tasks completed.");
        summary
    }

    fn collect_outcomes(&mut self) {
        for outcome in self.outcomes.try_iter() {
            self.summary.record(&outcome);
        }
    }
}

fn run_task(context: &RenderContext, task: RenderTask, outcomes: &Sender<TaskOutcome>) {
    // The guard lives until this function returns, whatever the path.
    let RenderTask {
        block,
        pending: _pending,
    } = task;

    let outcome = render_block(context, &block);
    // The receiver only disappears once the dispatcher is gone.
    let _ = outcomes.send(outcome);
}

fn render_block(context: &RenderContext, block: &Block) -> TaskOutcome {
    if context.cancel.is_cancelled() {
        log::info!(
            "[CANCELLED] Block {} (subband {}) ignored, shutdown in progress.",
            block.number,
            block.subband
        );
        return TaskOutcome::Cancelled {
            block: block.number,
            subband: block.subband,
        };
    }

    log::info!(
        "Processing subband {} at {}",
        block.subband,
        block.timestamp
    );
    let images_dir = context.session.images_dir();
    let job = RenderJob {
        block,
        station: &context.station,
        output_dir: &images_dir,
    };

    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| context.renderer.render(&job)))
        .unwrap_or_else(|payload| Err(RenderError::Panicked(panic_message(payload))));

    match result {
        Ok(output) => {
            let duration = started.elapsed();
            let seconds = duration.as_secs_f64();
            context.state.record_duration(seconds);
            log::info!(
                "Subband {} processed in {:.2} seconds",
                block.subband,
                seconds
            );

            if let Some(sample) = output.tracking {
                context.state.push_tracking(sample);
            }
            if let Some(image) = &output.nearfield_image {
                context.state.add_image_entry(ImageLogEntry::processed(
                    block.timestamp,
                    context.session.relative_image_path(image),
                    block.subband,
                    seconds,
                    block.number,
                ));
            }

            TaskOutcome::Completed {
                block: block.number,
                subband: block.subband,
                duration,
                image: output.nearfield_image,
            }
        }
        Err(e) => {
            log::error!("Error processing subband {}: {}", block.subband, e);
            TaskOutcome::Failed {
                block: block.number,
                subband: block.subband,
                error: e.to_string(),
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
