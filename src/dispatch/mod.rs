mod dispatcher;
mod pool;
mod render;

pub use dispatcher::{
    Admission, DispatchSettings, DispatchSummary, Dispatcher, RenderContext, TaskOutcome,
};
pub use pool::WorkerPool;
pub use render::{
    parse_render_output, CommandRenderer, RenderError, RenderJob, RenderOutput, Renderer,
};
