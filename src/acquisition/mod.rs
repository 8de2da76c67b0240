mod block;
mod persist;
mod subband;
mod tailer;

pub use block::Block;
pub use persist::{artifact_stem, sidecar_contents, BlockPersister};
pub use subband::{
    find_descriptor, parse_descriptor, resolve_range, wait_for_range, SubbandError, SubbandRange,
};
pub use tailer::{wait_for_source, StreamTailer, TailerError};
