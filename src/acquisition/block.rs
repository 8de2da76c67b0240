use chrono::{DateTime, Utc};

use crate::station::SAMPLE_BYTES;

/// One correlation matrix cut from the stream.
///
/// `number` is the 1-based position of the block in the stream; the raw bytes
/// are kept exactly as read so they can be archived without re-encoding.
#[derive(Debug, Clone)]
pub struct Block {
    pub number: u64,
    pub timestamp: DateTime<Utc>,
    pub subband: u32,
    pub dimension: usize,
    data: Vec<u8>,
}

impl Block {
    pub fn new(
        number: u64,
        timestamp: DateTime<Utc>,
        subband: u32,
        dimension: usize,
        data: Vec<u8>,
    ) -> Self {
        debug_assert_eq!(data.len(), dimension * dimension * SAMPLE_BYTES);
        Self {
            number,
            timestamp,
            subband,
            dimension,
            data,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
