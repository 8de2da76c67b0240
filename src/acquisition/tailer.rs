use std::fs::{self, File};
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Upper bound on how many blocks a single read may pull from the stream.
pub const READ_AHEAD_BLOCKS: usize = 8;

#[derive(Debug, Error)]
pub enum TailerError {
    #[error("failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open stream {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read stream {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("block size must be non-zero")]
    ZeroBlockSize,
}

/// Polls `dir` until a file ending in `suffix` appears.
///
/// There is no timeout: the producer may start long after the observation.
/// Returns `Ok(None)` if `cancel` fires first. A missing directory is treated
/// like an empty one.
pub fn wait_for_source(
    dir: &Path,
    suffix: &str,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<Option<PathBuf>, TailerError> {
    log::info!("Waiting for a *{} file in {}...", suffix, dir.display());
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        if let Some(path) = scan_for_source(dir, suffix)? {
            return Ok(Some(path));
        }
        thread::sleep(poll_interval);
    }
}

fn scan_for_source(dir: &Path, suffix: &str) -> Result<Option<PathBuf>, TailerError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(TailerError::Scan {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(suffix))
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    matches.sort();
    Ok(matches.into_iter().next())
}

/// Reads a growing stream and cuts it into fixed-size blocks.
///
/// Bytes are accumulated until at least one full block is buffered; a read
/// ending mid-block simply waits for the rest. When a read returns nothing the
/// tailer sleeps for `poll_interval` and tries again, until `cancel` fires.
/// Blocks already fully buffered are still handed out after cancellation so
/// they can be archived.
///
/// Each read is capped at [`READ_AHEAD_BLOCKS`] blocks, so a backlog is pulled
/// in a slice at a time rather than all at once.
pub struct StreamTailer<R> {
    reader: R,
    path: PathBuf,
    buffer: Vec<u8>,
    /// Start of the unconsumed bytes in `buffer`.
    start: usize,
    block_bytes: usize,
    consumed: u64,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl StreamTailer<File> {
    pub fn open(
        path: &Path,
        block_bytes: usize,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, TailerError> {
        let file = File::open(path).map_err(|source| TailerError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(file, path, block_bytes, poll_interval, cancel)
    }
}

impl<R: Read> StreamTailer<R> {
    pub fn new(
        reader: R,
        path: &Path,
        block_bytes: usize,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, TailerError> {
        if block_bytes == 0 {
            return Err(TailerError::ZeroBlockSize);
        }
        Ok(Self {
            reader,
            path: path.to_path_buf(),
            buffer: Vec::with_capacity(block_bytes),
            start: 0,
            block_bytes,
            consumed: 0,
            poll_interval,
            cancel,
        })
    }

    /// Bytes handed out as complete blocks so far.
    pub fn position(&self) -> u64 {
        self.consumed
    }

    /// Bytes read but not yet part of a complete block.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.start
    }

    /// Next complete block, or `None` once cancelled with no full block left.
    pub fn next_block(&mut self) -> Result<Option<Vec<u8>>, TailerError> {
        loop {
            if let Some(block) = self.take_block() {
                return Ok(Some(block));
            }
            if self.cancel.is_cancelled() {
                if self.buffered() > 0 {
                    log::debug!(
                        "Dropping {} trailing bytes of incomplete block",
                        self.buffered()
                    );
                }
                return Ok(None);
            }
            if self.fill()? == 0 {
                thread::sleep(self.poll_interval);
            }
        }
    }

    /// Only called once less than a block is left, so compacting the buffer
    /// moves fewer than `block_bytes` bytes.
    fn fill(&mut self) -> Result<usize, TailerError> {
        if self.start > 0 {
            self.buffer.drain(..self.start);
            self.start = 0;
        }

        let limit = (self.block_bytes * READ_AHEAD_BLOCKS) as u64;
        match (&mut self.reader).take(limit).read_to_end(&mut self.buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(source) => Err(TailerError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn take_block(&mut self) -> Option<Vec<u8>> {
        if self.buffered() < self.block_bytes {
            return None;
        }
        let end = self.start + self.block_bytes;
        let block = self.buffer[self.start..end].to_vec();
        self.start = end;
        self.consumed += self.block_bytes as u64;
        Some(block)
    }
}

impl<R: Read> Iterator for StreamTailer<R> {
    type Item = Result<Vec<u8>, TailerError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Write;

    /// Hands out pre-scripted chunks, one per read call, then cancels.
    struct ChunkedReader {
        chunks: VecDeque<Vec<u8>>,
        cancel: CancellationToken,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(chunk) = self.chunks.front_mut() else {
                self.cancel.cancel();
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            chunk.drain(..n);
            if chunk.is_empty() {
                self.chunks.pop_front();
            }
            Ok(n)
        }
    }

    fn tailer_over(chunks: Vec<Vec<u8>>, block_bytes: usize) -> StreamTailer<ChunkedReader> {
        let cancel = CancellationToken::new();
        let reader = ChunkedReader {
            chunks: chunks.into(),
            cancel: cancel.clone(),
        };
        StreamTailer::new(
            reader,
            Path::new("test_xst.dat"),
            block_bytes,
            Duration::from_millis(1),
            cancel,
        )
        .unwrap()
    }

    #[test]
    fn emits_only_full_blocks_in_order() {
        let stream: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let sizes = [7usize, 3, 13, 1, 250, 64, 0, 99, 400, 163];
        assert_eq!(sizes.iter().sum::<usize>(), stream.len());

        let mut chunks = Vec::new();
        let mut offset = 0;
        for size in sizes {
            chunks.push(stream[offset..offset + size].to_vec());
            offset += size;
        }

        let mut tailer = tailer_over(chunks, 96);
        let blocks: Vec<Vec<u8>> = tailer.by_ref().map(|b| b.unwrap()).collect();

        assert_eq!(blocks.len(), 1000 / 96);
        assert!(blocks.iter().all(|b| b.len() == 96));
        let emitted: Vec<u8> = blocks.concat();
        assert!(stream.starts_with(&emitted));
        assert_eq!(tailer.position(), emitted.len() as u64);
        assert_eq!(tailer.buffered(), 1000 % 96);
    }

    #[test]
    fn single_read_with_several_blocks() {
        let stream = vec![7u8; 48];
        let mut tailer = tailer_over(vec![stream], 16);
        assert_eq!(tailer.by_ref().count(), 3);
        assert_eq!(tailer.buffered(), 0);
    }

    #[test]
    fn drains_large_backlog_in_linear_time() {
        const BLOCK: usize = 96 * 96 * 16;
        const BLOCKS: usize = 400;
        let stream: Vec<u8> = (0..BLOCK * BLOCKS).map(|i| (i / BLOCK) as u8).collect();

        let mut tailer = StreamTailer::new(
            io::Cursor::new(stream),
            Path::new("backlog_xst.dat"),
            BLOCK,
            Duration::from_millis(1),
            CancellationToken::new(),
        )
        .unwrap();

        let started = std::time::Instant::now();
        for n in 0..BLOCKS {
            let block = tailer.next_block().unwrap().unwrap();
            assert_eq!(block.len(), BLOCK);
            assert_eq!((block[0], block[BLOCK - 1]), (n as u8, n as u8));
            assert!(tailer.buffer.len() < BLOCK * (READ_AHEAD_BLOCKS + 1));
        }
        assert_eq!(tailer.position(), (BLOCK * BLOCKS) as u64);
        assert!(
            started.elapsed() < Duration::from_secs(20),
            "draining took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn partial_block_is_never_emitted() {
        let mut tailer = tailer_over(vec![vec![1u8; 10], vec![2u8; 5]], 16);
        assert!(tailer.next_block().unwrap().is_none());
        assert_eq!(tailer.buffered(), 15);
    }

    #[test]
    fn zero_block_size_rejected() {
        let result = StreamTailer::new(
            io::empty(),
            Path::new("x"),
            0,
            Duration::from_millis(1),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(TailerError::ZeroBlockSize)));
    }

    #[test]
    fn follows_file_growing_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20230111_072042_xst.dat");
        let mut writer = File::create(&path).unwrap();
        writer.write_all(&[1u8; 20]).unwrap();
        writer.flush().unwrap();

        let cancel = CancellationToken::new();
        let mut tailer =
            StreamTailer::open(&path, 32, Duration::from_millis(5), cancel.clone()).unwrap();

        let appender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            writer.write_all(&[2u8; 44]).unwrap();
            writer.flush().unwrap();
        });

        let first = tailer.next_block().unwrap().unwrap();
        let second = tailer.next_block().unwrap().unwrap();
        appender.join().unwrap();

        let mut expected = vec![1u8; 20];
        expected.extend_from_slice(&[2u8; 44]);
        assert_eq!([first, second].concat(), expected);

        cancel.cancel();
        assert!(tailer.next_block().unwrap().is_none());
    }

    #[test]
    fn open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = StreamTailer::open(
            &dir.path().join("missing_xst.dat"),
            16,
            Duration::from_millis(1),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(TailerError::Open { .. })));
    }

    #[test]
    fn wait_for_source_finds_matching_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("metadata.h"), "subbands=1:2\n").unwrap();
        let target = dir.path().join("20230111_072042_xst.dat");
        let creator = {
            let target = target.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                fs::write(target, b"").unwrap();
            })
        };

        let found = wait_for_source(
            dir.path(),
            "_xst.dat",
            Duration::from_millis(5),
            &CancellationToken::new(),
        )
        .unwrap();
        creator.join().unwrap();
        assert_eq!(found, Some(target));
    }

    #[test]
    fn wait_for_source_returns_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let found =
            wait_for_source(dir.path(), "_xst.dat", Duration::from_millis(5), &cancel).unwrap();
        assert!(found.is_none());
    }
}
