//! Replays a recorded correlation stream into a folder as if a station were
//! producing it live.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::acquisition::SubbandRange;

pub const DESCRIPTOR_FILE: &str = "metadata.h";

#[derive(Debug, Error)]
pub enum SimulateError {
    #[error("failed to read {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Target {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Simulation {
    pub source: PathBuf,
    pub target_dir: PathBuf,
    pub stream_name: String,
    pub block_bytes: usize,
    pub interval: Duration,
    pub range: SubbandRange,
}

impl Simulation {
    pub fn target_file(&self) -> PathBuf {
        self.target_dir.join(&self.stream_name)
    }

    /// Writes the descriptor, then appends one block per interval until the
    /// source runs out or `cancel` fires. Returns the number of blocks written.
    pub fn run(&self, cancel: &CancellationToken) -> Result<u64, SimulateError> {
        let source_err = |source| SimulateError::Source {
            path: self.source.clone(),
            source,
        };
        let target = self.target_file();
        let target_err = |source| SimulateError::Target {
            path: target.clone(),
            source,
        };

        fs::create_dir_all(&self.target_dir).map_err(target_err)?;
        let descriptor = self.target_dir.join(DESCRIPTOR_FILE);
        fs::write(
            &descriptor,
            format!("subbands={}:{}\n", self.range.min, self.range.max),
        )
        .map_err(|source| SimulateError::Target {
            path: descriptor.clone(),
            source,
        })?;

        let mut input = File::open(&self.source).map_err(source_err)?;
        let mut output = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .map_err(target_err)?;

        log::info!(
            "Replaying {} into {} ({} bytes every {:?})",
            self.source.display(),
            target.display(),
            self.block_bytes,
            self.interval
        );

        let mut block = vec![0u8; self.block_bytes];
        let mut written = 0u64;
        while !cancel.is_cancelled() {
            let filled = read_full(&mut input, &mut block).map_err(source_err)?;
            if filled < block.len() {
                if filled > 0 {
                    log::warn!("Dropping trailing {} bytes of incomplete block", filled);
                }
                break;
            }

            output.write_all(&block).map_err(target_err)?;
            output.flush().map_err(target_err)?;
            written += 1;
            log::debug!("Wrote block {}", written);

            thread::sleep(self.interval);
        }

        log::info!("Simulation wrote {} blocks", written);
        Ok(written)
    }
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Stream source for `simulate` when none is given: `blocks` blocks of a
/// repeating byte ramp.
pub fn write_synthetic_source(path: &Path, block_bytes: usize, blocks: usize) -> io::Result<()> {
    let data: Vec<u8> = (0..block_bytes * blocks).map(|i| (i % 251) as u8).collect();
    fs::write(path, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{find_descriptor, parse_descriptor};

    fn simulation(dir: &Path, source: PathBuf) -> Simulation {
        Simulation {
            source,
            target_dir: dir.join("stream"),
            stream_name: "20250301_120000_xst.dat".into(),
            block_bytes: 64,
            interval: Duration::from_millis(1),
            range: SubbandRange { min: 150, max: 155 },
        }
    }

    #[test]
    fn replays_whole_blocks_only() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("recording.dat");
        fs::write(&source, vec![7u8; 64 * 3 + 10]).unwrap();

        let sim = simulation(dir.path(), source);
        let written = sim.run(&CancellationToken::new()).unwrap();

        assert_eq!(written, 3);
        assert_eq!(fs::metadata(sim.target_file()).unwrap().len(), 64 * 3);

        let descriptor = find_descriptor(&sim.target_dir).unwrap().unwrap();
        let range = parse_descriptor(&fs::read_to_string(descriptor).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(range, SubbandRange { min: 150, max: 155 });
    }

    #[test]
    fn cancelled_simulation_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("recording.dat");
        write_synthetic_source(&source, 64, 4).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let sim = simulation(dir.path(), source);
        assert_eq!(sim.run(&cancel).unwrap(), 0);
    }

    #[test]
    fn missing_source_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let sim = simulation(dir.path(), dir.path().join("absent.dat"));
        assert!(matches!(
            sim.run(&CancellationToken::new()),
            Err(SimulateError::Source { .. })
        ));
    }
}
