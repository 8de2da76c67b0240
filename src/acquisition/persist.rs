use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::PathBuf;

use super::{Block, SubbandRange};

/// File stem shared by a block's data file and its sidecar, e.g.
/// `20230111_071302_xst`.
///
/// Second resolution: two blocks persisted within the same second overwrite
/// each other.
pub fn artifact_stem(timestamp: DateTime<Utc>) -> String {
    format!("{}_xst", timestamp.format("%Y%m%d_%H%M%S"))
}

/// Contents of the `.h` sidecar read back by the archive tooling.
pub fn sidecar_contents(range: SubbandRange, subband: u32) -> String {
    format!(
        "--subbands={}:{}\n- rspctl --xcsubband={}\n",
        range.min, range.max, subband
    )
}

/// Archives every block read from the stream as a `.dat`/`.h` pair.
pub struct BlockPersister {
    dir: PathBuf,
    range: SubbandRange,
}

impl BlockPersister {
    pub fn new(dir: PathBuf, range: SubbandRange) -> Self {
        Self { dir, range }
    }

    /// Best effort: failures are logged and the pipeline carries on.
    pub fn persist(&self, block: &Block) {
        match self.try_persist(block) {
            Ok((data_path, header_path)) => log::debug!(
                "Block {} saved to {}, {}",
                block.number,
                data_path.display(),
                header_path.display()
            ),
            Err(e) => log::error!(
                "Failed to save block {} (subband {}): {}",
                block.number,
                block.subband,
                e
            ),
        }
    }

    pub fn try_persist(&self, block: &Block) -> io::Result<(PathBuf, PathBuf)> {
        let stem = artifact_stem(block.timestamp);
        let data_path = self.dir.join(format!("{stem}.dat"));
        let header_path = self.dir.join(format!("{stem}.h"));

        fs::write(&data_path, block.as_bytes())?;
        fs::write(&header_path, sidecar_contents(self.range, block.subband))?;
        Ok((data_path, header_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn block_at(second: u32, subband: u32) -> Block {
        let timestamp = Utc.with_ymd_and_hms(2023, 1, 11, 7, 13, second).unwrap();
        Block::new(1, timestamp, subband, 1, vec![second as u8; 16])
    }

    #[test]
    fn writes_data_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let range = SubbandRange { min: 100, max: 102 };
        let persister = BlockPersister::new(dir.path().to_path_buf(), range);

        let (data, header) = persister.try_persist(&block_at(2, 101)).unwrap();

        assert_eq!(data, dir.path().join("20230111_071302_xst.dat"));
        assert_eq!(fs::read(&data).unwrap(), vec![2u8; 16]);
        assert_eq!(
            fs::read_to_string(header).unwrap(),
            "--subbands=100:102\n- rspctl --xcsubband=101\n"
        );
    }

    #[test]
    fn same_second_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let range = SubbandRange { min: 1, max: 2 };
        let persister = BlockPersister::new(dir.path().to_path_buf(), range);

        persister.persist(&block_at(5, 1));
        persister.persist(&block_at(5, 2));

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
        let header = fs::read_to_string(dir.path().join("20230111_071305_xst.h")).unwrap();
        assert!(header.ends_with("--xcsubband=2\n"));
    }

    #[test]
    fn missing_directory_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let persister =
            BlockPersister::new(dir.path().join("gone"), SubbandRange { min: 1, max: 2 });
        persister.persist(&block_at(1, 1));
        assert!(persister.try_persist(&block_at(1, 1)).is_err());
    }
}
