use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use utoipa::ToSchema;

pub const SESSION_LOG_FILE: &str = "session_log.json";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid session log {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Output directory of one observation: `<base>/<YYYYmmdd_HHMMSS>/` with
/// `blocks/`, `images/` and `movies/` underneath.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ObservationSession {
    pub name: String,
    #[schema(value_type = String)]
    pub root: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl ObservationSession {
    pub fn create(base: &Path) -> Result<Self, SessionError> {
        Self::create_at(base, Utc::now())
    }

    pub fn create_at(base: &Path, created_at: DateTime<Utc>) -> Result<Self, SessionError> {
        let name = created_at.format("%Y%m%d_%H%M%S").to_string();
        let session = Self {
            root: base.join(&name),
            name,
            created_at,
        };
        for dir in [
            session.blocks_dir(),
            session.images_dir(),
            session.movies_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|source| SessionError::Io { path: dir, source })?;
        }
        log::info!("Created observation directory at {}", session.root.display());
        Ok(session)
    }

    pub fn blocks_dir(&self) -> PathBuf {
        self.root.join("blocks")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn movies_dir(&self) -> PathBuf {
        self.root.join("movies")
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(SESSION_LOG_FILE)
    }

    /// Path of an image relative to the observation base folder, as stored
    /// in the image log.
    pub fn relative_image_path(&self, image: &Path) -> String {
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}/images/{}", self.name, file_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ImageLogEntry {
    pub timestamp: DateTime<Utc>,
    pub filename: String,
    pub subband: u32,
    pub status: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub frame_index: Option<u64>,
}

impl ImageLogEntry {
    pub fn processed(
        timestamp: DateTime<Utc>,
        filename: String,
        subband: u32,
        duration: f64,
        frame_index: u64,
    ) -> Self {
        Self {
            timestamp,
            filename,
            subband,
            status: "processed".to_string(),
            duration: Some(duration),
            frame_index: Some(frame_index),
        }
    }
}

/// Workers finish out of order, so the log is sorted before it is stored.
pub fn save_log(path: &Path, entries: &[ImageLogEntry]) -> Result<(), SessionError> {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|e| e.timestamp);
    let json = serde_json::to_string_pretty(&sorted).map_err(|source| SessionError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("Saved session log to {} ({} entries)", path.display(), sorted.len());
    Ok(())
}

/// Reads a session log sorted by timestamp. A missing or empty file is an
/// empty log.
pub fn load_log(path: &Path) -> Result<Vec<ImageLogEntry>, SessionError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(SessionError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut entries: Vec<ImageLogEntry> =
        serde_json::from_str(&content).map_err(|source| SessionError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    entries.sort_by_key(|e| e.timestamp);
    Ok(entries)
}

/// Session logs of every past observation under `base`, keyed by
/// observation name. Unreadable logs are skipped.
pub fn load_all_logs(base: &Path) -> Result<BTreeMap<String, Vec<ImageLogEntry>>, SessionError> {
    let mut logs = BTreeMap::new();
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(logs),
        Err(source) => {
            return Err(SessionError::Io {
                path: base.to_path_buf(),
                source,
            })
        }
    };

    for entry in entries {
        let entry = entry.map_err(|source| SessionError::Io {
            path: base.to_path_buf(),
            source,
        })?;
        let log_path = entry.path().join(SESSION_LOG_FILE);
        if !log_path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        match load_log(&log_path) {
            Ok(log) => {
                log::info!("Loaded log for observation {} ({} entries)", name, log.len());
                logs.insert(name, log);
            }
            Err(e) => log::warn!("Could not load log from {}: {}", log_path.display(), e),
        }
    }

    Ok(logs)
}

/// The `limit` newest entries, newest first.
pub fn newest_first(entries: &[ImageLogEntry], limit: usize) -> Vec<ImageLogEntry> {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    sorted.truncate(limit);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(second: u32, subband: u32) -> ImageLogEntry {
        ImageLogEntry::processed(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, second).unwrap(),
            format!("obs/images/nf_{second}.png"),
            subband,
            1.25,
            u64::from(second),
        )
    }

    #[test]
    fn create_lays_out_directories() {
        let base = tempfile::tempdir().unwrap();
        let created = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let session = ObservationSession::create_at(base.path(), created).unwrap();

        assert_eq!(session.name, "20250301_120000");
        assert!(session.blocks_dir().is_dir());
        assert!(session.images_dir().is_dir());
        assert!(session.movies_dir().is_dir());
        assert_eq!(
            session.relative_image_path(Path::new("/tmp/render/nf.png")),
            "20250301_120000/images/nf.png"
        );
    }

    #[test]
    fn saved_log_reloads_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_LOG_FILE);
        save_log(&path, &[entry(3, 102), entry(1, 100), entry(2, 101)]).unwrap();

        let loaded = load_log(&path).unwrap();
        let subbands: Vec<u32> = loaded.iter().map(|e| e.subband).collect();
        assert_eq!(subbands, vec![100, 101, 102]);
        assert_eq!(loaded[0].status, "processed");
    }

    #[test]
    fn missing_or_empty_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_LOG_FILE);
        assert!(load_log(&path).unwrap().is_empty());
        fs::write(&path, "  \n").unwrap();
        assert!(load_log(&path).unwrap().is_empty());
    }

    #[test]
    fn corrupt_log_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_LOG_FILE);
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_log(&path), Err(SessionError::Json { .. })));
    }

    #[test]
    fn load_all_logs_skips_bad_sessions() {
        let base = tempfile::tempdir().unwrap();
        for name in ["20250301_120000", "20250302_080000", "20250303_090000"] {
            fs::create_dir_all(base.path().join(name)).unwrap();
        }
        save_log(
            &base.path().join("20250301_120000").join(SESSION_LOG_FILE),
            &[entry(1, 100)],
        )
        .unwrap();
        fs::write(
            base.path().join("20250302_080000").join(SESSION_LOG_FILE),
            "garbage",
        )
        .unwrap();

        let logs = load_all_logs(base.path()).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs["20250301_120000"].len(), 1);
    }

    #[test]
    fn newest_first_limits() {
        let entries = vec![entry(1, 100), entry(5, 101), entry(3, 102)];
        let newest = newest_first(&entries, 2);
        let seconds: Vec<u64> = newest.iter().filter_map(|e| e.frame_index).collect();
        assert_eq!(seconds, vec![5, 3]);
    }
}
