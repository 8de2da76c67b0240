use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::config::SubbandConfig;

#[derive(Debug, Error)]
pub enum SubbandError {
    #[error("invalid subband range {min}:{max}")]
    Inverted { min: u32, max: u32 },
    #[error("malformed subbands value '{0}'")]
    Malformed(String),
    #[error("failed to read observation descriptor {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no subband range in {0} and no manual range configured")]
    Missing(PathBuf),
}

/// Inclusive range of subbands cycled through during one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SubbandRange {
    pub min: u32,
    pub max: u32,
}

impl SubbandRange {
    pub fn new(min: u32, max: u32) -> Result<Self, SubbandError> {
        if min > max {
            return Err(SubbandError::Inverted { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn len(&self) -> u64 {
        u64::from(self.max) - u64::from(self.min) + 1
    }

    /// Subband sampled by the block at 0-based stream position `index`.
    pub fn subband(&self, index: u64) -> u32 {
        // The offset is always below len(), which fits in u32 + 1.
        self.min + (index % self.len()) as u32
    }
}

/// First `*.h` or `*.sh` file in `dir`, by name.
pub fn find_descriptor(dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("h") | Some("sh")
            )
        })
        .collect();
    candidates.sort();
    Ok(candidates.into_iter().next())
}

/// Extracts the `subbands=<a>:<b>` line of an observation descriptor.
pub fn parse_descriptor(content: &str) -> Result<Option<SubbandRange>, SubbandError> {
    let Some(value) = content
        .lines()
        .find_map(|line| line.trim().strip_prefix("subbands="))
    else {
        return Ok(None);
    };

    let cleaned = value.trim().replace(['\'', '"'], "");
    let bounds = cleaned
        .split(':')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| SubbandError::Malformed(cleaned.clone()))?;

    match (bounds.iter().min(), bounds.iter().max()) {
        (Some(&min), Some(&max)) => Ok(Some(SubbandRange::new(min, max)?)),
        _ => Err(SubbandError::Malformed(cleaned)),
    }
}

/// Determines the subband range for an observation reading from `dir`.
pub fn resolve_range(dir: &Path, settings: &SubbandConfig) -> Result<SubbandRange, SubbandError> {
    if settings.manual {
        if let Some(range) = settings.range {
            log::info!("Using manual subbands {}:{}", range.min, range.max);
            return Ok(range);
        }
    }

    let descriptor = find_descriptor(dir).map_err(|source| SubbandError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    if let Some(path) = descriptor {
        let content = fs::read_to_string(&path).map_err(|source| SubbandError::Io {
            path: path.clone(),
            source,
        })?;
        if let Some(range) = parse_descriptor(&content)? {
            log::info!(
                "Subbands {}:{} from {}",
                range.min,
                range.max,
                path.display()
            );
            return Ok(range);
        }
        log::warn!("No subbands entry in {}", path.display());
    } else {
        log::warn!("No observation descriptor (.h, .sh) in {}", dir.display());
    }

    settings.range.ok_or_else(|| SubbandError::Missing(dir.to_path_buf()))
}

fn descriptor_ready(dir: &Path) -> bool {
    let Ok(Some(path)) = find_descriptor(dir) else {
        return false;
    };
    fs::read_to_string(path)
        .ok()
        .is_some_and(|content| matches!(parse_descriptor(&content), Ok(Some(_))))
}

/// [`resolve_range`], after giving the producer up to `grace` to write a
/// descriptor with a `subbands=` entry. Manual ranges do not wait.
pub fn wait_for_range(
    dir: &Path,
    settings: &SubbandConfig,
    grace: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<SubbandRange, SubbandError> {
    if !settings.manual {
        let deadline = Instant::now() + grace;
        while !descriptor_ready(dir) && !cancel.is_cancelled() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            thread::sleep(poll_interval.min(left));
        }
    }
    resolve_range(dir, settings)
}
