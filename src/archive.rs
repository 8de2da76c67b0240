//! Post-hoc inspection of the block artifacts written during an observation.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivedBlock {
    pub timestamp: NaiveDateTime,
    pub subband: Option<u32>,
    pub data_file: PathBuf,
    pub header_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveSummary {
    pub number_of_files: usize,
    pub first_subband: Option<u32>,
    pub last_subband: Option<u32>,
    pub total_subbands: usize,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub average_measures_per_subband: Option<f64>,
    /// Mean seconds between measurements; `None` for a single block.
    pub measurement_duration: Option<f64>,
}

/// `--xcsubband=<n>` value of a block sidecar.
pub fn parse_xcsubband(content: &str) -> Option<u32> {
    let start = content.find("--xcsubband=")? + "--xcsubband=".len();
    let digits: String = content[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Observation time encoded in a `YYYYmmdd_HHMMSS_...` file name.
pub fn parse_obstime(file_name: &str) -> Option<NaiveDateTime> {
    let mut parts = file_name.split('_');
    let date = parts.next()?;
    let time = parts.next()?;
    let time = time.split('.').next()?;
    NaiveDateTime::parse_from_str(&format!("{date}:{time}"), "%Y%m%d:%H%M%S").ok()
}

/// Pairs every `*.dat` block in `dir` with its `.h` sidecar, sorted by time
/// then subband. Blocks without a sidecar or a parseable name are skipped.
pub fn scan_blocks(dir: &Path) -> Result<Vec<ArchivedBlock>, ArchiveError> {
    let io_err = |source| ArchiveError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut blocks = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let data_file = entry.map_err(io_err)?.path();
        if data_file.extension().and_then(|e| e.to_str()) != Some("dat") {
            continue;
        }

        let header_file = data_file.with_extension("h");
        if !header_file.is_file() {
            log::warn!("No sidecar for {}, skipped", data_file.display());
            continue;
        }

        let Some(timestamp) = data_file
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_obstime)
        else {
            log::warn!("Unrecognised block name {}, skipped", data_file.display());
            continue;
        };

        let header = fs::read_to_string(&header_file).map_err(|source| ArchiveError::Io {
            path: header_file.clone(),
            source,
        })?;

        blocks.push(ArchivedBlock {
            timestamp,
            subband: parse_xcsubband(&header),
            data_file,
            header_file,
        });
    }

    blocks.sort_by(|a, b| (a.timestamp, a.subband).cmp(&(b.timestamp, b.subband)));
    Ok(blocks)
}

pub fn summarize(blocks: &[ArchivedBlock]) -> Option<ArchiveSummary> {
    let start_time = blocks.iter().map(|b| b.timestamp).min()?;
    let end_time = blocks.iter().map(|b| b.timestamp).max()?;

    let mut per_subband: BTreeMap<u32, usize> = BTreeMap::new();
    for subband in blocks.iter().filter_map(|b| b.subband) {
        *per_subband.entry(subband).or_default() += 1;
    }
    let unique: BTreeSet<u32> = per_subband.keys().copied().collect();

    let average_measures_per_subband = if per_subband.is_empty() {
        None
    } else {
        let total: usize = per_subband.values().sum();
        Some(round2(total as f64 / per_subband.len() as f64))
    };

    let measurement_duration = if blocks.len() > 1 {
        let span = (end_time - start_time).num_milliseconds() as f64 / 1000.0;
        Some(round2(span / blocks.len() as f64))
    } else {
        None
    };

    Some(ArchiveSummary {
        number_of_files: blocks.len(),
        first_subband: unique.first().copied(),
        last_subband: unique.last().copied(),
        total_subbands: unique.len(),
        start_time,
        end_time,
        average_measures_per_subband,
        measurement_duration,
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
