use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Stdio};
use std::thread;

use thiserror::Error;

use crate::acquisition::Block;
use crate::state::TrackingSample;
use crate::station::Station;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to start renderer: {0}")]
    Spawn(#[source] io::Error),
    #[error("renderer I/O error: {0}")]
    Io(#[source] io::Error),
    #[error("renderer exited with code {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("invalid renderer output: {0}")]
    InvalidOutput(String),
    #[error("renderer panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Other(String),
}

/// Everything the renderer needs to image one block.
#[derive(Debug, Clone, Copy)]
pub struct RenderJob<'a> {
    pub block: &'a Block,
    pub station: &'a Station,
    pub output_dir: &'a Path,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOutput {
    pub sky_image: Option<PathBuf>,
    pub nearfield_image: Option<PathBuf>,
    pub tracking: Option<TrackingSample>,
}

/// Turns a correlation matrix into images. Called concurrently from the
/// render workers.
pub trait Renderer: Send + Sync {
    fn render(&self, job: &RenderJob<'_>) -> Result<RenderOutput, RenderError>;
}

/// Renders by running a shell command once per block.
///
/// The raw block is written to the command's stdin and the metadata is
/// passed through `XST_*` environment variables. The command reports its
/// results as `key=value` lines on stdout: `sky=<path>`, `nearfield=<path>`
/// and `tracking=<json>`. Other lines are ignored.
pub struct CommandRenderer {
    command: String,
}

impl CommandRenderer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Renderer for CommandRenderer {
    fn render(&self, job: &RenderJob<'_>) -> Result<RenderOutput, RenderError> {
        let block = job.block;
        let station = job.station;

        let mut child = StdCommand::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("XST_STATION", &station.name)
            .env("XST_RCU_MODE", station.rcu_mode.to_string())
            .env("XST_HEIGHT_M", station.height_m.to_string())
            .env("XST_EXTENT_M", station.extent_m.to_string())
            .env("XST_PIXELS_PER_METRE", station.pixels_per_metre().to_string())
            .env("XST_DIMENSION", block.dimension.to_string())
            .env("XST_BLOCK", block.number.to_string())
            .env("XST_SUBBAND", block.subband.to_string())
            .env("XST_TIMESTAMP", block.timestamp.to_rfc3339())
            .env("XST_OUTPUT_DIR", job.output_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(RenderError::Spawn)?;

        log::debug!(
            "Renderer spawned for block {} (PID: {})",
            block.number,
            child.id()
        );

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RenderError::Other("renderer stdin unavailable".into()))?;
        let data = block.as_bytes();

        let output = thread::scope(|scope| {
            let writer = scope.spawn(move || stdin.write_all(data));
            let output = child.wait_with_output();
            match writer.join() {
                Ok(Err(e)) if e.kind() != io::ErrorKind::BrokenPipe => {
                    log::warn!("Writing block {} to renderer failed: {}", block.number, e)
                }
                Err(_) => log::warn!("Renderer stdin writer panicked"),
                _ => {}
            }
            output
        })
        .map_err(RenderError::Io)?;

        if !output.status.success() {
            return Err(RenderError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_render_output(&String::from_utf8_lossy(&output.stdout))
    }
}

pub fn parse_render_output(stdout: &str) -> Result<RenderOutput, RenderError> {
    let mut output = RenderOutput::default();
    for line in stdout.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "sky" if !value.is_empty() => output.sky_image = Some(PathBuf::from(value)),
            "nearfield" if !value.is_empty() => {
                output.nearfield_image = Some(PathBuf::from(value))
            }
            "tracking" => {
                let sample = serde_json::from_str(value)
                    .map_err(|e| RenderError::InvalidOutput(format!("tracking: {e}")))?;
                output.tracking = Some(sample);
            }
            _ => {}
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn parses_result_lines() {
        let stdout = "calibrating...\nsky=/tmp/sky.png\nnearfield=/tmp/nf.png\n\
tracking={\"timestamp\":\"2025-03-01T12:00:00\",\"lat\":56.9,\"lon\":24.1,\"x_m\":1.5,\"y_m\":-2.0,\"power_db\":-30.0,\"subband\":284}\n";
        let output = parse_render_output(stdout).unwrap();
        assert_eq!(output.sky_image, Some(PathBuf::from("/tmp/sky.png")));
        assert_eq!(output.nearfield_image, Some(PathBuf::from("/tmp/nf.png")));
        assert_eq!(output.tracking.unwrap().subband, 284);
    }

    #[test]
    fn empty_output_is_empty_result() {
        assert_eq!(parse_render_output("").unwrap(), RenderOutput::default());
        assert!(parse_render_output("nearfield=\n")
            .unwrap()
            .nearfield_image
            .is_none());
    }

    #[test]
    fn bad_tracking_json_is_rejected() {
        assert!(matches!(
            parse_render_output("tracking={oops\n"),
            Err(RenderError::InvalidOutput(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn command_renderer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let station = Station::new("CS002", 3, 1.5, 50.0);
        let block = Block::new(4, Utc::now(), 101, 1, vec![0u8; 16]);
        let renderer = CommandRenderer::new(
            "bytes=$(wc -c | tr -d ' '); echo \"nearfield=$XST_OUTPUT_DIR/nf_${XST_SUBBAND}_${bytes}.png\"",
        );

        let output = renderer
            .render(&RenderJob {
                block: &block,
                station: &station,
                output_dir: dir.path(),
            })
            .unwrap();

        let expected = dir.path().join("nf_101_16.png");
        assert_eq!(output.nearfield_image, Some(expected));
    }

    #[cfg(unix)]
    #[test]
    fn command_renderer_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let station = Station::new("CS002", 3, 1.5, 50.0);
        let block = Block::new(1, Utc::now(), 100, 1, vec![0u8; 16]);
        let renderer = CommandRenderer::new("echo boom >&2; exit 3");

        let err = renderer
            .render(&RenderJob {
                block: &block,
                station: &station,
                output_dir: dir.path(),
            })
            .unwrap_err();
        match err {
            RenderError::Failed { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
