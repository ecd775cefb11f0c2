//! Probe module for reading media metadata before planning an encode.
//!
//! Runs ffprobe once in JSON mode and folds the format and stream sections
//! into a [`MediaProfile`]. Bit rate is optional; duration is not.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe exited unsuccessfully.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// ffprobe output was not the JSON we expected.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// Duration was missing, unparsable, or not strictly positive.
    #[error("Input has no usable duration: {0}")]
    InvalidDuration(String),

    /// The container holds no video stream.
    #[error("Input contains no video stream")]
    NoVideoStream,

    /// The asset could not be read or ffprobe could not be spawned.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    /// Whether the failure is a property of the uploaded file rather than of the tooling.
    pub fn is_input_fault(&self) -> bool {
        matches!(self, ProbeError::InvalidDuration(_) | ProbeError::NoVideoStream)
    }
}

/// Video stream facts used for planning and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoStreamInfo {
    /// Codec name (e.g., "h264", "hevc").
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// Frames per second, if ffprobe reported a usable rate.
    pub frame_rate: Option<f64>,
}

/// Immutable snapshot of an input asset's metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaProfile {
    /// Duration in seconds, always > 0.
    pub duration_seconds: f64,
    /// Container bit rate in bits per second, when known.
    pub bit_rate_bps: Option<u64>,
    /// First video stream.
    pub video: VideoStreamInfo,
    /// Whether at least one audio stream is present.
    pub has_audio: bool,
}

/// Anything that can turn a staged asset into a [`MediaProfile`].
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, input: &Path) -> Result<MediaProfile, ProbeError>;
}

/// [`MediaProber`] backed by the ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    binary: PathBuf,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    /// Runs `ffprobe -v error -print_format json -show_format -show_streams <path>`.
    async fn probe(&self, input: &Path) -> Result<MediaProfile, ProbeError> {
        // surface unreadable assets as IO errors rather than ffprobe noise
        tokio::fs::metadata(input).await?;

        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(input)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::FfprobeFailed(format!(
                "ffprobe exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let profile = parse_ffprobe_output(&stdout)?;
        tracing::debug!(
            path = %input.display(),
            duration_seconds = profile.duration_seconds,
            bit_rate_bps = ?profile.bit_rate_bps,
            codec = %profile.video.codec,
            width = profile.video.width,
            height = profile.video.height,
            "Probed input"
        );
        Ok(profile)
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub avg_frame_rate: Option<String>,
        pub r_frame_rate: Option<String>,
        pub duration: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub bit_rate: Option<String>,
    }
}

/// Parses ffprobe JSON output into a [`MediaProfile`].
pub fn parse_ffprobe_output(json_str: &str) -> Result<MediaProfile, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let streams = ffprobe.streams.unwrap_or_default();
    let format = ffprobe.format.ok_or_else(|| {
        ProbeError::ParseError("Missing format information in ffprobe output".to_string())
    })?;

    let video_stream = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(ProbeError::NoVideoStream)?;
    let has_audio = streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let raw_duration = format
        .duration
        .as_deref()
        .or(video_stream.duration.as_deref());
    let duration_seconds = match raw_duration.map(|d| d.trim().parse::<f64>()) {
        Some(Ok(d)) if d.is_finite() && d > 0.0 => d,
        Some(Ok(d)) => return Err(ProbeError::InvalidDuration(format!("{} seconds", d))),
        Some(Err(_)) => {
            return Err(ProbeError::InvalidDuration(format!(
                "unparsable value {:?}",
                raw_duration.unwrap_or_default()
            )))
        }
        None => return Err(ProbeError::InvalidDuration("not reported".to_string())),
    };

    // "N/A" and friends mean unknown, not failure
    let bit_rate_bps = format
        .bit_rate
        .as_deref()
        .and_then(|br| br.trim().parse::<u64>().ok())
        .filter(|&br| br > 0);

    let frame_rate = video_stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video_stream.r_frame_rate.as_deref().and_then(parse_frame_rate));

    Ok(MediaProfile {
        duration_seconds,
        bit_rate_bps,
        video: VideoStreamInfo {
            codec: video_stream.codec_name.clone().unwrap_or_default(),
            width: video_stream.width.unwrap_or(0),
            height: video_stream.height.unwrap_or(0),
            frame_rate,
        },
        has_audio,
    })
}

/// Parses ffprobe's rational frame rate ("30000/1001") or a plain number.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}
