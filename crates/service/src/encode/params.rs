//! Typed encoder pass description.
//!
//! Engines serialize these fields themselves; nothing upstream builds argument strings.

use std::fmt;
use std::path::PathBuf;

/// Which pass of a two-pass encode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Statistics-gathering pass, output discarded
    Analysis,
    /// Final pass that writes the artifact
    Final,
}

impl Pass {
    pub fn number(self) -> u8 {
        match self {
            Pass::Analysis => 1,
            Pass::Final => 2,
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass {}", self.number())
    }
}

/// Where a pass writes its encoded stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    /// Encode and throw the result away
    Discard,
    /// Write an MP4 to this path
    File(PathBuf),
}

/// Dimension-normalizing filter applied before encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleFilter {
    /// Round width and height down to the nearest even integer
    EvenDimensions,
}

/// Fixed audio transcoding settings for the final pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioParams {
    pub codec: String,
    pub bitrate_bps: u64,
    pub sample_rate_hz: u32,
    pub channels: u32,
}

/// Everything an engine needs to run one pass
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeParams {
    pub input: PathBuf,
    pub sink: OutputSink,
    pub pass: Pass,
    /// Prefix for the rate-control statistics shared between passes
    pub stats_prefix: PathBuf,
    pub video_codec: String,
    pub preset: String,
    pub target_bitrate_bps: u64,
    pub max_bitrate_bps: u64,
    pub buffer_size_bits: u64,
    pub scale: Option<ScaleFilter>,
    /// None disables audio for this pass
    pub audio: Option<AudioParams>,
    pub threads: Option<u32>,
}
