//! Encoding modules for clipsqueeze

pub mod engine;
pub mod ffmpeg;
pub mod params;
pub mod session;

pub use engine::{EncoderEngine, EngineFailure};
pub use ffmpeg::{build_ffmpeg_command, FfmpegEngine, EVEN_DIMENSIONS_FILTER};
pub use params::{AudioParams, EncodeParams, OutputSink, Pass, ScaleFilter};
pub use session::{EncodeError, EncodeSession, EncodeSettings, SessionPaths};
