//! clipsqueeze
//!
//! HTTP service that compresses uploaded videos toward a target file size with
//! a two-pass ffmpeg encode, one isolated workspace per job.

pub mod concurrency;
pub mod controller;
pub mod encode;
pub mod http;
pub mod job;
pub mod metrics;
pub mod observability;
pub mod probe;
pub mod rate_plan;
pub mod service;
pub mod startup;
pub mod workspace;

#[cfg(test)]
mod fake;

pub use clipsqueeze_config as config;
pub use clipsqueeze_config::Config;
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use controller::{validate_request, CompressedAsset, JobController};
pub use encode::{
    build_ffmpeg_command, EncodeError, EncodeParams, EncodeSession, EncodeSettings,
    EncoderEngine, EngineFailure, FfmpegEngine, OutputSink, Pass,
};
pub use http::{create_router, ApiError, AppState};
pub use job::{Job, JobError, JobErrorKind, JobId, JobState};
pub use metrics::{new_shared_metrics, JobMetrics, JobOutcome, MetricsSnapshot, SharedMetrics};
pub use observability::init_tracing;
pub use probe::{FfprobeProber, MediaProber, MediaProfile, ProbeError, VideoStreamInfo};
pub use rate_plan::{plan, EncodePlan, RatePlanError};
pub use service::{Service, ServiceError};
pub use startup::{parse_ffmpeg_version, run_startup_checks, StartupError};
pub use workspace::{Workspace, WorkspaceError, WorkspaceRoot};
