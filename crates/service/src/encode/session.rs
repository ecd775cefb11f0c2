//! Two-pass encode session
//!
//! Runs the analysis pass, then the final pass, against one engine. Pass 2 is
//! never started unless pass 1 succeeded, and nothing is retried.

use crate::config::EncoderConfig;
use crate::encode::engine::{EncoderEngine, EngineFailure};
use crate::encode::params::{AudioParams, EncodeParams, OutputSink, Pass, ScaleFilter};
use crate::rate_plan::EncodePlan;
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A pass failed; the session stopped there
#[derive(Debug, Error)]
#[error("Encode {pass} failed: {failure}")]
pub struct EncodeError {
    pub pass: Pass,
    #[source]
    pub failure: EngineFailure,
}

impl EncodeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.failure, EngineFailure::Cancelled)
    }
}

/// Settings that stay fixed across jobs
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub video_codec: String,
    pub preset: String,
    pub audio: AudioParams,
    pub threads: Option<u32>,
}

impl EncodeSettings {
    pub fn from_config(cfg: &EncoderConfig, threads: Option<u32>) -> Self {
        Self {
            video_codec: cfg.video_codec.clone(),
            preset: cfg.preset.clone(),
            audio: AudioParams {
                codec: cfg.audio_codec.clone(),
                bitrate_bps: u64::from(cfg.audio_bitrate_kbps) * 1000,
                sample_rate_hz: cfg.audio_sample_rate,
                channels: cfg.audio_channels,
            },
            threads,
        }
    }
}

/// Files a session reads and writes, all inside one job workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub input: PathBuf,
    pub output: PathBuf,
    pub stats_prefix: PathBuf,
}

/// Drives one input through both passes
pub struct EncodeSession<'a> {
    engine: &'a dyn EncoderEngine,
    settings: &'a EncodeSettings,
    source_has_audio: bool,
}

impl<'a> EncodeSession<'a> {
    pub fn new(engine: &'a dyn EncoderEngine, settings: &'a EncodeSettings) -> Self {
        Self {
            engine,
            settings,
            source_has_audio: true,
        }
    }

    /// Silent sources get no audio track in the final pass
    pub fn with_source_audio(mut self, has_audio: bool) -> Self {
        self.source_has_audio = has_audio;
        self
    }

    /// Parameters for `pass` under `plan`
    ///
    /// Both passes share bitrate settings, statistics prefix, and scaling so the
    /// final pass can reuse the analysis. Only the final pass writes a file, and
    /// it carries audio only when the source has some.
    pub fn pass_params(&self, pass: Pass, paths: &SessionPaths, plan: &EncodePlan) -> EncodeParams {
        let (sink, audio) = match pass {
            Pass::Analysis => (OutputSink::Discard, None),
            Pass::Final => (
                OutputSink::File(paths.output.clone()),
                self.source_has_audio
                    .then(|| self.settings.audio.clone()),
            ),
        };

        EncodeParams {
            input: paths.input.clone(),
            sink,
            pass,
            stats_prefix: paths.stats_prefix.clone(),
            video_codec: self.settings.video_codec.clone(),
            preset: self.settings.preset.clone(),
            target_bitrate_bps: plan.target_bitrate_bps,
            max_bitrate_bps: plan.max_bitrate_bps,
            buffer_size_bits: plan.buffer_size_bits,
            scale: plan
                .preserve_aspect_ratio
                .then_some(ScaleFilter::EvenDimensions),
            audio,
            threads: self.settings.threads,
        }
    }

    /// Run both passes and return the output path
    ///
    /// `on_pass` is called right before each pass starts.
    pub async fn encode<F>(
        &self,
        paths: &SessionPaths,
        plan: &EncodePlan,
        cancel: &CancellationToken,
        mut on_pass: F,
    ) -> Result<PathBuf, EncodeError>
    where
        F: FnMut(Pass) + Send,
    {
        for pass in [Pass::Analysis, Pass::Final] {
            if cancel.is_cancelled() {
                return Err(EncodeError {
                    pass,
                    failure: EngineFailure::Cancelled,
                });
            }

            on_pass(pass);
            let params = self.pass_params(pass, paths, plan);
            tracing::info!(
                pass = pass.number(),
                target_bitrate_bps = plan.target_bitrate_bps,
                "Starting encoder pass"
            );

            self.engine
                .run_pass(&params, cancel)
                .await
                .map_err(|failure| EncodeError { pass, failure })?;
        }

        match tokio::fs::metadata(&paths.output).await {
            Ok(meta) if meta.len() > 0 => Ok(paths.output.clone()),
            Ok(_) => Err(EncodeError {
                pass: Pass::Final,
                failure: EngineFailure::MissingOutput(format!(
                    "{} is empty",
                    paths.output.display()
                )),
            }),
            Err(e) => Err(EncodeError {
                pass: Pass::Final,
                failure: EngineFailure::MissingOutput(format!(
                    "{}: {}",
                    paths.output.display(),
                    e
                )),
            }),
        }
    }
}
