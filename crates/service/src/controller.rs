//! Job controller for clipsqueeze
//!
//! Runs one compression request end to end: validate, create an isolated
//! workspace, stage the upload, probe, plan, encode both passes under the
//! encoder concurrency limit, read the output, and tear the workspace down.

use crate::concurrency::ConcurrencyPlan;
use crate::config::Config;
use crate::encode::{EncodeSession, EncodeSettings, EncoderEngine, FfmpegEngine, SessionPaths};
use crate::job::{Job, JobError, JobErrorKind, JobId};
use crate::metrics::{write_metrics, JobMetrics, JobOutcome, SharedMetrics};
use crate::probe::{FfprobeProber, MediaProber, MediaProfile};
use crate::rate_plan::{self, EncodePlan};
use crate::workspace::{Workspace, WorkspaceRoot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Finished job output, already read out of the (now removed) workspace
#[derive(Debug, Clone)]
pub struct CompressedAsset {
    pub job_id: JobId,
    pub bytes: Vec<u8>,
    pub profile: MediaProfile,
    pub plan: EncodePlan,
}

/// Owns job execution and the process-wide encoder limit
///
/// Uses a tokio Semaphore sized by the concurrency plan. A permit is held for
/// the whole two-pass encode, never for staging or probing.
pub struct JobController {
    root: WorkspaceRoot,
    prober: Arc<dyn MediaProber>,
    engine: Arc<dyn EncoderEngine>,
    semaphore: Arc<Semaphore>,
    concurrency_plan: ConcurrencyPlan,
    settings: EncodeSettings,
    metrics: SharedMetrics,
}

impl JobController {
    pub fn new(
        root: WorkspaceRoot,
        prober: Arc<dyn MediaProber>,
        engine: Arc<dyn EncoderEngine>,
        plan: ConcurrencyPlan,
        settings: EncodeSettings,
        metrics: SharedMetrics,
    ) -> Self {
        let permits = plan.max_concurrent_encodes as usize;
        Self {
            root,
            prober,
            engine,
            semaphore: Arc::new(Semaphore::new(permits)),
            concurrency_plan: plan,
            settings,
            metrics,
        }
    }

    /// Controller backed by the ffprobe and ffmpeg binaries named in `cfg`
    pub fn from_config(cfg: &Config, plan: ConcurrencyPlan, metrics: SharedMetrics) -> Self {
        let pass_timeout =
            (cfg.jobs.pass_timeout_secs > 0).then(|| Duration::from_secs(cfg.jobs.pass_timeout_secs));
        let settings = EncodeSettings::from_config(&cfg.encoder, Some(plan.threads_per_encode));

        Self::new(
            WorkspaceRoot::new(&cfg.jobs.workspace_root),
            Arc::new(FfprobeProber::new(&cfg.encoder.ffprobe_path)),
            Arc::new(FfmpegEngine::new(&cfg.encoder.ffmpeg_path, pass_timeout)),
            plan,
            settings,
            metrics,
        )
    }

    pub fn workspace_root(&self) -> &WorkspaceRoot {
        &self.root
    }

    /// Get the number of available permits (slots for concurrent encodes)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn concurrency_plan(&self) -> &ConcurrencyPlan {
        &self.concurrency_plan
    }

    /// Wait for an encoder slot, giving up if the job is cancelled first
    async fn acquire_permit(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, JobError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(JobError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                // the semaphore is never closed
                permit.map_err(|_| JobError::Cancelled)
            }
        }
    }

    /// Compress `content` toward `target_size_mb`
    ///
    /// Input validation happens before any workspace exists. Once a workspace
    /// is created it is removed on every exit path, and the output is read
    /// fully into memory before that happens.
    pub async fn submit_job(
        &self,
        content: &[u8],
        extension: &str,
        target_size_mb: f64,
        preserve_aspect_ratio: bool,
        cancel: &CancellationToken,
    ) -> Result<CompressedAsset, JobError> {
        validate_request(content, extension, target_size_mb)?;

        let id = JobId::new();
        let span = tracing::info_span!("job", job_id = %id);
        self.run_job(
            id,
            content,
            extension,
            target_size_mb,
            preserve_aspect_ratio,
            cancel,
        )
        .instrument(span)
        .await
    }

    async fn run_job(
        &self,
        id: JobId,
        content: &[u8],
        extension: &str,
        target_size_mb: f64,
        preserve_aspect_ratio: bool,
        cancel: &CancellationToken,
    ) -> Result<CompressedAsset, JobError> {
        let mut job = Job::new(id);
        let key = id.to_string();
        write_metrics(&self.metrics).job_started(JobMetrics {
            id: key.clone(),
            stage: job.state().as_str().to_string(),
            target_size_mb,
            size_in_bytes_before: content.len() as u64,
            duration_seconds: 0.0,
            target_bitrate_bps: 0,
        });
        tracing::info!(
            bytes = content.len(),
            target_size_mb,
            preserve_aspect_ratio,
            "Accepted compression job"
        );

        let result = match Workspace::create(&self.root, &id).await {
            Ok(mut workspace) => {
                let result = self
                    .run_pipeline(
                        &mut job,
                        &workspace,
                        content,
                        extension,
                        target_size_mb,
                        preserve_aspect_ratio,
                        cancel,
                    )
                    .await;
                if let Err(e) = workspace.cleanup().await {
                    tracing::warn!(error = %e, "Workspace cleanup failed");
                }
                result
            }
            Err(e) => Err(JobError::from(e)),
        };

        let outcome = match &result {
            Ok(asset) => {
                tracing::info!(
                    size_in_bytes_after = asset.bytes.len(),
                    target_bitrate_bps = asset.plan.target_bitrate_bps,
                    "Compression job completed"
                );
                JobOutcome::Completed {
                    size_in_bytes_after: asset.bytes.len() as u64,
                }
            }
            Err(e) => {
                job.failed(e.to_string());
                match e.kind() {
                    JobErrorKind::Cancelled => {
                        tracing::info!("Compression job cancelled");
                        JobOutcome::Cancelled
                    }
                    JobErrorKind::InputValidation => {
                        tracing::info!(error = %e, "Compression job rejected");
                        JobOutcome::Failed
                    }
                    _ => {
                        tracing::error!(error = %e, "Compression job failed");
                        JobOutcome::Failed
                    }
                }
            }
        };
        write_metrics(&self.metrics).job_finished(&key, outcome);

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pipeline(
        &self,
        job: &mut Job,
        workspace: &Workspace,
        content: &[u8],
        extension: &str,
        target_size_mb: f64,
        preserve_aspect_ratio: bool,
        cancel: &CancellationToken,
    ) -> Result<CompressedAsset, JobError> {
        let key = job.id.to_string();
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let input = workspace.stage_input(content, extension).await?;
        job.staged(input.clone())?;
        self.record_stage(job);

        // dropping the probe future kills ffprobe
        let profile = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            profile = self.prober.probe(&input) => profile?,
        };
        job.probed(profile.clone())?;
        self.record_stage(job);
        write_metrics(&self.metrics).update_job(&key, |m| {
            m.duration_seconds = profile.duration_seconds;
        });

        let plan = rate_plan::plan(&profile, target_size_mb, preserve_aspect_ratio)?;
        job.planned(plan)?;
        self.record_stage(job);
        write_metrics(&self.metrics).update_job(&key, |m| {
            m.target_bitrate_bps = plan.target_bitrate_bps;
        });
        let (output_width, output_height) = plan.output_dimensions(&profile);
        tracing::debug!(
            duration_seconds = profile.duration_seconds,
            output_width,
            output_height,
            has_audio = profile.has_audio,
            target_bitrate_bps = plan.target_bitrate_bps,
            max_bitrate_bps = plan.max_bitrate_bps,
            buffer_size_bits = plan.buffer_size_bits,
            "Planned encode"
        );

        let permit = self.acquire_permit(cancel).await?;

        let paths = SessionPaths {
            input,
            output: workspace.output_path(),
            stats_prefix: workspace.stats_prefix(),
        };
        let session = EncodeSession::new(self.engine.as_ref(), &self.settings)
            .with_source_audio(profile.has_audio);
        let mut transition_error = None;
        let metrics = &self.metrics;
        let encoded = session
            .encode(&paths, &plan, cancel, |pass| match job.encoding(pass) {
                Ok(()) => {
                    let stage = job.state().as_str().to_string();
                    write_metrics(metrics).update_job(&key, |m| m.stage = stage);
                }
                Err(e) => {
                    transition_error.get_or_insert(e);
                }
            })
            .await;
        drop(permit);

        encoded?;
        if let Some(e) = transition_error {
            return Err(e);
        }

        let bytes = workspace.read_output().await?;
        job.completed()?;
        self.record_stage(job);

        Ok(CompressedAsset {
            job_id: job.id,
            bytes,
            profile,
            plan,
        })
    }

    fn record_stage(&self, job: &Job) {
        let stage = job.state().as_str().to_string();
        write_metrics(&self.metrics).update_job(&job.id.to_string(), |m| m.stage = stage);
    }
}

/// Reject requests that can never succeed, before touching the filesystem
pub fn validate_request(
    content: &[u8],
    extension: &str,
    target_size_mb: f64,
) -> Result<(), JobError> {
    if content.is_empty() {
        return Err(JobError::InputValidation(
            "uploaded file is empty".to_string(),
        ));
    }
    if !target_size_mb.is_finite() || target_size_mb <= 0.0 {
        return Err(JobError::InputValidation(format!(
            "target size must be a positive number of MB, got {}",
            target_size_mb
        )));
    }
    if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(JobError::InputValidation(format!(
            "unsupported input extension {:?}",
            extension
        )));
    }
    Ok(())
}
