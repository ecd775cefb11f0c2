//! In-memory prober and engine used by unit tests.

use crate::encode::{EncodeParams, EncoderEngine, EngineFailure, OutputSink, Pass};
use crate::probe::{MediaProber, MediaProfile, ProbeError, VideoStreamInfo};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 60 second 1920x1080 clip with audio
pub fn sample_profile() -> MediaProfile {
    MediaProfile {
        duration_seconds: 60.0,
        bit_rate_bps: Some(4_500_000),
        video: VideoStreamInfo {
            codec: "h264".to_string(),
            width: 1920,
            height: 1080,
            frame_rate: Some(30.0),
        },
        has_audio: true,
    }
}

/// Returns a fixed profile, or an ffprobe failure when built with `None`
pub struct StaticProber {
    profile: Option<MediaProfile>,
    probed: Mutex<Vec<PathBuf>>,
}

impl StaticProber {
    pub fn new(profile: Option<MediaProfile>) -> Self {
        Self {
            profile,
            probed: Mutex::new(Vec::new()),
        }
    }

    pub fn probed(&self) -> Vec<PathBuf> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaProber for StaticProber {
    async fn probe(&self, input: &Path) -> Result<MediaProfile, ProbeError> {
        self.probed.lock().unwrap().push(input.to_path_buf());
        tokio::fs::metadata(input).await?;
        self.profile
            .clone()
            .ok_or_else(|| ProbeError::FfprobeFailed("simulated ffprobe failure".to_string()))
    }
}

/// Records every pass and writes small placeholder artifacts
pub struct FakeEngine {
    fail_on: Option<Pass>,
    output: Vec<u8>,
    delay: Option<Duration>,
    calls: Mutex<Vec<EncodeParams>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            fail_on: None,
            output: b"fake mp4 payload".to_vec(),
            delay: None,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Exit with code 1 when `pass` runs
    pub fn failing_on(mut self, pass: Pass) -> Self {
        self.fail_on = Some(pass);
        self
    }

    /// Bytes the final pass writes
    pub fn with_output(mut self, output: Vec<u8>) -> Self {
        self.output = output;
        self
    }

    /// Sleep this long inside every pass, waking early on cancel
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<EncodeParams> {
        self.calls.lock().unwrap().clone()
    }

    pub fn passes(&self) -> Vec<Pass> {
        self.calls().into_iter().map(|p| p.pass).collect()
    }

    /// Highest number of passes that were in flight at once
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EncoderEngine for FakeEngine {
    async fn run_pass(
        &self,
        params: &EncodeParams,
        cancel: &CancellationToken,
    ) -> Result<(), EngineFailure> {
        self.calls.lock().unwrap().push(params.clone());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if let Some(delay) = self.delay {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineFailure::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if self.fail_on == Some(params.pass) {
            return Err(EngineFailure::Exited {
                code: 1,
                stderr: "simulated failure".to_string(),
            });
        }

        match &params.sink {
            OutputSink::Discard => {
                let mut stats = params.stats_prefix.clone().into_os_string();
                stats.push("-0.log");
                tokio::fs::write(PathBuf::from(stats), b"stats").await?;
            }
            OutputSink::File(path) => {
                tokio::fs::write(path, &self.output).await?;
            }
        }
        Ok(())
    }
}
