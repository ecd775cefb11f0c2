//! ffmpeg encoder engine
//!
//! Serializes [`EncodeParams`] into an ffmpeg invocation and runs it as a
//! child process that is killed on timeout, cancellation, or drop.

use crate::encode::engine::{EncoderEngine, EngineFailure};
use crate::encode::params::{EncodeParams, OutputSink, ScaleFilter};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Filter expression that rounds both dimensions down to even numbers
pub const EVEN_DIMENSIONS_FILTER: &str = "scale=trunc(iw/2)*2:trunc(ih/2)*2";

/// How much of ffmpeg's stderr to keep for diagnostics
const STDERR_TAIL_BYTES: usize = 4096;

/// [`EncoderEngine`] that shells out to ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    binary: PathBuf,
    pass_timeout: Option<Duration>,
}

impl FfmpegEngine {
    /// `pass_timeout` of None lets a pass run indefinitely
    pub fn new(binary: impl Into<PathBuf>, pass_timeout: Option<Duration>) -> Self {
        Self {
            binary: binary.into(),
            pass_timeout,
        }
    }
}

/// Build an ffmpeg command for one pass
///
/// Creates a Command configured with:
/// - Input path, overwrite, no stdin
/// - Video codec, preset, and target/max/buffer rates
/// - Pass number and shared statistics prefix
/// - Optional thread count and even-dimension scale filter
/// - Audio parameters, or `-an` when the pass carries none
/// - A null muxer for [`OutputSink::Discard`], an MP4 file otherwise
pub fn build_ffmpeg_command(binary: &Path, params: &EncodeParams) -> Command {
    let mut cmd = Command::new(binary);

    cmd.args(["-hide_banner", "-nostdin", "-y"]);
    cmd.arg("-i").arg(&params.input);

    cmd.arg("-c:v").arg(&params.video_codec);
    cmd.arg("-preset").arg(&params.preset);
    cmd.arg("-b:v").arg(params.target_bitrate_bps.to_string());
    cmd.arg("-maxrate").arg(params.max_bitrate_bps.to_string());
    cmd.arg("-bufsize").arg(params.buffer_size_bits.to_string());

    cmd.arg("-pass").arg(params.pass.number().to_string());
    cmd.arg("-passlogfile").arg(&params.stats_prefix);

    if let Some(threads) = params.threads {
        cmd.arg("-threads").arg(threads.to_string());
    }

    if let Some(ScaleFilter::EvenDimensions) = params.scale {
        cmd.arg("-vf").arg(EVEN_DIMENSIONS_FILTER);
    }

    match &params.audio {
        Some(audio) => {
            cmd.arg("-c:a").arg(&audio.codec);
            cmd.arg("-b:a").arg(audio.bitrate_bps.to_string());
            cmd.arg("-ar").arg(audio.sample_rate_hz.to_string());
            cmd.arg("-ac").arg(audio.channels.to_string());
        }
        None => {
            cmd.arg("-an");
        }
    }

    match &params.sink {
        OutputSink::Discard => {
            cmd.args(["-f", "null", "-"]);
        }
        OutputSink::File(path) => {
            cmd.args(["-movflags", "+faststart", "-f", "mp4"]);
            cmd.arg(path);
        }
    }

    cmd
}

#[async_trait]
impl EncoderEngine for FfmpegEngine {
    async fn run_pass(
        &self,
        params: &EncodeParams,
        cancel: &CancellationToken,
    ) -> Result<(), EngineFailure> {
        let std_cmd = build_ffmpeg_command(&self.binary, params);
        tracing::debug!(
            pass = params.pass.number(),
            args = ?std_cmd.get_args().collect::<Vec<_>>(),
            "Launching ffmpeg"
        );

        let mut cmd = tokio::process::Command::from(std_cmd);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        let pass_timeout = self.pass_timeout;

        // dropping this future drops the child, which kills it
        let wait = async move {
            match pass_timeout {
                Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                    Ok(result) => result.map_err(EngineFailure::from),
                    Err(_) => Err(EngineFailure::TimedOut(limit)),
                },
                None => child.wait_with_output().await.map_err(EngineFailure::from),
            }
        };

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineFailure::Cancelled),
            result = wait => result?,
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = stderr_tail(&output.stderr);
        match output.status.code() {
            Some(code) => Err(EngineFailure::Exited { code, stderr }),
            None => Err(EngineFailure::Terminated { stderr }),
        }
    }
}

/// Last few KiB of stderr, where ffmpeg puts the actual error
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::params::{AudioParams, Pass};
    use proptest::prelude::*;
    use std::ffi::OsStr;

    /// Helper to convert Command args to a Vec of strings for easier testing
    fn get_command_args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .filter_map(|arg| arg.to_str().map(String::from))
            .collect()
    }

    /// Helper to check if args contain a flag with a specific value
    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|pair| pair[0] == flag && pair[1] == value)
    }

    fn has_flag(args: &[String], flag: &str) -> bool {
        args.iter().any(|arg| arg == flag)
    }

    fn path_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("/[a-zA-Z0-9_/.-]{1,50}").unwrap()
    }

    fn params(pass: Pass, sink: OutputSink) -> EncodeParams {
        EncodeParams {
            input: PathBuf::from("/work/job/input.mp4"),
            sink,
            pass,
            stats_prefix: PathBuf::from("/work/job/ffmpeg2pass"),
            video_codec: "libx264".to_string(),
            preset: "medium".to_string(),
            target_bitrate_bps: 1_118_481,
            max_bitrate_bps: 1_677_721,
            buffer_size_bits: 2_236_962,
            scale: None,
            audio: None,
            threads: None,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ffmpeg_command_completeness(
            input in path_strategy(),
            output in path_strategy(),
            stats in path_strategy(),
            target in 1u64..100_000_000,
            final_pass in proptest::bool::ANY,
            scale in proptest::bool::ANY,
            threads in proptest::option::of(1u32..64),
        ) {
            let (pass, sink) = if final_pass {
                (Pass::Final, OutputSink::File(PathBuf::from(&output)))
            } else {
                (Pass::Analysis, OutputSink::Discard)
            };
            let p = EncodeParams {
                input: PathBuf::from(&input),
                stats_prefix: PathBuf::from(&stats),
                target_bitrate_bps: target,
                max_bitrate_bps: target * 3 / 2,
                buffer_size_bits: target * 2,
                scale: scale.then_some(ScaleFilter::EvenDimensions),
                threads,
                ..params(pass, sink)
            };

            let cmd = build_ffmpeg_command(Path::new("ffmpeg"), &p);
            let args = get_command_args(&cmd);

            prop_assert_eq!(cmd.get_program(), OsStr::new("ffmpeg"));
            prop_assert!(has_flag_with_value(&args, "-i", &input), "args: {:?}", args);
            prop_assert!(has_flag_with_value(&args, "-c:v", "libx264"));
            prop_assert!(has_flag_with_value(&args, "-b:v", &target.to_string()));
            prop_assert!(has_flag_with_value(&args, "-maxrate", &(target * 3 / 2).to_string()));
            prop_assert!(has_flag_with_value(&args, "-bufsize", &(target * 2).to_string()));
            prop_assert!(has_flag_with_value(&args, "-passlogfile", &stats));
            let expected_pass = if final_pass { "2" } else { "1" };
            prop_assert!(has_flag_with_value(&args, "-pass", expected_pass));
            prop_assert_eq!(has_flag_with_value(&args, "-vf", EVEN_DIMENSIONS_FILTER), scale);
            match threads {
                Some(t) => prop_assert!(has_flag_with_value(&args, "-threads", &t.to_string())),
                None => prop_assert!(!has_flag(&args, "-threads")),
            }
            if final_pass {
                prop_assert_eq!(args.last().map(String::as_str), Some(output.as_str()));
            } else {
                prop_assert_eq!(&args[args.len() - 3..], &["-f", "null", "-"]);
            }
        }
    }

    #[test]
    fn test_analysis_pass_discards_and_disables_audio() {
        let cmd = build_ffmpeg_command(
            Path::new("/usr/bin/ffmpeg"),
            &params(Pass::Analysis, OutputSink::Discard),
        );
        let args = get_command_args(&cmd);

        assert!(has_flag(&args, "-an"));
        assert!(!has_flag(&args, "-c:a"));
        assert!(has_flag_with_value(&args, "-f", "null"));
        assert!(!args.iter().any(|a| a == "NUL" || a == "/dev/null"));
    }

    #[test]
    fn test_final_pass_carries_audio_params() {
        let mut p = params(
            Pass::Final,
            OutputSink::File(PathBuf::from("/work/job/output.mp4")),
        );
        p.audio = Some(AudioParams {
            codec: "aac".to_string(),
            bitrate_bps: 128_000,
            sample_rate_hz: 48_000,
            channels: 2,
        });
        let args = get_command_args(&build_ffmpeg_command(Path::new("ffmpeg"), &p));

        assert!(has_flag_with_value(&args, "-c:a", "aac"));
        assert!(has_flag_with_value(&args, "-b:a", "128000"));
        assert!(has_flag_with_value(&args, "-ar", "48000"));
        assert!(has_flag_with_value(&args, "-ac", "2"));
        assert!(has_flag_with_value(&args, "-movflags", "+faststart"));
        assert!(!has_flag(&args, "-an"));
        assert_eq!(args.last().unwrap(), "/work/job/output.mp4");
    }

    #[test]
    fn test_stderr_tail_keeps_end() {
        let long = "x".repeat(STDERR_TAIL_BYTES * 2) + "Conversion failed!";
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.starts_with("..."));
        assert!(tail.ends_with("Conversion failed!"));
        assert_eq!(stderr_tail(b"  short  \n"), "short");
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_failure() {
        let engine = FfmpegEngine::new("/nonexistent/bin/ffmpeg", None);
        let result = engine
            .run_pass(
                &params(Pass::Analysis, OutputSink::Discard),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(EngineFailure::Io(_))));
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Writes an executable shell script that stands in for ffmpeg
        fn stand_in(dir: &TempDir, body: &str) -> PathBuf {
            let path = dir.path().join("ffmpeg");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        /// Stand-in that records its pid and then blocks
        fn stalling(dir: &TempDir) -> (PathBuf, PathBuf) {
            let pid_file = dir.path().join("ffmpeg.pid");
            let binary = stand_in(
                dir,
                &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
            );
            (binary, pid_file)
        }

        /// True once the process is gone or only a zombie awaiting reaping
        async fn process_exited(pid_file: &Path) -> bool {
            let pid = match std::fs::read_to_string(pid_file) {
                Ok(pid) => pid.trim().to_string(),
                Err(_) => return false,
            };
            for _ in 0..100 {
                match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
                    Err(_) => return true,
                    Ok(stat) => {
                        let state = stat.rsplit(')').next().unwrap_or("").trim_start();
                        if state.starts_with('Z') {
                            return true;
                        }
                    }
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            false
        }

        fn analysis() -> EncodeParams {
            params(Pass::Analysis, OutputSink::Discard)
        }

        #[tokio::test]
        async fn test_zero_exit_is_success() {
            let dir = tempfile::tempdir().unwrap();
            let engine = FfmpegEngine::new(stand_in(&dir, "exit 0"), None);

            let result = engine.run_pass(&analysis(), &CancellationToken::new()).await;
            assert!(result.is_ok(), "{:?}", result);
        }

        #[tokio::test]
        async fn test_nonzero_exit_keeps_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let engine = FfmpegEngine::new(stand_in(&dir, "echo boom >&2\nexit 3"), None);

            let result = engine.run_pass(&analysis(), &CancellationToken::new()).await;
            match result {
                Err(EngineFailure::Exited { code, stderr }) => {
                    assert_eq!(code, 3);
                    assert_eq!(stderr, "boom");
                }
                other => panic!("expected exit failure, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_signal_is_terminated() {
            let dir = tempfile::tempdir().unwrap();
            let engine = FfmpegEngine::new(stand_in(&dir, "kill -9 $$"), None);

            let result = engine.run_pass(&analysis(), &CancellationToken::new()).await;
            assert!(
                matches!(result, Err(EngineFailure::Terminated { .. })),
                "{:?}",
                result
            );
        }

        #[tokio::test]
        async fn test_timeout_kills_encoder() {
            let dir = tempfile::tempdir().unwrap();
            let (binary, pid_file) = stalling(&dir);
            let limit = Duration::from_millis(300);
            let engine = FfmpegEngine::new(binary, Some(limit));

            let result = engine.run_pass(&analysis(), &CancellationToken::new()).await;
            assert!(
                matches!(result, Err(EngineFailure::TimedOut(d)) if d == limit),
                "{:?}",
                result
            );
            assert!(process_exited(&pid_file).await);
        }

        #[tokio::test]
        async fn test_cancel_kills_encoder() {
            let dir = tempfile::tempdir().unwrap();
            let (binary, pid_file) = stalling(&dir);
            let engine = FfmpegEngine::new(binary, None);
            let cancel = CancellationToken::new();

            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                trigger.cancel();
            });

            let started = std::time::Instant::now();
            let result = engine.run_pass(&analysis(), &cancel).await;
            assert!(matches!(result, Err(EngineFailure::Cancelled)), "{:?}", result);
            assert!(started.elapsed() < Duration::from_secs(10));
            assert!(process_exited(&pid_file).await);
        }
    }
}
