//! Startup checks module for clipsqueeze
//!
//! Provides preflight checks to verify system requirements before serving:
//! - ffmpeg and ffprobe are runnable and report a parsable version
//! - the configured video encoder is compiled into ffmpeg

use crate::config::Config;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{tool} not available: {detail}")]
    ToolUnavailable { tool: String, detail: String },

    #[error("Could not parse {tool} version from output: {first_line}")]
    UnparsableVersion { tool: String, first_line: String },

    #[error("Encoder '{0}' is not available in this ffmpeg build")]
    EncoderMissing(String),
}

/// Parse a tool's version banner and extract the major version number
///
/// Handles the formats ffmpeg and ffprobe print:
/// - Standard: "ffmpeg version 6.1.1 ..."
/// - N-prefixed git builds: "ffprobe version n7.0-... ..."
pub fn parse_tool_version(version_output: &str, tool: &str) -> Option<u32> {
    let marker = format!("{} version", tool.to_lowercase());
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains(&marker))?;

    let lower = version_line.to_lowercase();
    let version_part = lower.split(&marker).nth(1)?.split_whitespace().next()?;

    let version_str = version_part.trim_start_matches('n');
    let major_str = version_str.split(['.', '-']).next()?;

    major_str.parse().ok()
}

/// [`parse_tool_version`] for ffmpeg's banner
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    parse_tool_version(version_output, "ffmpeg")
}

/// Run `<binary> -version` and return the major version
pub fn check_tool_version(binary: &Path, tool: &str) -> Result<u32, StartupError> {
    let output = Command::new(binary)
        .arg("-version")
        .output()
        .map_err(|e| StartupError::ToolUnavailable {
            tool: tool.to_string(),
            detail: format!(
                "failed to run {} -version; is it installed and in PATH? Error: {}",
                binary.display(),
                e
            ),
        })?;

    if !output.status.success() {
        return Err(StartupError::ToolUnavailable {
            tool: tool.to_string(),
            detail: format!("{} -version exited with {}", binary.display(), output.status),
        });
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let major = parse_tool_version(&version_output, tool).ok_or_else(|| {
        StartupError::UnparsableVersion {
            tool: tool.to_string(),
            first_line: version_output.lines().next().unwrap_or("(empty)").to_string(),
        }
    })?;

    tracing::info!(tool, major_version = major, "Found {}", tool);
    Ok(major)
}

/// Whether `ffmpeg -encoders` output lists `codec`
///
/// Encoder lines follow a `------` separator that ends the flag legend and
/// look like ` V....D libx264   libx264 H.264 / AVC ...`.
pub fn encoder_listed(encoders_output: &str, codec: &str) -> bool {
    encoders_output
        .lines()
        .skip_while(|line| line.trim() != "------")
        .skip(1)
        .any(|line| {
            let mut fields = line.split_whitespace();
            matches!(
                (fields.next(), fields.next()),
                (Some(flags), Some(name)) if flags.len() == 6 && name == codec
            )
        })
}

/// Verify the configured encoder is compiled into ffmpeg
pub fn check_encoder_available(ffmpeg: &Path, codec: &str) -> Result<(), StartupError> {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .output()
        .map_err(|e| StartupError::ToolUnavailable {
            tool: "ffmpeg".to_string(),
            detail: e.to_string(),
        })?;

    if !encoder_listed(&String::from_utf8_lossy(&output.stdout), codec) {
        return Err(StartupError::EncoderMissing(codec.to_string()));
    }
    Ok(())
}

/// Run all startup checks in order
///
/// 1. ffmpeg version
/// 2. ffprobe version
/// 3. configured video encoder present
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    check_tool_version(&cfg.encoder.ffmpeg_path, "ffmpeg")?;
    check_tool_version(&cfg.encoder.ffprobe_path, "ffprobe")?;
    check_encoder_available(&cfg.encoder.ffmpeg_path, &cfg.encoder.video_codec)?;
    Ok(())
}
