//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address to bind (default 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on (default 8000)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins allowed by CORS
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    /// Largest accepted request body in MiB
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "https://daftaros.com".to_string(),
    ]
}

fn default_max_upload_mb() -> u64 {
    512
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

/// Job lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
    /// Directory under which per-job workspaces are created
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Maximum encode sessions running at once (0 = auto-derive)
    #[serde(default)]
    pub max_concurrent_encodes: u32,
    /// Wall-clock limit for a single encoder pass, in seconds (0 = unlimited)
    #[serde(default = "default_pass_timeout_secs")]
    pub pass_timeout_secs: u64,
    /// Target size used when the request does not specify one
    #[serde(default = "default_target_size_mb")]
    pub default_target_size_mb: f64,
}

fn default_workspace_root() -> PathBuf {
    env::temp_dir().join("clipsqueeze")
}

fn default_pass_timeout_secs() -> u64 {
    1800
}

fn default_target_size_mb() -> f64 {
    8.0
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            max_concurrent_encodes: 0,
            pass_timeout_secs: default_pass_timeout_secs(),
            default_target_size_mb: default_target_size_mb(),
        }
    }
}

/// Encoder engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    /// Video encoder name (default libx264)
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    /// Encoder speed preset (default medium)
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate_kbps")]
    pub audio_bitrate_kbps: u32,
    #[serde(default = "default_audio_sample_rate")]
    pub audio_sample_rate: u32,
    #[serde(default = "default_audio_channels")]
    pub audio_channels: u32,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate_kbps() -> u32 {
    128
}

fn default_audio_sample_rate() -> u32 {
    48_000
}

fn default_audio_channels() -> u32 {
    2
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            video_codec: default_video_codec(),
            preset: default_preset(),
            audio_codec: default_audio_codec(),
            audio_bitrate_kbps: default_audio_bitrate_kbps(),
            audio_sample_rate: default_audio_sample_rate(),
            audio_channels: default_audio_channels(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - SERVER_HOST -> server.host
    /// - SERVER_PORT -> server.port
    /// - WORKSPACE_ROOT -> jobs.workspace_root
    /// - MAX_CONCURRENT_ENCODES -> jobs.max_concurrent_encodes
    /// - PASS_TIMEOUT_SECS -> jobs.pass_timeout_secs
    /// - FFMPEG_PATH -> encoder.ffmpeg_path
    /// - FFPROBE_PATH -> encoder.ffprobe_path
    /// - LOG_FORMAT -> logging.json ("json" enables, anything else disables)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("SERVER_HOST") {
            if !val.trim().is_empty() {
                self.server.host = val;
            }
        }

        if let Ok(val) = env::var("SERVER_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(val) = env::var("WORKSPACE_ROOT") {
            if !val.trim().is_empty() {
                self.jobs.workspace_root = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("MAX_CONCURRENT_ENCODES") {
            if let Ok(limit) = val.parse::<u32>() {
                self.jobs.max_concurrent_encodes = limit;
            }
        }

        if let Ok(val) = env::var("PASS_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.jobs.pass_timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("FFMPEG_PATH") {
            if !val.trim().is_empty() {
                self.encoder.ffmpeg_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("FFPROBE_PATH") {
            if !val.trim().is_empty() {
                self.encoder.ffprobe_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("LOG_FORMAT") {
            self.logging.json = val.eq_ignore_ascii_case("json");
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields defaults plus environment overrides
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = match Self::load_from_file(path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        Ok(config)
    }
}
