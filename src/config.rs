// Global configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// x264/x265 preset names accepted by `EncodeSettings::preset`
pub const PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
    "placebo",
];

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("input directory is not set")]
    MissingInputDir,

    #[error("output directory is not set")]
    MissingOutputDir,

    #[error("crf must be between 0 and 51 (got {0})")]
    CrfOutOfRange(u32),

    #[error("preset must be one of: {}", PRESETS.join(", "))]
    UnknownPreset(String),

    #[error("audio bitrate must be positive")]
    ZeroAudioBitrate,

    #[error("target fps must be positive")]
    ZeroTargetFps,

    #[error("workers must be >= 1")]
    NoWorkers,

    #[error("at least one input extension is required")]
    NoExtensions,
}

/// What to do when the destination of a job already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    #[default]
    Skip,
    Overwrite,
    Suffix,
}

impl fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CollisionPolicy::Skip => "skip",
            CollisionPolicy::Overwrite => "overwrite",
            CollisionPolicy::Suffix => "suffix",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    #[default]
    H265,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    #[default]
    Aac,
    Opus,
}

/// Hardware family used for accelerated encode/decode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuType {
    #[default]
    None,
    Nvidia,
    Amd,
    Intel,
    Macos,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub encode: EncodeSettings,

    #[serde(default)]
    pub logging: LogConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Root directory scanned for input files
    #[serde(default)]
    pub input_dir: PathBuf,

    /// Root directory outputs are written under, mirroring the input tree
    #[serde(default)]
    pub output_dir: PathBuf,

    /// Extensions to pick up (lowercase, with leading dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Run several encodes at once; when false exactly one worker runs
    #[serde(default = "default_true")]
    pub parallel: bool,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub collision_policy: CollisionPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeSettings {
    #[serde(default)]
    pub video_codec: VideoCodec,

    #[serde(default = "default_crf")]
    pub crf: u32,

    #[serde(default = "default_preset")]
    pub preset: String,

    #[serde(default)]
    pub audio_codec: AudioCodec,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate_kbps: u32,

    /// Output frame rate; None keeps the source rate
    #[serde(default)]
    pub target_fps: Option<u32>,

    #[serde(default)]
    pub gpu_type: GpuType,

    #[serde(default = "default_true")]
    pub use_gpu: bool,

    #[serde(default = "default_true")]
    pub use_hw_decode: bool,

    /// Pass the audio stream through untouched
    #[serde(default)]
    pub copy_audio: bool,

    /// Stream-copy everything (remux only)
    #[serde(default)]
    pub skip_reencode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_true")]
    pub enable_csv: bool,

    /// Defaults to a timestamped file in the output directory
    #[serde(default)]
    pub csv_path: Option<PathBuf>,

    #[serde(default)]
    pub enable_json: bool,

    #[serde(default)]
    pub json_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Explicit ffmpeg binary; falls back to PATH when unset or missing
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

pub fn default_extensions() -> Vec<String> {
    [
        ".mp4", ".mkv", ".mov", ".avi", ".webm", ".wmv", ".m4v", ".mpg", ".mpeg", ".flv", ".3gp",
        ".ogv",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    cpus.saturating_sub(1).clamp(1, 2)
}

fn default_crf() -> u32 {
    23
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_audio_bitrate() -> u32 {
    128
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            extensions: default_extensions(),
            parallel: true,
            workers: default_workers(),
            collision_policy: CollisionPolicy::Skip,
        }
    }
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            video_codec: VideoCodec::H265,
            crf: default_crf(),
            preset: default_preset(),
            audio_codec: AudioCodec::Aac,
            audio_bitrate_kbps: default_audio_bitrate(),
            target_fps: None,
            gpu_type: GpuType::None,
            use_gpu: true,
            use_hw_decode: true,
            copy_audio: false,
            skip_reencode: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enable_csv: true,
            csv_path: None,
            enable_json: false,
            json_path: None,
        }
    }
}

/// Lowercase, dot-prefix and dedupe a list of extensions, dropping blanks
pub fn normalize_extensions<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut result: Vec<String> = Vec::new();
    for value in values {
        let ext = value.as_ref().trim().to_lowercase();
        if ext.is_empty() || ext == "." {
            continue;
        }
        let ext = if ext.starts_with('.') {
            ext
        } else {
            format!(".{}", ext)
        };
        if !result.contains(&ext) {
            result.push(ext);
        }
    }
    result
}

impl BatchConfig {
    /// Number of worker threads a batch will run
    pub fn worker_count(&self) -> usize {
        if self.parallel { self.workers.max(1) } else { 1 }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("ffbatch");
        Ok(config_dir.join("config.toml"))
    }

    /// Load config from disk, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();

            // Try to save the default config, but don't fail if we can't
            if let Err(e) = config.save_to(&config_path) {
                tracing::warn!(
                    path = %config_path.display(),
                    error = %e,
                    "could not create default config file, using built-in defaults"
                );
            }

            Ok(config)
        }
    }

    /// Load config from an explicit TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.normalize();

        Ok(config)
    }

    /// Save config to disk at the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save config as TOML at `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Check if config file exists
    pub fn exists() -> bool {
        Self::config_path().map(|p| p.exists()).unwrap_or(false)
    }

    pub fn normalize(&mut self) {
        self.encode.preset = self.encode.preset.trim().to_lowercase();
        self.batch.extensions = normalize_extensions(&self.batch.extensions);
    }

    /// Normalize, then check every field a batch depends on
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.normalize();

        if self.batch.input_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingInputDir);
        }
        if self.batch.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingOutputDir);
        }
        if self.batch.extensions.is_empty() {
            return Err(ConfigError::NoExtensions);
        }
        if self.batch.workers < 1 {
            return Err(ConfigError::NoWorkers);
        }
        if self.encode.crf > 51 {
            return Err(ConfigError::CrfOutOfRange(self.encode.crf));
        }
        if !PRESETS.contains(&self.encode.preset.as_str()) {
            return Err(ConfigError::UnknownPreset(self.encode.preset.clone()));
        }
        if self.encode.audio_bitrate_kbps == 0 {
            return Err(ConfigError::ZeroAudioBitrate);
        }
        if self.encode.target_fps == Some(0) {
            return Err(ConfigError::ZeroTargetFps);
        }

        Ok(())
    }
}
