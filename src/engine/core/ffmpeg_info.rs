use crate::config::ToolsConfig;
use crate::engine::error::EngineError;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Checked once when a batch starts; a failure aborts the batch
pub trait Toolchain: Send + Sync {
    fn resolve(&self) -> Result<(), EngineError>;
}

/// Locates ffmpeg and ffprobe from configured paths or `PATH`
#[derive(Debug, Clone, Default)]
pub struct FfmpegToolchain {
    tools: ToolsConfig,
}

impl FfmpegToolchain {
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }

    pub fn ffmpeg_path(&self) -> Result<PathBuf, EngineError> {
        resolve_tool("ffmpeg", self.tools.ffmpeg_path.as_deref())
    }

    pub fn ffprobe_path(&self) -> Result<PathBuf, EngineError> {
        resolve_tool("ffprobe", self.tools.ffprobe_path.as_deref())
    }
}

impl Toolchain for FfmpegToolchain {
    fn resolve(&self) -> Result<(), EngineError> {
        let ffmpeg = self.ffmpeg_path()?;
        let ffprobe = self.ffprobe_path()?;
        tracing::debug!(
            ffmpeg = %ffmpeg.display(),
            ffprobe = %ffprobe.display(),
            "toolchain resolved"
        );
        Ok(())
    }
}

/// A configured path wins when it exists; otherwise search `PATH`
pub fn resolve_tool(name: &str, custom: Option<&Path>) -> Result<PathBuf, EngineError> {
    if let Some(path) = custom {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!(
            tool = name,
            path = %path.display(),
            "configured path does not exist, falling back to PATH"
        );
    }
    which::which(name)
        .map_err(|e| EngineError::ToolchainUnavailable(format!("{} not found in PATH ({})", name, e)))
}

fn first_version_line(program: &Path) -> Result<String> {
    let output = Command::new(program)
        .arg("-version")
        .output()
        .with_context(|| format!("Failed to execute {}", program.display()))?;

    if !output.status.success() {
        anyhow::bail!(
            "{} -version failed with status: {}",
            program.display(),
            output.status
        );
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let first_line = version_output.lines().next().unwrap_or("Unknown version");

    Ok(first_line.to_string())
}

/// Check if ffmpeg is available and return its version
pub fn ffmpeg_version(toolchain: &FfmpegToolchain) -> Result<String> {
    let path = toolchain.ffmpeg_path()?;
    first_version_line(&path)
}

/// Check if ffprobe is available and return its version
pub fn ffprobe_version(toolchain: &FfmpegToolchain) -> Result<String> {
    let path = toolchain.ffprobe_path()?;
    first_version_line(&path)
}
