use super::core::JobId;
use crate::config::ConfigError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Diagnostic fragments that mean the input itself is broken
const CORRUPTION_SIGNATURES: &[&str] = &[
    "moov atom not found",
    "invalid data found when processing input",
];

const CORRUPTED_PREFIX: &str = "File is corrupted or incomplete: ";

/// True when ffmpeg/ffprobe diagnostics point at a truncated or damaged input
pub fn is_corruption(diagnostics: &str) -> bool {
    let lower = diagnostics.to_lowercase();
    CORRUPTION_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Prefix a corruption classification when the text matches a known signature
pub fn classify_diagnostics(diagnostics: &str) -> String {
    if is_corruption(diagnostics) {
        format!("{}{}", CORRUPTED_PREFIX, diagnostics)
    } else {
        diagnostics.to_string()
    }
}

/// Errors that stop a whole batch before any job runs
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("encoder toolchain unavailable: {0}")]
    ToolchainUnavailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("job id {0} appears more than once in the batch")]
    DuplicateJobId(JobId),

    #[error("failed to scan {}: {source}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to open item log: {0:#}")]
    ItemLog(anyhow::Error),
}

/// Why media inspection failed
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run ffprobe: {0}")]
    Launch(#[source] io::Error),

    #[error("{0}")]
    Failed(String),

    #[error("failed to parse ffprobe output: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ProbeError {
    /// Whether the probe diagnostics match a known corruption signature
    pub fn is_corrupted(&self) -> bool {
        match self {
            ProbeError::Failed(text) => is_corruption(text),
            _ => false,
        }
    }
}

/// Per-job failures. Rendered into `Job::error`, never propagated across jobs.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{}", probe_message(.0))]
    Probe(ProbeError),

    #[error("{}", classify_diagnostics(.0))]
    Encode(String),

    #[error("Failed to finalize output: {0}")]
    Finalize(#[source] io::Error),

    #[error("failed to create output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn probe_message(err: &ProbeError) -> String {
    if err.is_corrupted() {
        format!("{}{}", CORRUPTED_PREFIX, err)
    } else {
        err.to_string()
    }
}
