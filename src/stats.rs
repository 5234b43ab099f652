// Batch-level totals

use crate::engine::core::{Job, JobStatus};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Counts and byte totals over a set of jobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub canceled: usize,

    /// Input bytes of completed jobs
    pub input_bytes: u64,
    /// Output bytes of completed jobs
    pub output_bytes: u64,
    pub saved_bytes: u64,
    pub compression_ratio_percent: f64,

    /// Sum of per-job processing time
    pub processing_seconds: f64,
}

impl BatchSummary {
    pub fn from_jobs<'a, I>(jobs: I) -> Self
    where
        I: IntoIterator<Item = &'a Job>,
    {
        let mut summary = Self::default();
        for job in jobs {
            summary.total += 1;
            match job.status {
                JobStatus::Queued => summary.queued += 1,
                JobStatus::Running => summary.running += 1,
                JobStatus::Completed => summary.completed += 1,
                JobStatus::Failed => summary.failed += 1,
                JobStatus::Skipped => summary.skipped += 1,
                JobStatus::Canceled => summary.canceled += 1,
            }
            if job.status == JobStatus::Completed {
                summary.input_bytes += job.input_bytes.unwrap_or(0);
                summary.output_bytes += job.output_bytes.unwrap_or(0);
            }
            summary.processing_seconds += job.processing_seconds().unwrap_or(0.0);
        }

        summary.saved_bytes = summary.input_bytes.saturating_sub(summary.output_bytes);
        summary.compression_ratio_percent = if summary.input_bytes > 0 {
            summary.saved_bytes as f64 / summary.input_bytes as f64 * 100.0
        } else {
            0.0
        };
        summary
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Where the summary of a JSON item log is written
pub fn summary_path_for(json_log: &Path) -> PathBuf {
    let mut name = json_log
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".summary.json");
    json_log.with_file_name(name)
}

/// Pretty-printed JSON, like the config file
pub fn write_summary_file(summary: &BatchSummary, path: &Path) -> Result<()> {
    let contents = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
    fs::write(path, contents)
        .with_context(|| format!("Failed to write summary: {}", path.display()))?;
    Ok(())
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
