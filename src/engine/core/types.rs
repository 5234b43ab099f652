use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Stable per-batch job identifier, assigned at scan time starting at 1
pub type JobId = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Skipped,
    Canceled,
}

impl JobStatus {
    /// Terminal statuses never change again, except `Failed` under an explicit retry
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped | JobStatus::Canceled
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Canceled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Canceled)
                | (Failed, Queued)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the prober could learn about a media file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub fps: Option<f64>,
    pub rotation: Option<i32>,
}

impl MediaInfo {
    /// "1920x1080", or None when either dimension is unknown
    pub fn resolution(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(format!("{}x{}", w, h)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub input_path: PathBuf,
    pub output_path: PathBuf,

    /// Sibling file the encoder writes into while the job is running
    #[serde(default)]
    pub temp_path: Option<PathBuf>,

    pub status: JobStatus,

    /// 0-100, or None while the total duration is unknown
    pub progress: Option<u8>,

    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: String,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    pub input_bytes: Option<u64>,
    pub output_bytes: Option<u64>,

    #[serde(default)]
    pub media: Option<MediaInfo>,
    #[serde(default)]
    pub output_media: Option<MediaInfo>,
}

impl Job {
    /// Create a new queued job
    pub fn new(id: JobId, input_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            id,
            input_path,
            output_path,
            temp_path: None,
            status: JobStatus::Queued,
            progress: Some(0),
            message: String::new(),
            error: String::new(),
            started_at: None,
            finished_at: None,
            input_bytes: None,
            output_bytes: None,
            media: None,
            output_media: None,
        }
    }

    /// Create a job that is already settled at scan time
    pub fn skipped(id: JobId, input_path: PathBuf, output_path: PathBuf, message: &str) -> Self {
        let mut job = Self::new(id, input_path, output_path);
        job.status = JobStatus::Skipped;
        job.message = message.to_string();
        job
    }

    /// Raise progress, never lowering it. Returns true if the value changed.
    pub fn advance_progress(&mut self, pct: u8) -> bool {
        let pct = pct.min(100);
        match self.progress {
            Some(current) if current >= pct => false,
            _ => {
                self.progress = Some(pct);
                true
            }
        }
    }

    /// Wall-clock seconds between start and finish, if both are known
    pub fn processing_seconds(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds().max(0) as f64 / 1000.0)
            }
            _ => None,
        }
    }

    /// Reset a failed job so the queue can hand it out again
    pub(crate) fn requeue(&mut self) {
        self.status = JobStatus::Queued;
        self.progress = Some(0);
        self.error.clear();
        self.message.clear();
        self.temp_path = None;
        self.started_at = None;
        self.finished_at = None;
        self.output_bytes = None;
        self.output_media = None;
    }
}
