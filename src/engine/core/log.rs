// Per-item batch records (CSV and JSON Lines)

use super::types::{Job, MediaInfo};
use crate::config::LogConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Sink for one record per settled job plus a single close at batch end.
/// Called from worker threads.
pub trait ItemLog: Send + Sync {
    fn record(&self, record: &ItemRecord) -> Result<()>;
    fn close(&self) -> Result<()>;
}

/// Flattened view of a settled job
#[derive(Debug, Clone, Serialize)]
pub struct ItemRecord {
    pub timestamp: DateTime<Utc>,
    pub job_id: u64,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub status: String,
    pub error_message: String,
    pub input_bytes: Option<u64>,
    pub output_bytes: Option<u64>,
    pub processing_seconds: Option<f64>,
    pub media: Option<MediaInfo>,
    pub output_media: Option<MediaInfo>,
}

impl ItemRecord {
    pub fn from_job(job: &Job) -> Self {
        Self {
            timestamp: Utc::now(),
            job_id: job.id,
            input_path: job.input_path.clone(),
            output_path: job.output_path.clone(),
            status: job.status.to_string(),
            error_message: job.error.clone(),
            input_bytes: job.input_bytes,
            output_bytes: job.output_bytes,
            processing_seconds: job.processing_seconds(),
            media: job.media.clone(),
            output_media: job.output_media.clone(),
        }
    }
}

const CSV_HEADER: &[&str] = &[
    "Timestamp",
    "Input Path",
    "Output Path",
    "Original Size (MB)",
    "Output Size (MB)",
    "Size Saved (MB)",
    "Compression Ratio (%)",
    "Duration (s)",
    "Original Resolution",
    "Output Resolution",
    "Original Video Codec",
    "Output Video Codec",
    "Original Audio Codec",
    "Output Audio Codec",
    "Frame Rate (fps)",
    "Processing Time (s)",
    "Status",
    "Error Message",
];

struct LogFiles {
    csv: Option<csv::Writer<File>>,
    json: Option<BufWriter<File>>,
}

/// Writes CSV and/or JSON Lines records next to the batch output
pub struct BatchLogger {
    csv_path: Option<PathBuf>,
    json_path: Option<PathBuf>,
    files: Mutex<LogFiles>,
}

impl BatchLogger {
    /// Open the enabled log files; unset paths get a timestamped name in `output_dir`
    pub fn open(config: &LogConfig, output_dir: &Path) -> Result<Self> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let base = if output_dir.as_os_str().is_empty() {
            std::env::current_dir()?
        } else {
            output_dir.to_path_buf()
        };

        let csv_path = config.enable_csv.then(|| {
            config
                .csv_path
                .clone()
                .unwrap_or_else(|| base.join(format!("video_processing_log_{}.csv", stamp)))
        });
        let json_path = config.enable_json.then(|| {
            config
                .json_path
                .clone()
                .unwrap_or_else(|| base.join(format!("video_processing_log_{}.jsonl", stamp)))
        });

        let csv = match &csv_path {
            Some(path) => {
                let mut writer = csv::Writer::from_writer(create_file(path)?);
                writer
                    .write_record(CSV_HEADER)
                    .context("Failed to write CSV header")?;
                writer.flush()?;
                Some(writer)
            }
            None => None,
        };
        let json = match &json_path {
            Some(path) => Some(BufWriter::new(create_file(path)?)),
            None => None,
        };

        Ok(Self {
            csv_path,
            json_path,
            files: Mutex::new(LogFiles { csv, json }),
        })
    }

    pub fn csv_path(&self) -> Option<&Path> {
        self.csv_path.as_deref()
    }

    pub fn json_path(&self) -> Option<&Path> {
        self.json_path.as_deref()
    }
}

fn create_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }
    }
    File::create(path).with_context(|| format!("Failed to create log file: {}", path.display()))
}

fn megabytes(bytes: Option<u64>) -> f64 {
    bytes.unwrap_or(0) as f64 / (1024.0 * 1024.0)
}

fn opt_fmt<T>(value: Option<T>, f: impl Fn(T) -> String) -> String {
    value.map(f).unwrap_or_default()
}

fn csv_row(record: &ItemRecord) -> Vec<String> {
    let input_mb = megabytes(record.input_bytes);
    let output_mb = megabytes(record.output_bytes);
    let saved_mb = (input_mb - output_mb).max(0.0);
    let ratio = if input_mb > 0.0 {
        saved_mb / input_mb * 100.0
    } else {
        0.0
    };
    let media = record.media.as_ref();
    let out_media = record.output_media.as_ref();

    vec![
        record.timestamp.to_rfc3339(),
        record.input_path.display().to_string(),
        record.output_path.display().to_string(),
        format!("{:.3}", input_mb),
        format!("{:.3}", output_mb),
        format!("{:.3}", saved_mb),
        format!("{:.2}", ratio),
        opt_fmt(media.and_then(|m| m.duration), |d| format!("{:.2}", d)),
        media.and_then(MediaInfo::resolution).unwrap_or_default(),
        out_media.and_then(MediaInfo::resolution).unwrap_or_default(),
        media.and_then(|m| m.video_codec.clone()).unwrap_or_default(),
        out_media.and_then(|m| m.video_codec.clone()).unwrap_or_default(),
        media.and_then(|m| m.audio_codec.clone()).unwrap_or_default(),
        out_media.and_then(|m| m.audio_codec.clone()).unwrap_or_default(),
        opt_fmt(media.and_then(|m| m.fps), |f| format!("{:.2}", f)),
        opt_fmt(record.processing_seconds, |s| format!("{:.2}", s)),
        record.status.clone(),
        record.error_message.clone(),
    ]
}

impl ItemLog for BatchLogger {
    fn record(&self, record: &ItemRecord) -> Result<()> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| anyhow::anyhow!("item log lock poisoned"))?;

        if let Some(writer) = files.csv.as_mut() {
            writer
                .write_record(csv_row(record))
                .context("Failed to write CSV record")?;
            writer.flush()?;
        }
        if let Some(writer) = files.json.as_mut() {
            serde_json::to_writer(&mut *writer, record).context("Failed to write JSON record")?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| anyhow::anyhow!("item log lock poisoned"))?;

        if let Some(mut writer) = files.csv.take() {
            writer.flush()?;
        }
        if let Some(mut writer) = files.json.take() {
            writer.flush()?;
        }
        Ok(())
    }
}
