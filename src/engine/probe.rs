// Input probing using ffprobe

use super::core::MediaInfo;
use super::error::ProbeError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Reads duration and stream details of a media file
pub trait MediaProber: Send + Sync {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError>;
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

/// `MediaProber` backed by the ffprobe binary
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe: PathBuf) -> Self {
        Self { ffprobe }
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new(PathBuf::from("ffprobe"))
    }
}

impl MediaProber for FfprobeProber {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration:stream=index,codec_type,codec_name,width,height,avg_frame_rate,r_frame_rate:stream_tags=rotate",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .map_err(ProbeError::Launch)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ProbeError::Failed(if stderr.is_empty() {
                "ffprobe failed".to_string()
            } else {
                stderr
            }));
        }

        parse_ffprobe_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse the JSON ffprobe prints into a `MediaInfo`
pub fn parse_ffprobe_output(json: &str) -> Result<MediaInfo, ProbeError> {
    let probe: FfprobeOutput = serde_json::from_str(json)?;
    let mut info = MediaInfo {
        duration: probe
            .format
            .duration
            .as_deref()
            .and_then(|d| d.trim().parse::<f64>().ok()),
        ..MediaInfo::default()
    };

    for stream in &probe.streams {
        match stream.codec_type.as_deref() {
            Some("video") if info.video_codec.is_none() => {
                info.video_codec = stream.codec_name.clone();
                info.width = stream.width;
                info.height = stream.height;
                info.fps = stream
                    .avg_frame_rate
                    .as_deref()
                    .and_then(parse_fraction)
                    .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_fraction));
                info.rotation = stream
                    .tags
                    .rotate
                    .as_deref()
                    .and_then(|r| r.trim().parse::<i32>().ok());
            }
            Some("audio") if info.audio_codec.is_none() => {
                info.audio_codec = stream.codec_name.clone();
            }
            _ => {}
        }
    }

    Ok(info)
}

/// Parse a fraction string like "30000/1001" (or a plain number) to f64
fn parse_fraction(s: &str) -> Option<f64> {
    match s.split_once('/') {
        Some((num, den)) => {
            let numerator: f64 = num.parse().ok()?;
            let denominator: f64 = den.parse().ok()?;
            if denominator == 0.0 {
                return None;
            }
            Some(numerator / denominator)
        }
        None => s.parse().ok(),
    }
}
