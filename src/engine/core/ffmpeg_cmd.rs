use super::types::Job;
use crate::config::{AudioCodec, EncodeSettings, GpuType, VideoCodec};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

/// Produces the encoder invocation for one job. Must not have side effects.
pub trait CommandBuilder: Send + Sync {
    /// `output` is where the encoder must write (the job's temp path)
    fn build(&self, job: &Job, output: &Path) -> Command;
}

/// Builds ffmpeg command lines from `EncodeSettings`
#[derive(Debug, Clone)]
pub struct FfmpegCommandBuilder {
    ffmpeg: PathBuf,
    settings: EncodeSettings,
    overwrite: bool,
}

impl FfmpegCommandBuilder {
    pub fn new(ffmpeg: PathBuf, settings: EncodeSettings, overwrite: bool) -> Self {
        Self {
            ffmpeg,
            settings,
            overwrite,
        }
    }
}

impl CommandBuilder for FfmpegCommandBuilder {
    fn build(&self, job: &Job, output: &Path) -> Command {
        build_ffmpeg_command(
            &self.ffmpeg,
            &job.input_path,
            output,
            &self.settings,
            self.overwrite,
        )
    }
}

/// Check if FFmpeg was cancelled by user signal (SIGTERM, SIGINT, SIGQUIT)
///
/// FFmpeg catches signals and exits gracefully, printing "Exiting normally, received signal X"
/// So we check both the process signal status AND the stderr for this message.
#[cfg(unix)]
pub fn was_user_cancelled(status: &ExitStatus, stderr: &str) -> bool {
    use std::os::unix::process::ExitStatusExt;

    // Check if process was killed by signal (rare - FFmpeg usually catches signals).
    // SIGKILL is not a user cancel: our own escalation is tracked on the handle.
    if let Some(signal) = status.signal() {
        if matches!(signal, 2 | 3 | 15) {
            return true;
        }
    }

    stderr.contains("received signal 2")
        || stderr.contains("received signal 3")
        || stderr.contains("received signal 15")
}

#[cfg(not(unix))]
pub fn was_user_cancelled(_status: &ExitStatus, stderr: &str) -> bool {
    // On non-Unix, just check the stderr message
    stderr.contains("received signal")
}

/// Encoder and matching `-hwaccel` for the configured codec/GPU
fn video_encoder(settings: &EncodeSettings) -> (&'static str, Option<&'static str>) {
    let gpu = if settings.use_gpu {
        settings.gpu_type
    } else {
        GpuType::None
    };
    match (gpu, settings.video_codec) {
        (GpuType::None, VideoCodec::H264) => ("libx264", None),
        (GpuType::None, VideoCodec::H265) => ("libx265", None),
        (GpuType::Nvidia, VideoCodec::H264) => ("h264_nvenc", Some("cuda")),
        (GpuType::Nvidia, VideoCodec::H265) => ("hevc_nvenc", Some("cuda")),
        (GpuType::Amd, VideoCodec::H264) => ("h264_amf", Some("d3d11va")),
        (GpuType::Amd, VideoCodec::H265) => ("hevc_amf", Some("d3d11va")),
        (GpuType::Intel, VideoCodec::H264) => ("h264_qsv", Some("qsv")),
        (GpuType::Intel, VideoCodec::H265) => ("hevc_qsv", Some("qsv")),
        (GpuType::Macos, VideoCodec::H264) => ("h264_videotoolbox", Some("videotoolbox")),
        (GpuType::Macos, VideoCodec::H265) => ("hevc_videotoolbox", Some("videotoolbox")),
    }
}

fn audio_encoder(codec: AudioCodec) -> &'static str {
    match codec {
        AudioCodec::Aac => "aac",
        AudioCodec::Opus => "libopus",
    }
}

fn apply_progress_args(cmd: &mut Command) {
    // Machine-readable key=value progress on stdout, errors only on stderr
    cmd.args(["-progress", "pipe:1", "-loglevel", "error"]);
}

/// Build the full ffmpeg invocation for `input` → `output`
pub fn build_ffmpeg_command(
    ffmpeg: &Path,
    input: &Path,
    output: &Path,
    settings: &EncodeSettings,
    overwrite: bool,
) -> Command {
    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-hide_banner", "-nostats"]);
    cmd.arg(if overwrite { "-y" } else { "-n" });

    if settings.skip_reencode {
        cmd.arg("-i").arg(input);
        cmd.args(["-c", "copy", "-map_metadata", "0"]);
        apply_progress_args(&mut cmd);
        cmd.arg(output);
        return cmd;
    }

    let (vcodec, hwaccel) = video_encoder(settings);
    if let Some(hwaccel) = hwaccel {
        if settings.use_hw_decode {
            cmd.args(["-hwaccel", hwaccel]);
        }
    }

    cmd.arg("-i").arg(input);
    cmd.args([
        "-map_metadata",
        "0",
        "-map",
        "0:v:0?",
        "-map",
        "0:a:0?",
        "-c:v",
        vcodec,
    ]);
    cmd.arg("-preset").arg(&settings.preset);
    cmd.arg("-crf").arg(settings.crf.to_string());

    if !settings.copy_audio {
        cmd.arg("-b:a")
            .arg(format!("{}k", settings.audio_bitrate_kbps));
    }

    if let Some(fps) = settings.target_fps {
        cmd.arg("-r").arg(fps.to_string());
    }

    if settings.copy_audio {
        cmd.args(["-c:a", "copy"]);
    } else {
        cmd.arg("-c:a").arg(audio_encoder(settings.audio_codec));
        // Opus in MP4/MOV is still flagged experimental
        if settings.audio_codec == AudioCodec::Opus {
            cmd.args(["-strict", "experimental"]);
        }
    }

    // The temp path keeps the final extension, so check the real container here
    let container = output
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if container == "mp4" || container == "mov" {
        cmd.args(["-movflags", "+faststart"]);
    }

    apply_progress_args(&mut cmd);
    cmd.arg(output);
    cmd
}

/// Render a command the way a user would type it (for dry runs and debug logs)
pub fn format_command(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|arg| {
            let s = arg.to_string_lossy();
            if s.contains(' ') {
                format!("\"{}\"", s)
            } else {
                s.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
