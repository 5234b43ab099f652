mod ffmpeg_cmd;
mod ffmpeg_info;
mod finalize;
mod log;
mod progress;
mod scan;
mod types;

pub use ffmpeg_cmd::{
    CommandBuilder, FfmpegCommandBuilder, build_ffmpeg_command, format_command, was_user_cancelled,
};
pub use ffmpeg_info::{FfmpegToolchain, Toolchain, ffmpeg_version, ffprobe_version, resolve_tool};
pub use finalize::{discard, publish, temp_output_path};
pub use log::{BatchLogger, ItemLog, ItemRecord};
pub use progress::{
    ProgressEvent, ProgressExtractor, ProgressParser, progress_from_out_time,
};
pub use scan::{
    build_job_from_path, build_job_queue, derive_output_path, is_media_file, scan, scan_batch,
    scan_streaming, suffix_path,
};
pub use types::{Job, JobId, JobStatus, MediaInfo};
