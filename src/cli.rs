use clap::{Args, Parser, Subcommand, ValueEnum};
use ffbatch::config::{AudioCodec, CollisionPolicy, Config, GpuType, VideoCodec};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ffbatch")]
#[command(about = "Batch video transcoder driven by ffmpeg", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan the input directory and transcode every pending file
    Run(BatchArgs),

    /// Scan and list jobs without encoding
    Scan(BatchArgs),

    /// Show ffmpeg commands without executing
    DryRun(BatchArgs),

    /// Probe a media file and print what ffprobe reports
    Probe {
        /// Path to the media file
        file: PathBuf,
    },

    /// Check if ffmpeg and ffprobe are installed
    CheckFfmpeg,

    /// Show config status and location, or create default config if missing
    InitConfig,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum CodecArg {
    H264,
    H265,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum AudioArg {
    Aac,
    Opus,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum CollisionArg {
    Skip,
    Overwrite,
    Suffix,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum GpuArg {
    None,
    Nvidia,
    Amd,
    Intel,
    Macos,
}

/// Options shared by every batch subcommand. Anything set here overrides
/// the config file.
#[derive(Args, Debug, Default)]
pub struct BatchArgs {
    /// Input directory (scanned recursively)
    #[arg(short, long, value_name = "DIR")]
    pub input: Option<PathBuf>,

    /// Output directory (mirrors the input tree)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the effective settings back to the config file
    #[arg(long)]
    pub save_config: bool,

    #[arg(long, value_enum)]
    pub codec: Option<CodecArg>,

    /// Constant rate factor (0-51)
    #[arg(long)]
    pub crf: Option<u32>,

    #[arg(long)]
    pub preset: Option<String>,

    #[arg(long, value_enum)]
    pub audio: Option<AudioArg>,

    /// Audio bitrate in kbps
    #[arg(long)]
    pub audio_bitrate: Option<u32>,

    /// Target frame rate (source rate when unset)
    #[arg(long)]
    pub fps: Option<u32>,

    /// Extensions to pick up, comma separated (e.g. mp4,mkv)
    #[arg(long, value_delimiter = ',')]
    pub extensions: Option<Vec<String>>,

    #[arg(long, conflicts_with = "no_parallel")]
    pub parallel: bool,

    /// Encode one file at a time
    #[arg(long, conflicts_with = "parallel")]
    pub no_parallel: bool,

    /// Number of concurrent encodes when parallel
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// What to do when the output file already exists
    #[arg(long, value_enum)]
    pub collision: Option<CollisionArg>,

    #[arg(long, value_name = "FILE")]
    pub csv_log: Option<PathBuf>,

    #[arg(long)]
    pub no_csv: bool,

    /// Also write a JSON Lines log (plus a summary file)
    #[arg(long)]
    pub json_log: bool,

    #[arg(long, value_name = "FILE")]
    pub json_log_path: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub gpu: Option<GpuArg>,

    /// Skip hardware-accelerated decoding even when a GPU encoder is used
    #[arg(long)]
    pub no_hw_decode: bool,

    #[arg(long)]
    pub copy_audio: bool,

    /// Stream-copy instead of re-encoding
    #[arg(long)]
    pub skip_reencode: bool,
}

impl BatchArgs {
    /// Apply the flags that were given on top of `config`
    pub fn apply(&self, config: &mut Config) {
        let batch = &mut config.batch;
        if let Some(input) = &self.input {
            batch.input_dir = input.clone();
        }
        if let Some(output) = &self.output {
            batch.output_dir = output.clone();
        }
        if let Some(extensions) = &self.extensions {
            batch.extensions = extensions.clone();
        }
        if self.parallel {
            batch.parallel = true;
        }
        if self.no_parallel {
            batch.parallel = false;
        }
        if let Some(workers) = self.workers {
            batch.workers = workers;
        }
        if let Some(collision) = self.collision {
            batch.collision_policy = match collision {
                CollisionArg::Skip => CollisionPolicy::Skip,
                CollisionArg::Overwrite => CollisionPolicy::Overwrite,
                CollisionArg::Suffix => CollisionPolicy::Suffix,
            };
        }

        let encode = &mut config.encode;
        if let Some(codec) = self.codec {
            encode.video_codec = match codec {
                CodecArg::H264 => VideoCodec::H264,
                CodecArg::H265 => VideoCodec::H265,
            };
        }
        if let Some(crf) = self.crf {
            encode.crf = crf;
        }
        if let Some(preset) = &self.preset {
            encode.preset = preset.clone();
        }
        if let Some(audio) = self.audio {
            encode.audio_codec = match audio {
                AudioArg::Aac => AudioCodec::Aac,
                AudioArg::Opus => AudioCodec::Opus,
            };
        }
        if let Some(bitrate) = self.audio_bitrate {
            encode.audio_bitrate_kbps = bitrate;
        }
        if let Some(fps) = self.fps {
            encode.target_fps = Some(fps);
        }
        if let Some(gpu) = self.gpu {
            encode.gpu_type = match gpu {
                GpuArg::None => GpuType::None,
                GpuArg::Nvidia => GpuType::Nvidia,
                GpuArg::Amd => GpuType::Amd,
                GpuArg::Intel => GpuType::Intel,
                GpuArg::Macos => GpuType::Macos,
            };
            encode.use_gpu = gpu != GpuArg::None;
        }
        if self.no_hw_decode {
            encode.use_hw_decode = false;
        }
        if self.copy_audio {
            encode.copy_audio = true;
        }
        if self.skip_reencode {
            encode.skip_reencode = true;
        }

        let logging = &mut config.logging;
        if self.no_csv {
            logging.enable_csv = false;
        }
        if let Some(path) = &self.csv_log {
            logging.enable_csv = true;
            logging.csv_path = Some(path.clone());
        }
        if self.json_log {
            logging.enable_json = true;
        }
        if let Some(path) = &self.json_log_path {
            logging.enable_json = true;
            logging.json_path = Some(path.clone());
        }

        config.normalize();
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}
