use crate::cli::{BatchArgs, Cli, Commands};
use ffbatch::config::Config;
use ffbatch::engine::{
    self, BatchEngine, BatchEvent, ChannelObserver, CommandBuilder, FfmpegCommandBuilder,
    FfmpegToolchain, FfprobeProber, Job, JobStatus, MediaProber,
};
use ffbatch::stats::{BatchSummary, format_bytes};
use std::collections::HashMap;
use std::process;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread;

pub fn run(cli: Cli) {
    match cli.command {
        Commands::Run(args) => handle_run(args),
        Commands::Scan(args) => handle_scan(args),
        Commands::DryRun(args) => handle_dry_run(args),
        Commands::Probe { file } => handle_probe(file),
        Commands::CheckFfmpeg => handle_check_ffmpeg(),
        Commands::InitConfig => handle_init_config(),
    }
}

/// Config file (explicit or default) with the command-line overrides applied
fn load_config(args: &BatchArgs) -> Config {
    let loaded = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            process::exit(1);
        }
    };
    args.apply(&mut config);

    if args.save_config {
        let saved = match &args.config {
            Some(path) => config.save_to(path),
            None => config.save(),
        };
        match saved {
            Ok(()) => println!("Settings saved to config"),
            Err(e) => eprintln!("Failed to save config: {:#}", e),
        }
    }
    config
}

fn scan_or_exit(engine: &BatchEngine) -> Vec<Job> {
    match engine.scan() {
        Ok(jobs) => jobs,
        Err(e) => {
            eprintln!("Error scanning directory: {:#}", e);
            process::exit(1);
        }
    }
}

fn handle_run(args: BatchArgs) {
    let config = load_config(&args);
    let (observer, events) = ChannelObserver::new();
    let engine = BatchEngine::new(config).with_observer(Arc::new(observer));

    let jobs = scan_or_exit(&engine);
    if jobs.is_empty() {
        println!(
            "No media files found in {}",
            engine.config().batch.input_dir.display()
        );
        return;
    }
    let pending = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Queued)
        .count();
    println!(
        "Found {} files ({} to encode, {} skipped)",
        jobs.len(),
        pending,
        jobs.len() - pending
    );

    let session = match engine.start(jobs) {
        Ok(session) => Arc::new(session),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    };

    {
        let session = Arc::clone(&session);
        let handler = ctrlc::set_handler(move || {
            eprintln!("\nCanceling... (waiting for running encodes to stop)");
            let session = Arc::clone(&session);
            // The handler thread must not block on process shutdown
            thread::spawn(move || session.cancel());
        });
        if let Err(e) = handler {
            tracing::warn!("failed to install Ctrl-C handler: {}", e);
        }
    }

    let reporter = thread::spawn(move || report_progress(events));
    let summary = session.wait();
    if reporter.join().is_err() {
        tracing::warn!("progress reporter panicked");
    }

    print_summary(&summary);
    if summary.has_failures() {
        process::exit(1);
    }
}

/// Console output for each event until the batch completes
fn report_progress(events: Receiver<BatchEvent>) {
    let mut last: HashMap<u64, (JobStatus, Option<u8>)> = HashMap::new();

    for event in events {
        match event {
            BatchEvent::ItemUpdated(job) => {
                let name = job
                    .input_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| job.input_path.display().to_string());
                let previous = last.insert(job.id, (job.status, job.progress));

                let status_changed = previous.map(|(s, _)| s) != Some(job.status);
                if status_changed {
                    match job.status {
                        JobStatus::Running => println!("[{}] started   {}", job.id, name),
                        JobStatus::Completed => println!(
                            "[{}] done      {} ({})",
                            job.id,
                            name,
                            format_bytes(job.output_bytes.unwrap_or(0))
                        ),
                        JobStatus::Failed => {
                            println!("[{}] failed    {}: {}", job.id, name, job.error)
                        }
                        JobStatus::Skipped => {
                            println!("[{}] skipped   {} ({})", job.id, name, job.message)
                        }
                        JobStatus::Canceled => println!("[{}] canceled  {}", job.id, name),
                        JobStatus::Queued => println!("[{}] queued    {}", job.id, name),
                    }
                    continue;
                }

                // Progress in 5% steps
                let before = previous.and_then(|(_, p)| p).unwrap_or(0) / 5;
                if let Some(pct) = job.progress {
                    if job.status == JobStatus::Running && pct / 5 > before {
                        println!("[{}] {:>3}%      {}", job.id, pct, name);
                    }
                }
            }
            BatchEvent::BatchComplete(_) => break,
        }
    }
}

fn print_summary(summary: &BatchSummary) {
    println!();
    println!("=== Batch Summary ===");
    println!("Total:     {}", summary.total);
    println!("Completed: {}", summary.completed);
    println!("Failed:    {}", summary.failed);
    println!("Skipped:   {}", summary.skipped);
    println!("Canceled:  {}", summary.canceled);
    if summary.completed > 0 {
        println!(
            "Size:      {} -> {} (saved {}, {:.1}%)",
            format_bytes(summary.input_bytes),
            format_bytes(summary.output_bytes),
            format_bytes(summary.saved_bytes),
            summary.compression_ratio_percent
        );
    }
    println!("Time:      {:.1}s", summary.processing_seconds);
}

fn handle_scan(args: BatchArgs) {
    let config = load_config(&args);
    println!("Scanning directory: {}", config.batch.input_dir.display());
    let engine = BatchEngine::new(config);

    let jobs = scan_or_exit(&engine);
    for job in &jobs {
        let marker = if job.status == JobStatus::Skipped {
            " (skipped: output exists)"
        } else {
            ""
        };
        println!(
            "- [{}] {} -> {}{}",
            job.id,
            job.input_path.display(),
            job.output_path.display(),
            marker
        );
    }
    println!("Total jobs: {}", jobs.len());
}

fn handle_dry_run(args: BatchArgs) {
    let config = load_config(&args);
    println!(
        "Dry run: building ffmpeg commands for {}",
        config.batch.input_dir.display()
    );

    let toolchain = FfmpegToolchain::new(config.tools.clone());
    let ffmpeg = toolchain
        .ffmpeg_path()
        .unwrap_or_else(|_| "ffmpeg".into());
    let builder = FfmpegCommandBuilder::new(ffmpeg, config.encode.clone(), true);
    let engine = BatchEngine::new(config);

    for job in scan_or_exit(&engine) {
        if job.status != JobStatus::Queued {
            println!("# [{}] skipped: {}", job.id, job.input_path.display());
            continue;
        }
        let temp = engine::temp_output_path(&job.output_path);
        println!("{}", engine::format_command(&builder.build(&job, &temp)));
    }
}

fn handle_probe(file: std::path::PathBuf) {
    let toolchain = FfmpegToolchain::new(Config::load().unwrap_or_default().tools);
    let prober = match toolchain.ffprobe_path() {
        Ok(path) => FfprobeProber::new(path),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    match prober.probe(&file) {
        Ok(info) => {
            match info.duration {
                Some(d) => println!("Duration:    {:.2} seconds", d),
                None => println!("Duration:    unknown"),
            }
            if let Some(res) = info.resolution() {
                println!("Resolution:  {}", res);
            }
            if let Some(codec) = &info.video_codec {
                println!("Video codec: {}", codec);
            }
            if let Some(codec) = &info.audio_codec {
                println!("Audio codec: {}", codec);
            }
            if let Some(fps) = info.fps {
                println!("Frame rate:  {:.2} fps", fps);
            }
            if let Some(rotation) = info.rotation {
                println!("Rotation:    {}", rotation);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn handle_check_ffmpeg() {
    let toolchain = FfmpegToolchain::new(Config::load().unwrap_or_default().tools);
    match engine::ffmpeg_version(&toolchain) {
        Ok(version) => {
            println!("ffmpeg found: {}", version);
            match engine::ffprobe_version(&toolchain) {
                Ok(probe_version) => {
                    println!("ffprobe found: {}", probe_version);
                    process::exit(0);
                }
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn handle_init_config() {
    match Config::config_path() {
        Ok(path) if path.exists() => match Config::load_from(&path) {
            Ok(cfg) => {
                println!("Config loaded successfully from {}", path.display());
                println!("{:#?}", cfg);
            }
            Err(e) => {
                eprintln!("Config at {} is invalid: {:#}", path.display(), e);
                process::exit(1);
            }
        },
        Ok(path) => {
            println!("No config found, creating default...");
            if let Err(err) = Config::default().save_to(&path) {
                eprintln!("Failed to save default config: {:#}", err);
                process::exit(1);
            }
            println!("Default config saved to {}", path.display());
        }
        Err(e) => {
            eprintln!("Config path unknown: {:#}", e);
            process::exit(1);
        }
    }
}
