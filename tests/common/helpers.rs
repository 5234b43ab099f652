#![allow(dead_code)]

use ffbatch::config::Config;
use ffbatch::engine::{
    BatchEngine, BatchObserver, CommandBuilder, EngineError, ItemLog, ItemRecord, Job, JobId,
    JobStatus, MediaInfo, MediaProber, ProbeError, Toolchain,
};
use ffbatch::stats::BatchSummary;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Encoder behaviour is picked by the input file's stem prefix
pub const OK_SCRIPT: &str =
    "printf 'out_time_us=500000\\nout_time_us=1000000\\nprogress=end\\n'; printf data > \"$1\"";
pub const SLOW_SCRIPT: &str = "sleep 0.3; printf 'progress=end\\n'; printf data > \"$1\"";
pub const LONG_SCRIPT: &str = "sleep 2; printf 'progress=end\\n'; printf data > \"$1\"";
pub const FAIL_SCRIPT: &str = "echo 'Unknown encoder libfoo' >&2; exit 1";
pub const CORRUPT_SCRIPT: &str =
    "echo 'Invalid data found when processing input' >&2; printf partial > \"$1\"; exit 1";
pub const HANG_SCRIPT: &str = "printf 'out_time_us=100000\\n'; printf partial > \"$1\"; exec sleep 30";
pub const KILLED_SCRIPT: &str = "printf partial > \"$1\"; kill -9 $$";
pub const FLAKY_SCRIPT: &str = "if [ -f \"$2.ok\" ]; then printf data > \"$1\"; else echo 'first attempt fails' >&2; exit 1; fi";

fn script_for(input: &Path) -> &'static str {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.split('_').next().unwrap_or("") {
        "slow" => SLOW_SCRIPT,
        "long" => LONG_SCRIPT,
        "fail" => FAIL_SCRIPT,
        "corrupt" => CORRUPT_SCRIPT,
        "hang" => HANG_SCRIPT,
        "flaky" => FLAKY_SCRIPT,
        "killed" => KILLED_SCRIPT,
        _ => OK_SCRIPT,
    }
}

/// Runs `sh -c SCRIPT sh OUTPUT INPUT` in place of ffmpeg
#[derive(Debug, Default)]
pub struct ScriptCommandBuilder;

impl CommandBuilder for ScriptCommandBuilder {
    fn build(&self, job: &Job, output: &Path) -> Command {
        let stem = job
            .input_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if stem.starts_with("nolaunch") {
            return Command::new("/nonexistent/ffbatch-test-encoder");
        }
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script_for(&job.input_path))
            .arg("sh")
            .arg(output)
            .arg(&job.input_path);
        cmd
    }
}

/// Reports a fixed duration; inputs named `badprobe*` look corrupted
#[derive(Debug)]
pub struct FakeProber {
    pub duration: Option<f64>,
}

impl Default for FakeProber {
    fn default() -> Self {
        Self {
            duration: Some(10.0),
        }
    }
}

impl MediaProber for FakeProber {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if stem.starts_with("badprobe") {
            return Err(ProbeError::Failed(format!(
                "{}: moov atom not found",
                path.display()
            )));
        }
        Ok(MediaInfo {
            duration: self.duration,
            width: Some(1920),
            height: Some(1080),
            video_codec: Some("h264".into()),
            audio_codec: Some("aac".into()),
            fps: Some(30.0),
            rotation: None,
        })
    }
}

#[derive(Debug)]
pub struct FakeToolchain {
    pub available: bool,
}

impl Toolchain for FakeToolchain {
    fn resolve(&self) -> Result<(), EngineError> {
        if self.available {
            Ok(())
        } else {
            Err(EngineError::ToolchainUnavailable(
                "ffmpeg not found in PATH".into(),
            ))
        }
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct RecordingLog {
    pub records: Mutex<Vec<ItemRecord>>,
    pub closes: AtomicUsize,
    /// Records that arrived after `close`
    pub late: AtomicUsize,
}

impl RecordingLog {
    pub fn records(&self) -> Vec<ItemRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn late_count(&self) -> usize {
        self.late.load(Ordering::SeqCst)
    }
}

impl ItemLog for RecordingLog {
    fn record(&self, record: &ItemRecord) -> anyhow::Result<()> {
        if self.closes.load(Ordering::SeqCst) > 0 {
            self.late.fetch_add(1, Ordering::SeqCst);
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ObserverState {
    updates: Vec<Job>,
    running: HashSet<JobId>,
    max_running: usize,
    summaries: Vec<BatchSummary>,
}

/// Keeps every update and tracks how many jobs ran at once
#[derive(Debug, Default)]
pub struct RecordingObserver {
    state: Mutex<ObserverState>,
}

impl RecordingObserver {
    pub fn updates(&self) -> Vec<Job> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn updates_for(&self, id: JobId) -> Vec<Job> {
        self.updates().into_iter().filter(|j| j.id == id).collect()
    }

    pub fn max_running(&self) -> usize {
        self.state.lock().unwrap().max_running
    }

    pub fn summaries(&self) -> Vec<BatchSummary> {
        self.state.lock().unwrap().summaries.clone()
    }

    /// Progress values seen while the job was running, repeats collapsed
    pub fn running_progress(&self, id: JobId) -> Vec<Option<u8>> {
        let mut values: Vec<Option<u8>> = self
            .updates_for(id)
            .into_iter()
            .filter(|j| j.status == JobStatus::Running)
            .map(|j| j.progress)
            .collect();
        values.dedup();
        values
    }
}

impl BatchObserver for RecordingObserver {
    fn on_item_update(&self, job: &Job) {
        let mut state = self.state.lock().unwrap();
        if job.status == JobStatus::Running {
            state.running.insert(job.id);
        } else {
            state.running.remove(&job.id);
        }
        state.max_running = state.max_running.max(state.running.len());
        state.updates.push(job.clone());
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        self.state.lock().unwrap().summaries.push(summary.clone());
    }
}

/// Temporary input/output trees
pub struct Fixture {
    pub dir: TempDir,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::create_dir_all(&input).unwrap();
        Self { dir, input, output }
    }

    /// Create an input file (relative to the input root)
    pub fn add_input(&self, name: &str) -> PathBuf {
        let path = self.input.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, b"source-bytes").unwrap();
        path
    }

    /// Create an existing output file (relative to the output root)
    pub fn add_output(&self, name: &str) -> PathBuf {
        let path = self.output.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, b"old").unwrap();
        path
    }

    pub fn config(&self, workers: usize) -> Config {
        let mut config = Config::default();
        config.batch.input_dir = self.input.clone();
        config.batch.output_dir = self.output.clone();
        config.batch.workers = workers;
        config.logging.enable_csv = false;
        config.logging.enable_json = false;
        config
    }

    /// Every file left under the output root
    pub fn output_files(&self) -> Vec<PathBuf> {
        walk(&self.output)
    }
}

fn walk(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk(&path));
        } else {
            files.push(path);
        }
    }
    files.sort();
    files
}

/// Engine wired to the script encoder, fake prober and recording sinks
pub fn test_engine(
    config: Config,
    observer: &Arc<RecordingObserver>,
    log: &Arc<RecordingLog>,
) -> BatchEngine {
    BatchEngine::new(config)
        .with_toolchain(Arc::new(FakeToolchain { available: true }))
        .with_command_builder(Arc::new(ScriptCommandBuilder))
        .with_prober(Arc::new(FakeProber::default()))
        .with_observer(Arc::clone(observer) as Arc<dyn BatchObserver>)
        .with_item_log(Arc::clone(log) as Arc<dyn ItemLog>)
}

/// Poll `check` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    check()
}

pub fn statuses(jobs: &[Job]) -> Vec<JobStatus> {
    jobs.iter().map(|j| j.status).collect()
}

pub fn has_partial_files(files: &[PathBuf]) -> bool {
    files.iter().any(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().contains(".partial"))
            .unwrap_or(false)
    })
}
