// Batch controller: scan, start, and session control

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use super::core::{
    BatchLogger, CommandBuilder, FfmpegCommandBuilder, FfmpegToolchain, ItemLog, Job, JobId,
    JobStatus, Toolchain, scan_batch,
};
use super::error::EngineError;
use super::probe::{FfprobeProber, MediaProber};
use super::supervisor::ProcessHandle;
use super::worker::{BatchObserver, NoopObserver, Shared, lock, spawn_worker};
use crate::config::Config;
use crate::stats::{BatchSummary, summary_path_for, write_summary_file};

/// Builds and starts batches. Collaborators default to the ffmpeg/ffprobe
/// implementations and a `BatchLogger` opened at start.
pub struct BatchEngine {
    config: Config,
    toolchain: Option<Arc<dyn Toolchain>>,
    command_builder: Option<Arc<dyn CommandBuilder>>,
    prober: Option<Arc<dyn MediaProber>>,
    observer: Arc<dyn BatchObserver>,
    item_log: Option<Arc<dyn ItemLog>>,
}

impl BatchEngine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            toolchain: None,
            command_builder: None,
            prober: None,
            observer: Arc::new(NoopObserver),
            item_log: None,
        }
    }

    pub fn with_toolchain(mut self, toolchain: Arc<dyn Toolchain>) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    pub fn with_command_builder(mut self, builder: Arc<dyn CommandBuilder>) -> Self {
        self.command_builder = Some(builder);
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn MediaProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_item_log(mut self, item_log: Arc<dyn ItemLog>) -> Self {
        self.item_log = Some(item_log);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Walk the input tree and build the batch's jobs (ids from 1)
    pub fn scan(&self) -> Result<Vec<Job>, EngineError> {
        let mut config = self.config.clone();
        config.normalize();
        let jobs = scan_batch(&config.batch)?;
        info!(
            input = %config.batch.input_dir.display(),
            jobs = jobs.len(),
            "scan complete"
        );
        Ok(jobs)
    }

    /// Validate, resolve the toolchain, then run `jobs` on the worker pool
    pub fn start(&self, jobs: Vec<Job>) -> Result<BatchSession, EngineError> {
        let mut config = self.config.clone();
        config.validate()?;

        let default_tools = FfmpegToolchain::new(config.tools.clone());
        match &self.toolchain {
            Some(toolchain) => toolchain.resolve()?,
            None => default_tools.resolve()?,
        }

        let mut seen = HashSet::with_capacity(jobs.len());
        for job in &jobs {
            if !seen.insert(job.id) {
                return Err(EngineError::DuplicateJobId(job.id));
            }
        }

        let command_builder: Arc<dyn CommandBuilder> = match &self.command_builder {
            Some(builder) => Arc::clone(builder),
            None => Arc::new(FfmpegCommandBuilder::new(
                default_tools
                    .ffmpeg_path()
                    .unwrap_or_else(|_| PathBuf::from("ffmpeg")),
                config.encode.clone(),
                true,
            )),
        };
        let prober: Arc<dyn MediaProber> = match &self.prober {
            Some(prober) => Arc::clone(prober),
            None => Arc::new(FfprobeProber::new(
                default_tools
                    .ffprobe_path()
                    .unwrap_or_else(|_| PathBuf::from("ffprobe")),
            )),
        };

        let (item_log, json_log): (Arc<dyn ItemLog>, Option<PathBuf>) = match &self.item_log {
            Some(log) => (
                Arc::clone(log),
                config
                    .logging
                    .enable_json
                    .then(|| config.logging.json_path.clone())
                    .flatten(),
            ),
            None => {
                let logger = BatchLogger::open(&config.logging, &config.batch.output_dir)
                    .map_err(EngineError::ItemLog)?;
                if let Some(path) = logger.csv_path() {
                    info!(path = %path.display(), "writing CSV log");
                }
                let json = logger.json_path().map(|p| p.to_path_buf());
                (Arc::new(logger), json)
            }
        };

        let workers = config.batch.worker_count();
        let shared = Arc::new(Shared::new(
            jobs,
            command_builder,
            prober,
            Arc::clone(&self.observer),
            item_log,
            config.batch.collision_policy,
        ));

        // Settled-at-scan jobs are reported but never queued
        for job in shared.snapshots() {
            if job.status != JobStatus::Queued {
                shared.emit(&job);
            }
        }

        info!(workers, "starting batch");
        for worker_id in 0..workers {
            if let Err(e) = spawn_worker(&shared, worker_id) {
                warn!(worker_id, "failed to spawn worker: {}", e);
            }
        }

        let completion = Arc::new(Completion {
            summary_path: json_log.as_deref().map(summary_path_for),
            done: AtomicBool::new(false),
        });
        let monitor = {
            let shared = Arc::clone(&shared);
            let completion = Arc::clone(&completion);
            thread::Builder::new()
                .name("ffbatch-monitor".to_string())
                .spawn(move || {
                    shared.wait_workers_exited();
                    completion.finish(&shared);
                })
        };
        let monitor = match monitor {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("failed to spawn batch monitor: {}", e);
                None
            }
        };

        Ok(BatchSession {
            shared,
            completion,
            monitor: Mutex::new(monitor),
        })
    }
}

/// End-of-batch work, run exactly once
struct Completion {
    summary_path: Option<PathBuf>,
    done: AtomicBool,
}

impl Completion {
    fn finish(&self, shared: &Shared) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        shared.close_log_once();

        let summary = shared.summary();
        info!(
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            canceled = summary.canceled,
            "batch complete"
        );
        shared.emit_complete(&summary);

        if let Some(path) = &self.summary_path {
            match write_summary_file(&summary, path) {
                Ok(()) => debug!(path = %path.display(), "summary written"),
                Err(e) => warn!("failed to write batch summary: {:#}", e),
            }
        }
    }
}

/// A running batch. Single use: once every worker has exited the session
/// only answers queries.
pub struct BatchSession {
    shared: Arc<Shared>,
    completion: Arc<Completion>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl BatchSession {
    /// Stop handing out new jobs; running ones continue
    pub fn pause(&self) {
        info!("pausing batch");
        self.shared.pause.set_paused(true);
    }

    pub fn resume(&self) {
        info!("resuming batch");
        self.shared.pause.set_paused(false);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.pause.is_paused()
    }

    pub fn is_canceled(&self) -> bool {
        self.shared.is_canceled()
    }

    /// Cancel everything still queued, then terminate running processes.
    /// Blocks until every running process has exited or been killed.
    pub fn cancel(&self) {
        // Sweep before any worker can observe the flag, so completion never
        // sees a queued job
        let (swept, handles): (Vec<Job>, Vec<Arc<ProcessHandle>>) = {
            let mut control = lock(&self.shared.control);
            if !control.canceled {
                info!("canceling batch");
            }
            self.shared.mark_canceled(&mut control);
            let swept = self.shared.sweep_queued(&mut control);
            let handles = control.registry.values().cloned().collect();
            (swept, handles)
        };
        self.shared.queue_cv.notify_all();
        self.shared.pause.wake();

        for job in &swept {
            self.shared.emit(job);
            self.shared.record(job);
        }
        self.shared.finish_sweep();

        thread::scope(|scope| {
            for handle in &handles {
                scope.spawn(move || handle.terminate());
            }
        });
    }

    /// Requeue every failed job. Returns how many were requeued; nothing
    /// happens once the workers are gone or the batch was canceled.
    pub fn retry_failed(&self) -> usize {
        let mut requeued = Vec::new();
        {
            let mut control = lock(&self.shared.control);
            if control.workers == 0 || control.canceled {
                return 0;
            }
            for id in self.shared.job_ids() {
                let reset = self.shared.with_job(id, |job| {
                    // Only failed jobs may go back on the queue
                    if !job.status.can_transition_to(JobStatus::Queued) {
                        return None;
                    }
                    job.requeue();
                    Some(job.clone())
                });
                if let Some(Some(job)) = reset {
                    control.queue.push_back(job.id);
                    requeued.push(job);
                }
            }
        }
        self.shared.queue_cv.notify_all();

        if !requeued.is_empty() {
            info!(count = requeued.len(), "retrying failed jobs");
        }
        for job in &requeued {
            self.shared.emit(job);
        }
        requeued.len()
    }

    /// Whether any worker is still alive
    pub fn is_running(&self) -> bool {
        self.shared.live_workers() > 0
    }

    /// Block until every worker has exited and end-of-batch work is done
    pub fn wait(&self) -> BatchSummary {
        self.shared.wait_workers_exited();
        self.shared.close_log_once();

        let monitor = lock(&self.monitor).take();
        if let Some(handle) = monitor {
            if handle.join().is_err() {
                warn!("batch monitor panicked");
            }
        }
        self.completion.finish(&self.shared);
        self.shared.summary()
    }

    /// Snapshots of every job in batch order
    pub fn jobs(&self) -> Vec<Job> {
        self.shared.snapshots()
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.shared.snapshot(id)
    }

    pub fn summary(&self) -> BatchSummary {
        self.shared.summary()
    }
}
