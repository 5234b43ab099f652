// Worker pool for parallel transcoding

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::core::{
    CommandBuilder, ItemLog, ItemRecord, Job, JobId, JobStatus, MediaInfo, ProgressExtractor,
    discard, publish, temp_output_path, was_user_cancelled,
};
use super::error::JobError;
use super::probe::MediaProber;
use super::supervisor::{ProcessHandle, RunningProcess};
use crate::config::CollisionPolicy;
use crate::stats::BatchSummary;

/// How long an idle worker waits for new work before exiting
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

/// Receives job snapshots as they change. Called from worker threads with no
/// engine lock held.
pub trait BatchObserver: Send + Sync {
    fn on_item_update(&self, job: &Job);
    fn on_batch_complete(&self, summary: &BatchSummary);
}

/// Ignores everything
#[derive(Debug, Default)]
pub struct NoopObserver;

impl BatchObserver for NoopObserver {
    fn on_item_update(&self, _job: &Job) {}
    fn on_batch_complete(&self, _summary: &BatchSummary) {}
}

/// Message from the engine to a single consumer
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// A job changed status, progress or details
    ItemUpdated(Job),

    /// All workers have exited
    BatchComplete(BatchSummary),
}

/// Forwards observer callbacks onto an mpsc channel
#[derive(Debug)]
pub struct ChannelObserver {
    tx: Sender<BatchEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, Receiver<BatchEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl BatchObserver for ChannelObserver {
    fn on_item_update(&self, job: &Job) {
        // A dropped receiver just means nobody is watching
        let _ = self.tx.send(BatchEvent::ItemUpdated(job.clone()));
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        let _ = self.tx.send(BatchEvent::BatchComplete(summary.clone()));
    }
}

/// Lock, recovering the data if another thread panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Queue, process registry and cancel flag share one mutex
#[derive(Default)]
pub(crate) struct Control {
    pub queue: VecDeque<JobId>,
    pub registry: HashMap<JobId, Arc<ProcessHandle>>,
    pub canceled: bool,
    /// Workers that may still dequeue
    pub workers: usize,
    /// Cancel calls still reporting swept jobs; completion waits for them
    pub pending_sweeps: usize,
}

/// Cooperative pause; only dequeueing blocks on it
#[derive(Default)]
pub(crate) struct PauseGate {
    paused: Mutex<bool>,
    cv: Condvar,
}

impl PauseGate {
    pub fn set_paused(&self, paused: bool) {
        *lock(&self.paused) = paused;
        self.cv.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *lock(&self.paused)
    }

    /// Wake waiters so they re-check the cancel flag
    pub fn wake(&self) {
        let _guard = lock(&self.paused);
        self.cv.notify_all();
    }

    fn wait_while_paused(&self, canceled: &AtomicBool) {
        let guard = lock(&self.paused);
        let _guard = self
            .cv
            .wait_while(guard, |paused| *paused && !canceled.load(Ordering::SeqCst))
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Gives the worker slot back when the thread ends, panic included,
/// unless the worker already retired itself under the control lock
struct WorkerGuard {
    shared: Arc<Shared>,
    retired: bool,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if !self.retired {
            let mut control = lock(&self.shared.control);
            self.shared.retire_worker(&mut control);
        }
    }
}

/// State shared by the controller and every worker
pub(crate) struct Shared {
    jobs: Vec<Mutex<Job>>,
    index: HashMap<JobId, usize>,
    pub control: Mutex<Control>,
    pub queue_cv: Condvar,
    canceled: AtomicBool,
    pub pause: PauseGate,
    workers_cv: Condvar,
    command_builder: Arc<dyn CommandBuilder>,
    prober: Arc<dyn MediaProber>,
    observer: Arc<dyn BatchObserver>,
    item_log: Arc<dyn ItemLog>,
    collision_policy: CollisionPolicy,
    log_closed: AtomicBool,
}

impl Shared {
    /// Job ids must already be unique
    pub fn new(
        jobs: Vec<Job>,
        command_builder: Arc<dyn CommandBuilder>,
        prober: Arc<dyn MediaProber>,
        observer: Arc<dyn BatchObserver>,
        item_log: Arc<dyn ItemLog>,
        collision_policy: CollisionPolicy,
    ) -> Self {
        let index = jobs.iter().enumerate().map(|(i, j)| (j.id, i)).collect();
        let queue = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Queued)
            .map(|j| j.id)
            .collect();

        Self {
            jobs: jobs.into_iter().map(Mutex::new).collect(),
            index,
            control: Mutex::new(Control {
                queue,
                ..Control::default()
            }),
            queue_cv: Condvar::new(),
            canceled: AtomicBool::new(false),
            pause: PauseGate::default(),
            workers_cv: Condvar::new(),
            command_builder,
            prober,
            observer,
            item_log,
            collision_policy,
            log_closed: AtomicBool::new(false),
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Caller must hold `control`
    pub fn mark_canceled(&self, control: &mut Control) {
        control.canceled = true;
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn live_workers(&self) -> usize {
        lock(&self.control).workers
    }

    /// Block until every worker has exited and no cancel is mid-report
    pub fn wait_workers_exited(&self) {
        let control = lock(&self.control);
        let _control = self
            .workers_cv
            .wait_while(control, |c| c.workers > 0 || c.pending_sweeps > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn retire_worker(&self, control: &mut Control) {
        control.workers = control.workers.saturating_sub(1);
        self.workers_cv.notify_all();
    }

    /// Caller must hold `control`. Cancel every queued job and empty the
    /// queue; returns the swept snapshots. Holds completion back until
    /// `finish_sweep` is called.
    pub fn sweep_queued(&self, control: &mut Control) -> Vec<Job> {
        control.pending_sweeps += 1;
        control.queue.clear();

        let mut swept = Vec::new();
        for slot in &self.jobs {
            let mut job = lock(slot);
            if job.status != JobStatus::Queued {
                continue;
            }
            job.status = JobStatus::Canceled;
            job.message = "canceled".to_string();
            job.finished_at = Some(Utc::now());
            swept.push(job.clone());
        }
        swept
    }

    pub fn finish_sweep(&self) {
        let mut control = lock(&self.control);
        control.pending_sweeps = control.pending_sweeps.saturating_sub(1);
        self.workers_cv.notify_all();
    }

    /// Mutate one job under its lock and return what the closure returns
    pub fn with_job<R>(&self, id: JobId, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let slot = self.index.get(&id).and_then(|&i| self.jobs.get(i))?;
        let mut job = lock(slot);
        Some(f(&mut job))
    }

    pub fn snapshot(&self, id: JobId) -> Option<Job> {
        self.with_job(id, |j| j.clone())
    }

    pub fn snapshots(&self) -> Vec<Job> {
        self.jobs.iter().map(|slot| lock(slot).clone()).collect()
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|slot| lock(slot).id).collect()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary::from_jobs(&self.snapshots())
    }

    pub fn emit(&self, job: &Job) {
        self.observer.on_item_update(job);
    }

    pub fn emit_complete(&self, summary: &BatchSummary) {
        self.observer.on_batch_complete(summary);
    }

    pub fn record(&self, job: &Job) {
        if let Err(e) = self.item_log.record(&ItemRecord::from_job(job)) {
            warn!(job_id = job.id, "failed to write item log record: {:#}", e);
        }
    }

    /// Close the item log; later calls do nothing
    pub fn close_log_once(&self) {
        if self.log_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.item_log.close() {
            warn!("failed to close item log: {:#}", e);
        }
    }
}

/// Start one worker thread; it counts as live from this point on
pub(crate) fn spawn_worker(shared: &Arc<Shared>, worker_id: usize) -> io::Result<JoinHandle<()>> {
    lock(&shared.control).workers += 1;
    let guard = WorkerGuard {
        shared: Arc::clone(shared),
        retired: false,
    };
    thread::Builder::new()
        .name(format!("ffbatch-worker-{}", worker_id))
        .spawn(move || {
            let mut guard = guard;
            let shared = Arc::clone(&guard.shared);
            guard.retired = run_worker(&shared, worker_id);
        })
}

/// Returns true when the worker retired itself on an empty queue
fn run_worker(shared: &Shared, worker_id: usize) -> bool {
    debug!(worker_id, "worker started");
    loop {
        if shared.is_canceled() {
            break;
        }
        shared.pause.wait_while_paused(&shared.canceled);

        match dequeue(shared) {
            Dequeued::Job(job) => {
                shared.emit(&job);
                process_job(shared, job);
            }
            Dequeued::Retired => {
                debug!(worker_id, "queue drained, worker exiting");
                return true;
            }
            Dequeued::Canceled => break,
        }
    }
    debug!(worker_id, "worker exiting");
    false
}

enum Dequeued {
    Job(Job),
    /// The queue stayed empty; the worker slot was already released
    Retired,
    Canceled,
}

/// Pop the next job and mark it Running in one step under the control lock
fn dequeue(shared: &Shared) -> Dequeued {
    let mut control = lock(&shared.control);
    if control.queue.is_empty() && !control.canceled {
        control = shared
            .queue_cv
            .wait_timeout_while(control, DEQUEUE_TIMEOUT, |c| {
                c.queue.is_empty() && !c.canceled
            })
            .map(|(guard, _)| guard)
            .unwrap_or_else(|e| e.into_inner().0);
    }
    // Anything still queued after a cancel is swept by the controller
    if control.canceled {
        return Dequeued::Canceled;
    }

    while let Some(id) = control.queue.pop_front() {
        let started = shared.with_job(id, |job| {
            if !job.status.can_transition_to(JobStatus::Running) {
                return None;
            }
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.finished_at = None;
            job.progress = Some(0);
            job.error.clear();
            job.message.clear();
            Some(job.clone())
        });
        if let Some(Some(job)) = started {
            return Dequeued::Job(job);
        }
    }

    // Retiring under the same lock that retry_failed() takes, so a retry
    // either sees this worker gone or its jobs get picked up
    shared.retire_worker(&mut control);
    Dequeued::Retired
}

enum Settlement {
    Completed {
        output_bytes: Option<u64>,
        output_media: Option<MediaInfo>,
    },
    Failed(String),
    Canceled,
}

fn process_job(shared: &Shared, job: Job) {
    info!(job_id = job.id, input = %job.input_path.display(), "encoding");
    let settlement = execute(shared, &job);
    settle(shared, job.id, settlement);
}

/// Stop a process without blocking the worker that has to reap it
fn terminate_in_background(handle: Arc<ProcessHandle>) {
    let spawned = thread::Builder::new()
        .name("ffbatch-terminate".to_string())
        .spawn(move || handle.terminate());
    if let Err(e) = spawned {
        warn!("failed to spawn terminate thread: {}", e);
    }
}

fn create_output_dir(output: &Path) -> Result<(), JobError> {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|source| JobError::OutputDir {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

fn execute(shared: &Shared, job: &Job) -> Settlement {
    let id = job.id;

    if let Err(e) = create_output_dir(&job.output_path) {
        return Settlement::Failed(e.to_string());
    }
    let temp = temp_output_path(&job.output_path);
    let input_bytes = fs::metadata(&job.input_path).map(|m| m.len()).ok();

    let media = match shared.prober.probe(&job.input_path) {
        Ok(media) => media,
        Err(e) => return Settlement::Failed(JobError::Probe(e).to_string()),
    };
    let duration = media.duration.filter(|d| *d > 0.0);

    let Some(job) = shared.with_job(id, |j| {
        j.temp_path = Some(temp.clone());
        if input_bytes.is_some() {
            j.input_bytes = input_bytes;
        }
        j.media = Some(media.clone());
        if duration.is_none() {
            j.progress = None;
        }
        j.clone()
    }) else {
        return Settlement::Failed(format!("job {} vanished from the batch", id));
    };
    shared.emit(&job);

    let cmd = shared.command_builder.build(&job, &temp);
    let mut process = match RunningProcess::spawn(cmd) {
        Ok(process) => process,
        Err(e) => {
            discard(&temp);
            return Settlement::Failed(e.to_string());
        }
    };

    let handle = process.handle();
    let canceled_before_register = {
        let mut control = lock(&shared.control);
        control.registry.insert(id, Arc::clone(&handle));
        control.canceled
    };
    let mut terminating = false;
    if canceled_before_register {
        terminating = true;
        terminate_in_background(Arc::clone(&handle));
    }

    for pct in ProgressExtractor::new(process.progress_lines(), duration) {
        if !terminating && shared.is_canceled() {
            terminating = true;
            terminate_in_background(Arc::clone(&handle));
        }
        if let Some(Some(snapshot)) = shared.with_job(id, |j| j.advance_progress(pct).then(|| j.clone())) {
            shared.emit(&snapshot);
        }
    }

    let outcome = process.drain_and_wait();
    lock(&shared.control).registry.remove(&id);

    if outcome.success() {
        if let Err(e) = publish(&temp, &job.output_path, shared.collision_policy) {
            discard(&temp);
            return Settlement::Failed(JobError::Finalize(e).to_string());
        }
        let output_bytes = fs::metadata(&job.output_path).map(|m| m.len()).ok();
        let output_media = match shared.prober.probe(&job.output_path) {
            Ok(media) => Some(media),
            Err(e) => {
                debug!(job_id = id, "output probe failed: {}", e);
                None
            }
        };
        return Settlement::Completed {
            output_bytes,
            output_media,
        };
    }

    discard(&temp);
    if handle.termination_requested()
        || shared.is_canceled()
        || was_user_cancelled(&outcome.status, &outcome.diagnostics_text())
    {
        Settlement::Canceled
    } else {
        Settlement::Failed(JobError::Encode(outcome.error_message()).to_string())
    }
}

fn settle(shared: &Shared, id: JobId, settlement: Settlement) {
    let Some(job) = shared.with_job(id, |job| {
        let next = match &settlement {
            Settlement::Completed { .. } => JobStatus::Completed,
            Settlement::Failed(_) => JobStatus::Failed,
            Settlement::Canceled => JobStatus::Canceled,
        };
        debug_assert!(
            job.status.can_transition_to(next),
            "job {} cannot move from {} to {}",
            job.id,
            job.status,
            next
        );
        match settlement {
            Settlement::Completed {
                output_bytes,
                output_media,
            } => {
                job.status = JobStatus::Completed;
                job.progress = Some(100);
                job.output_bytes = output_bytes;
                job.output_media = output_media;
                job.message = "done".to_string();
            }
            Settlement::Failed(error) => {
                job.status = JobStatus::Failed;
                job.error = error;
            }
            Settlement::Canceled => {
                job.status = JobStatus::Canceled;
                job.message = "canceled".to_string();
            }
        }
        job.temp_path = None;
        job.finished_at = Some(Utc::now());
        job.clone()
    }) else {
        return;
    };

    match job.status {
        JobStatus::Failed => warn!(job_id = id, error = %job.error, "job failed"),
        status => info!(job_id = id, %status, "job settled"),
    }
    shared.emit(&job);
    shared.record(&job);
}
