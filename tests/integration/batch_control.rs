// Tests for batch control: start validation, cancel, pause/resume, retry
#![cfg(unix)]

use ffbatch::engine::{EngineError, Job, JobStatus};
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::helpers::*;

// ============================================================================
// Start-time validation
// ============================================================================

#[test]
fn test_missing_toolchain_aborts_start() {
    let fx = Fixture::new();
    fx.add_input("clip.mp4");
    let observer = Arc::new(RecordingObserver::default());
    let log = Arc::new(RecordingLog::default());
    let engine = test_engine(fx.config(1), &observer, &log)
        .with_toolchain(Arc::new(FakeToolchain { available: false }));

    let result = engine.start(engine.scan().unwrap());
    assert!(matches!(result, Err(EngineError::ToolchainUnavailable(_))));
    assert!(log.records().is_empty());
    assert!(observer.updates().is_empty());
    assert!(!fx.output.exists());
}

#[test]
fn test_duplicate_job_ids_rejected() {
    let fx = Fixture::new();
    let a = fx.add_input("a.mp4");
    let b = fx.add_input("b.mp4");
    let observer = Arc::new(RecordingObserver::default());
    let log = Arc::new(RecordingLog::default());
    let engine = test_engine(fx.config(1), &observer, &log);

    let jobs = vec![
        Job::new(7, a, fx.output.join("a.mp4")),
        Job::new(7, b, fx.output.join("b.mp4")),
    ];
    assert!(matches!(
        engine.start(jobs),
        Err(EngineError::DuplicateJobId(7))
    ));
}

#[test]
fn test_invalid_config_rejected() {
    let fx = Fixture::new();
    let mut config = fx.config(1);
    config.encode.crf = 80;
    let observer = Arc::new(RecordingObserver::default());
    let log = Arc::new(RecordingLog::default());
    let engine = test_engine(config, &observer, &log);

    assert!(matches!(
        engine.start(Vec::new()),
        Err(EngineError::InvalidConfig(_))
    ));
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn test_cancel_terminates_running_and_sweeps_queued() {
    let fx = Fixture::new();
    fx.add_input("hang_a.mp4");
    fx.add_input("ok_b.mp4");
    fx.add_input("ok_c.mp4");
    let observer = Arc::new(RecordingObserver::default());
    let log = Arc::new(RecordingLog::default());
    let engine = test_engine(fx.config(1), &observer, &log);

    let session = engine.start(engine.scan().unwrap()).unwrap();
    // 1% means the process is registered and streaming
    assert!(wait_until(Duration::from_secs(5), || {
        session.job(1).map(|j| j.progress == Some(1)).unwrap_or(false)
    }));

    let started = Instant::now();
    session.cancel();
    let summary = session.wait();
    assert!(started.elapsed() < Duration::from_secs(10));

    assert_eq!(
        statuses(&session.jobs()),
        vec![JobStatus::Canceled; 3]
    );
    assert_eq!(summary.canceled, 3);
    // The summary handed to the observer is final too
    assert_eq!(observer.summaries(), vec![summary]);
    for id in [2, 3] {
        let job = session.job(id).unwrap();
        assert_eq!(job.message, "canceled");
        assert!(job.started_at.is_none());
    }
    assert!(!has_partial_files(&fx.output_files()));

    let mut logged: Vec<u64> = log.records().iter().map(|r| r.job_id).collect();
    logged.sort();
    assert_eq!(logged, vec![1, 2, 3]);
    assert_eq!(log.late_count(), 0);
}

#[test]
fn test_cancel_is_idempotent() {
    let fx = Fixture::new();
    fx.add_input("hang_a.mp4");
    fx.add_input("ok_b.mp4");
    let observer = Arc::new(RecordingObserver::default());
    let log = Arc::new(RecordingLog::default());
    let engine = test_engine(fx.config(1), &observer, &log);

    let session = engine.start(engine.scan().unwrap()).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        session.job(1).map(|j| j.status == JobStatus::Running).unwrap_or(false)
    }));
    session.cancel();
    session.cancel();
    session.wait();
    session.cancel();

    assert_eq!(log.records().len(), 2);
    assert!(session.is_canceled());
    assert_eq!(session.retry_failed(), 0);
}

#[test]
fn test_cancel_while_paused_releases_workers() {
    let fx = Fixture::new();
    fx.add_input("a.mp4");
    fx.add_input("b.mp4");
    let observer = Arc::new(RecordingObserver::default());
    let log = Arc::new(RecordingLog::default());
    let engine = test_engine(fx.config(2), &observer, &log);

    let session = engine.start(engine.scan().unwrap()).unwrap();
    session.pause();
    session.cancel();
    session.wait();

    assert!(!session.is_running());
    assert!(session.jobs().iter().all(|j| j.status.is_terminal()));
}

#[test]
fn test_cancel_never_completes_batch_with_queued_jobs() {
    for _ in 0..20 {
        let fx = Fixture::new();
        for name in ["slow_a.mp4", "slow_b.mp4", "slow_c.mp4"] {
            fx.add_input(name);
        }
        let observer = Arc::new(RecordingObserver::default());
        let log = Arc::new(RecordingLog::default());
        let engine = test_engine(fx.config(2), &observer, &log);

        let session = engine.start(engine.scan().unwrap()).unwrap();
        session.pause();
        session.cancel();
        let summary = session.wait();

        let delivered = observer.summaries();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].queued, 0);
        assert_eq!(delivered[0].running, 0);
        assert_eq!(delivered[0], summary);
        assert!(summary.canceled >= 1);

        // Every settled job is recorded, and before the log closes
        assert_eq!(log.records().len(), 3);
        assert_eq!(log.late_count(), 0);
        assert_eq!(log.close_count(), 1);

        // The last update of every job is terminal before the batch ends
        for id in 1..=3 {
            let last = observer.updates_for(id).pop().unwrap();
            assert!(last.status.is_terminal(), "job {} ended as {}", id, last.status);
        }
    }
}

// ============================================================================
// Pause / resume
// ============================================================================

#[test]
fn test_pause_holds_queue_until_resume() {
    let fx = Fixture::new();
    for name in ["slow_a.mp4", "slow_b.mp4", "slow_c.mp4"] {
        fx.add_input(name);
    }
    let observer = Arc::new(RecordingObserver::default());
    let log = Arc::new(RecordingLog::default());
    let engine = test_engine(fx.config(1), &observer, &log);

    let session = engine.start(engine.scan().unwrap()).unwrap();
    session.pause();
    assert!(session.is_paused());

    // At most the job dequeued before the pause may run
    std::thread::sleep(Duration::from_millis(800));
    let started = session
        .jobs()
        .iter()
        .filter(|j| j.started_at.is_some())
        .count();
    assert!(started <= 1, "{} jobs started while paused", started);
    assert!(session.is_running());

    session.resume();
    let summary = session.wait();
    assert_eq!(summary.completed, 3);
}

// ============================================================================
// Retry
// ============================================================================

#[test]
fn test_retry_failed_requeues_and_completes() {
    let fx = Fixture::new();
    let flaky = fx.add_input("flaky_a.mp4");
    fx.add_input("long_b.mp4");
    let observer = Arc::new(RecordingObserver::default());
    let log = Arc::new(RecordingLog::default());
    let engine = test_engine(fx.config(2), &observer, &log);

    let session = engine.start(engine.scan().unwrap()).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        session.job(1).map(|j| j.status == JobStatus::Failed).unwrap_or(false)
    }));
    assert_eq!(session.job(1).unwrap().error, "first attempt fails");

    // The long job keeps a worker alive
    let mut marker = flaky.into_os_string();
    marker.push(".ok");
    fs::write(&marker, b"").unwrap();
    assert_eq!(session.retry_failed(), 1);

    let requeued = observer
        .updates_for(1)
        .into_iter()
        .find(|j| j.status == JobStatus::Queued)
        .unwrap();
    assert_eq!(requeued.progress, Some(0));
    assert!(requeued.error.is_empty());

    let summary = session.wait();
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(session.job(1).unwrap().status, JobStatus::Completed);

    // Failed attempt and successful retry are both recorded
    let attempts = log.records().iter().filter(|r| r.job_id == 1).count();
    assert_eq!(attempts, 2);
}

#[test]
fn test_retry_after_batch_end_is_noop() {
    let fx = Fixture::new();
    fx.add_input("fail_a.mp4");
    let observer = Arc::new(RecordingObserver::default());
    let log = Arc::new(RecordingLog::default());
    let engine = test_engine(fx.config(1), &observer, &log);

    let session = engine.start(engine.scan().unwrap()).unwrap();
    session.wait();

    assert_eq!(session.retry_failed(), 0);
    assert_eq!(session.job(1).unwrap().status, JobStatus::Failed);
}
