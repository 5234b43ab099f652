// End-to-end: scan policies, output publishing and the on-disk logs
#![cfg(unix)]

use ffbatch::config::CollisionPolicy;
use ffbatch::engine::{BatchEngine, BatchObserver, JobStatus};
use ffbatch::stats::BatchSummary;
use std::fs;
use std::sync::Arc;

use crate::common::helpers::*;

fn engine_with_default_log(
    config: ffbatch::config::Config,
    observer: &Arc<RecordingObserver>,
) -> BatchEngine {
    BatchEngine::new(config)
        .with_toolchain(Arc::new(FakeToolchain { available: true }))
        .with_command_builder(Arc::new(ScriptCommandBuilder))
        .with_prober(Arc::new(FakeProber::default()))
        .with_observer(Arc::clone(observer) as Arc<dyn BatchObserver>)
}

#[test]
fn test_existing_output_is_skipped_and_not_encoded() {
    let fx = Fixture::new();
    fx.add_input("a.mp4");
    fx.add_input("b.mp4");
    fx.add_input("c.mp4");
    let existing = fx.add_output("b.mp4");
    let observer = Arc::new(RecordingObserver::default());
    let log = Arc::new(RecordingLog::default());
    let engine = test_engine(fx.config(2), &observer, &log);

    let jobs = engine.scan().unwrap();
    assert_eq!(
        statuses(&jobs),
        vec![JobStatus::Queued, JobStatus::Skipped, JobStatus::Queued]
    );

    let session = engine.start(jobs).unwrap();
    let summary = session.wait();

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.skipped, 1);
    // Skipped jobs are reported but never logged or run
    assert_eq!(log.records().len(), 2);
    assert!(observer.updates_for(2).iter().all(|j| j.status == JobStatus::Skipped));
    assert_eq!(fs::read_to_string(existing).unwrap(), "old");
}

#[test]
fn test_overwrite_policy_replaces_output() {
    let fx = Fixture::new();
    fx.add_input("a.mp4");
    let existing = fx.add_output("a.mp4");
    let mut config = fx.config(1);
    config.batch.collision_policy = CollisionPolicy::Overwrite;
    let observer = Arc::new(RecordingObserver::default());
    let log = Arc::new(RecordingLog::default());
    let engine = test_engine(config, &observer, &log);

    let session = engine.start(engine.scan().unwrap()).unwrap();
    session.wait();

    assert_eq!(session.job(1).unwrap().status, JobStatus::Completed);
    assert_eq!(fs::read_to_string(existing).unwrap(), "data");
}

#[test]
fn test_suffix_policy_keeps_existing_output() {
    let fx = Fixture::new();
    fx.add_input("a.mp4");
    let existing = fx.add_output("a.mp4");
    let mut config = fx.config(1);
    config.batch.collision_policy = CollisionPolicy::Suffix;
    let observer = Arc::new(RecordingObserver::default());
    let log = Arc::new(RecordingLog::default());
    let engine = test_engine(config, &observer, &log);

    let session = engine.start(engine.scan().unwrap()).unwrap();
    session.wait();

    let job = session.job(1).unwrap();
    assert_eq!(job.output_path, fx.output.join("a_1.mp4"));
    assert_eq!(fs::read_to_string(existing).unwrap(), "old");
    assert_eq!(fs::read_to_string(&job.output_path).unwrap(), "data");
}

#[test]
fn test_nested_inputs_mirror_into_output_tree() {
    let fx = Fixture::new();
    fx.add_input("shows/s01/ep1.mkv");
    fx.add_input("movies/film.mp4");
    let observer = Arc::new(RecordingObserver::default());
    let log = Arc::new(RecordingLog::default());
    let engine = test_engine(fx.config(2), &observer, &log);

    let session = engine.start(engine.scan().unwrap()).unwrap();
    session.wait();

    assert_eq!(
        fx.output_files(),
        vec![
            fx.output.join("movies/film.mp4"),
            fx.output.join("shows/s01/ep1.mkv"),
        ]
    );
}

#[test]
fn test_default_logger_writes_csv_jsonl_and_summary() {
    let fx = Fixture::new();
    fx.add_input("a.mp4");
    fx.add_input("fail_b.mp4");
    let logs = fx.dir.path().join("logs");
    let mut config = fx.config(2);
    config.logging.enable_csv = true;
    config.logging.csv_path = Some(logs.join("items.csv"));
    config.logging.enable_json = true;
    config.logging.json_path = Some(logs.join("items.jsonl"));
    let observer = Arc::new(RecordingObserver::default());
    let engine = engine_with_default_log(config, &observer);

    let session = engine.start(engine.scan().unwrap()).unwrap();
    let summary = session.wait();

    let csv = fs::read_to_string(logs.join("items.csv")).unwrap();
    assert_eq!(csv.lines().count(), 3);
    assert!(csv.lines().next().unwrap().starts_with("Timestamp,"));
    assert!(csv.contains("Unknown encoder libfoo"));

    let jsonl = fs::read_to_string(logs.join("items.jsonl")).unwrap();
    let statuses: Vec<String> = jsonl
        .lines()
        .map(|l| {
            let v: serde_json::Value = serde_json::from_str(l).unwrap();
            v["status"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(statuses.len(), 2);
    assert!(statuses.contains(&"completed".to_string()));
    assert!(statuses.contains(&"failed".to_string()));

    let written: BatchSummary = serde_json::from_str(
        &fs::read_to_string(logs.join("items.jsonl.summary.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(written, summary);
    assert_eq!(written.completed, 1);
    assert_eq!(written.failed, 1);
    assert_eq!(observer.summaries(), vec![summary]);
}
