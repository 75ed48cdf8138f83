//! End-to-end engine runs against real worker subprocesses.
//!
//! Only builtin tools are used so the tests pass on hosts without any
//! analyzers installed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lookout_core::engine::{self, EngineConfig, EngineEvent, JobRequest};
use lookout_core::report::{EntryKey, Report, SnapshotKey, Status};
use lookout_core::snapshot::FileSnapshot;
use tokio::sync::mpsc;

fn engine_config(root: &Path, workers: usize) -> EngineConfig {
    EngineConfig {
        worker_program: PathBuf::from(env!("CARGO_BIN_EXE_lookout")),
        worker_args: vec!["worker".to_string()],
        root: root.to_path_buf(),
        workers,
    }
}

fn contents_request(root: &Path, name: &str, pos: (u16, u16)) -> JobRequest {
    let abs = root.join(name);
    let snapshot = FileSnapshot::of(&std::fs::metadata(&abs).unwrap());
    JobRequest {
        key: EntryKey::new(name, "contents"),
        abs_path: abs,
        snapshot_key: SnapshotKey::new(&snapshot, "1"),
        timeout_s: 20,
        pos,
        boosted: false,
    }
}

async fn next_event(
    events: &mut mpsc::Receiver<EngineEvent>,
    within: Duration,
) -> Option<EngineEvent> {
    tokio::time::timeout(within, events.recv()).await.ok()?
}

async fn collect_finished(
    events: &mut mpsc::Receiver<EngineEvent>,
    count: usize,
) -> Vec<Report> {
    let mut reports = Vec::new();
    while reports.len() < count {
        match next_event(events, Duration::from_secs(60)).await {
            Some(EngineEvent::Finished { report }) => reports.push(report),
            Some(_) => {}
            None => panic!("engine went quiet with {}/{count} reports", reports.len()),
        }
    }
    reports
}

#[tokio::test(flavor = "multi_thread")]
async fn engine_runs_jobs_and_suppresses_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "alpha\n").unwrap();
    std::fs::write(dir.path().join("b.txt"), "beta\n").unwrap();

    let (engine, mut events) = engine::spawn(engine_config(dir.path(), 2));
    let req_a = contents_request(dir.path(), "a.txt", (0, 0));
    let req_b = contents_request(dir.path(), "b.txt", (0, 1));
    // The second copy of req_a is an identical (entry, snapshot) and
    // must be a no-op.
    engine.enqueue(vec![req_a.clone(), req_a.clone(), req_b]);

    let reports = collect_finished(&mut events, 2).await;
    let mut paths: Vec<String> = reports.iter().map(|r| r.key.path.clone()).collect();
    paths.sort();
    assert_eq!(paths, vec!["a.txt", "b.txt"]);
    for report in &reports {
        assert_eq!(report.status, Status::Ok);
    }
    let body_a = reports
        .iter()
        .find(|r| r.key.path == "a.txt")
        .unwrap()
        .body
        .to_plain();
    assert!(body_a.contains("alpha"));

    // Nothing else runs: the duplicate was suppressed.
    assert!(
        next_event(&mut events, Duration::from_millis(500)).await.is_none(),
        "unexpected extra event"
    );
    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn the_focused_entry_runs_first() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["one.txt", "two.txt", "three.txt"] {
        std::fs::write(dir.path().join(name), name).unwrap();
    }

    // A single worker forces strictly serialized dispatch.
    let (engine, mut events) = engine::spawn(engine_config(dir.path(), 1));
    let focus = EntryKey::new("three.txt", "contents");
    engine.set_focus((0, 2), Some(focus.clone()));
    engine.enqueue(vec![
        contents_request(dir.path(), "one.txt", (0, 0)),
        contents_request(dir.path(), "two.txt", (0, 1)),
        contents_request(dir.path(), "three.txt", (0, 2)),
    ]);

    let reports = collect_finished(&mut events, 3).await;
    assert_eq!(reports[0].key, focus, "focus tier runs first");
    // The remaining two follow proximity order from the cursor at row 2.
    assert_eq!(reports[1].key.path, "two.txt");
    assert_eq!(reports[2].key.path, "one.txt");
    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn started_events_precede_reports() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "x").unwrap();

    let (engine, mut events) = engine::spawn(engine_config(dir.path(), 1));
    engine.enqueue(vec![contents_request(dir.path(), "a.txt", (0, 0))]);

    match next_event(&mut events, Duration::from_secs(60)).await {
        Some(EngineEvent::Started { key, .. }) => assert_eq!(key.path, "a.txt"),
        other => panic!("expected Started, got {other:?}"),
    }
    match next_event(&mut events, Duration::from_secs(60)).await {
        Some(EngineEvent::Finished { report }) => assert_eq!(report.status, Status::Ok),
        other => panic!("expected Finished, got {other:?}"),
    }
    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn paused_engines_do_not_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "x").unwrap();

    let (engine, mut events) = engine::spawn(engine_config(dir.path(), 1));
    engine.set_paused(true);
    engine.enqueue(vec![contents_request(dir.path(), "a.txt", (0, 0))]);
    assert!(
        next_event(&mut events, Duration::from_secs(2)).await.is_none(),
        "paused engine dispatched anyway"
    );

    engine.set_paused(false);
    let reports = collect_finished(&mut events, 1).await;
    assert_eq!(reports[0].status, Status::Ok);
    engine.shutdown();
}
