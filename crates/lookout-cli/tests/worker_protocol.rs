//! The hidden `worker` subcommand speaks the framed job protocol over
//! its standard streams.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};

use lookout_core::engine::protocol::{Frame, JobSpec};
use lookout_core::report::{EntryKey, SnapshotKey, Status};
use lookout_core::snapshot::FileSnapshot;

fn spawn_worker(root: &std::path::Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_lookout"))
        .arg("worker")
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn worker")
}

fn encode(frame: &Frame) -> Vec<u8> {
    let payload = serde_json::to_vec(frame).unwrap();
    let mut out = (payload.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(&payload);
    out
}

fn read_frame(reader: &mut impl Read) -> Frame {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len).expect("frame length");
    let mut payload = vec![0u8; u32::from_le_bytes(len) as usize];
    reader.read_exact(&mut payload).expect("frame payload");
    serde_json::from_slice(&payload).expect("frame decodes")
}

#[test]
fn worker_runs_a_contents_job_and_replies() {
    let dir = tempfile::tempdir().unwrap();
    let abs = dir.path().join("hello.py");
    std::fs::write(&abs, "print(\"hi\")\n").unwrap();
    let snapshot = FileSnapshot::of(&std::fs::metadata(&abs).unwrap());

    let mut child = spawn_worker(dir.path());
    let spec = JobSpec {
        job_id: 7,
        key: EntryKey::new("hello.py", "contents"),
        abs_path: abs.clone(),
        snapshot_key: SnapshotKey::new(&snapshot, "1"),
        timeout_s: 20,
    };
    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(&encode(&Frame::Job(spec))).unwrap();
    stdin.flush().unwrap();

    let mut stdout = child.stdout.take().unwrap();
    let frame = read_frame(&mut stdout);
    let Frame::Reply(reply) = frame else {
        panic!("expected a reply frame");
    };
    assert_eq!(reply.job_id, 7);
    assert_eq!(reply.report.status, Status::Ok);
    assert!(reply.report.body.to_plain().contains("print"));
    assert_eq!(reply.report.content_digest.len(), 64);
    assert!(reply.report.finished_at >= reply.report.started_at);

    // EOF on stdin is a clean shutdown.
    drop(stdin);
    let status = child.wait().unwrap();
    assert!(status.success());
}

#[test]
fn worker_reports_unknown_tools_as_errors() {
    let dir = tempfile::tempdir().unwrap();
    let abs = dir.path().join("x.txt");
    std::fs::write(&abs, "x").unwrap();
    let snapshot = FileSnapshot::of(&std::fs::metadata(&abs).unwrap());

    let mut child = spawn_worker(dir.path());
    let spec = JobSpec {
        job_id: 1,
        key: EntryKey::new("x.txt", "no_such_tool"),
        abs_path: abs,
        snapshot_key: SnapshotKey::new(&snapshot, "1"),
        timeout_s: 5,
    };
    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(&encode(&Frame::Job(spec))).unwrap();
    drop(stdin);

    let mut stdout = child.stdout.take().unwrap();
    let Frame::Reply(reply) = read_frame(&mut stdout) else {
        panic!("expected a reply frame");
    };
    assert_eq!(reply.report.status, Status::Error);
    assert!(reply.report.body.to_plain().contains("unknown tool"));
    assert!(child.wait().unwrap().success());
}
