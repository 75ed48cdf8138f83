//! The worker subprocess.
//!
//! The engine spawns N copies of the binary with the hidden `worker`
//! subcommand and hands them jobs over stdin. Running tools out of
//! process is the point: a tool may deadlock, fork, or eat memory, and
//! the parent must always be able to kill the worker and carry on.
//!
//! The worker runs the tool, captures stdout and stderr incrementally
//! (so a timeout still yields partial output), classifies the exit,
//! parses the output into styled text, and replies with a finished
//! report.

use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use crate::engine::protocol::{Frame, JobSpec, WorkerReply, read_frame, write_frame};
use crate::report::{Report, Status};
use crate::snapshot;
use crate::textstyle::StyledText;
use crate::toolkit::{Applicability, Classifier, ToolDescriptor, ToolKind, tool_by_name};

/// Capture cap per output stream.
const MAX_CAPTURE_BYTES: usize = 256 * 1024;

/// Grace between SIGTERM and SIGKILL when a tool overruns.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Reads jobs from stdin until EOF. Runs with the codebase root as the
/// working directory.
pub async fn run(root: &Path) -> Result<()> {
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    loop {
        let frame = read_frame(&mut stdin).await?;
        let spec = match frame {
            None => return Ok(()),
            Some(Frame::Job(spec)) => spec,
            Some(_) => continue,
        };
        let job_id = spec.job_id;
        let report = execute_job(root, spec).await;
        write_frame(&mut stdout, &Frame::Reply(WorkerReply { job_id, report })).await?;
    }
}

/// Runs one job to a finished report. Tool failures of every kind end up
/// as statuses, never as errors.
pub async fn execute_job(root: &Path, spec: JobSpec) -> Report {
    let started_at = now_ms();
    let content_digest = snapshot::content_digest(&spec.abs_path).unwrap_or_default();
    let (status, body) = match tool_by_name(&spec.key.tool) {
        None => (
            Status::Error,
            StyledText::plain(format!("unknown tool: {}", spec.key.tool)),
        ),
        Some(tool) => run_descriptor(root, tool, &spec.abs_path, spec.timeout_s).await,
    };
    Report {
        key: spec.key,
        snapshot_key: spec.snapshot_key,
        status,
        body,
        content_digest,
        started_at,
        finished_at: now_ms(),
    }
}

/// Runs one descriptor against one file.
pub async fn run_descriptor(
    root: &Path,
    tool: &ToolDescriptor,
    abs_path: &Path,
    timeout_s: u64,
) -> (Status, StyledText) {
    if let Some(reason) = declined(tool, abs_path) {
        return (Status::NotApplicable, StyledText::plain(reason));
    }
    match tool.kind {
        ToolKind::Contents => builtin_contents(abs_path),
        ToolKind::Metadata => builtin_metadata(abs_path),
        ToolKind::Exec { .. } => {
            let argv = tool
                .argv(abs_path)
                .expect("exec tools always have an argv");
            run_exec(root, &argv, timeout_s, tool.classify).await
        }
    }
}

/// The tool's own applicability check, ahead of any subprocess work.
fn declined(tool: &ToolDescriptor, abs_path: &Path) -> Option<String> {
    match tool.applies {
        Applicability::Any => None,
        Applicability::Suffix(suffix) => {
            if abs_path.to_string_lossy().ends_with(suffix) {
                None
            } else {
                Some(format!("Only applies to *{suffix} files."))
            }
        }
        Applicability::SiblingTest => match sibling_test_path(abs_path) {
            Some(test) if test.exists() => None,
            Some(test) => Some(format!(
                "No matching test file: {}",
                test.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            )),
            None => Some("No matching test file.".to_string()),
        },
    }
}

/// `src.py` pairs with `src_test.py` in the same directory.
fn sibling_test_path(abs_path: &Path) -> Option<std::path::PathBuf> {
    let name = abs_path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".py")?;
    Some(abs_path.with_file_name(format!("{stem}_test.py")))
}

async fn run_exec(
    root: &Path,
    argv: &[String],
    timeout_s: u64,
    classifier: Classifier,
) -> (Status, StyledText) {
    let mut child = match Command::new(&argv[0])
        .args(&argv[1..])
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            return (
                Status::Error,
                StyledText::plain(format!("failed to start {}: {err}", argv[0])),
            );
        }
    };

    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let out_task = spawn_reader(child.stdout.take(), stdout_buf.clone());
    let err_task = spawn_reader(child.stderr.take(), stderr_buf.clone());

    let waited = tokio::time::timeout(Duration::from_secs(timeout_s), child.wait()).await;
    match waited {
        Ok(Ok(exit)) => {
            let _ = tokio::time::timeout(Duration::from_millis(500), async {
                let _ = out_task.await;
                let _ = err_task.await;
            })
            .await;
            let combined = combined_output(&stdout_buf, &stderr_buf);
            let code = exit.code().unwrap_or(-1);
            (
                classify_exit(classifier, code, &combined),
                StyledText::from_tool_output(&combined),
            )
        }
        Ok(Err(err)) => (
            Status::Error,
            StyledText::plain(format!("failed to wait for {}: {err}", argv[0])),
        ),
        Err(_) => {
            kill_gracefully(&mut child).await;
            // Give the pipe readers a moment to drain what was buffered.
            let _ = tokio::time::timeout(Duration::from_millis(200), async {
                let _ = out_task.await;
                let _ = err_task.await;
            })
            .await;
            let mut combined = combined_output(&stdout_buf, &stderr_buf);
            combined.extend_from_slice(
                format!("\n[timed out after {timeout_s}s; partial output above]\n").as_bytes(),
            );
            (Status::TimedOut, StyledText::from_tool_output(&combined))
        }
    }
}

/// Drains a child pipe into a shared buffer, capped but never stalling
/// the child on a full pipe.
fn spawn_reader<R>(
    reader: Option<R>,
    buf: Arc<Mutex<Vec<u8>>>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut guard = buf.lock().unwrap();
                    if guard.len() < MAX_CAPTURE_BYTES {
                        let take = n.min(MAX_CAPTURE_BYTES - guard.len());
                        guard.extend_from_slice(&chunk[..take]);
                    }
                }
            }
        }
    })
}

/// Stdout then stderr, truncated at a UTF-8 boundary when capped.
fn combined_output(
    stdout: &Arc<Mutex<Vec<u8>>>,
    stderr: &Arc<Mutex<Vec<u8>>>,
) -> Vec<u8> {
    let mut out = stdout.lock().unwrap().clone();
    let err = stderr.lock().unwrap();
    if !err.is_empty() {
        if !out.is_empty() && !out.ends_with(b"\n") {
            out.push(b'\n');
        }
        out.extend_from_slice(&err);
    }
    drop(err);
    if out.len() >= MAX_CAPTURE_BYTES {
        truncate_at_utf8_boundary(&mut out);
        out.extend_from_slice(b"\n[output truncated]\n");
    }
    out
}

/// Walks back from the end to a valid UTF-8 boundary.
fn truncate_at_utf8_boundary(bytes: &mut Vec<u8>) {
    while let Some(&last) = bytes.last() {
        // Continuation bytes are 10xxxxxx.
        if last & 0xc0 == 0x80 {
            bytes.pop();
        } else if last >= 0x80 {
            bytes.pop();
            break;
        } else {
            break;
        }
    }
}

fn classify_exit(classifier: Classifier, code: i32, combined: &[u8]) -> Status {
    match classifier {
        Classifier::ExitCode => {
            if code == 0 {
                Status::Ok
            } else {
                Status::Problem
            }
        }
        Classifier::Always => Status::Ok,
        Classifier::ExitTable { table, default } => table
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, s)| *s)
            .unwrap_or(default),
        Classifier::OutputRegex { pattern } => {
            let text = String::from_utf8_lossy(combined);
            match regex::Regex::new(pattern) {
                Ok(re) if re.is_match(&text) => Status::Problem,
                Ok(_) => Status::Ok,
                Err(_) => Status::Error,
            }
        }
    }
}

/// SIGTERM, a grace period, then SIGKILL.
async fn kill_gracefully(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
}

fn builtin_contents(abs_path: &Path) -> (Status, StyledText) {
    let bytes = match std::fs::read(abs_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            return (
                Status::Error,
                StyledText::plain(format!("unreadable: {err}")),
            );
        }
    };
    if std::str::from_utf8(&bytes).is_err() {
        return (Status::NotApplicable, StyledText::plain("Not unicode."));
    }
    let mut bytes = bytes;
    if bytes.len() > MAX_CAPTURE_BYTES {
        bytes.truncate(MAX_CAPTURE_BYTES);
        truncate_at_utf8_boundary(&mut bytes);
        bytes.extend_from_slice(b"\n[contents truncated]\n");
    }
    (Status::Ok, StyledText::from_tool_output(&bytes))
}

fn builtin_metadata(abs_path: &Path) -> (Status, StyledText) {
    let meta = match std::fs::metadata(abs_path) {
        Ok(meta) => meta,
        Err(err) => {
            return (
                Status::Error,
                StyledText::plain(format!("unreadable: {err}")),
            );
        }
    };
    let is_symlink = std::fs::symlink_metadata(abs_path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    let digest = snapshot::content_digest(abs_path).unwrap_or_else(|_| "?".to_string());
    let mime = file_utility_line(abs_path, &["--brief", "--mime-type"]);
    let kind = file_utility_line(abs_path, &["--brief"]);

    let mut text = String::new();
    let mut field = |name: &str, value: String| {
        text.push_str(&format!("{name:<14}: {value}\n"));
    };
    field("size", format!("{} ({} bytes)", pretty_bytes(meta.size()), meta.size()));
    field(
        "permissions",
        format!("{} ({:o})", mode_string(meta.mode()), meta.mode() & 0o7777),
    );
    field("modified", format_time(meta.mtime()));
    field("accessed", format_time(meta.atime()));
    field("owner", format!("{} (uid)", meta.uid()));
    field("group", format!("{} (gid)", meta.gid()));
    field("hardlinks", meta.nlink().to_string());
    field("symlink", if is_symlink { "yes" } else { "no" }.to_string());
    field("sha256", digest);
    field("mime type", mime);
    field("file type", kind);
    (Status::Ok, StyledText::plain(text))
}

fn file_utility_line(abs_path: &Path, args: &[&str]) -> String {
    std::process::Command::new("file")
        .args(args)
        .arg(abs_path)
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .unwrap_or_else(|| "?".to_string())
}

fn pretty_bytes(size: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = size as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{size} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

fn mode_string(mode: u32) -> String {
    let kind = match mode & 0o170000 {
        0o040000 => 'd',
        0o120000 => 'l',
        _ => '-',
    };
    let mut out = String::new();
    out.push(kind);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

fn format_time(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
