//! The job engine.
//!
//! Owns a pool of long-lived worker subprocesses and a priority queue of
//! pending jobs. Dispatch follows the queue order (focus, boost,
//! proximity, enqueue sequence); a focus job may preempt a running
//! worker, rate limited so rapid cursor motion cannot live-lock the
//! pool. Workers that crash get the job retried once; workers that stop
//! answering are killed and the job is reported as timed out.
//!
//! The engine runs as one task; workers are one task each, owning their
//! subprocess. All communication is over channels, and the completion
//! channel back to the UI is bounded so a slow consumer throttles
//! dispatch instead of buffering without limit.

pub mod protocol;
mod queue;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::report::{EntryKey, Report, SnapshotKey, Status};
use crate::textstyle::StyledText;

use protocol::{Frame, JobSpec, WorkerReply};
use queue::{PendingJob, PendingQueue, score_job};

/// Completion channel capacity; workers block when the UI falls behind.
const COMPLETION_CAPACITY: usize = 256;

/// Minimum spacing between preemptions.
const PREEMPT_MIN_INTERVAL: Duration = Duration::from_millis(200);

/// Slack on top of the job timeout before the engine declares the
/// worker itself unresponsive. Workers enforce the job timeout on the
/// tool; this backstop only fires when the worker is wedged.
const WATCHDOG_GRACE: Duration = Duration::from_secs(10);

/// Grace between SIGTERM and SIGKILL when putting a worker down.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// How the engine finds its worker program.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Executable to spawn for each worker, normally the running binary.
    pub worker_program: PathBuf,
    /// Arguments selecting worker mode.
    pub worker_args: Vec<String>,
    /// Codebase root; workers run with this as their working directory.
    pub root: PathBuf,
    pub workers: usize,
}

/// Everything needed to run one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub key: EntryKey,
    pub abs_path: PathBuf,
    pub snapshot_key: SnapshotKey,
    pub timeout_s: u64,
    /// Grid position (column, row) used for proximity scoring.
    pub pos: (u16, u16),
    /// Tier 1: part of a refresh-all-of-this-tool request.
    pub boosted: bool,
}

/// Commands into the engine.
#[derive(Debug)]
pub enum EngineCommand {
    Enqueue(Vec<JobRequest>),
    /// Cursor moved; rescore everything pending.
    SetFocus {
        pos: (u16, u16),
        focus: Option<EntryKey>,
    },
    /// Grid positions changed wholesale (sort toggled, rows shifted).
    SetPositions(Vec<(EntryKey, (u16, u16))>),
    /// Drop pending jobs for a path that changed or disappeared.
    DropPending { path: String },
    SetPaused(bool),
    Shutdown,
}

/// Events out of the engine.
#[derive(Debug)]
pub enum EngineEvent {
    Started {
        key: EntryKey,
        snapshot_key: SnapshotKey,
    },
    /// The job went back to pending (preempted or retried).
    Requeued {
        key: EntryKey,
        snapshot_key: SnapshotKey,
    },
    Finished { report: Report },
}

/// Cheap cloneable handle for sending commands.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) {
        let _ = self.cmd_tx.send(command);
    }

    pub fn enqueue(&self, requests: Vec<JobRequest>) {
        if !requests.is_empty() {
            self.send(EngineCommand::Enqueue(requests));
        }
    }

    pub fn set_focus(&self, pos: (u16, u16), focus: Option<EntryKey>) {
        self.send(EngineCommand::SetFocus { pos, focus });
    }

    pub fn set_positions(&self, positions: Vec<(EntryKey, (u16, u16))>) {
        self.send(EngineCommand::SetPositions(positions));
    }

    pub fn drop_pending(&self, path: &str) {
        self.send(EngineCommand::DropPending {
            path: path.to_string(),
        });
    }

    pub fn set_paused(&self, paused: bool) {
        self.send(EngineCommand::SetPaused(paused));
    }

    pub fn shutdown(&self) {
        self.send(EngineCommand::Shutdown);
    }
}

/// Starts the engine and its worker pool. Returns the command handle
/// and the bounded completion stream.
pub fn spawn(config: EngineConfig) -> (EngineHandle, mpsc::Receiver<EngineEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::channel(COMPLETION_CAPACITY);
    tokio::spawn(engine_loop(config, cmd_rx, event_tx));
    (EngineHandle { cmd_tx }, event_rx)
}

enum WorkerOutcome {
    Completed {
        worker: usize,
        job: PendingJob,
        report: Report,
    },
    Preempted {
        worker: usize,
        job: PendingJob,
    },
    Died {
        worker: usize,
        job: PendingJob,
        detail: String,
    },
    Unresponsive {
        worker: usize,
        job: PendingJob,
    },
}

struct WorkerLink {
    job_tx: mpsc::Sender<PendingJob>,
    preempt_tx: mpsc::UnboundedSender<()>,
}

async fn engine_loop(
    config: EngineConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    let worker_count = config.workers.max(1);
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<WorkerOutcome>(worker_count);
    let mut links = Vec::with_capacity(worker_count);
    for id in 0..worker_count {
        let (job_tx, job_rx) = mpsc::channel(1);
        let (preempt_tx, preempt_rx) = mpsc::unbounded_channel();
        links.push(WorkerLink { job_tx, preempt_tx });
        tokio::spawn(worker_task(
            id,
            config.worker_program.clone(),
            config.worker_args.clone(),
            config.root.clone(),
            job_rx,
            preempt_rx,
            outcome_tx.clone(),
        ));
    }
    drop(outcome_tx);
    info!(workers = worker_count, "job engine started");

    let mut queue = PendingQueue::new();
    let mut positions: HashMap<EntryKey, (u16, u16)> = HashMap::new();
    let mut cursor = (0u16, 0u16);
    let mut focus: Option<EntryKey> = None;
    let mut paused = false;
    let mut next_seq = 0u64;
    let mut idle: Vec<usize> = (0..worker_count).collect();
    let mut running: HashMap<usize, PendingJob> = HashMap::new();
    let mut last_preempt = Instant::now() - PREEMPT_MIN_INTERVAL;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(EngineCommand::Shutdown) => break,
                    Some(EngineCommand::Enqueue(requests)) => {
                        for request in requests {
                            let duplicate = queue.contains(&request.key, &request.snapshot_key)
                                || running.values().any(|job| {
                                    job.request.key == request.key
                                        && job.request.snapshot_key == request.snapshot_key
                                });
                            if duplicate {
                                continue;
                            }
                            queue.push(PendingJob {
                                seq: next_seq,
                                attempt: 0,
                                request,
                            });
                            next_seq += 1;
                        }
                    }
                    Some(EngineCommand::SetFocus { pos, focus: new_focus }) => {
                        cursor = pos;
                        focus = new_focus;
                    }
                    Some(EngineCommand::SetPositions(updated)) => {
                        positions = updated.into_iter().collect();
                    }
                    Some(EngineCommand::DropPending { path }) => {
                        queue.remove_path(&path);
                    }
                    Some(EngineCommand::SetPaused(value)) => {
                        paused = value;
                        debug!(paused, "engine pause toggled");
                    }
                }
            }
            outcome = outcome_rx.recv() => {
                let Some(outcome) = outcome else { break };
                match outcome {
                    WorkerOutcome::Completed { worker, job: _, report } => {
                        running.remove(&worker);
                        idle.push(worker);
                        if event_tx.send(EngineEvent::Finished { report }).await.is_err() {
                            break;
                        }
                    }
                    WorkerOutcome::Preempted { worker, job } => {
                        running.remove(&worker);
                        idle.push(worker);
                        let key = job.request.key.clone();
                        let snapshot_key = job.request.snapshot_key.clone();
                        queue.push(job);
                        if event_tx
                            .send(EngineEvent::Requeued { key, snapshot_key })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    WorkerOutcome::Died { worker, mut job, detail } => {
                        running.remove(&worker);
                        idle.push(worker);
                        job.attempt += 1;
                        if job.attempt == 1 {
                            warn!(key = %job.request.key, detail, "worker died, retrying job");
                            let key = job.request.key.clone();
                            let snapshot_key = job.request.snapshot_key.clone();
                            queue.push(job);
                            if event_tx
                                .send(EngineEvent::Requeued { key, snapshot_key })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        } else {
                            warn!(key = %job.request.key, detail, "worker died twice, giving up");
                            let report = synthesized_report(
                                &job,
                                Status::Error,
                                format!("worker crashed twice running this tool\n{detail}\n"),
                            );
                            if event_tx.send(EngineEvent::Finished { report }).await.is_err() {
                                break;
                            }
                        }
                    }
                    WorkerOutcome::Unresponsive { worker, job } => {
                        running.remove(&worker);
                        idle.push(worker);
                        let report = synthesized_report(
                            &job,
                            Status::TimedOut,
                            format!(
                                "worker stopped responding and was killed after {}s\n",
                                job.request.timeout_s
                            ),
                        );
                        if event_tx.send(EngineEvent::Finished { report }).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        if !dispatch(
            &mut queue,
            &mut idle,
            &mut running,
            &links,
            cursor,
            focus.as_ref(),
            &positions,
            paused,
            &event_tx,
        )
        .await
        {
            break;
        }

        maybe_preempt(
            &queue,
            &idle,
            &running,
            &links,
            cursor,
            focus.as_ref(),
            &positions,
            paused,
            &mut last_preempt,
        );
    }
    debug!("job engine stopped");
}

/// Hands queued jobs to idle workers in priority order. Returns false
/// when the event stream is gone.
#[allow(clippy::too_many_arguments)]
async fn dispatch(
    queue: &mut PendingQueue,
    idle: &mut Vec<usize>,
    running: &mut HashMap<usize, PendingJob>,
    links: &[WorkerLink],
    cursor: (u16, u16),
    focus: Option<&EntryKey>,
    positions: &HashMap<EntryKey, (u16, u16)>,
    paused: bool,
    event_tx: &mpsc::Sender<EngineEvent>,
) -> bool {
    if paused {
        return true;
    }
    while let Some(worker) = idle.pop() {
        let blocked: HashSet<EntryKey> = running
            .values()
            .map(|job| job.request.key.clone())
            .collect();
        let Some(job) = queue.pop_best(cursor, focus, positions, &blocked) else {
            idle.push(worker);
            return true;
        };
        let key = job.request.key.clone();
        let snapshot_key = job.request.snapshot_key.clone();
        running.insert(worker, job.clone());
        if links[worker].job_tx.send(job).await.is_err() {
            // Worker task is gone; this engine is shutting down.
            return false;
        }
        if event_tx
            .send(EngineEvent::Started { key, snapshot_key })
            .await
            .is_err()
        {
            return false;
        }
    }
    true
}

/// Kills the lowest-priority running worker when a focus job is stuck
/// behind a full pool, at most once per rate-limit window.
#[allow(clippy::too_many_arguments)]
fn maybe_preempt(
    queue: &PendingQueue,
    idle: &[usize],
    running: &HashMap<usize, PendingJob>,
    links: &[WorkerLink],
    cursor: (u16, u16),
    focus: Option<&EntryKey>,
    positions: &HashMap<EntryKey, (u16, u16)>,
    paused: bool,
    last_preempt: &mut Instant,
) {
    if paused || !idle.is_empty() || running.is_empty() {
        return;
    }
    if last_preempt.elapsed() < PREEMPT_MIN_INTERVAL {
        return;
    }
    let blocked = HashSet::new();
    let Some(best) = queue.best_score(cursor, focus, positions, &blocked) else {
        return;
    };
    if best.tier != 0 {
        return;
    }
    let victim = running
        .iter()
        .map(|(worker, job)| (score_job(job, cursor, focus, positions), *worker))
        .max();
    let Some((victim_score, worker)) = victim else {
        return;
    };
    if victim_score <= best {
        return;
    }
    debug!(worker, "preempting for focus job");
    *last_preempt = Instant::now();
    let _ = links[worker].preempt_tx.send(());
}

fn synthesized_report(job: &PendingJob, status: Status, message: String) -> Report {
    let now = chrono::Utc::now().timestamp_millis();
    Report {
        key: job.request.key.clone(),
        snapshot_key: job.request.snapshot_key.clone(),
        status,
        body: StyledText::plain(message),
        content_digest: String::new(),
        started_at: now,
        finished_at: now,
    }
}

// ── Worker pool ─────────────────────────────────────────────────────────

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

async fn spawn_process(
    program: &PathBuf,
    args: &[String],
    root: &PathBuf,
) -> Result<WorkerProcess> {
    let mut child = Command::new(program)
        .args(args)
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawn worker {}", program.display()))?;
    let stdin = child.stdin.take().context("take worker stdin")?;
    let stdout = BufReader::new(child.stdout.take().context("take worker stdout")?);
    Ok(WorkerProcess {
        child,
        stdin,
        stdout,
    })
}

/// SIGTERM, a grace period, then SIGKILL.
async fn kill_process(process: &mut Option<WorkerProcess>) {
    let Some(mut process) = process.take() else {
        return;
    };
    if let Some(pid) = process.child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
        if tokio::time::timeout(KILL_GRACE, process.child.wait())
            .await
            .is_ok()
        {
            return;
        }
    }
    let _ = process.child.kill().await;
}

enum Step {
    Reply(WorkerReply),
    Desync,
    IoError(String),
    Watchdog,
    Preempt,
}

/// One worker slot: owns its subprocess across jobs, replacing it after
/// kills and crashes.
async fn worker_task(
    id: usize,
    program: PathBuf,
    args: Vec<String>,
    root: PathBuf,
    mut job_rx: mpsc::Receiver<PendingJob>,
    mut preempt_rx: mpsc::UnboundedReceiver<()>,
    outcome_tx: mpsc::Sender<WorkerOutcome>,
) {
    let mut process: Option<WorkerProcess> = None;
    while let Some(job) = job_rx.recv().await {
        // Preemptions aimed at a previous job are stale.
        while preempt_rx.try_recv().is_ok() {}

        if process.is_none() {
            match spawn_process(&program, &args, &root).await {
                Ok(p) => process = Some(p),
                Err(err) => {
                    let outcome = WorkerOutcome::Died {
                        worker: id,
                        job,
                        detail: format!("{err:#}"),
                    };
                    if outcome_tx.send(outcome).await.is_err() {
                        return;
                    }
                    continue;
                }
            }
        }

        let spec = JobSpec {
            job_id: job.seq,
            key: job.request.key.clone(),
            abs_path: job.request.abs_path.clone(),
            snapshot_key: job.request.snapshot_key.clone(),
            timeout_s: job.request.timeout_s,
        };
        let send_result = {
            let proc = process.as_mut().expect("worker process exists");
            protocol::write_frame(&mut proc.stdin, &Frame::Job(spec)).await
        };
        if let Err(err) = send_result {
            kill_process(&mut process).await;
            let outcome = WorkerOutcome::Died {
                worker: id,
                job,
                detail: format!("failed to send job: {err:#}"),
            };
            if outcome_tx.send(outcome).await.is_err() {
                return;
            }
            continue;
        }

        let watchdog = Duration::from_secs(job.request.timeout_s) + WATCHDOG_GRACE;
        let step = {
            let proc = process.as_mut().expect("worker process exists");
            tokio::select! {
                frame = protocol::read_frame(&mut proc.stdout) => match frame {
                    Ok(Some(Frame::Reply(reply))) if reply.job_id == job.seq => Step::Reply(reply),
                    Ok(Some(_)) => Step::Desync,
                    Ok(None) => Step::IoError("worker exited without replying".to_string()),
                    Err(err) => Step::IoError(format!("{err:#}")),
                },
                _ = tokio::time::sleep(watchdog) => Step::Watchdog,
                _ = preempt_rx.recv() => Step::Preempt,
            }
        };

        let outcome = match step {
            Step::Reply(reply) => WorkerOutcome::Completed {
                worker: id,
                job,
                report: reply.report,
            },
            Step::Desync => {
                kill_process(&mut process).await;
                WorkerOutcome::Died {
                    worker: id,
                    job,
                    detail: "worker protocol desync".to_string(),
                }
            }
            Step::IoError(detail) => {
                kill_process(&mut process).await;
                WorkerOutcome::Died {
                    worker: id,
                    job,
                    detail,
                }
            }
            Step::Watchdog => {
                kill_process(&mut process).await;
                WorkerOutcome::Unresponsive { worker: id, job }
            }
            Step::Preempt => {
                kill_process(&mut process).await;
                WorkerOutcome::Preempted { worker: id, job }
            }
        };
        if outcome_tx.send(outcome).await.is_err() {
            return;
        }
    }
    // Engine is shutting down: EOF lets the worker exit on its own, the
    // kill fallback covers the rest.
    if let Some(mut p) = process.take() {
        let _ = p.stdin.shutdown().await;
        drop(p.stdin);
        if tokio::time::timeout(Duration::from_secs(1), p.child.wait())
            .await
            .is_err()
        {
            let _ = p.child.kill().await;
        }
    }
}
