//! Framed messages between the engine and its worker subprocesses.
//!
//! Frames are a u32 little-endian length followed by a JSON payload with
//! an explicit `kind` tag, so the channel is self-describing and either
//! side can reject garbage without guessing.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::report::{EntryKey, Report, SnapshotKey};

/// Upper bound on a single frame; a report body is capped well below
/// this, so anything larger is corruption.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// One job handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_id: u64,
    pub key: EntryKey,
    pub abs_path: PathBuf,
    pub snapshot_key: SnapshotKey,
    pub timeout_s: u64,
}

/// A finished job coming back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub job_id: u64,
    pub report: Report,
}

/// Everything that can cross the pipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Job(JobSpec),
    Reply(WorkerReply),
}

/// Writes one frame and flushes.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let payload = serde_json::to_vec(frame).context("encode frame")?;
    writer
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await
        .context("write frame length")?;
    writer.write_all(&payload).await.context("write frame")?;
    writer.flush().await.context("flush frame")?;
    Ok(())
}

/// Reads one frame; `None` on a clean EOF at a frame boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err).context("read frame length"),
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        bail!("frame length {len} exceeds limit");
    }
    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .context("read frame payload")?;
    let frame = serde_json::from_slice(&payload).context("decode frame")?;
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Status;
    use crate::snapshot::FileSnapshot;
    use crate::textstyle::StyledText;

    fn sample_job() -> JobSpec {
        let snap = FileSnapshot {
            size: 1,
            mtime_ns: 2,
            mode: 3,
            ino: 4,
            dev: 5,
        };
        JobSpec {
            job_id: 42,
            key: EntryKey::new("a.py", "python_syntax"),
            abs_path: PathBuf::from("/codebase/a.py"),
            snapshot_key: SnapshotKey::new(&snap, "1"),
            timeout_s: 60,
        }
    }

    #[tokio::test]
    async fn frames_round_trip_over_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let job = Frame::Job(sample_job());
        write_frame(&mut client, &job).await.unwrap();
        let reply = Frame::Reply(WorkerReply {
            job_id: 42,
            report: Report {
                key: EntryKey::new("a.py", "python_syntax"),
                snapshot_key: sample_job().snapshot_key,
                status: Status::Ok,
                body: StyledText::plain("fine"),
                content_digest: "d".to_string(),
                started_at: 1,
                finished_at: 2,
            },
        });
        write_frame(&mut client, &reply).await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server).await.unwrap(), Some(job));
        assert_eq!(read_frame(&mut server).await.unwrap(), Some(reply));
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn truncated_frames_error_instead_of_hanging() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(&10u32.to_le_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);
        assert!(read_frame(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&(MAX_FRAME_LEN + 1).to_le_bytes())
            .await
            .unwrap();
        drop(client);
        assert!(read_frame(&mut server).await.is_err());
    }
}
