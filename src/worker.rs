//! Per-connection worker: drains one inbound stream into one artifact.
//!
//! The receive is bounded by one tick. Every tick that passes without data
//! counts as idle; any data resets the count. When the count reaches the
//! limit the artifact is finalized (sentinel if anything arrived, empty
//! otherwise) and the connection is dropped.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use uuid::Uuid;

use crate::artifact::Artifact;
use crate::config::ServerConfig;
use crate::protocol::{timeouts, CHUNK_SIZE, SENTINEL};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionOutcome {
    /// Peer closed its side cleanly
    Completed,
    /// Stalled after sending data; content replaced by the sentinel
    TimedOutWithData,
    /// Never sent anything; artifact left empty
    TimedOutNoData,
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::TimedOutWithData => "timed_out_with_data",
            SessionOutcome::TimedOutNoData => "timed_out_no_data",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub peer: SocketAddr,
    pub artifact: PathBuf,
    pub bytes_received: u64,
    pub outcome: SessionOutcome,
    pub elapsed: Duration,
}

/// A session that ended on a receive or artifact error. Carries the counters
/// reached before the failure so the journal reflects what landed on disk.
#[derive(Debug)]
pub struct SessionFailure {
    pub bytes_received: u64,
    pub elapsed: Duration,
    pub error: anyhow::Error,
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#} (after {} bytes)", self.error, self.bytes_received)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdleLimits {
    pub tick: Duration,
    pub max_idle_ticks: u32,
}

impl Default for IdleLimits {
    fn default() -> Self {
        Self {
            tick: timeouts::tick(),
            max_idle_ticks: timeouts::IDLE_TICKS,
        }
    }
}

impl From<&ServerConfig> for IdleLimits {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            tick: cfg.tick(),
            max_idle_ticks: cfg.idle_ticks,
        }
    }
}

/// One accepted transport bound to its artifact.
pub struct Connection<S> {
    stream: S,
    peer: SocketAddr,
    session_id: Uuid,
    idle_ticks: u32,
    bytes_received: u64,
    artifact: Artifact,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create the artifact before anything is read from `stream`.
    pub async fn open(stream: S, peer: SocketAddr, session_id: Uuid, path: PathBuf) -> Result<Self> {
        let artifact = Artifact::create(path).await?;
        Ok(Self {
            stream,
            peer,
            session_id,
            idle_ticks: 0,
            bytes_received: 0,
            artifact,
        })
    }

    /// Drain until EOF or idle timeout. Artifact and stream are closed on
    /// every path, including errors.
    pub async fn run(mut self, limits: IdleLimits) -> Result<SessionReport, SessionFailure> {
        let started = Instant::now();
        let drained = self.drain(limits).await;
        let closed = self.artifact.close().await;
        let _ = self.stream.shutdown().await;

        let outcome = match drained.and_then(|outcome| closed.map(|()| outcome)) {
            Ok(outcome) => outcome,
            Err(error) => {
                return Err(SessionFailure {
                    bytes_received: self.bytes_received,
                    elapsed: started.elapsed(),
                    error,
                })
            }
        };
        Ok(SessionReport {
            session_id: self.session_id,
            peer: self.peer,
            artifact: self.artifact.path().to_path_buf(),
            bytes_received: self.bytes_received,
            outcome,
            elapsed: started.elapsed(),
        })
    }

    async fn drain(&mut self, limits: IdleLimits) -> Result<SessionOutcome> {
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            match timeout(limits.tick, self.stream.read(&mut buf)).await {
                Err(_) => {
                    self.idle_ticks += 1;
                    if self.idle_ticks >= limits.max_idle_ticks {
                        return self.finalize_timeout().await;
                    }
                }
                Ok(Ok(0)) => return Ok(SessionOutcome::Completed),
                Ok(Ok(n)) => {
                    self.idle_ticks = 0;
                    self.artifact.write(&buf[..n]).await?;
                    self.bytes_received += n as u64;
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => {
                    return Err(e).with_context(|| format!("receive from {}", self.peer));
                }
            }
        }
    }

    async fn finalize_timeout(&mut self) -> Result<SessionOutcome> {
        if self.bytes_received > 0 {
            self.artifact.truncate(true).await?;
            self.artifact.write(SENTINEL).await?;
            eprintln!(
                "ERROR: connection from {} timed out after {} bytes; {} marked as failed",
                self.peer,
                self.bytes_received,
                self.artifact.path().display()
            );
            Ok(SessionOutcome::TimedOutWithData)
        } else {
            eprintln!("ERROR: No data sent from client {}.", self.peer);
            Ok(SessionOutcome::TimedOutNoData)
        }
    }
}
