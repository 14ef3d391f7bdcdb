//! Listener and dispatcher: accepts connections and hands each one to a
//! supervised worker task.

use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use uuid::Uuid;

use crate::artifact::ensure_parent_exists;
use crate::config::ServerConfig;
use crate::log::{TransferLog, TransferLogEntry};
use crate::logger::{Logger, NoopLogger};
use crate::protocol::LISTEN_BACKLOG;
use crate::sequencer::FilenameSequencer;
use crate::worker::{Connection, IdleLimits, SessionReport};

/// Listening socket with address reuse and a backlog of one.
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    pub async fn bind(cfg: &ServerConfig) -> Result<Self> {
        let bind = cfg.bind_addr();
        let candidates: Vec<SocketAddr> = lookup_host(&bind)
            .await
            .with_context(|| format!("resolve bind address {}", bind))?
            .collect();

        let mut last_err = None;
        for addr in candidates {
            let created = if addr.is_ipv4() {
                TcpSocket::new_v4()
            } else {
                TcpSocket::new_v6()
            };
            let socket = match created {
                Ok(s) => s,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };
            socket
                .set_reuseaddr(true)
                .with_context(|| format!("set SO_REUSEADDR on {}", addr))?;
            if let Err(e) = socket.bind(addr) {
                last_err = Some(e);
                continue;
            }
            let inner = socket
                .listen(LISTEN_BACKLOG)
                .with_context(|| format!("listen on {}", addr))?;
            let local_addr = inner.local_addr().context("listener local address")?;
            return Ok(Self { inner, local_addr });
        }

        match last_err {
            Some(e) => Err(e).with_context(|| format!("Unable to successfully bind {}", bind)),
            None => anyhow::bail!("Unable to successfully bind {}: no addresses", bind),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait until a peer is pending and accept it. Failure is fatal to the
    /// accept loop.
    pub async fn accept_one(&self) -> Result<(TcpStream, SocketAddr)> {
        self.inner.accept().await.context("accept")
    }
}

/// Names and spawns workers; owns the only shared state (the sequencer).
pub struct Dispatcher {
    sequencer: Arc<FilenameSequencer>,
    limits: IdleLimits,
    permits: Arc<Semaphore>,
    workers: JoinSet<()>,
    logger: Arc<dyn Logger>,
    journal: Option<Arc<TransferLog>>,
    dispatched: u64,
}

impl Dispatcher {
    pub fn new(
        cfg: &ServerConfig,
        logger: Arc<dyn Logger>,
        journal: Option<Arc<TransferLog>>,
    ) -> Self {
        Self {
            sequencer: Arc::new(FilenameSequencer::new(&cfg.root, cfg.file_dir.clone())),
            limits: IdleLimits::from(cfg),
            permits: Arc::new(Semaphore::new(cfg.max_workers)),
            workers: JoinSet::new(),
            logger,
            journal,
            dispatched: 0,
        }
    }

    pub fn sequencer(&self) -> &Arc<FilenameSequencer> {
        &self.sequencer
    }

    fn permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.permits)
    }

    fn in_flight(&self) -> usize {
        self.workers.len()
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Spawn a worker for `stream`. Returns the artifact path it was given.
    pub fn dispatch(
        &mut self,
        stream: TcpStream,
        peer: SocketAddr,
        permit: OwnedSemaphorePermit,
    ) -> PathBuf {
        let path = self.sequencer.generate();
        let session_id = Uuid::new_v4();
        let limits = self.limits;
        let logger = Arc::clone(&self.logger);
        let journal = self.journal.clone();
        self.dispatched += 1;

        eprintln!("conn from {} -> {}", peer, path.display());
        logger.accepted(&peer, &path);

        let artifact = path.clone();
        self.workers.spawn(async move {
            let _permit = permit;
            let conn = match Connection::open(stream, peer, session_id, artifact.clone()).await {
                Ok(conn) => conn,
                Err(e) => {
                    let entry = TransferLogEntry::failed(
                        session_id,
                        peer.to_string(),
                        artifact.clone(),
                        0,
                        Duration::ZERO,
                        format!("{:#}", e),
                    );
                    record_failed(&entry, logger.as_ref(), journal.as_deref());
                    return;
                }
            };
            match conn.run(limits).await {
                Ok(report) => record_finished(&report, logger.as_ref(), journal.as_deref()),
                Err(failure) => {
                    let entry = TransferLogEntry::from_failure(
                        session_id,
                        peer.to_string(),
                        artifact.clone(),
                        &failure,
                    );
                    record_failed(&entry, logger.as_ref(), journal.as_deref());
                }
            }
        });
        path
    }

    /// Wait for the next worker to finish, if any are running.
    pub async fn join_next(&mut self) -> Option<Result<(), JoinError>> {
        self.workers.join_next().await
    }

    /// Stop waiting after `grace`; whatever is still running gets aborted.
    /// Returns (finished, aborted).
    pub async fn drain(&mut self, grace: Duration) -> (usize, usize) {
        let mut finished = 0usize;
        let workers = &mut self.workers;
        let waited = timeout(grace, async {
            while let Some(joined) = workers.join_next().await {
                report_join(joined);
                finished += 1;
            }
        })
        .await;

        let mut aborted = 0usize;
        if waited.is_err() {
            aborted = self.workers.len();
            self.workers.abort_all();
            while self.workers.join_next().await.is_some() {}
        }
        (finished, aborted)
    }
}

fn record_finished(report: &SessionReport, logger: &dyn Logger, journal: Option<&TransferLog>) {
    eprintln!(
        "{} {} from {}: {} bytes in {:.2}s",
        report.artifact.display(),
        report.outcome,
        report.peer,
        report.bytes_received,
        report.elapsed.as_secs_f64()
    );
    logger.finished(report);
    if let Some(j) = journal {
        if let Err(e) = j.add_entry(&TransferLogEntry::from_report(report)) {
            eprintln!("warning: transfer journal {}: {}", j.path().display(), e);
        }
    }
}

fn record_failed(entry: &TransferLogEntry, logger: &dyn Logger, journal: Option<&TransferLog>) {
    let reason = entry.error.as_deref().unwrap_or("unknown error");
    eprintln!(
        "ERROR: connection {} ({}) after {} bytes: {}",
        entry.peer,
        entry.artifact.display(),
        entry.bytes_received,
        reason
    );
    logger.error("worker", &entry.artifact, reason);
    if let Some(j) = journal {
        if let Err(e) = j.add_entry(entry) {
            eprintln!("warning: transfer journal {}: {}", j.path().display(), e);
        }
    }
}

fn report_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            eprintln!("ERROR: connection worker panicked: {}", e);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeSummary {
    pub accepted: u64,
    pub drained: usize,
    pub aborted: usize,
}

/// Bound listener plus dispatcher, ready to run.
pub struct Server {
    listener: Listener,
    dispatcher: Dispatcher,
    logger: Arc<dyn Logger>,
    drain_grace: Duration,
}

impl Server {
    pub async fn bind(
        cfg: &ServerConfig,
        logger: Arc<dyn Logger>,
        journal: Option<Arc<TransferLog>>,
    ) -> Result<Self> {
        cfg.validate()?;
        let dispatcher = Dispatcher::new(cfg, Arc::clone(&logger), journal);
        ensure_parent_exists(&dispatcher.sequencer().first_path())?;
        let listener = Listener::bind(cfg).await?;
        Ok(Self {
            listener,
            dispatcher,
            logger,
            drain_grace: cfg.drain_grace(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Accept and dispatch until `shutdown` resolves or accepting fails.
    /// In-flight workers are drained on the way out.
    pub async fn run<F>(mut self, shutdown: F) -> Result<ServeSummary>
    where
        F: Future<Output = ()>,
    {
        let addr = self.listener.local_addr();
        eprintln!(
            "filedrop server listening on {} root={} prefix={:?}",
            addr,
            self.dispatcher.sequencer().root().display(),
            self.dispatcher.sequencer().dir()
        );
        self.logger.listening(&addr);

        tokio::pin!(shutdown);
        let permits = self.dispatcher.permits();
        let accept_result: Result<()> = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break Ok(()),
                Some(joined) = self.dispatcher.join_next() => report_join(joined),
                accepted = accept_with_permit(&self.listener, &permits) => {
                    match accepted {
                        Ok((stream, peer, permit)) => {
                            self.dispatcher.dispatch(stream, peer, permit);
                        }
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        // A broken listener is fatal; don't hold the exit for the grace period
        let grace = if accept_result.is_err() {
            Duration::ZERO
        } else {
            self.drain_grace
        };
        let in_flight = self.dispatcher.in_flight();
        if in_flight > 0 && !grace.is_zero() {
            eprintln!(
                "waiting up to {:.1}s for {} in-flight transfer(s)",
                grace.as_secs_f64(),
                in_flight
            );
        }
        let (drained, aborted) = self.dispatcher.drain(grace).await;
        self.logger.shutdown(drained, aborted);
        if aborted > 0 {
            eprintln!("aborted {} unfinished transfer(s)", aborted);
        }

        accept_result?;
        Ok(ServeSummary {
            accepted: self.dispatcher.dispatched(),
            drained,
            aborted,
        })
    }
}

async fn accept_with_permit(
    listener: &Listener,
    permits: &Arc<Semaphore>,
) -> Result<(TcpStream, SocketAddr, OwnedSemaphorePermit)> {
    let permit = Arc::clone(permits)
        .acquire_owned()
        .await
        .context("worker pool closed")?;
    let (stream, peer) = listener.accept_one().await?;
    Ok((stream, peer, permit))
}

/// Stop request shared between a signal handler and `Server::run`.
///
/// The first request starts a graceful drain. Later requests report `false`
/// so the caller can give up on the drain and exit.
#[derive(Debug, Default)]
pub struct Shutdown {
    requested: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only for the first request.
    pub fn request(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_one();
        }
        first
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        if self.is_requested() {
            return;
        }
        self.notify.notified().await
    }
}

/// Run a server with the default no-op logger and no journal.
pub async fn serve<F>(cfg: &ServerConfig, shutdown: F) -> Result<ServeSummary>
where
    F: Future<Output = ()>,
{
    let server = Server::bind(cfg, Arc::new(NoopLogger), None).await?;
    server.run(shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    fn local_cfg(root: &std::path::Path, dir: &str) -> ServerConfig {
        ServerConfig {
            bind_host: "127.0.0.1".into(),
            port: 0,
            file_dir: dir.into(),
            root: root.to_path_buf(),
            tick_ms: 20,
            idle_ticks: 5,
            max_workers: 4,
            drain_grace_ms: Some(2_000),
        }
    }

    #[tokio::test]
    async fn test_bind_reports_ephemeral_port() {
        let tmp = TempDir::new().unwrap();
        let listener = Listener::bind(&local_cfg(tmp.path(), "out")).await.unwrap();
        assert_ne!(listener.local_addr().port(), 0);
        assert!(listener.local_addr().ip().is_loopback());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_error() {
        let tmp = TempDir::new().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut cfg = local_cfg(tmp.path(), "out");
        cfg.port = taken.local_addr().unwrap().port();
        assert!(Listener::bind(&cfg).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_creates_prefix_directory() {
        let tmp = TempDir::new().unwrap();
        let cfg = local_cfg(tmp.path(), "uploads/");
        let _server = Server::bind(&cfg, Arc::new(NoopLogger), None).await.unwrap();
        assert!(tmp.path().join("uploads").is_dir());
    }

    #[tokio::test]
    async fn test_serve_accepts_and_drains() {
        let tmp = TempDir::new().unwrap();
        let cfg = local_cfg(tmp.path(), "out");
        let journal = Arc::new(TransferLog::new(tmp.path().join("journal.jsonl")));
        let server = Server::bind(&cfg, Arc::new(NoopLogger), Some(Arc::clone(&journal)))
            .await
            .unwrap();
        let addr = server.local_addr();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async move {
            let _ = stop_rx.await;
        }));

        let mut s = TcpStream::connect(addr).await.unwrap();
        s.write_all(b"Hello, world!").await.unwrap();
        s.shutdown().await.unwrap();
        drop(s);

        // Wait for the worker to land the file before stopping
        let out = tmp.path().join("out1.file");
        for _ in 0..100 {
            if std::fs::read(&out).map(|b| b.len() == 13).unwrap_or(false) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        stop_tx.send(()).unwrap();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.aborted, 0);
        assert_eq!(std::fs::read(&out).unwrap(), b"Hello, world!");

        let entries = journal.read_log().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].bytes_received, 13);
    }

    #[tokio::test]
    async fn test_zero_grace_aborts_at_once() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = local_cfg(tmp.path(), "out");
        cfg.idle_ticks = 1_000;
        let listener = Listener::bind(&cfg).await.unwrap();
        let mut dispatcher = Dispatcher::new(&cfg, Arc::new(NoopLogger), None);

        let _idle_client = TcpStream::connect(listener.local_addr()).await.unwrap();
        let (stream, peer) = listener.accept_one().await.unwrap();
        let permit = dispatcher.permits().acquire_owned().await.unwrap();
        let path = dispatcher.dispatch(stream, peer, permit);
        assert_eq!(path, tmp.path().join("out1.file"));
        assert_eq!(dispatcher.in_flight(), 1);

        let started = std::time::Instant::now();
        let (finished, aborted) = dispatcher.drain(Duration::ZERO).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(finished, 0);
        assert_eq!(aborted, 1);
        assert_eq!(dispatcher.in_flight(), 0);
        // Permit went back with the aborted worker
        assert_eq!(dispatcher.permits().available_permits(), cfg.max_workers);
    }

    #[tokio::test]
    async fn test_shutdown_first_request_only() {
        let shutdown = Arc::new(Shutdown::new());
        assert!(!shutdown.is_requested());

        let waiter = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { shutdown.wait().await })
        };
        assert!(shutdown.request());
        assert!(!shutdown.request());
        assert!(shutdown.is_requested());
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        // Waiting after the fact returns immediately
        timeout(Duration::from_millis(100), shutdown.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_aborts_after_grace() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = local_cfg(tmp.path(), "out");
        // Idle window far longer than the grace period
        cfg.idle_ticks = 1_000;
        cfg.drain_grace_ms = Some(50);
        let server = Server::bind(&cfg, Arc::new(NoopLogger), None).await.unwrap();
        let addr = server.local_addr();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async move {
            let _ = stop_rx.await;
        }));

        let _idle_client = TcpStream::connect(addr).await.unwrap();
        // Give the dispatcher time to accept
        for _ in 0..100 {
            if tmp.path().join("out1.file").exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        stop_tx.send(()).unwrap();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.drained, 0);
        assert_eq!(summary.aborted, 1);
    }
}
