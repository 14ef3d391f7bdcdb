use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;

use crate::worker::SessionReport;

pub trait Logger: Send + Sync {
    fn listening(&self, _addr: &SocketAddr) {}
    fn accepted(&self, _peer: &SocketAddr, _artifact: &Path) {}
    fn finished(&self, _report: &SessionReport) {}
    fn error(&self, _context: &str, _artifact: &Path, _msg: &str) {}
    fn shutdown(&self, _drained: usize, _aborted: usize) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn listening(&self, addr: &SocketAddr) {
        self.line(&format!("LISTEN addr={}", addr));
    }
    fn accepted(&self, peer: &SocketAddr, artifact: &Path) {
        self.line(&format!("ACCEPT peer={} artifact={}", peer, artifact.display()));
    }
    fn finished(&self, report: &SessionReport) {
        self.line(&format!(
            "FINISH peer={} artifact={} outcome={} bytes={} seconds={:.3}",
            report.peer,
            report.artifact.display(),
            report.outcome,
            report.bytes_received,
            report.elapsed.as_secs_f64()
        ));
    }
    fn error(&self, context: &str, artifact: &Path, msg: &str) {
        self.line(&format!(
            "ERROR ctx={} artifact={} msg={}",
            context,
            artifact.display(),
            msg
        ));
    }
    fn shutdown(&self, drained: usize, aborted: usize) {
        self.line(&format!("SHUTDOWN drained={drained} aborted={aborted}"));
    }
}
