//! Artifact name generation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::ARTIFACT_SUFFIX;

/// Hands out `{root}/{dir}{n}.file` names with `n` counting up from 1.
///
/// `dir` is a plain prefix, not a path component: `out` yields `out1.file`,
/// `out/` yields `out/1.file`. Numbers are consumed by every call, so a
/// failed transfer still burns its number.
#[derive(Debug)]
pub struct FilenameSequencer {
    root: PathBuf,
    dir: String,
    next: AtomicU64,
}

impl FilenameSequencer {
    pub fn new(root: impl Into<PathBuf>, dir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            dir: dir.into(),
            next: AtomicU64::new(1),
        }
    }

    pub fn generate(&self) -> PathBuf {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!("{}{}{}", self.dir, n, ARTIFACT_SUFFIX))
    }

    /// Path of the first artifact; its parent must exist before accepting.
    pub fn first_path(&self) -> PathBuf {
        self.root.join(format!("{}1{}", self.dir, ARTIFACT_SUFFIX))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }
}
