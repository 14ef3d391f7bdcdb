//! Server-side output files.
//!
//! An `Artifact` is created (or truncated) up front, grown by appends, and
//! can be wiped and rewritten in place when a transfer has to be finalized
//! with the sentinel.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

pub struct Artifact {
    path: PathBuf,
    file: Option<File>,
}

impl Artifact {
    /// Create the file, truncating anything already at `path`.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path)
            .await
            .with_context(|| format!("create artifact {}", path.display()))?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Append `bytes`, reopening in append mode if the file was closed.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.file.is_none() {
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .with_context(|| format!("reopen artifact {}", self.path.display()))?;
            self.file = Some(f);
        }
        if let Some(f) = self.file.as_mut() {
            f.write_all(bytes)
                .await
                .with_context(|| format!("write artifact {}", self.path.display()))?;
        }
        Ok(())
    }

    /// Discard existing content. With `keep_open` the file stays open for
    /// further writes, otherwise it is closed.
    pub async fn truncate(&mut self, keep_open: bool) -> Result<()> {
        self.close().await?;
        let f = File::create(&self.path)
            .await
            .with_context(|| format!("truncate artifact {}", self.path.display()))?;
        if keep_open {
            self.file = Some(f);
        }
        Ok(())
    }

    /// Flush and release the handle. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut f) = self.file.take() {
            f.flush()
                .await
                .with_context(|| format!("flush artifact {}", self.path.display()))?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Create directory with parent creation
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.as_os_str().is_empty() && !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("create directory {}", path.display()))?;
    }
    Ok(())
}

/// Create parent directory if needed
pub fn ensure_parent_exists(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir_exists(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_append() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.file");
        let mut art = Artifact::create(&path).await.unwrap();
        art.write(b"Hello, ").await.unwrap();
        art.write(b"world!").await.unwrap();
        art.close().await.unwrap();
        assert!(art.file.is_none());
        assert_eq!(std::fs::read(&path).unwrap(), b"Hello, world!");
    }

    #[tokio::test]
    async fn test_create_truncates_existing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("b.file");
        std::fs::write(&path, b"stale content").unwrap();
        let mut art = Artifact::create(&path).await.unwrap();
        art.close().await.unwrap();
        assert!(std::fs::read(&path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncate_keep_open_then_write() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("c.file");
        let mut art = Artifact::create(&path).await.unwrap();
        art.write(b"partial upload data").await.unwrap();
        art.truncate(true).await.unwrap();
        assert!(art.file.is_some());
        assert!(std::fs::read(&path).unwrap().is_empty());
        art.write(b"ERROR").await.unwrap();
        art.close().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"ERROR");
    }

    #[tokio::test]
    async fn test_truncate_closed_then_write_reopens() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("d.file");
        let mut art = Artifact::create(&path).await.unwrap();
        art.write(b"0123456789").await.unwrap();
        art.truncate(false).await.unwrap();
        assert!(art.file.is_none());
        assert!(std::fs::read(&path).unwrap().is_empty());

        art.write(b"abc").await.unwrap();
        art.write(b"def").await.unwrap();
        art.close().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_create_in_missing_dir_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nope").join("e.file");
        assert!(Artifact::create(&path).await.is_err());
    }

    #[test]
    fn test_ensure_parent_exists() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("new").join("nested").join("1.file");
        ensure_parent_exists(&file).unwrap();
        assert!(file.parent().unwrap().is_dir());
        // Bare file name has an empty parent
        ensure_parent_exists(Path::new("out1.file")).unwrap();
    }
}
