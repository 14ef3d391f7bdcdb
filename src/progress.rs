//! Byte-count progress for the client upload.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub struct SendProgress {
    bar: ProgressBar,
}

impl SendProgress {
    /// Visible bar sized to the source file.
    pub fn new(total_bytes: u64) -> Self {
        let bar = ProgressBar::new(total_bytes);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    /// Draws nothing; used when --progress is off.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn advance(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish_success(&self, bytes: u64) {
        self.bar
            .finish_with_message(format!("sent {:.1} KB", bytes as f64 / 1024.0));
    }

    pub fn finish_error(&self, msg: &str) {
        self.bar.abandon_with_message(format!("failed: {}", msg));
    }
}
