//! Classified client failures and the process exit codes they map to.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Exit code for usage and argument errors.
pub const EXIT_USAGE: i32 = 1;
/// Exit code for resolve, connect and file-open errors.
pub const EXIT_CONNECT: i32 = 2;
/// Exit code for I/O errors during the transfer (and fatal server errors).
pub const EXIT_IO: i32 = 3;

/// Errors that end an upload.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Host name could not be resolved, or resolved to nothing.
    #[error("unable to resolve {host}:{port}: {reason}")]
    Resolve {
        host: String,
        port: u16,
        reason: String,
    },

    /// No candidate accepted a connection within the retry window.
    #[error("connection timed out after {attempts} attempts ({elapsed:?})")]
    ConnectTimeout { attempts: u32, elapsed: Duration },

    /// Source file could not be opened for reading.
    #[error("unable to open file {path}: {source}")]
    OpenSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Read from the source or write to the socket failed mid-transfer.
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl UploadError {
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        UploadError::Io { context, source }
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            UploadError::Resolve { .. }
            | UploadError::ConnectTimeout { .. }
            | UploadError::OpenSource { .. } => EXIT_CONNECT,
            UploadError::Io { .. } => EXIT_IO,
        }
    }
}

/// Exit code for an arbitrary error chain; unclassified errors count as I/O.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|e| e.downcast_ref::<UploadError>())
        .map(UploadError::exit_code)
        .unwrap_or(EXIT_IO)
}
