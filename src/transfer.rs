//! Client transfer driver: push one file through a connected stream.

use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::UploadError;
use crate::progress::SendProgress;
use crate::protocol::SEND_CHUNK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferSummary {
    pub bytes_sent: u64,
    pub chunks: u64,
}

pub async fn open_source(path: &Path) -> Result<File, UploadError> {
    File::open(path)
        .await
        .map_err(|source| UploadError::OpenSource {
            path: path.to_path_buf(),
            source,
        })
}

/// Copy `source` to `stream` in chunks of at most `SEND_CHUNK_SIZE` bytes,
/// then shut down the write half so the peer sees EOF. Any read or write
/// failure ends the transfer; nothing is retried.
pub async fn send_stream<R, W>(
    source: &mut R,
    stream: &mut W,
    progress: &SendProgress,
) -> Result<TransferSummary, UploadError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; SEND_CHUNK_SIZE];
    let mut summary = TransferSummary::default();
    loop {
        let n = source
            .read(&mut buf)
            .await
            .map_err(|e| UploadError::io("read source file", e))?;
        if n == 0 {
            break;
        }
        stream
            .write_all(&buf[..n])
            .await
            .map_err(|e| UploadError::io("write to server", e))?;
        summary.bytes_sent += n as u64;
        summary.chunks += 1;
        progress.advance(n as u64);
    }
    stream
        .shutdown()
        .await
        .map_err(|e| UploadError::io("close connection", e))?;
    Ok(summary)
}

/// Open `path` and push it through `stream`.
pub async fn send_file<W>(
    path: &Path,
    stream: &mut W,
    progress: &SendProgress,
) -> Result<TransferSummary, UploadError>
where
    W: AsyncWrite + Unpin,
{
    let mut source = open_source(path).await?;
    send_stream(&mut source, stream, progress).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_chunks_are_bounded() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 7) as u8).collect();
        let mut source = Cursor::new(payload.clone());
        let mut sink: Vec<u8> = Vec::new();
        let progress = SendProgress::hidden();

        let summary = send_stream(&mut source, &mut sink, &progress).await.unwrap();
        assert_eq!(sink, payload);
        assert_eq!(summary.bytes_sent, 5000);
        // 5000 / 1023 rounds up to 5 reads
        assert_eq!(summary.chunks, 5);
        assert_eq!(progress.position(), 5000);
    }

    #[tokio::test]
    async fn test_empty_file_sends_nothing() {
        let mut source = Cursor::new(Vec::<u8>::new());
        let mut sink: Vec<u8> = Vec::new();
        let summary = send_stream(&mut source, &mut sink, &SendProgress::hidden())
            .await
            .unwrap();
        assert_eq!(summary, TransferSummary::default());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_is_open_error() {
        let tmp = TempDir::new().unwrap();
        let mut sink: Vec<u8> = Vec::new();
        let err = send_file(&tmp.path().join("absent.bin"), &mut sink, &SendProgress::hidden())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::OpenSource { .. }));
        assert_eq!(err.exit_code(), crate::error::EXIT_CONNECT);
    }

    #[tokio::test]
    async fn test_closed_peer_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.bin");
        std::fs::write(&path, vec![1u8; 64 * 1024]).unwrap();

        let (mut client, server) = duplex(128);
        drop(server);
        let err = send_file(&path, &mut client, &SendProgress::hidden())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Io { .. }));
        assert_eq!(err.exit_code(), crate::error::EXIT_IO);
    }

    #[tokio::test]
    async fn test_send_file_over_duplex() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("hello.txt");
        std::fs::write(&path, b"Hello, world!").unwrap();

        let (mut client, mut server) = duplex(4096);
        let summary = send_file(&path, &mut client, &SendProgress::hidden())
            .await
            .unwrap();
        drop(client);
        let mut got = Vec::new();
        server.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"Hello, world!");
        assert_eq!(summary.bytes_sent, 13);
        assert_eq!(summary.chunks, 1);
    }
}
