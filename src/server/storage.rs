//! Append-only log file shared by every connection

use crate::config::ServerConfig;
use crate::{AesdError, Result};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, warn};

/// Storage backend owning the append-only log file
pub struct LogStore {
    path: PathBuf,
    mode: u32,
    send_retries: u32,
    file: Mutex<Option<File>>,
}

impl LogStore {
    /// Create a log store for the configured path. The file itself is created
    /// lazily on the first append.
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_path(&config.storage.data_file, config.storage.file_mode)
            .with_send_retries(config.server.send_retries)
    }

    /// Create a log store backed by `path`, creating it with `mode` when absent
    pub fn with_path<P: AsRef<Path>>(path: P, mode: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            mode,
            send_retries: 5,
            file: Mutex::new(None),
        }
    }

    /// Set how many consecutive sends to a disconnected peer are tolerated
    /// per chunk. Other send errors are retried until the chunk goes out.
    pub fn with_send_retries(mut self, retries: u32) -> Self {
        self.send_retries = retries;
        self
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `bytes` to the log and sync it to disk. Returns the number of
    /// bytes written.
    pub async fn append(&self, bytes: &[u8]) -> Result<usize> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let Some(file) = guard.as_mut() else {
            return Err(self.storage_error(io::Error::from(io::ErrorKind::NotFound)));
        };

        let mut written = 0;
        while written < bytes.len() {
            match file.write(&bytes[written..]).await {
                Ok(0) => {
                    return Err(self.storage_error(io::Error::from(io::ErrorKind::WriteZero)));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Error during write to {}: {}", self.path.display(), e);
                    return Err(self.storage_error(e));
                }
            }
        }
        file.flush().await.map_err(|e| self.storage_error(e))?;

        if let Err(e) = file.sync_data().await {
            warn!("Failed to sync {}: {}", self.path.display(), e);
        }

        debug!("Wrote {} bytes to {}", written, self.path.display());
        Ok(written)
    }

    /// Stream the whole log, from byte 0 to end of file, into `sink` in
    /// chunks of at most `chunk_size` bytes. Returns the number of bytes
    /// forwarded. A log that has never been written streams nothing.
    pub async fn stream_to<W>(&self, sink: &mut W, chunk_size: usize) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = self.open_existing().await?;
        }
        let Some(file) = guard.as_mut() else {
            return Ok(0);
        };

        let mut buf = vec![0u8; chunk_size.max(1)];
        let mut offset: u64 = 0;
        loop {
            // Absolute positioning so appends elsewhere never shift our cursor.
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| {
                    error!("Error seeking in {}: {}", self.path.display(), e);
                    self.storage_error(e)
                })?;

            let read = match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Error while reading {}: {}", self.path.display(), e);
                    return Err(self.storage_error(e));
                }
            };
            debug!("Read {} bytes from {}", read, self.path.display());

            let sent = self
                .send_chunk(sink, &buf[..read])
                .await
                .map_err(AesdError::Send)?;
            debug!("Sent {} bytes to client", sent);
            offset += read as u64;
        }

        sink.flush().await.map_err(AesdError::Send)?;
        Ok(offset)
    }

    /// Delete the backing file. A file that was never created is not an error.
    pub async fn remove(&self) -> Result<()> {
        let mut guard = self.file.lock().await;
        guard.take();

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("{} removed", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!("Failed to remove {}: {}", self.path.display(), e);
                Err(self.storage_error(e))
            }
        }
    }

    async fn send_chunk<W>(&self, sink: &mut W, chunk: &[u8]) -> io::Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        let mut sent = 0;
        let mut attempts: u32 = 0;
        let mut disconnects = 0;
        while sent < chunk.len() {
            match sink.write(&chunk[sent..]).await {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => {
                    sent += n;
                    attempts = 0;
                    disconnects = 0;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_disconnect(&e) => {
                    disconnects += 1;
                    if disconnects > self.send_retries {
                        return Err(e);
                    }
                    warn!("Error during send, going to retry: {}", e);
                }
                Err(e) => {
                    attempts = attempts.saturating_add(1);
                    warn!("Error during send, going to retry: {}", e);
                    sleep(Duration::from_millis(10 * u64::from(attempts.min(10)))).await;
                }
            }
        }
        Ok(sent)
    }

    async fn open(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .mode(self.mode)
            .open(&self.path)
            .await
            .map_err(|e| {
                error!("Unable to open {}: {}", self.path.display(), e);
                self.storage_error(e)
            })
    }

    async fn open_existing(&self) -> Result<Option<File>> {
        match OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .await
        {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.storage_error(e)),
        }
    }

    fn storage_error(&self, source: io::Error) -> AesdError {
        AesdError::storage(&self.path, source)
    }
}

/// Errors after which the peer can never accept the rest of the chunk
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::tempdir;

    /// Sink failing with `kind` for the first `failures` writes
    struct FlakySink {
        kind: io::ErrorKind,
        failures: usize,
        accepted: Vec<u8>,
    }

    impl FlakySink {
        fn new(kind: io::ErrorKind, failures: usize) -> Self {
            Self {
                kind,
                failures,
                accepted: Vec::new(),
            }
        }
    }

    impl AsyncWrite for FlakySink {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.failures > 0 {
                self.failures -= 1;
                return Poll::Ready(Err(io::Error::from(self.kind)));
            }
            // Accept at most three bytes per write to exercise partial sends.
            let n = buf.len().min(3);
            self.accepted.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn store_in(dir: &Path) -> LogStore {
        LogStore::with_path(dir.join("aesdsocketdata"), 0o644)
    }

    #[tokio::test]
    async fn test_append_creates_file_lazily() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());
        assert!(!store.path().exists());

        let written = store.append(b"hello\n").await.unwrap();
        assert_eq!(written, 6);
        assert!(store.path().exists());

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777 & !0o644, 0);
    }

    #[tokio::test]
    async fn test_stream_reflects_all_appends() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());
        store.append(b"one\n").await.unwrap();
        store.append(b"two\n").await.unwrap();

        let mut out = Vec::new();
        let total = store.stream_to(&mut out, 5120).await.unwrap();
        assert_eq!(total, 8);
        assert_eq!(out, b"one\ntwo\n");
    }

    #[tokio::test]
    async fn test_stream_spans_multiple_chunks() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());
        let mut record = vec![b'z'; 20_000];
        record.push(b'\n');
        store.append(&record).await.unwrap();

        let mut out = Vec::new();
        let total = store.stream_to(&mut out, 5120).await.unwrap();
        assert_eq!(total, 20_001);
        assert_eq!(out, record);
    }

    #[tokio::test]
    async fn test_stream_before_any_append_is_empty() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());

        let mut out = Vec::new();
        assert_eq!(store.stream_to(&mut out, 5120).await.unwrap(), 0);
        assert!(out.is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_existing_contents_survive_reopen() {
        let temp_dir = tempdir().unwrap();
        std::fs::write(temp_dir.path().join("aesdsocketdata"), b"a\n").unwrap();

        let store = store_in(temp_dir.path());
        store.append(b"b\n").await.unwrap();

        let mut out = Vec::new();
        store.stream_to(&mut out, 5120).await.unwrap();
        assert_eq!(out, b"a\nb\n");
    }

    #[tokio::test]
    async fn test_append_after_stream_still_appends() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());
        store.append(b"first\n").await.unwrap();

        let mut out = Vec::new();
        store.stream_to(&mut out, 3).await.unwrap();
        store.append(b"second\n").await.unwrap();

        let contents = std::fs::read(store.path()).unwrap();
        assert_eq!(contents, b"first\nsecond\n");
    }

    #[tokio::test]
    async fn test_remove_deletes_file() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());
        store.append(b"x\n").await.unwrap();

        store.remove().await.unwrap();
        assert!(!store.path().exists());
        // Removing twice is harmless.
        store.remove().await.unwrap();
    }

    #[tokio::test]
    async fn test_append_to_unwritable_path_is_storage_error() {
        let store = LogStore::with_path("/nonexistent-dir/aesdsocketdata", 0o644);
        let err = store.append(b"x\n").await.unwrap_err();
        assert!(matches!(err, AesdError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_transient_send_errors_are_retried_until_delivered() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path()).with_send_retries(5);
        store.append(b"one\ntwo\n").await.unwrap();

        let mut sink = FlakySink::new(io::ErrorKind::WouldBlock, 8);
        let total = store.stream_to(&mut sink, 5120).await.unwrap();
        assert_eq!(total, 8);
        assert_eq!(sink.accepted, b"one\ntwo\n");

        let mut sink = FlakySink::new(io::ErrorKind::TimedOut, 3);
        store.stream_to(&mut sink, 4).await.unwrap();
        assert_eq!(sink.accepted, b"one\ntwo\n");
    }

    #[tokio::test]
    async fn test_disconnected_peer_gives_up_after_retries() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path()).with_send_retries(2);
        store.append(b"x\n").await.unwrap();

        let mut sink = FlakySink::new(io::ErrorKind::BrokenPipe, usize::MAX);
        let err = store.stream_to(&mut sink, 5120).await.unwrap_err();
        assert!(matches!(err, AesdError::Send(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert!(sink.accepted.is_empty());

        // A disconnect that clears within the budget still delivers.
        let mut sink = FlakySink::new(io::ErrorKind::ConnectionReset, 2);
        store.stream_to(&mut sink, 5120).await.unwrap();
        assert_eq!(sink.accepted, b"x\n");
    }
}
