//! Upload staging.
//!
//! Copies an inbound byte stream to a private file in fixed-size chunks so
//! that peak memory stays at one chunk no matter how large the upload is.

use super::error::{RejectReason, RelayError};
use crate::utils::sanitize_file_name;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default staging chunk (2 MiB)
pub const DEFAULT_STAGE_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Writes uploads into a staging directory
#[derive(Debug, Clone)]
pub struct Stager {
    dir: PathBuf,
    chunk_size: usize,
    max_size: Option<u64>,
}

impl Stager {
    /// Create a stager writing into `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            chunk_size: DEFAULT_STAGE_CHUNK_SIZE,
            max_size: None,
        }
    }

    /// Override the chunk size (minimum 1 byte)
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Stop staging and reject once more than `max_size` bytes arrive
    #[must_use]
    pub const fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Copy `reader` into a new uniquely named file.
    ///
    /// The returned size is the number of bytes actually written, never a
    /// client-declared value. On failure the partial file is removed.
    ///
    /// # Errors
    ///
    /// `RelayError::StagingFailed` on any read/write error,
    /// `RelayError::InputRejected` if the size limit is exceeded.
    pub async fn stage<R>(&self, mut reader: R, name_hint: &str) -> Result<StagedPayload, RelayError>
    where
        R: AsyncRead + Unpin,
    {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(RelayError::StagingFailed)?;

        let path = self.dir.join(format!(
            "{}_{}.part",
            Uuid::new_v4().simple(),
            sanitize_file_name(name_hint)
        ));

        let size = match self.copy_chunks(&mut reader, &path).await {
            Ok(size) => size,
            Err(e) => {
                remove_partial(&path).await;
                return Err(e);
            }
        };

        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                remove_partial(&path).await;
                return Err(RelayError::StagingFailed(e));
            }
        };

        info!(
            path = %path.display(),
            size,
            size_mb = crate::utils::bytes_to_mb(size),
            "Upload staged"
        );

        Ok(StagedPayload {
            file,
            path,
            dir: self.dir.clone(),
            size,
        })
    }

    async fn copy_chunks<R>(&self, reader: &mut R, path: &Path) -> Result<u64, RelayError>
    where
        R: AsyncRead + Unpin,
    {
        let mut out = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(RelayError::StagingFailed)?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut written: u64 = 0;

        loop {
            let filled = fill_chunk(reader, &mut buf)
                .await
                .map_err(RelayError::StagingFailed)?;
            if filled == 0 {
                break;
            }

            written += filled as u64;
            if let Some(max) = self.max_size {
                if written > max {
                    return Err(RejectReason::TooLarge { size: written, max }.into());
                }
            }

            out.write_all(&buf[..filled])
                .await
                .map_err(RelayError::StagingFailed)?;

            // Short chunk means the source hit EOF
            if filled < buf.len() {
                break;
            }
        }

        out.flush().await.map_err(RelayError::StagingFailed)?;
        Ok(written)
    }
}

/// Read until `buf` is full or the source is exhausted
async fn fill_chunk<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial upload"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial upload"),
    }
}

/// A staged upload, readable from the start as many times as needed
#[derive(Debug)]
pub struct StagedPayload {
    file: File,
    path: PathBuf,
    dir: PathBuf,
    size: u64,
}

impl StagedPayload {
    /// Path of the staged file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written during staging
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Move the read cursor back to offset 0.
    ///
    /// # Errors
    ///
    /// Returns the underlying seek error.
    pub async fn rewind(&mut self) -> io::Result<()> {
        self.file.rewind().await.map(|_| ())
    }

    /// Current cursor position
    ///
    /// # Errors
    ///
    /// Returns the underlying seek error.
    pub async fn position(&mut self) -> io::Result<u64> {
        self.file.stream_position().await
    }

    /// A reader sharing this payload's cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle cannot be duplicated.
    pub async fn reader(&self) -> io::Result<File> {
        self.file.try_clone().await
    }

    /// Consume the payload after the terminal outcome.
    ///
    /// Deletes the staged file, or with `retain` renames it to the sanitized
    /// `file_name` in the staging directory and returns that path.
    ///
    /// # Errors
    ///
    /// Returns the delete/rename error.
    pub async fn finish(self, retain: bool, file_name: &str) -> io::Result<Option<PathBuf>> {
        let Self { file, path, dir, .. } = self;
        drop(file);

        if retain {
            let kept = dir.join(sanitize_file_name(file_name));
            fs::rename(&path, &kept).await?;
            return Ok(Some(kept));
        }

        fs::remove_file(&path).await?;
        Ok(None)
    }

    /// Delete the staged file, logging instead of failing
    pub async fn discard(self) {
        let path = self.path.clone();
        if let Err(e) = self.finish(false, "").await {
            warn!(path = %path.display(), error = %e, "Failed to discard staged upload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Yields `ok_bytes` bytes then fails
    struct FailingReader {
        ok_bytes: usize,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.ok_bytes == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "client went away",
                )));
            }
            let n = self.ok_bytes.min(buf.remaining());
            buf.put_slice(&vec![7u8; n]);
            self.ok_bytes -= n;
            Poll::Ready(Ok(()))
        }
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(Iterator::count).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_stage_measures_written_bytes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let stager = Stager::new(dir.path()).with_chunk_size(4096);
        let payload = stager.stage(&data[..], "build.apk").await?;

        assert_eq!(payload.size(), 10_000);
        assert_eq!(std::fs::read(payload.path())?, data);
        assert!(payload
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with("_build.apk.part")));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_stream() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let payload = Stager::new(dir.path()).stage(&b""[..], "empty").await?;
        assert_eq!(payload.size(), 0);
        assert!(payload.path().exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_uploads_get_distinct_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let stager = Stager::new(dir.path());
        let (a, b) = tokio::join!(
            stager.stage(&b"first"[..], "same.bin"),
            stager.stage(&b"second"[..], "same.bin")
        );
        let (a, b) = (a?, b?);
        assert_ne!(a.path(), b.path());
        assert_eq!(std::fs::read(a.path())?, b"first");
        assert_eq!(std::fs::read(b.path())?, b"second");
        Ok(())
    }

    #[tokio::test]
    async fn test_read_failure_removes_partial_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let stager = Stager::new(dir.path()).with_chunk_size(16);

        let result = stager.stage(FailingReader { ok_bytes: 40 }, "x.bin").await;

        assert!(matches!(result, Err(RelayError::StagingFailed(_))));
        assert_eq!(entries(dir.path()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_limit_exceeded_is_rejected_and_cleaned() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let stager = Stager::new(dir.path()).with_chunk_size(8).with_max_size(20);

        let result = stager.stage(&[1u8; 21][..], "big.bin").await;

        assert!(matches!(
            result,
            Err(RelayError::InputRejected(RejectReason::TooLarge { max: 20, .. }))
        ));
        assert_eq!(entries(dir.path()), 0);

        let exact = stager.stage(&[1u8; 20][..], "ok.bin").await?;
        assert_eq!(exact.size(), 20);
        Ok(())
    }

    #[tokio::test]
    async fn test_rewind_after_partial_read() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut payload = Stager::new(dir.path()).stage(&b"0123456789"[..], "d").await?;

        let mut reader = payload.reader().await?;
        let mut head = [0u8; 4];
        reader.read_exact(&mut head).await?;
        drop(reader);
        assert_eq!(payload.position().await?, 4);

        payload.rewind().await?;
        let mut all = Vec::new();
        payload.reader().await?.read_to_end(&mut all).await?;
        assert_eq!(all, b"0123456789");
        Ok(())
    }

    #[tokio::test]
    async fn test_finish_deletes_or_retains() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let stager = Stager::new(dir.path());

        let gone = stager.stage(&b"a"[..], "a.txt").await?;
        let gone_path = gone.path().to_path_buf();
        assert_eq!(gone.finish(false, "a.txt").await?, None);
        assert!(!gone_path.exists());

        let kept = stager.stage(&b"b"[..], "b.txt").await?;
        let kept_path = kept.finish(true, "my report.txt").await?;
        assert_eq!(kept_path, Some(dir.path().join("my_report.txt")));
        assert_eq!(std::fs::read(dir.path().join("my_report.txt"))?, b"b");
        Ok(())
    }
}
