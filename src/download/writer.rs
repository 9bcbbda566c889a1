//! Append-only, single-writer handle on one task's partial file.
//!
//! The writer buffers appends and keeps its own running length. Callers that
//! need the on-disk size to match `len()` must call [`PartialFileWriter::flush`]
//! (or one of the closing operations) first.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::DownloadError;

/// Owner of the open partial file for one activation of a task.
#[derive(Debug)]
pub struct PartialFileWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    len: u64,
}

impl PartialFileWriter {
    /// Opens the partial file at `path`.
    ///
    /// With `resume_offset > 0` and an existing file, the handle appends at
    /// end-of-file. Otherwise a fresh zero-length file is created, truncating
    /// any stale content. Parent directories are created as needed.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::FileSystem`] if the directory or file cannot be
    /// created or opened.
    #[instrument(level = "debug", skip(path), fields(path = %path.display()))]
    pub async fn open(path: &Path, resume_offset: u64) -> Result<Self, DownloadError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        let existing = tokio::fs::metadata(path).await.map(|m| m.len()).ok();
        let append = resume_offset > 0 && existing.is_some();

        let mut file = if append {
            OpenOptions::new()
                .append(true)
                .open(path)
                .await
                .map_err(|e| DownloadError::io(path, e))?
        } else {
            File::create(path)
                .await
                .map_err(|e| DownloadError::io(path, e))?
        };

        let len = if append {
            file.seek(std::io::SeekFrom::End(0))
                .await
                .map_err(|e| DownloadError::io(path, e))?
        } else {
            0
        };
        debug!(len, append, "partial file opened");

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            len,
        })
    }

    /// Path of the partial file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes appended so far, including bytes present when the file was opened.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the partial file holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends one chunk at the end of the file.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::FileSystem`] if the write fails.
    pub async fn append(&mut self, chunk: &[u8]) -> Result<(), DownloadError> {
        self.writer
            .write_all(chunk)
            .await
            .map_err(|e| DownloadError::io(&self.path, e))?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    /// Discards all bytes and restarts at offset zero.
    ///
    /// Used when a server ignores the Range header and sends the whole body.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::FileSystem`] if the file cannot be truncated.
    pub async fn reset(&mut self) -> Result<(), DownloadError> {
        self.writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(&self.path, e))?;
        let file = self.writer.get_mut();
        file.set_len(0)
            .await
            .map_err(|e| DownloadError::io(&self.path, e))?;
        file.seek(std::io::SeekFrom::Start(0))
            .await
            .map_err(|e| DownloadError::io(&self.path, e))?;
        debug!(path = %self.path.display(), discarded = self.len, "partial file reset");
        self.len = 0;
        Ok(())
    }

    /// Flushes buffered bytes to the OS.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::FileSystem`] if the flush fails.
    pub async fn flush(&mut self) -> Result<(), DownloadError> {
        self.writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(&self.path, e))
    }

    /// Queries the size of the file on disk.
    ///
    /// Used to cross-check the running length after an I/O error.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::FileSystem`] if the metadata cannot be read.
    pub async fn current_length(&self) -> Result<u64, DownloadError> {
        tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.len())
            .map_err(|e| DownloadError::io(&self.path, e))
    }

    /// Closes the handle, leaving the file on disk for a later resume.
    ///
    /// Returns the length of the file after the final flush. If the flush
    /// fails, the on-disk length is reported instead.
    pub async fn abort(mut self) -> u64 {
        if let Err(error) = self.flush().await {
            debug!(error = %error, "flush failed while closing partial file");
        }
        let on_disk = self.current_length().await.unwrap_or(self.len);
        let mut file = self.writer.into_inner();
        let _ = file.shutdown().await;
        on_disk
    }

    /// Closes the handle and moves the partial file to `destination`.
    ///
    /// Any pre-existing file at `destination` is replaced. Returns the final
    /// byte length.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::FileSystem`] if flushing, creating the
    /// destination directory or the rename fails. The partial file is left in
    /// place on error.
    #[instrument(
        level = "debug",
        skip(self, destination),
        fields(path = %self.path.display(), destination = %destination.display())
    )]
    pub async fn finalize(mut self, destination: &Path) -> Result<u64, DownloadError> {
        self.flush().await?;
        let mut file = self.writer.into_inner();
        file.sync_all()
            .await
            .map_err(|e| DownloadError::io(&self.path, e))?;
        drop(file);

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        // rename(2) atomically replaces the destination on Unix; Windows
        // refuses to replace, so clear the way first.
        #[cfg(windows)]
        if tokio::fs::metadata(destination).await.is_ok() {
            tokio::fs::remove_file(destination)
                .await
                .map_err(|e| DownloadError::io(destination, e))?;
        }

        if let Err(error) = tokio::fs::rename(&self.path, destination).await {
            // Cross-device moves cannot rename; fall back to copy + remove.
            debug!(error = %error, "rename failed, copying partial file instead");
            tokio::fs::copy(&self.path, destination)
                .await
                .map_err(|e| DownloadError::io(destination, e))?;
            tokio::fs::remove_file(&self.path)
                .await
                .map_err(|e| DownloadError::io(&self.path, e))?;
        }

        Ok(self.len)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_parent_dirs_and_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/dir/file.part");

        let writer = PartialFileWriter::open(&path, 0).await.unwrap();
        assert!(writer.is_empty());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_open_with_zero_offset_truncates_stale_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file.part");
        std::fs::write(&path, b"stale bytes").unwrap();

        let writer = PartialFileWriter::open(&path, 0).await.unwrap();
        assert_eq!(writer.len(), 0);
        assert_eq!(writer.current_length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_with_offset_appends_at_end() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file.part");
        std::fs::write(&path, b"hello ").unwrap();

        let mut writer = PartialFileWriter::open(&path, 6).await.unwrap();
        assert_eq!(writer.len(), 6);
        writer.append(b"world").await.unwrap();
        let len = writer.abort().await;

        assert_eq!(len, 11);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_open_with_offset_but_missing_file_starts_fresh() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.part");

        let writer = PartialFileWriter::open(&path, 42).await.unwrap();
        assert_eq!(writer.len(), 0);
    }

    #[tokio::test]
    async fn test_reset_discards_previous_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file.part");
        std::fs::write(&path, b"old-old-old").unwrap();

        let mut writer = PartialFileWriter::open(&path, 11).await.unwrap();
        writer.reset().await.unwrap();
        writer.append(b"new").await.unwrap();
        assert_eq!(writer.abort().await, 3);
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_finalize_replaces_existing_destination() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state/file.part");
        let destination = temp_dir.path().join("out/file.bin");
        std::fs::create_dir_all(destination.parent().unwrap()).unwrap();
        std::fs::write(&destination, b"previous download").unwrap();

        let mut writer = PartialFileWriter::open(&path, 0).await.unwrap();
        writer.append(b"fresh").await.unwrap();
        let len = writer.finalize(&destination).await.unwrap();

        assert_eq!(len, 5);
        assert_eq!(std::fs::read(&destination).unwrap(), b"fresh");
        assert!(!path.exists(), "partial file should be moved away");
    }

    #[tokio::test]
    async fn test_abort_keeps_file_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file.part");

        let mut writer = PartialFileWriter::open(&path, 0).await.unwrap();
        writer.append(&[7_u8; 4096]).await.unwrap();
        let len = writer.abort().await;

        assert_eq!(len, 4096);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }
}
