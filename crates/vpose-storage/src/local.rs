//! Local filesystem storage.

use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use futures_util::{Stream, StreamExt};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use vpose_models::JobId;

use crate::error::{StorageError, StorageResult};
use crate::naming::sanitize_filename;

const UPLOAD_DIR: &str = "uploads";
const OUTPUT_DIR: &str = "outputs";

/// A file persisted by [`LocalStorage::save_upload`].
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub path: PathBuf,
    pub bytes: u64,
    /// Sanitized name the file was stored under (without the job prefix)
    pub stored_name: String,
}

/// Stores uploads and outputs below a single data directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    max_upload_bytes: u64,
}

impl LocalStorage {
    /// Create the storage, making sure both sub-directories exist.
    pub async fn new(root: impl Into<PathBuf>, max_upload_bytes: u64) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(UPLOAD_DIR)).await?;
        fs::create_dir_all(root.join(OUTPUT_DIR)).await?;
        info!(root = %root.display(), max_upload_bytes, "Local storage ready");
        Ok(Self {
            root,
            max_upload_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Path an upload for `job_id` is stored at.
    pub fn upload_path(&self, job_id: &JobId, filename: &str) -> StorageResult<PathBuf> {
        let name = sanitize_filename(filename)?;
        Ok(self.root.join(UPLOAD_DIR).join(format!("{}_{}", job_id, name)))
    }

    /// Path the annotated video for `job_id` is written to.
    pub fn output_path(&self, job_id: &JobId) -> PathBuf {
        self.root.join(OUTPUT_DIR).join(format!("{}_pose.mp4", job_id))
    }

    /// Stream an upload to disk.
    ///
    /// The partial file is removed if the stream errors, the size limit is
    /// hit, or nothing was received.
    pub async fn save_upload<S, B, E>(
        &self,
        job_id: &JobId,
        filename: &str,
        mut stream: S,
    ) -> StorageResult<StoredUpload>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        let stored_name = sanitize_filename(filename)?;
        let path = self.root.join(UPLOAD_DIR).join(format!("{}_{}", job_id, stored_name));

        let mut file = File::create(&path).await?;
        let mut written: u64 = 0;

        let result: StorageResult<()> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| StorageError::Stream(e.to_string()))?;
                let chunk = chunk.as_ref();
                written += chunk.len() as u64;
                if written > self.max_upload_bytes {
                    return Err(StorageError::TooLarge {
                        limit: self.max_upload_bytes,
                    });
                }
                file.write_all(chunk).await?;
            }
            if written == 0 {
                return Err(StorageError::Empty);
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            drop(file);
            if let Err(rm) = fs::remove_file(&path).await {
                warn!(path = %path.display(), "Failed to remove partial upload: {}", rm);
            }
            return Err(e);
        }

        debug!(job_id = %job_id, bytes = written, path = %path.display(), "Upload stored");

        Ok(StoredUpload {
            path,
            bytes: written,
            stored_name,
        })
    }

    /// Open the annotated output for reading, returning the file and its size.
    pub async fn open_output(&self, job_id: &JobId) -> StorageResult<(File, u64)> {
        let path = self.output_path(job_id);
        let file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Remove a file if it exists.
    pub async fn remove_file(&self, path: &Path) -> StorageResult<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the upload and output belonging to a job.
    pub async fn remove_job_files(&self, job_id: &JobId, input_path: &Path) -> StorageResult<()> {
        self.ensure_inside_root(input_path)?;
        self.remove_file(input_path).await?;
        self.remove_file(&self.output_path(job_id)).await?;
        Ok(())
    }

    /// Delete stored files whose modification time is older than `max_age`.
    ///
    /// Files named after a job in `live` are kept regardless of age.
    /// Returns the number of files removed.
    pub async fn sweep_older_than(&self, max_age: Duration, live: &HashSet<JobId>) -> StorageResult<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        for dir in [UPLOAD_DIR, OUTPUT_DIR] {
            let mut entries = fs::read_dir(self.root.join(dir)).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta = match entry.metadata().await {
                    Ok(m) if m.is_file() => m,
                    _ => continue,
                };
                if job_id_of(&entry.file_name().to_string_lossy()).is_some_and(|id| live.contains(&id)) {
                    continue;
                }
                let modified = meta.modified().unwrap_or(SystemTime::now());
                if modified < cutoff && self.remove_file(&entry.path()).await? {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!(removed, "Swept expired files");
        }
        Ok(removed)
    }

    /// Readiness probe: create and delete a scratch file.
    pub async fn check_writable(&self) -> StorageResult<()> {
        let probe = self.root.join(OUTPUT_DIR).join(".write-probe");
        fs::write(&probe, b"ok").await?;
        fs::remove_file(&probe).await?;
        Ok(())
    }

    fn ensure_inside_root(&self, path: &Path) -> StorageResult<()> {
        if path.starts_with(&self.root) && !path.components().any(|c| c.as_os_str() == "..") {
            Ok(())
        } else {
            Err(StorageError::invalid_name(path.display().to_string()))
        }
    }
}

/// Job id encoded in a stored file name (`<job_id>_<rest>`).
fn job_id_of(file_name: &str) -> Option<JobId> {
    let (prefix, _) = file_name.split_once('_')?;
    JobId::parse(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    async fn storage(limit: u64) -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), limit).await.unwrap();
        (dir, storage)
    }

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<&'static [u8], std::io::Error>> + Unpin {
        let items: Vec<Result<&'static [u8], std::io::Error>> =
            parts.iter().map(|p| Ok(p.as_bytes())).collect();
        stream::iter(items)
    }

    #[tokio::test]
    async fn test_save_upload_writes_all_chunks() {
        let (_dir, storage) = storage(1024).await;
        let job = JobId::new();

        let stored = storage
            .save_upload(&job, "clip.mp4", chunks(&["abc", "def"]))
            .await
            .unwrap();

        assert_eq!(stored.bytes, 6);
        assert_eq!(stored.stored_name, "clip.mp4");
        assert_eq!(tokio::fs::read(&stored.path).await.unwrap(), b"abcdef");
        assert!(stored.path.starts_with(storage.root().join("uploads")));
    }

    #[tokio::test]
    async fn test_save_upload_enforces_limit_and_cleans_up() {
        let (_dir, storage) = storage(4).await;
        let job = JobId::new();

        let err = storage
            .save_upload(&job, "clip.mp4", chunks(&["abc", "def"]))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::TooLarge { limit: 4 }));
        assert!(!storage.upload_path(&job, "clip.mp4").unwrap().exists());
    }

    #[tokio::test]
    async fn test_save_upload_rejects_empty() {
        let (_dir, storage) = storage(1024).await;
        let err = storage
            .save_upload(&JobId::new(), "clip.mp4", chunks(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Empty));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_save_upload_stream_error_cleans_up() {
        let (_dir, storage) = storage(1024).await;
        let job = JobId::new();
        let failing = stream::iter(vec![
            Ok(&b"abc"[..]),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "client went away")),
        ]);

        let err = storage.save_upload(&job, "clip.mp4", failing).await.unwrap_err();
        assert!(matches!(err, StorageError::Stream(_)));
        assert!(!storage.upload_path(&job, "clip.mp4").unwrap().exists());
    }

    #[tokio::test]
    async fn test_traversal_names_stay_in_upload_dir() {
        let (_dir, storage) = storage(1024).await;
        let job = JobId::new();
        let stored = storage
            .save_upload(&job, "../../evil.mp4", chunks(&["x"]))
            .await
            .unwrap();
        assert_eq!(stored.path.parent().unwrap(), storage.root().join("uploads"));
    }

    #[tokio::test]
    async fn test_open_output_missing_is_not_found() {
        let (_dir, storage) = storage(1024).await;
        let err = storage.open_output(&JobId::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_job_files() {
        let (_dir, storage) = storage(1024).await;
        let job = JobId::new();
        let stored = storage
            .save_upload(&job, "clip.mp4", chunks(&["x"]))
            .await
            .unwrap();
        tokio::fs::write(storage.output_path(&job), b"out").await.unwrap();

        storage.remove_job_files(&job, &stored.path).await.unwrap();

        assert!(!stored.path.exists());
        assert!(!storage.output_path(&job).exists());
    }

    #[tokio::test]
    async fn test_remove_job_files_refuses_outside_root() {
        let (_dir, storage) = storage(1024).await;
        let err = storage
            .remove_job_files(&JobId::new(), Path::new("/etc/hosts"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_sweep_removes_everything_with_zero_age() {
        let (_dir, storage) = storage(1024).await;
        let job = JobId::new();
        storage
            .save_upload(&job, "clip.mp4", chunks(&["x"]))
            .await
            .unwrap();
        tokio::fs::write(storage.output_path(&job), b"out").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let removed = storage
            .sweep_older_than(Duration::ZERO, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn test_sweep_keeps_files_of_live_jobs() {
        let (_dir, storage) = storage(1024).await;
        let live = JobId::new();
        let stale = JobId::new();
        let kept = storage
            .save_upload(&live, "queued.mp4", chunks(&["x"]))
            .await
            .unwrap();
        let dropped = storage
            .save_upload(&stale, "old.mp4", chunks(&["x"]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let removed = storage
            .sweep_older_than(Duration::from_millis(10), &HashSet::from([live]))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(kept.path.exists());
        assert!(!dropped.path.exists());
    }

    #[test]
    fn test_job_id_of_stored_names() {
        let id = JobId::new();
        assert_eq!(job_id_of(&format!("{}_clip_v2.mp4", id)), Some(id.clone()));
        assert_eq!(job_id_of(&format!("{}_pose.mp4", id)), Some(id));
        assert_eq!(job_id_of("notes_clip.mp4"), None);
        assert_eq!(job_id_of(".write-probe"), None);
    }

    #[tokio::test]
    async fn test_check_writable() {
        let (_dir, storage) = storage(1024).await;
        storage.check_writable().await.unwrap();
    }
}
