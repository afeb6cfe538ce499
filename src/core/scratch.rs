//! Scratch space for materialized audio.
//!
//! Some transcribers need the recording on local disk. The worker writes it
//! through a `ScratchSpace` and holds a `ScratchFile` guard. The worker
//! releases the guard once transcription returns; a guard dropped without
//! being released (panic, cancelled task) removes its file on drop.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

/// Where temporary audio copies live
#[async_trait]
pub trait ScratchSpace: Send + Sync {
    /// Write `bytes` to a new file named after `name`
    async fn create(&self, name: &str, bytes: &[u8]) -> io::Result<PathBuf>;

    /// Remove a file previously returned by `create`
    async fn remove(&self, path: &Path) -> io::Result<()>;

    /// Blocking removal for guards dropped without being released
    fn remove_now(&self, path: &Path) -> io::Result<()>;
}

/// Scratch files under a private temp directory
pub struct TempScratch {
    dir: tempfile::TempDir,
}

impl TempScratch {
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("pathways-").tempdir()?;
        Ok(Self { dir })
    }

    /// Create under a specific parent directory
    pub fn in_dir(parent: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new()
            .prefix("pathways-")
            .tempdir_in(parent)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[async_trait]
impl ScratchSpace for TempScratch {
    async fn create(&self, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        // Redelivered submissions may overlap with a previous run
        let unique = format!("{}-{}", uuid::Uuid::new_v4().simple(), name);
        let path = self.dir.path().join(unique);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    fn remove_now(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// Guard over one scratch file. Removal failures are logged, never raised.
pub struct ScratchFile {
    space: Arc<dyn ScratchSpace>,
    path: PathBuf,
    released: bool,
}

impl ScratchFile {
    /// Materialize `bytes` in `space`
    pub async fn create(space: Arc<dyn ScratchSpace>, name: &str, bytes: &[u8]) -> io::Result<Self> {
        let path = space.create(name, bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "Scratch file created");
        Ok(Self {
            space,
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file now
    pub async fn release(mut self) {
        self.released = true;
        let outcome = self.space.remove(&self.path).await;
        log_removal(&self.path, outcome);
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.released {
            log_removal(&self.path, self.space.remove_now(&self.path));
        }
    }
}

fn log_removal(path: &Path, outcome: io::Result<()>) {
    match outcome {
        Ok(()) => debug!(path = %path.display(), "Scratch file removed"),
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "Failed to remove scratch file"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_removes_file_on_drop() {
        let space: Arc<dyn ScratchSpace> = Arc::new(TempScratch::new().unwrap());

        let file = ScratchFile::create(space.clone(), "abc123.wav", b"RIFF")
            .await
            .unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());
        assert!(path.to_string_lossy().ends_with("abc123.wav"));
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFF");

        drop(file);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_release_removes_file() {
        let space: Arc<dyn ScratchSpace> = Arc::new(TempScratch::new().unwrap());

        let file = ScratchFile::create(space, "abc123.ogg", b"OggS").await.unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());

        file.release().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_removal_failure_does_not_panic() {
        let space: Arc<dyn ScratchSpace> = Arc::new(TempScratch::new().unwrap());

        let file = ScratchFile::create(space.clone(), "gone.wav", b"x").await.unwrap();
        std::fs::remove_file(file.path()).unwrap();
        drop(file);

        let file = ScratchFile::create(space, "gone-too.wav", b"x").await.unwrap();
        std::fs::remove_file(file.path()).unwrap();
        file.release().await;
    }

    #[tokio::test]
    async fn test_same_name_twice_gets_distinct_paths() {
        let scratch = TempScratch::new().unwrap();

        let a = scratch.create("abc123.wav", b"a").await.unwrap();
        let b = scratch.create("abc123.wav", b"b").await.unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(scratch.path()));
    }
}
