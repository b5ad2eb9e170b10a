//! Received image storage and the best-effort viewer hook.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ImageStoreError {
    #[error("invalid image filename {0:?}")]
    InvalidFilename(String),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
}

/// Reduce a peer-supplied filename to a bare file name inside the image
/// directory. Returns `None` for names that would escape it or are empty.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = Path::new(name).file_name()?.to_str()?;
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

/// Writes received images under a single directory.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where an image named `filename` would be stored.
    pub fn path_for(&self, filename: &str) -> Result<PathBuf, ImageStoreError> {
        let name = sanitize_filename(filename)
            .ok_or_else(|| ImageStoreError::InvalidFilename(filename.to_string()))?;
        Ok(self.dir.join(name))
    }

    /// Persist `data` as `filename`, creating the directory if needed.
    /// An existing file with the same name is replaced.
    pub async fn save(&self, filename: &str, data: &[u8]) -> Result<PathBuf, ImageStoreError> {
        let path = self.path_for(filename)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ImageStoreError::WriteFailed(self.dir.clone(), e))?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| ImageStoreError::WriteFailed(path.clone(), e))?;
        Ok(path)
    }
}

// ── Viewer ────────────────────────────────────────────────────────────────────

/// Side effect run after an image is stored. Must not block; failures are
/// the implementation's to swallow.
pub trait ImageViewer: Send + Sync {
    fn open(&self, path: &Path);
}

/// Opens files with the operating system's default application.
pub struct PlatformViewer;

impl ImageViewer for PlatformViewer {
    fn open(&self, path: &Path) {
        let mut cmd = if cfg!(target_os = "macos") {
            tokio::process::Command::new("open")
        } else if cfg!(windows) {
            let mut c = tokio::process::Command::new("cmd");
            c.args(["/C", "start", ""]);
            c
        } else {
            tokio::process::Command::new("xdg-open")
        };
        cmd.arg(path)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        if let Err(e) = cmd.spawn() {
            tracing::debug!(error = %e, path = %path.display(), "image viewer not started");
        }
    }
}

/// Viewer that does nothing.
pub struct NoViewer;

impl ImageViewer for NoViewer {
    fn open(&self, _path: &Path) {}
}
