//! Filesystem sink for generated artifacts.
//!
//! Artifacts live directly under `root`, one file per artifact, named after
//! the uploaded document. Writes go to a hidden temp file first and are
//! renamed into place, so a reader never observes a partial artifact.

use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FileSinkError {
    #[error("directory {} is not writable: {reason}", .path.display())]
    PermissionDenied { path: PathBuf, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type FileSinkResult<T> = Result<T, FileSinkError>;

#[derive(Clone, Debug)]
pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the output directory if needed, restricted to the owner (0700).
    pub async fn prepare(&self) -> FileSinkResult<()> {
        if !fs::try_exists(&self.root).await? {
            fs::create_dir_all(&self.root).await?;
            info!("Created output directory at {}", self.root.display());
        }
        restrict_to_owner(&self.root).await?;
        Ok(())
    }

    /// Absolute target path for an artifact named `filename`.
    ///
    /// The root is made absolute against the current directory when it is
    /// relative; the file itself does not need to exist.
    pub fn path_for(&self, filename: &str) -> io::Result<PathBuf> {
        let root = if self.root.is_absolute() {
            self.root.clone()
        } else {
            std::env::current_dir()?.join(&self.root)
        };
        Ok(root.join(filename))
    }

    /// Probe that the output directory accepts new files.
    ///
    /// Creates and removes a uniquely named file. A missing directory counts
    /// as not writable.
    pub async fn ensure_writable(&self) -> FileSinkResult<()> {
        probe_writable(&self.root).await
    }

    /// Write `content` to `path` as a whole file, replacing any previous one.
    pub async fn write(&self, path: &Path, content: &str) -> FileSinkResult<()> {
        let parent = path.parent().ok_or_else(|| {
            FileSinkError::Io(io::Error::new(
                ErrorKind::InvalidInput,
                "artifact path missing parent directory",
            ))
        })?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let mut file = File::create(&tmp_path)
            .await
            .map_err(|err| classify(parent, err))?;
        if let Err(err) = write_all_synced(&mut file, content.as_bytes()).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(classify(parent, err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(classify(parent, err));
        }

        debug!(path = %path.display(), bytes = content.len(), "artifact written");
        Ok(())
    }

    pub async fn exists(&self, path: &Path) -> bool {
        matches!(fs::metadata(path).await, Ok(meta) if meta.is_file())
    }
}

/// Shared writability probe, also used for the staging directory.
pub async fn probe_writable(dir: &Path) -> FileSinkResult<()> {
    let probe = dir.join(format!(".probe-{}", Uuid::new_v4()));
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&probe)
        .await
    {
        Ok(file) => {
            drop(file);
            if let Err(err) = fs::remove_file(&probe).await {
                debug!("could not remove probe file {}: {}", probe.display(), err);
            }
            Ok(())
        }
        Err(err) => Err(FileSinkError::PermissionDenied {
            path: dir.to_path_buf(),
            reason: err.to_string(),
        }),
    }
}

async fn write_all_synced(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

fn classify(dir: &Path, err: io::Error) -> FileSinkError {
    match err.kind() {
        ErrorKind::PermissionDenied | ErrorKind::NotFound | ErrorKind::ReadOnlyFilesystem => {
            FileSinkError::PermissionDenied {
                path: dir.to_path_buf(),
                reason: err.to_string(),
            }
        }
        _ => FileSinkError::Io(err),
    }
}

#[cfg(unix)]
async fn restrict_to_owner(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await
}

#[cfg(not(unix))]
async fn restrict_to_owner(_dir: &Path) -> io::Result<()> {
    Ok(())
}
