//! Filesystem seam used when placing finished downloads

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// File operations needed to finalize a download
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn move_item(&self, from: &Path, to: &Path) -> io::Result<()>;

    async fn create_directory(&self, path: &Path, with_intermediate_directories: bool) -> io::Result<()>;

    /// `None` if nothing exists at `path`, otherwise whether it is a directory
    async fn file_exists(&self, path: &Path) -> Option<bool>;

    /// Removes a regular file; directories are rejected
    async fn remove_item(&self, path: &Path) -> io::Result<()>;

    /// Fallback directory for files without a usable destination
    fn scratch_directory(&self) -> PathBuf;
}

/// [`FileSystem`] backed by `tokio::fs`
#[derive(Debug, Clone)]
pub struct TokioFileSystem {
    scratch_dir: PathBuf,
}

impl TokioFileSystem {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }
}

#[async_trait]
impl FileSystem for TokioFileSystem {
    async fn move_item(&self, from: &Path, to: &Path) -> io::Result<()> {
        match fs::rename(from, to).await {
            Ok(()) => Ok(()),
            Err(rename_error) => {
                // rename fails across filesystems, fall back to copy + delete
                if fs::metadata(from).await.is_err() {
                    return Err(rename_error);
                }
                fs::copy(from, to).await?;
                fs::remove_file(from).await
            }
        }
    }

    async fn create_directory(&self, path: &Path, with_intermediate_directories: bool) -> io::Result<()> {
        if with_intermediate_directories {
            fs::create_dir_all(path).await
        } else {
            fs::create_dir(path).await
        }
    }

    async fn file_exists(&self, path: &Path) -> Option<bool> {
        fs::metadata(path).await.ok().map(|meta| meta.is_dir())
    }

    async fn remove_item(&self, path: &Path) -> io::Result<()> {
        if fs::metadata(path).await?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to remove directory {}", path.display()),
            ));
        }
        fs::remove_file(path).await
    }

    fn scratch_directory(&self) -> PathBuf {
        self.scratch_dir.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_move_and_exists() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::new(dir.path());
        let from = dir.path().join("a.part");
        let to = dir.path().join("nested/deeper");
        tokio::fs::write(&from, b"data").await.unwrap();

        assert_eq!(fs.file_exists(&from).await, Some(false));
        assert_eq!(fs.file_exists(&to).await, None);

        fs.create_directory(&to, true).await.unwrap();
        assert_eq!(fs.file_exists(&to).await, Some(true));

        let target = to.join("a.txt");
        fs.move_item(&from, &target).await.unwrap();
        assert_eq!(fs.file_exists(&from).await, None);
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"data");

        fs.remove_item(&target).await.unwrap();
        assert_eq!(fs.file_exists(&target).await, None);
    }

    #[tokio::test]
    async fn test_create_without_intermediates_fails_for_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::new(dir.path());

        let result = fs.create_directory(&dir.path().join("a/b/c"), false).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_remove_item_leaves_directories_alone() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::new(dir.path());
        let folder = dir.path().join("docs");
        let keep = folder.join("inner/keep.txt");
        tokio::fs::create_dir_all(keep.parent().unwrap()).await.unwrap();
        tokio::fs::write(&keep, b"keep").await.unwrap();

        let result = fs.remove_item(&folder).await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidInput);
        assert_eq!(tokio::fs::read(&keep).await.unwrap(), b"keep");
    }

    #[tokio::test]
    async fn test_move_missing_source_errors() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::new(dir.path());

        let result = fs
            .move_item(&dir.path().join("missing"), &dir.path().join("target"))
            .await;
        assert!(result.is_err());
    }
}
