use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::StoreError;
use crate::note::normalize_path;

pub type StoreResult<T> = Result<T, StoreError>;

/// File capabilities the sync engine needs from the host vault.  All paths
/// are vault-relative and `/`-separated.
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn file_exists(&self, path: &str) -> StoreResult<bool>;
    /// Create a new file.  Fails with [`StoreError::AlreadyExists`] when
    /// something is already at `path`.
    async fn create(&self, path: &str, content: &str) -> StoreResult<()>;
    /// `None` when no file exists at `path`.
    async fn read(&self, path: &str) -> StoreResult<Option<String>>;
    async fn modify(&self, path: &str, content: &str) -> StoreResult<()>;
    /// Move a file somewhere the user can recover it from.
    async fn trash(&self, path: &str) -> StoreResult<()>;
    async fn folder_exists(&self, path: &str) -> StoreResult<bool>;
    async fn create_folder(&self, path: &str) -> StoreResult<()>;
    /// File names (not paths) directly inside `folder`, sorted.  A missing
    /// folder has no children.
    async fn list_children(&self, folder: &str) -> StoreResult<Vec<String>>;
}

/// [`NoteStore`] over a vault directory on disk.  Deleted notes are moved
/// under `trash_folder` (Obsidian's `.trash` by default) keeping their
/// relative path.
#[derive(Debug, Clone)]
pub struct FsNoteStore {
    root: PathBuf,
    trash_folder: String,
}

impl FsNoteStore {
    pub fn new(root: impl Into<PathBuf>, trash_folder: impl AsRef<str>) -> Self {
        Self {
            root: root.into(),
            trash_folder: normalize_path(trash_folder.as_ref()),
        }
    }

    /// Absolute location of a vault-relative path.  Rejects `..` so a note
    /// path can never escape the vault.
    pub fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        let normalized = normalize_path(path);
        let relative = Path::new(&normalized);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn is_file(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    async fn trash_destination(&self, path: &str) -> StoreResult<PathBuf> {
        let target = self.resolve(&format!("{}/{}", self.trash_folder, path))?;
        if tokio::fs::metadata(&target).await.is_err() {
            return Ok(target);
        }

        let stem = target
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = target
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let mut counter = 1u32;
        loop {
            let candidate = target.with_file_name(format!("{stem} {counter}{extension}"));
            if tokio::fs::metadata(&candidate).await.is_err() {
                return Ok(candidate);
            }
            counter += 1;
        }
    }
}

#[async_trait]
impl NoteStore for FsNoteStore {
    async fn file_exists(&self, path: &str) -> StoreResult<bool> {
        let full = self.resolve(path)?;
        Ok(self.is_file(&full).await)
    }

    async fn create(&self, path: &str, content: &str) -> StoreResult<()> {
        let full = self.resolve(path)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::AlreadyExists => StoreError::AlreadyExists(path.to_string()),
                _ => StoreError::io(path, err),
            })?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|err| StoreError::io(path, err))?;
        file.flush().await.map_err(|err| StoreError::io(path, err))?;
        Ok(())
    }

    async fn read(&self, path: &str) -> StoreResult<Option<String>> {
        let full = self.resolve(path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::io(path, err)),
        }
    }

    async fn modify(&self, path: &str, content: &str) -> StoreResult<()> {
        let full = self.resolve(path)?;
        if !self.is_file(&full).await {
            return Err(StoreError::NotFound(path.to_string()));
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|err| StoreError::io(path, err))
    }

    async fn trash(&self, path: &str) -> StoreResult<()> {
        let source = self.resolve(path)?;
        if !self.is_file(&source).await {
            return Err(StoreError::NotFound(path.to_string()));
        }

        let destination = self.trash_destination(path).await?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::io(path, err))?;
        }
        tokio::fs::rename(&source, &destination)
            .await
            .map_err(|err| StoreError::io(path, err))?;
        debug!(path, trashed_to = %destination.display(), "note moved to trash");
        Ok(())
    }

    async fn folder_exists(&self, path: &str) -> StoreResult<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::metadata(&full)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false))
    }

    async fn create_folder(&self, path: &str) -> StoreResult<()> {
        let full = self.resolve(path)?;
        tokio::fs::create_dir_all(&full)
            .await
            .map_err(|err| StoreError::io(path, err))
    }

    async fn list_children(&self, folder: &str) -> StoreResult<Vec<String>> {
        let full = self.resolve(folder)?;
        let mut entries = match tokio::fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(folder, err)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StoreError::io(folder, err))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|ft| ft.is_file())
                .unwrap_or(false);
            if is_file {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
