use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{DocumentStore, FileWrite, Folder, StoredFile};

const STAGING_SUFFIX: &str = ".reqsync-tmp";
const BACKUP_SUFFIX: &str = ".reqsync-bak";

/// Document store rooted at a project directory on disk.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        if rel.is_absolute() || rel.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            bail!("path {relative:?} escapes the project root");
        }
        Ok(self.root.join(rel))
    }

    async fn sorted_entries(&self, dir: &Path, want_dirs: bool) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
        };
        while let Some(entry) = entries.next_entry().await? {
            let is_dir = entry.file_type().await?.is_dir();
            if is_dir == want_dirs {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn staging_path(target: &Path, suffix: &str) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Move an existing target file aside, then move the staged file into place.
/// Returns the backup path when a file was replaced.
async fn commit(tmp: &Path, target: &Path) -> std::io::Result<Option<PathBuf>> {
    let existing = matches!(tokio::fs::metadata(target).await, Ok(meta) if meta.is_file());
    let backup = if existing {
        let backup = staging_path(target, BACKUP_SUFFIX);
        tokio::fs::rename(target, &backup).await?;
        Some(backup)
    } else {
        None
    };
    if let Err(e) = tokio::fs::rename(tmp, target).await {
        if let Some(backup) = &backup {
            let _ = tokio::fs::rename(backup, target).await;
        }
        return Err(e);
    }
    Ok(backup)
}

/// Undo committed renames, newest first.
async fn rollback(committed: &[(&Path, Option<PathBuf>)]) {
    for (target, backup) in committed.iter().rev() {
        let restored = match backup {
            Some(backup) => tokio::fs::rename(backup, target).await,
            None => tokio::fs::remove_file(target).await,
        };
        if let Err(e) = restored {
            warn!(path = %target.display(), "failed to roll back document write: {e}");
        }
    }
}

async fn remove_all<'a>(paths: impl Iterator<Item = &'a PathBuf>) {
    for path in paths {
        let _ = tokio::fs::remove_file(path).await;
    }
}

#[async_trait]
impl DocumentStore for FsStore {
    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        let full = self.resolve(path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", full.display())),
        }
    }

    async fn bulk_read_files(&self, folder: &str) -> Result<Vec<StoredFile>> {
        let dir = self.resolve(folder)?;
        let mut files = Vec::new();
        for file_name in self.sorted_entries(&dir, false).await? {
            let path = dir.join(&file_name);
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            files.push(StoredFile { file_name, content });
        }
        Ok(files)
    }

    /// Stages every file next to its target first and only renames once all
    /// staging writes succeeded. Files about to be replaced are moved aside
    /// until the whole batch is in place, so a failed commit puts them back
    /// and the batch lands completely or not at all.
    async fn bulk_write_files(&self, files: Vec<FileWrite>) -> Result<()> {
        let targets = files
            .iter()
            .map(|file| self.resolve(&file.path))
            .collect::<Result<Vec<_>>>()?;

        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(files.len());
        for (file, target) in files.iter().zip(targets) {
            let tmp = staging_path(&target, STAGING_SUFFIX);
            let result = async {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&tmp, &file.content).await
            }
            .await;

            if let Err(e) = result {
                remove_all(staged.iter().map(|(tmp, _)| tmp)).await;
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e).with_context(|| format!("Failed to stage {}", target.display()));
            }
            staged.push((tmp, target));
        }

        let mut committed: Vec<(&Path, Option<PathBuf>)> = Vec::with_capacity(staged.len());
        for (tmp, target) in &staged {
            match commit(tmp, target).await {
                Ok(backup) => committed.push((target.as_path(), backup)),
                Err(e) => {
                    rollback(&committed).await;
                    remove_all(staged.iter().map(|(tmp, _)| tmp)).await;
                    return Err(e).with_context(|| format!("Failed to write {}", target.display()));
                }
            }
        }
        remove_all(committed.iter().filter_map(|(_, backup)| backup.as_ref())).await;
        debug!(count = staged.len(), root = %self.root.display(), "wrote document batch");
        Ok(())
    }

    async fn list_folders(&self, root: &str) -> Result<Vec<Folder>> {
        let dir = self.resolve(root)?;
        let mut folders = Vec::new();
        for name in self.sorted_entries(&dir, true).await? {
            let children = self.sorted_entries(&dir.join(&name), false).await?;
            folders.push(Folder { name, children });
        }
        Ok(folders)
    }
}
