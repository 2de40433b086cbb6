pub mod fs;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::Tier;

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Folder holding requirement base and feature files, relative to the
/// project root.
pub const PRD_FOLDER: &str = "prd";
pub const METADATA_FILE: &str = ".metadata.json";

const BASE_SUFFIX: &str = "-base.json";
const FEATURE_SUFFIX: &str = "-feature.json";
const ARCHIVED_MARKER: &str = "-archived";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub file_name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    /// Path relative to the project root, `/`-separated.
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub name: String,
    pub children: Vec<String>,
}

/// The local document store the sync engine reads from and writes to.
///
/// All paths are relative to the project root.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// `None` when the file does not exist.
    async fn read_file(&self, path: &str) -> Result<Option<String>>;

    /// Every file directly inside `folder`, sorted by name.
    async fn bulk_read_files(&self, folder: &str) -> Result<Vec<StoredFile>>;

    /// Write the whole batch or nothing.
    async fn bulk_write_files(&self, files: Vec<FileWrite>) -> Result<()>;

    /// Sub-folders of `root` and the file names inside each, sorted by name.
    async fn list_folders(&self, root: &str) -> Result<Vec<Folder>>;

    /// Hook for the surrounding application to reload its view after a sync.
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

pub fn base_path(local_id: &str) -> String {
    format!("{PRD_FOLDER}/{local_id}{BASE_SUFFIX}")
}

pub fn feature_path(local_id: &str) -> String {
    format!("{PRD_FOLDER}/{local_id}{FEATURE_SUFFIX}")
}

pub fn is_archived(file_name: &str) -> bool {
    file_name.contains(ARCHIVED_MARKER)
}

/// Kind of requirement file, judged by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Base(u32),
    Feature(u32),
}

/// Classify an active requirement file name. Archived and unrelated files
/// yield `None`.
pub fn classify(file_name: &str) -> Option<FileKind> {
    if is_archived(file_name) {
        return None;
    }
    if let Some(stem) = file_name.strip_suffix(BASE_SUFFIX) {
        return whole_number(stem).map(FileKind::Base);
    }
    if let Some(stem) = file_name.strip_suffix(FEATURE_SUFFIX) {
        return whole_number(stem).map(FileKind::Feature);
    }
    None
}

fn whole_number(stem: &str) -> Option<u32> {
    let digits = stem.strip_prefix(Tier::Top.prefix())?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_naming_convention() {
        assert_eq!(base_path("PRD01"), "prd/PRD01-base.json");
        assert_eq!(feature_path("PRD12"), "prd/PRD12-feature.json");
    }

    #[test]
    fn classify_recognises_active_files() {
        assert_eq!(classify("PRD01-base.json"), Some(FileKind::Base(1)));
        assert_eq!(classify("PRD1-feature.json"), Some(FileKind::Feature(1)));
        assert_eq!(classify("PRD03-base-archived.json"), None);
        assert_eq!(classify("PRD03-archived-base.json"), None);
        assert_eq!(classify("notes.json"), None);
        assert_eq!(classify("PRDx-base.json"), None);
    }
}
