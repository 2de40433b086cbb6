use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{DocumentStore, FileWrite, Folder, StoredFile};

/// Document store held entirely in memory. Paths are `/`-separated keys.
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<BTreeMap<String, String>>,
    reject_writes: AtomicBool,
    writes: AtomicUsize,
    refreshes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn insert(&self, path: &str, content: impl Into<String>) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.to_string(), content.into());
        }
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.files.lock().ok()?.get(path).cloned()
    }

    /// Snapshot of every stored file.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.files.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Make every subsequent bulk write fail.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        match self.files.lock() {
            Ok(guard) => Ok(guard),
            Err(_) => bail!("memory store lock poisoned"),
        }
    }
}

fn split(path: &str) -> Option<(&str, &str)> {
    path.rsplit_once('/')
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(path).cloned())
    }

    async fn bulk_read_files(&self, folder: &str) -> Result<Vec<StoredFile>> {
        let folder = folder.trim_end_matches('/');
        Ok(self
            .lock()?
            .iter()
            .filter_map(|(path, content)| {
                let (dir, name) = split(path)?;
                (dir == folder).then(|| StoredFile {
                    file_name: name.to_string(),
                    content: content.clone(),
                })
            })
            .collect())
    }

    async fn bulk_write_files(&self, files: Vec<FileWrite>) -> Result<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            bail!("bulk write rejected");
        }
        let mut stored = self.lock()?;
        for file in files {
            stored.insert(file.path, file.content);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_folders(&self, root: &str) -> Result<Vec<Folder>> {
        let root = root.trim_end_matches('/');
        let mut folders: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for path in self.lock()?.keys() {
            let rest = if root.is_empty() {
                path.as_str()
            } else {
                match path.strip_prefix(root).and_then(|p| p.strip_prefix('/')) {
                    Some(rest) => rest,
                    None => continue,
                }
            };
            if let Some((dir, name)) = rest.split_once('/') {
                if !name.contains('/') {
                    folders.entry(dir.to_string()).or_default().push(name.to_string());
                }
            }
        }
        Ok(folders
            .into_iter()
            .map(|(name, children)| Folder { name, children })
            .collect())
    }

    async fn refresh(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
