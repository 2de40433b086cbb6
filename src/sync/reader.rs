//! Loads the persisted requirement documents of a project and presents them
//! as a ticket hierarchy.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::model::document::non_empty;
use crate::model::{BaseRecord, FeatureFile, ProjectMetadata, Ticket, Tier};
use super::identity::IdentityMap;
use crate::store::{self, classify, is_archived, DocumentStore, FileKind, METADATA_FILE, PRD_FOLDER};

/// Snapshot of a project's local documents, taken once per sync run.
#[derive(Debug, Clone, Default)]
pub struct LocalState {
    /// Base records keyed by PRD number.
    pub bases: BTreeMap<u32, BaseRecord>,
    /// Feature files keyed by PRD number.
    pub features: BTreeMap<u32, FeatureFile>,
    /// PRD numbers found only in archived files. They stay reserved.
    pub archived: Vec<u32>,
    /// Story and task ids listed in archived feature files.
    pub archived_children: Vec<(Tier, String)>,
    pub metadata: ProjectMetadata,
}

impl LocalState {
    pub async fn load(store: &dyn DocumentStore) -> SyncResult<Self> {
        let mut state = LocalState {
            metadata: read_metadata(store).await?,
            ..Default::default()
        };

        let folders = store.list_folders("").await.map_err(SyncError::Store)?;
        let Some(folder) = folders.iter().find(|f| f.name.eq_ignore_ascii_case(PRD_FOLDER)) else {
            debug!("no requirement folder yet");
            return Ok(state);
        };

        let files = store
            .bulk_read_files(&folder.name)
            .await
            .map_err(SyncError::Store)?;

        for file in files {
            if is_archived(&file.file_name) {
                if let Some(n) = Tier::Top.parse_number(&file.file_name) {
                    state.archived.push(n);
                }
                if file.file_name.contains("-feature") {
                    archived_children(&file.file_name, &file.content, &mut state.archived_children);
                }
                continue;
            }
            match classify(&file.file_name) {
                Some(FileKind::Base(n)) => {
                    let base: BaseRecord = serde_json::from_str(&file.content)
                        .with_context(|| format!("{} is not a valid base record", file.file_name))
                        .map_err(SyncError::Store)?;
                    state.bases.insert(n, base);
                }
                Some(FileKind::Feature(n)) => {
                    let feature: FeatureFile = serde_json::from_str(&file.content)
                        .with_context(|| format!("{} is not a valid feature file", file.file_name))
                        .map_err(SyncError::Store)?;
                    state.features.insert(n, feature);
                }
                None => debug!(file = %file.file_name, "ignoring unrelated file"),
            }
        }

        let orphans = state.features.keys().filter(|n| !state.bases.contains_key(*n)).count();
        if orphans > 0 {
            warn!(orphans, "feature files without a base record are ignored");
        }
        state.archived.sort_unstable();
        state.archived.dedup();
        Ok(state)
    }

    pub fn base(&self, local_id: &str) -> Option<&BaseRecord> {
        self.bases.get(&Tier::Top.parse_number(local_id)?)
    }

    pub fn feature_file(&self, local_id: &str) -> Option<&FeatureFile> {
        self.features.get(&Tier::Top.parse_number(local_id)?)
    }

    /// Local ids of archived requirements.
    pub fn archived_ids(&self) -> impl Iterator<Item = String> + '_ {
        self.archived.iter().map(|n| Tier::Top.format_id(*n))
    }

    /// Count every archived local id, of every tier, as taken.
    pub fn reserve_archived(&self, identity: &mut IdentityMap) {
        for id in self.archived_ids() {
            identity.reserve(Tier::Top, &id);
        }
        for (tier, id) in &self.archived_children {
            identity.reserve(*tier, id);
        }
    }

    /// The active local hierarchy as tickets, PRDs in numeric order.
    ///
    /// A ticket's `is_update` is true when its record already carries a
    /// remote id. Remote kinds are left empty where the record has none.
    pub fn hierarchy(&self) -> Vec<Ticket> {
        self.bases
            .iter()
            .map(|(n, base)| {
                let local_id = Tier::Top.format_id(*n);
                let remote_id = base.remote_id.as_deref().and_then(non_empty);
                let mut top = Ticket {
                    remote_id: remote_id.clone(),
                    remote_kind: base.remote_kind.clone().unwrap_or_default(),
                    local_id: Some(local_id.clone()),
                    description: non_empty(&base.requirement),
                    is_update: remote_id.is_some(),
                    ..Ticket::new(Tier::Top, base.title.clone())
                };
                if let Some(file) = self.features.get(n) {
                    top.children = stories(file, &local_id, remote_id.as_deref());
                }
                top
            })
            .collect()
    }
}

fn stories(file: &FeatureFile, prd_id: &str, prd_remote: Option<&str>) -> Vec<Ticket> {
    file.features
        .iter()
        .filter(|f| !f.id.is_empty())
        .map(|feature| {
            let remote_id = feature.remote_id.as_deref().and_then(non_empty);
            let tasks = feature
                .tasks
                .iter()
                .filter(|t| !t.id.is_empty())
                .map(|task| {
                    let task_remote = task.remote_id.as_deref().and_then(non_empty);
                    Ticket {
                        is_update: task_remote.is_some(),
                        remote_id: task_remote,
                        remote_kind: task.remote_kind.clone().unwrap_or_default(),
                        remote_parent_id: remote_id.clone(),
                        local_id: Some(task.id.clone()),
                        local_parent_id: Some(feature.id.clone()),
                        description: non_empty(&task.acceptance),
                        ..Ticket::new(Tier::Leaf, task.list.clone())
                    }
                })
                .collect();
            Ticket {
                is_update: remote_id.is_some(),
                remote_id,
                remote_kind: feature.remote_kind.clone().unwrap_or_default(),
                remote_parent_id: prd_remote.map(String::from),
                local_id: Some(feature.id.clone()),
                local_parent_id: Some(prd_id.to_string()),
                description: non_empty(&feature.description),
                children: tasks,
                ..Ticket::new(Tier::Mid, feature.name.clone())
            }
        })
        .collect()
}

/// Collect story and task ids from an archived feature file. Archived files
/// are never rewritten, so anything unreadable is skipped with a warning.
fn archived_children(file_name: &str, content: &str, out: &mut Vec<(Tier, String)>) {
    let doc: Value = match serde_json::from_str(content) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(file = file_name, "archived feature file is not valid JSON: {e}");
            return;
        }
    };
    let id_of = |v: &Value| v.get("id").and_then(Value::as_str).map(String::from);
    let features = doc.get("features").and_then(Value::as_array).into_iter().flatten();
    for feature in features {
        if let Some(id) = id_of(feature) {
            out.push((Tier::Mid, id));
        }
        let tasks = feature.get("tasks").and_then(Value::as_array).into_iter().flatten();
        out.extend(tasks.filter_map(id_of).map(|id| (Tier::Leaf, id)));
    }
}

async fn read_metadata(store: &dyn DocumentStore) -> SyncResult<ProjectMetadata> {
    match store.read_file(METADATA_FILE).await.map_err(SyncError::Store)? {
        None => Ok(ProjectMetadata::default()),
        Some(raw) if raw.trim().is_empty() => Ok(ProjectMetadata::default()),
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| SyncError::Store(anyhow!("{METADATA_FILE} is not valid: {e}"))),
    }
}

/// Serialise a record the way every document in the store is written.
pub(crate) fn to_document<T: serde::Serialize>(path: String, value: &T) -> SyncResult<store::FileWrite> {
    let content = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialise {path}"))
        .map_err(SyncError::Write)?;
    Ok(store::FileWrite { path, content })
}
