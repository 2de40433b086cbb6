use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use super::reader::{to_document, LocalState};
use super::SyncOptions;
use crate::error::{SyncError, SyncResult};
use crate::model::{Ticket, Tier};
use crate::providers::Provider;
use crate::store::{base_path, feature_path, DocumentStore};
use crate::util::fan_out::fan_out;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedItem {
    pub local_id: String,
    pub tier: Tier,
    pub remote_id: String,
    pub remote_kind: String,
    /// False when an existing remote item was updated in place.
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFailure {
    pub local_id: String,
    pub message: String,
}

/// Per-item result of a push. A retry only has to deal with `failed` and
/// `skipped`: everything in `pushed` already has its remote id stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub pushed: Vec<PushedItem>,
    pub failed: Vec<PushFailure>,
    /// Local ids not attempted because an ancestor failed.
    pub skipped: Vec<String>,
}

impl PushReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn created(&self) -> usize {
        self.pushed.iter().filter(|p| p.created).count()
    }
}

impl std::fmt::Display for PushReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pushed {} items ({} created, {} updated)",
            self.pushed.len(),
            self.created(),
            self.pushed.len() - self.created()
        )?;
        for failure in &self.failed {
            write!(f, "\n  failed {}: {}", failure.local_id, failure.message)?;
        }
        if !self.skipped.is_empty() {
            write!(f, "\n  skipped: {}", self.skipped.join(", "))?;
        }
        Ok(())
    }
}

/// Export the whole local hierarchy to the remote system.
///
/// Tiers go strictly in order: every requirement, then every story, then
/// every task, because a child needs its parent's remote id. Within a tier
/// items are pushed concurrently up to the configured limit. A failed item
/// blocks its descendants. Remote ids of everything that did get pushed are
/// written back before a failure is reported.
pub async fn push(
    store: &dyn DocumentStore,
    provider: &dyn Provider,
    options: &SyncOptions,
    now: &str,
) -> SyncResult<PushReport> {
    let state = LocalState::load(store).await?;
    let tree = state.hierarchy();
    let mut report = PushReport::default();
    if tree.is_empty() {
        info!("nothing to push");
        return Ok(report);
    }

    let tops: Vec<&Ticket> = tree.iter().collect();
    let mids: Vec<&Ticket> = tops.iter().flat_map(|t| t.children.iter()).collect();
    let leaves: Vec<&Ticket> = mids.iter().flat_map(|t| t.children.iter()).collect();

    let mut remote_of: HashMap<String, String> = HashMap::new();
    let mut blocked: HashSet<String> = HashSet::new();

    for level in [tops, mids, leaves] {
        let mut ready = Vec::with_capacity(level.len());
        for item in level {
            let Some(local_id) = item.local_id.clone() else {
                continue;
            };
            let parent_local = item.local_parent_id.as_deref();
            if parent_local.is_some_and(|p| blocked.contains(p)) {
                report.skipped.push(local_id.clone());
                blocked.insert(local_id);
                continue;
            }
            let parent_remote = parent_local.and_then(|p| remote_of.get(p)).cloned();
            ready.push((local_id, prepare(item, provider), parent_remote));
        }

        let results = fan_out(ready, options.concurrency, |(local_id, item, parent)| async move {
            let result = provider.create_or_update(&item, parent.as_deref()).await;
            (local_id, item, result)
        })
        .await;

        for (local_id, item, result) in results {
            match result {
                Ok(remote_id) => {
                    let created = item.remote_id() != Some(remote_id.as_str());
                    debug!(local_id = %local_id, remote_id = %remote_id, created, "pushed item");
                    remote_of.insert(local_id.clone(), remote_id.clone());
                    report.pushed.push(PushedItem {
                        local_id,
                        tier: item.tier,
                        remote_id,
                        remote_kind: item.remote_kind,
                        created,
                    });
                }
                Err(e) => {
                    warn!(local_id = %local_id, "push failed: {e:#}");
                    report.failed.push(PushFailure {
                        local_id: local_id.clone(),
                        message: format!("{e:#}"),
                    });
                    blocked.insert(local_id);
                }
            }
        }
    }

    write_back(store, &state, &report, now).await?;
    info!(
        pushed = report.pushed.len(),
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        "push finished"
    );
    if report.failed.is_empty() {
        Ok(report)
    } else {
        Err(SyncError::Push(report))
    }
}

/// The ticket as it is sent: records without a remote kind, or never pushed
/// before, use the provider's kind for the tier.
fn prepare(item: &Ticket, provider: &dyn Provider) -> Ticket {
    let mut ticket = item.clone();
    ticket.children = Vec::new();
    if ticket.remote_id().is_none() || ticket.remote_kind.is_empty() {
        ticket.remote_kind = provider.kind_for(item.tier).to_string();
    }
    ticket
}

/// Store remote ids and kinds on the records that were pushed. Only files
/// whose content changed are rewritten.
async fn write_back(store: &dyn DocumentStore, state: &LocalState, report: &PushReport, now: &str) -> SyncResult<()> {
    let pushed: HashMap<&str, &PushedItem> = report
        .pushed
        .iter()
        .map(|p| (p.local_id.as_str(), p))
        .collect();
    if pushed.is_empty() {
        return Ok(());
    }

    let mut writes = Vec::new();
    for (n, base) in &state.bases {
        let local_id = Tier::Top.format_id(*n);
        let Some(item) = pushed.get(local_id.as_str()) else {
            continue;
        };
        let mut updated = base.clone();
        updated.remote_id = Some(item.remote_id.clone());
        updated.remote_kind = Some(item.remote_kind.clone());
        if updated != *base {
            updated.updated_at = now.to_string();
            writes.push(to_document(base_path(&local_id), &updated)?);
        }
    }

    for (n, file) in &state.features {
        let mut updated = file.clone();
        for feature in &mut updated.features {
            if let Some(item) = pushed.get(feature.id.as_str()) {
                feature.remote_id = Some(item.remote_id.clone());
                feature.remote_kind = Some(item.remote_kind.clone());
            }
            for task in &mut feature.tasks {
                if let Some(item) = pushed.get(task.id.as_str()) {
                    task.remote_id = Some(item.remote_id.clone());
                    task.remote_kind = Some(item.remote_kind.clone());
                }
            }
        }
        if updated != *file {
            writes.push(to_document(feature_path(&Tier::Top.format_id(*n)), &updated)?);
        }
    }

    if writes.is_empty() {
        return Ok(());
    }
    let count = writes.len();
    store.bulk_write_files(writes).await.map_err(SyncError::Write)?;
    debug!(files = count, "wrote back remote ids");
    if let Err(e) = store.refresh().await {
        warn!("refreshing the local view failed: {e:#}");
    }
    Ok(())
}
