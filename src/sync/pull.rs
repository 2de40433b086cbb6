use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::allocator::IdAllocator;
use super::grouper::{group, Selection};
use super::identity::IdentityMap;
use super::merge::{merge_mid_list, merge_top, prune_relocated, MergeStats, Relocations};
use super::reader::{to_document, LocalState};
use crate::error::{SyncError, SyncResult};
use crate::model::Tier;
use crate::store::{base_path, feature_path, DocumentStore, METADATA_FILE};

/// What a pull run ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// The batch was written.
    Done(PullSummary),
    /// The selection grouped into nothing; no file was touched.
    NoOp { skipped_orphans: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullSummary {
    /// Paths written, in batch order.
    pub written: Vec<String>,
    /// Requirements imported for the first time.
    pub new_requirements: usize,
    pub stats: MergeStats,
    pub skipped_orphans: usize,
}

impl std::fmt::Display for PullOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PullOutcome::NoOp { skipped_orphans } => {
                write!(f, "Nothing to import")?;
                if *skipped_orphans > 0 {
                    write!(f, " ({skipped_orphans} items skipped: parent not selected)")?;
                }
                Ok(())
            }
            PullOutcome::Done(s) => {
                write!(
                    f,
                    "Imported {} files: {} new requirements, {} items created, {} updated, {} local items kept",
                    s.written.len(),
                    s.new_requirements,
                    s.stats.created,
                    s.stats.updated,
                    s.stats.carried
                )?;
                if s.skipped_orphans > 0 {
                    write!(f, ", {} skipped (parent not selected)", s.skipped_orphans)?;
                }
                Ok(())
            }
        }
    }
}

/// Import a selection of remote tickets into the local documents.
///
/// All writes, including the counter update, are assembled in memory and
/// handed to the store as one batch. Any failure before that point leaves
/// the store untouched.
pub async fn pull(store: &dyn DocumentStore, selection: &Selection, now: &str) -> SyncResult<PullOutcome> {
    let state = LocalState::load(store).await?;
    let mut identity = IdentityMap::build(&state.hierarchy());
    state.reserve_archived(&mut identity);
    debug!(mapped = identity.len(), "built identity map");

    let grouping = group(selection);
    if grouping.groups.is_empty() {
        info!("pull selection produced no groups");
        return Ok(PullOutcome::NoOp {
            skipped_orphans: grouping.skipped_orphans,
        });
    }

    let moves = Relocations::new(&grouping.groups, &state.features);
    let mut merged = HashSet::new();
    let mut alloc = IdAllocator::new(&identity, &state.metadata);
    let mut writes = Vec::with_capacity(grouping.groups.len() * 2 + 1);
    let mut summary = PullSummary {
        skipped_orphans: grouping.skipped_orphans,
        ..Default::default()
    };

    for g in &grouping.groups {
        let remote_id = g.top.remote_id().unwrap_or_default();
        let local_id = match identity.get(Tier::Top, remote_id) {
            Some(entry) => entry.local_id.clone(),
            None => {
                summary.new_requirements += 1;
                alloc.allocate(Tier::Top)
            }
        };

        let base = merge_top(state.base(&local_id), &g.top, &local_id, now);
        let (features, stats) = merge_mid_list(state.feature_file(&local_id), g, &identity, &moves, &mut alloc);
        debug!(
            requirement = %local_id,
            remote_id,
            created = stats.created,
            updated = stats.updated,
            carried = stats.carried,
            "merged requirement"
        );
        summary.stats.add(stats);

        writes.push(to_document(base_path(&local_id), &base)?);
        writes.push(to_document(feature_path(&local_id), &features)?);
        merged.insert(local_id);
    }

    // Requirements outside the selection lose the stories and tasks moved away.
    for (n, file) in &state.features {
        let local_id = Tier::Top.format_id(*n);
        if merged.contains(&local_id) || !state.bases.contains_key(n) {
            continue;
        }
        if let Some(pruned) = prune_relocated(file, &moves) {
            debug!(requirement = %local_id, "dropping records moved to another requirement");
            writes.push(to_document(feature_path(&local_id), &pruned)?);
        }
    }

    let mut metadata = state.metadata.clone();
    let mut raised = false;
    for tier in Tier::ALL {
        if let Some(highest) = alloc.highest_issued(tier) {
            raised |= metadata.raise_counter(tier, highest);
        }
    }
    if raised {
        writes.push(to_document(METADATA_FILE.to_string(), &metadata)?);
    }

    summary.written = writes.iter().map(|w| w.path.clone()).collect();
    store.bulk_write_files(writes).await.map_err(SyncError::Write)?;
    info!(files = summary.written.len(), "pull batch written");

    if let Err(e) = store.refresh().await {
        warn!("refreshing the local view failed: {e:#}");
    }
    Ok(PullOutcome::Done(summary))
}
