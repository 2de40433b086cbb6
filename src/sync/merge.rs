//! Combines freshly fetched remote tickets with the records already stored
//! for the same requirement.
//!
//! Remote data refreshes the fields it owns (title, description, remote id
//! and kind) but an empty remote value never clears a local one. Everything
//! else on an existing record, such as a task's status, is left alone, and
//! local records with no remote counterpart in the batch are carried forward
//! after the merged ones.
//!
//! A story or task that the remote moved to another parent keeps its local
//! id and its stored record, and is dropped from its old parent.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Map;
use tracing::debug;

use super::allocator::IdAllocator;
use super::grouper::TicketGroup;
use super::identity::IdentityMap;
use crate::model::document::{non_empty, NEW_TASK_STATUS};
use crate::model::{BaseRecord, FeatureFile, FeatureRecord, TaskRecord, Ticket, Tier};

/// Counts of what a merge did, across stories and tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub created: usize,
    pub updated: usize,
    pub carried: usize,
}

impl MergeStats {
    pub fn add(&mut self, other: MergeStats) {
        self.created += other.created;
        self.updated += other.updated;
        self.carried += other.carried;
    }
}

/// Merge a fresh top-level ticket into its base record.
///
/// `updated_at` moves to `now` only when something actually changed, which
/// keeps a repeated pull byte-identical.
pub fn merge_top(existing: Option<&BaseRecord>, fresh: &Ticket, local_id: &str, now: &str) -> BaseRecord {
    let Some(existing) = existing else {
        return BaseRecord::from_ticket(local_id, fresh, now);
    };
    let mut merged = existing.clone();
    merged.id = local_id.to_string();
    refresh_text(&mut merged.title, &fresh.title);
    refresh_text(&mut merged.requirement, fresh.description_text());
    refresh_identity(&mut merged.remote_id, &mut merged.remote_kind, fresh);
    if merged != *existing {
        merged.updated_at = now.to_string();
    }
    merged
}

/// Every story and task remote id selected in one pull, with the record
/// each one is currently stored under.
#[derive(Debug, Clone, Default)]
pub struct Relocations {
    claimed: HashSet<(Tier, String)>,
    stories: HashMap<String, FeatureRecord>,
    tasks: HashMap<String, TaskRecord>,
}

impl Relocations {
    pub fn new(groups: &[TicketGroup], stored: &BTreeMap<u32, FeatureFile>) -> Self {
        let mut moves = Self::default();
        for g in groups {
            let tasks = g.leaf.values().flatten();
            for ticket in g.mid.iter().chain(tasks) {
                if let Some(id) = ticket.remote_id() {
                    moves.claimed.insert((ticket.tier, id.to_string()));
                }
            }
        }
        for feature in stored.values().flat_map(|f| &f.features) {
            if let Some(id) = feature.remote_id().filter(|id| moves.is_claimed(Tier::Mid, id)) {
                moves.stories.entry(id.to_string()).or_insert_with(|| feature.clone());
            }
            for task in &feature.tasks {
                if let Some(id) = task.remote_id().filter(|id| moves.is_claimed(Tier::Leaf, id)) {
                    moves.tasks.entry(id.to_string()).or_insert_with(|| task.clone());
                }
            }
        }
        moves
    }

    pub fn is_claimed(&self, tier: Tier, remote_id: &str) -> bool {
        self.claimed.contains(&(tier, remote_id.to_string()))
    }
}

/// Drop the records of a feature file that this pull places elsewhere.
/// `None` when nothing was dropped.
pub fn prune_relocated(file: &FeatureFile, moves: &Relocations) -> Option<FeatureFile> {
    let mut pruned = file.clone();
    pruned.features.retain(|f| !f.is_claimed(moves));
    for feature in &mut pruned.features {
        feature.drop_relocated(moves);
    }
    (pruned != *file).then_some(pruned)
}

/// Merge a group's stories and tasks into the requirement's feature file.
pub fn merge_mid_list(
    existing: Option<&FeatureFile>,
    group: &TicketGroup,
    identity: &IdentityMap,
    moves: &Relocations,
    alloc: &mut IdAllocator,
) -> (FeatureFile, MergeStats) {
    let mut cx = MergeCx {
        identity,
        moves,
        alloc,
        stats: MergeStats::default(),
    };
    let current = existing.map(|f| f.features.as_slice()).unwrap_or(&[]);
    let features = merge_children(current, &group.mid, &mut cx, |feature, story, cx| {
        feature.tasks = merge_children(&feature.tasks, group.tasks_of(story), cx, |_, _, _| {});
    });
    let file = FeatureFile {
        features,
        extra: existing.map(|f| f.extra.clone()).unwrap_or_default(),
    };
    (file, cx.stats)
}

struct MergeCx<'a> {
    identity: &'a IdentityMap,
    moves: &'a Relocations,
    alloc: &'a mut IdAllocator,
    stats: MergeStats,
}

/// A stored child record: a story in a feature file or a task in a story.
trait ChildRecord: Clone {
    const TIER: Tier;

    fn local_id(&self) -> &str;
    fn remote_id(&self) -> Option<&str>;
    fn create(local_id: String, fresh: &Ticket) -> Self;
    fn refresh(&mut self, fresh: &Ticket);
    /// The record stored under another parent for a moved remote item.
    fn relocated<'m>(moves: &'m Relocations, remote_id: &str) -> Option<&'m Self>;

    /// Drop nested records that this pull places elsewhere.
    fn drop_relocated(&mut self, _moves: &Relocations) {}

    fn is_claimed(&self, moves: &Relocations) -> bool {
        self.remote_id().is_some_and(|id| moves.is_claimed(Self::TIER, id))
    }
}

impl ChildRecord for FeatureRecord {
    const TIER: Tier = Tier::Mid;

    fn local_id(&self) -> &str {
        &self.id
    }

    fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref().filter(|id| !id.is_empty())
    }

    fn create(local_id: String, fresh: &Ticket) -> Self {
        Self {
            id: local_id,
            name: fresh.title.clone(),
            description: fresh.description_text().to_string(),
            remote_id: fresh.remote_id().map(String::from),
            remote_kind: non_empty(&fresh.remote_kind),
            tasks: Vec::new(),
            extra: Map::new(),
        }
    }

    fn refresh(&mut self, fresh: &Ticket) {
        refresh_text(&mut self.name, &fresh.title);
        refresh_text(&mut self.description, fresh.description_text());
        refresh_identity(&mut self.remote_id, &mut self.remote_kind, fresh);
    }

    fn relocated<'m>(moves: &'m Relocations, remote_id: &str) -> Option<&'m Self> {
        moves.stories.get(remote_id)
    }

    fn drop_relocated(&mut self, moves: &Relocations) {
        self.tasks.retain(|t| !t.is_claimed(moves));
    }
}

impl ChildRecord for TaskRecord {
    const TIER: Tier = Tier::Leaf;

    fn local_id(&self) -> &str {
        &self.id
    }

    fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref().filter(|id| !id.is_empty())
    }

    fn create(local_id: String, fresh: &Ticket) -> Self {
        Self {
            id: local_id,
            list: fresh.title.clone(),
            acceptance: fresh.description_text().to_string(),
            status: NEW_TASK_STATUS.to_string(),
            remote_id: fresh.remote_id().map(String::from),
            remote_kind: non_empty(&fresh.remote_kind),
            extra: Map::new(),
        }
    }

    fn refresh(&mut self, fresh: &Ticket) {
        refresh_text(&mut self.list, &fresh.title);
        refresh_text(&mut self.acceptance, fresh.description_text());
        refresh_identity(&mut self.remote_id, &mut self.remote_kind, fresh);
    }

    fn relocated<'m>(moves: &'m Relocations, remote_id: &str) -> Option<&'m Self> {
        moves.tasks.get(remote_id)
    }
}

/// Merge `fresh` tickets into `existing` records of one tier.
///
/// Output order: one record per fresh ticket in fresh order, then the
/// existing records that had no fresh counterpart, in their stored order.
/// Existing records whose remote item is merged elsewhere in the batch are
/// dropped. `descend` runs on every merged or created record to merge the
/// next tier.
fn merge_children<R, F>(existing: &[R], fresh: &[Ticket], cx: &mut MergeCx<'_>, mut descend: F) -> Vec<R>
where
    R: ChildRecord,
    F: FnMut(&mut R, &Ticket, &mut MergeCx<'_>),
{
    let by_remote: HashMap<&str, usize> = existing
        .iter()
        .enumerate()
        .filter_map(|(i, r)| Some((r.remote_id()?, i)))
        .collect();
    let by_local: HashMap<&str, usize> = existing
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.local_id().is_empty())
        .map(|(i, r)| (r.local_id(), i))
        .collect();

    let identity = cx.identity;
    let moves = cx.moves;
    let mut processed = vec![false; existing.len()];
    let mut merged = Vec::with_capacity(fresh.len() + existing.len());

    for ticket in fresh {
        let Some(remote_id) = ticket.remote_id() else {
            continue;
        };
        let mapped = identity.get(R::TIER, remote_id);
        let hit = by_remote
            .get(remote_id)
            .or_else(|| mapped.and_then(|entry| by_local.get(entry.local_id.as_str())))
            .copied()
            .filter(|i| !processed[*i]);

        let mut record = match hit {
            Some(i) => {
                processed[i] = true;
                cx.stats.updated += 1;
                let mut record = existing[i].clone();
                record.refresh(ticket);
                record
            }
            None => match mapped {
                // Already imported under another parent: move the record.
                Some(entry) => {
                    let stored = R::relocated(moves, remote_id).filter(|r| r.local_id() == entry.local_id);
                    match stored {
                        Some(stored) => {
                            cx.stats.updated += 1;
                            let mut record = stored.clone();
                            record.refresh(ticket);
                            record
                        }
                        None => {
                            cx.stats.created += 1;
                            R::create(entry.local_id.clone(), ticket)
                        }
                    }
                }
                None => {
                    cx.stats.created += 1;
                    R::create(cx.alloc.allocate(R::TIER), ticket)
                }
            },
        };
        descend(&mut record, ticket, cx);
        merged.push(record);
    }

    for (i, record) in existing.iter().enumerate() {
        if processed[i] {
            continue;
        }
        if record.is_claimed(moves) {
            debug!(local_id = record.local_id(), "record moved to another parent");
            continue;
        }
        cx.stats.carried += 1;
        let mut record = record.clone();
        record.drop_relocated(moves);
        merged.push(record);
    }
    merged
}

fn refresh_text(field: &mut String, fresh: &str) {
    if !fresh.trim().is_empty() && field.as_str() != fresh {
        *field = fresh.to_string();
    }
}

fn refresh_identity(remote_id: &mut Option<String>, remote_kind: &mut Option<String>, fresh: &Ticket) {
    if let Some(id) = fresh.remote_id() {
        *remote_id = Some(id.to_string());
    }
    if let Some(kind) = non_empty(&fresh.remote_kind) {
        *remote_kind = Some(kind);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::model::ProjectMetadata;

    const NOW: &str = "2026-01-02T00:00:00Z";

    fn group(stories: Vec<Ticket>, tasks: Vec<(&str, Vec<Ticket>)>) -> TicketGroup {
        TicketGroup {
            top: Ticket::remote(Tier::Top, "F1", "Login"),
            mid: stories,
            leaf: tasks
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn existing_file() -> FeatureFile {
        serde_json::from_str(
            r#"{"features":[
                {"id":"US1","name":"Sign in","description":"Local words","remoteId":"S1","tasks":[
                    {"id":"TASK1","list":"Form","acceptance":"Edited locally","status":"In Progress","remoteId":"T1"},
                    {"id":"TASK2","list":"Manual task","acceptance":"","status":"To Do"}
                ]},
                {"id":"US2","name":"Manual story","description":"","tasks":[]}
            ]}"#,
        )
        .unwrap()
    }

    fn identity_for(file: &FeatureFile) -> IdentityMap {
        let mut map = IdentityMap::build(&[]);
        for f in &file.features {
            map.reserve(Tier::Mid, &f.id);
            for t in &f.tasks {
                map.reserve(Tier::Leaf, &t.id);
            }
        }
        map
    }

    #[test]
    fn new_top_gets_fresh_base_record() {
        let fresh = Ticket::remote(Tier::Top, "F1", "Login").with_kind("Epic");
        let base = merge_top(None, &fresh, "PRD01", NOW);
        assert_eq!(base.id, "PRD01");
        assert_eq!(base.remote_id.as_deref(), Some("F1"));
        assert_eq!(base.remote_kind.as_deref(), Some("Epic"));
        assert_eq!(base.state, "Active");
        assert_eq!(base.created_at, NOW);
    }

    #[test]
    fn unchanged_top_keeps_timestamp() {
        let fresh = Ticket::remote(Tier::Top, "F1", "Login");
        let first = merge_top(None, &fresh, "PRD01", "t0");
        let second = merge_top(Some(&first), &fresh, "PRD01", NOW);
        assert_eq!(first, second);

        let renamed = Ticket::remote(Tier::Top, "F1", "Sign-in");
        let third = merge_top(Some(&second), &renamed, "PRD01", NOW);
        assert_eq!(third.title, "Sign-in");
        assert_eq!(third.updated_at, NOW);
        assert_eq!(third.created_at, "t0");
    }

    #[test]
    fn empty_remote_description_keeps_local_requirement() {
        let mut base = merge_top(None, &Ticket::remote(Tier::Top, "F1", "Login"), "PRD01", "t0");
        base.requirement = "Hand written".into();
        let merged = merge_top(Some(&base), &Ticket::remote(Tier::Top, "F1", "Login"), "PRD01", NOW);
        assert_eq!(merged.requirement, "Hand written");
    }

    #[test]
    fn matched_children_refresh_remote_fields_only() {
        let file = existing_file();
        let identity = identity_for(&file);
        let mut alloc = IdAllocator::new(&identity, &ProjectMetadata::default());
        let g = group(
            vec![Ticket::remote(Tier::Mid, "S1", "Sign in v2").with_parent("F1")],
            vec![("S1", vec![Ticket::remote(Tier::Leaf, "T1", "Form v2").with_parent("S1")])],
        );

        let (merged, stats) = merge_mid_list(Some(&file), &g, &identity, &Relocations::default(), &mut alloc);
        let story = &merged.features[0];
        assert_eq!(story.id, "US1");
        assert_eq!(story.name, "Sign in v2");
        assert_eq!(story.description, "Local words");

        let task = &story.tasks[0];
        assert_eq!(task.list, "Form v2");
        assert_eq!(task.acceptance, "Edited locally");
        assert_eq!(task.status, "In Progress");
        assert_eq!(story.tasks[1].id, "TASK2");

        assert_eq!(stats.updated, 2);
        assert_eq!(stats.created, 0);
        assert_eq!(stats.carried, 2);
    }

    #[test]
    fn new_children_are_numbered_after_existing_ones() {
        let file = existing_file();
        let identity = identity_for(&file);
        let mut alloc = IdAllocator::new(&identity, &ProjectMetadata::default());
        let g = group(
            vec![
                Ticket::remote(Tier::Mid, "S5", "New story").with_parent("F1"),
                Ticket::remote(Tier::Mid, "S1", "Sign in").with_parent("F1"),
            ],
            vec![(
                "S5",
                vec![
                    Ticket::remote(Tier::Leaf, "T5", "a").with_parent("S5"),
                    Ticket::remote(Tier::Leaf, "T6", "b").with_parent("S5"),
                ],
            )],
        );

        let (merged, stats) = merge_mid_list(Some(&file), &g, &identity, &Relocations::default(), &mut alloc);
        let ids: Vec<_> = merged.features.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["US3", "US1", "US2"]);

        let task_ids: Vec<_> = merged.features[0].tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(task_ids, vec!["TASK3", "TASK4"]);
        assert_eq!(merged.features[0].tasks[0].status, NEW_TASK_STATUS);
        assert_eq!(stats.created, 3);
    }

    #[test]
    fn story_mapped_under_another_parent_keeps_its_id() {
        let tree = vec![Ticket {
            local_id: Some("PRD02".into()),
            ..Ticket::new(Tier::Top, "Other")
        }
        .with_children(vec![Ticket {
            local_id: Some("US7".into()),
            remote_id: Some("S7".into()),
            local_parent_id: Some("PRD02".into()),
            ..Ticket::new(Tier::Mid, "Moved")
        }])];
        let identity = IdentityMap::build(&tree);
        let mut alloc = IdAllocator::new(&identity, &ProjectMetadata::default());
        let g = group(vec![Ticket::remote(Tier::Mid, "S7", "Moved").with_parent("F1")], vec![]);

        let (merged, _) = merge_mid_list(None, &g, &identity, &Relocations::default(), &mut alloc);
        assert_eq!(merged.features[0].id, "US7");
        assert_eq!(alloc.highest_issued(Tier::Mid), None);
    }

    #[test]
    fn moved_story_brings_its_record_and_leaves_old_parent() {
        let old_parent = existing_file();
        let stored: BTreeMap<u32, FeatureFile> = [(1, old_parent.clone())].into_iter().collect();
        let tree = vec![Ticket {
            local_id: Some("PRD01".into()),
            remote_id: Some("F1".into()),
            ..Ticket::new(Tier::Top, "Login")
        }
        .with_children(vec![Ticket {
            local_id: Some("US1".into()),
            remote_id: Some("S1".into()),
            local_parent_id: Some("PRD01".into()),
            ..Ticket::new(Tier::Mid, "Sign in")
        }])];
        let identity = IdentityMap::build(&tree);
        let mut alloc = IdAllocator::new(&identity, &ProjectMetadata::default());

        let mut g = group(
            vec![Ticket::remote(Tier::Mid, "S1", "Sign in").with_parent("F2")],
            vec![("S1", vec![Ticket::remote(Tier::Leaf, "T1", "Form").with_parent("S1")])],
        );
        g.top = Ticket::remote(Tier::Top, "F2", "Checkout");
        let moves = Relocations::new(std::slice::from_ref(&g), &stored);

        let (moved, stats) = merge_mid_list(None, &g, &identity, &moves, &mut alloc);
        let story = &moved.features[0];
        assert_eq!(story.id, "US1");
        assert_eq!(story.description, "Local words");
        let task_ids: Vec<_> = story.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(task_ids, vec!["TASK1", "TASK2"]);
        assert_eq!(story.tasks[0].status, "In Progress");
        assert_eq!(stats.created, 0);
        assert_eq!(alloc.highest_issued(Tier::Mid), None);

        let pruned = prune_relocated(&old_parent, &moves).unwrap();
        let ids: Vec<_> = pruned.features.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["US2"]);
        assert!(prune_relocated(&pruned, &moves).is_none());
    }
}
