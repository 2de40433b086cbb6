use std::collections::HashMap;

use tracing::warn;

use crate::model::{Ticket, Tier};

/// Where a previously imported remote item lives locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub local_id: String,
    pub tier: Tier,
    pub local_parent_id: Option<String>,
}

/// Lookup from remote id to local identity, built fresh from the current
/// local tree at the start of every sync.
///
/// Entries are kept per tier: the same remote id may legitimately appear in
/// two tiers of different remote systems, but never twice within one tier.
/// While walking, the highest local number seen per tier is recorded for
/// every node, with or without a remote id.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    entries: HashMap<(Tier, String), MapEntry>,
    max_local: [u32; 3],
}

impl IdentityMap {
    pub fn build(tree: &[Ticket]) -> Self {
        let mut map = Self::default();
        for root in tree {
            for node in root.walk() {
                map.visit(node);
            }
        }
        map
    }

    fn visit(&mut self, node: &Ticket) {
        let Some(local_id) = node.local_id.as_deref() else {
            return;
        };
        self.reserve(node.tier, local_id);

        let Some(remote_id) = node.remote_id() else {
            return;
        };
        let key = (node.tier, remote_id.to_string());
        if let Some(existing) = self.entries.get(&key) {
            warn!(
                remote_id,
                kept = %existing.local_id,
                ignored = local_id,
                "remote id mapped twice in one tier"
            );
            return;
        }
        self.entries.insert(
            key,
            MapEntry {
                local_id: local_id.to_string(),
                tier: node.tier,
                local_parent_id: node.local_parent_id.clone(),
            },
        );
    }

    /// Count a local id as taken without mapping it, e.g. an archived file.
    pub fn reserve(&mut self, tier: Tier, local_id: &str) {
        if let Some(n) = tier.parse_number(local_id) {
            let slot = &mut self.max_local[tier.index()];
            *slot = (*slot).max(n);
        }
    }

    pub fn get(&self, tier: Tier, remote_id: &str) -> Option<&MapEntry> {
        self.entries.get(&(tier, remote_id.to_string()))
    }

    pub fn contains(&self, tier: Tier, remote_id: &str) -> bool {
        self.get(tier, remote_id).is_some()
    }

    /// Highest local number seen for a tier, 0 if none.
    pub fn max_local(&self, tier: Tier) -> u32 {
        self.max_local[tier.index()]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mark fetched remote tickets with their local identity, if any.
    pub fn annotate(&self, tickets: &mut [Ticket]) {
        for ticket in tickets {
            let hit = ticket
                .remote_id()
                .and_then(|id| self.get(ticket.tier, id))
                .cloned();
            ticket.is_update = hit.is_some();
            if let Some(entry) = hit {
                ticket.local_id = Some(entry.local_id);
                ticket.local_parent_id = entry.local_parent_id;
            }
            self.annotate(&mut ticket.children);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(tier: Tier, local_id: &str, remote_id: Option<&str>, parent: Option<&str>) -> Ticket {
        Ticket {
            local_id: Some(local_id.into()),
            remote_id: remote_id.map(String::from),
            local_parent_id: parent.map(String::from),
            ..Ticket::new(tier, local_id)
        }
    }

    fn tree() -> Vec<Ticket> {
        vec![
            local(Tier::Top, "PRD01", Some("F1"), None).with_children(vec![
                local(Tier::Mid, "US1", Some("S1"), Some("PRD01"))
                    .with_children(vec![local(Tier::Leaf, "TASK3", Some("T1"), Some("US1"))]),
                local(Tier::Mid, "US4", None, Some("PRD01")),
            ]),
            local(Tier::Top, "PRD02", None, None),
        ]
    }

    #[test]
    fn maps_only_nodes_with_remote_ids() {
        let map = IdentityMap::build(&tree());
        assert_eq!(map.len(), 3);
        let task = map.get(Tier::Leaf, "T1").unwrap();
        assert_eq!(task.local_id, "TASK3");
        assert_eq!(task.local_parent_id.as_deref(), Some("US1"));
        assert!(!map.contains(Tier::Top, "S1"));
    }

    #[test]
    fn tracks_highest_local_number_including_unmapped() {
        let map = IdentityMap::build(&tree());
        assert_eq!(map.max_local(Tier::Top), 2);
        assert_eq!(map.max_local(Tier::Mid), 4);
        assert_eq!(map.max_local(Tier::Leaf), 3);
    }

    #[test]
    fn duplicate_remote_id_keeps_first() {
        let tree = vec![
            local(Tier::Top, "PRD01", Some("F1"), None),
            local(Tier::Top, "PRD02", Some("F1"), None),
        ];
        let map = IdentityMap::build(&tree);
        assert_eq!(map.get(Tier::Top, "F1").unwrap().local_id, "PRD01");
    }

    #[test]
    fn reserve_raises_max_without_mapping() {
        let mut map = IdentityMap::build(&[]);
        map.reserve(Tier::Top, "PRD09");
        assert!(map.is_empty());
        assert_eq!(map.max_local(Tier::Top), 9);
    }

    #[test]
    fn annotate_marks_known_remote_items() {
        let map = IdentityMap::build(&tree());
        let mut fetched = vec![
            Ticket::remote(Tier::Top, "F1", "Login")
                .with_children(vec![Ticket::remote(Tier::Mid, "S9", "New story")]),
            Ticket::remote(Tier::Top, "F2", "Other"),
        ];
        map.annotate(&mut fetched);
        assert!(fetched[0].is_update);
        assert_eq!(fetched[0].local_id.as_deref(), Some("PRD01"));
        assert!(!fetched[0].children[0].is_update);
        assert!(!fetched[1].is_update);
    }
}
