use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::model::{Ticket, Tier};

/// A flat choice of remote tickets, split by tier. Children reference their
/// parent through `remote_parent_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub top: Vec<Ticket>,
    pub mid: Vec<Ticket>,
    pub leaf: Vec<Ticket>,
}

impl Selection {
    /// Select every ticket of a fetched hierarchy.
    pub fn all(tree: &[Ticket]) -> Self {
        Self::from_hierarchy(tree, None)
    }

    /// Flatten a fetched hierarchy, keeping only the top-level items whose
    /// remote id is in `chosen` (all of them when `None`) together with
    /// their descendants.
    pub fn from_hierarchy(tree: &[Ticket], chosen: Option<&HashSet<String>>) -> Self {
        let mut selection = Self::default();
        for top in tree {
            let picked = match (chosen, top.remote_id()) {
                (None, _) => true,
                (Some(set), Some(id)) => set.contains(id),
                (Some(_), None) => false,
            };
            if !picked {
                continue;
            }
            for node in top.walk() {
                let mut flat = node.clone();
                flat.children = Vec::new();
                selection.bucket(node.tier).push(flat);
            }
        }
        selection
    }

    fn bucket(&mut self, tier: Tier) -> &mut Vec<Ticket> {
        match tier {
            Tier::Top => &mut self.top,
            Tier::Mid => &mut self.mid,
            Tier::Leaf => &mut self.leaf,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_empty() && self.mid.is_empty() && self.leaf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.top.len() + self.mid.len() + self.leaf.len()
    }
}

/// One top-level ticket with its selected stories and, per story remote id,
/// the story's selected tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketGroup {
    pub top: Ticket,
    pub mid: Vec<Ticket>,
    pub leaf: BTreeMap<String, Vec<Ticket>>,
}

impl TicketGroup {
    pub fn tasks_of(&self, story: &Ticket) -> &[Ticket] {
        story
            .remote_id()
            .and_then(|id| self.leaf.get(id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grouping {
    pub groups: Vec<TicketGroup>,
    /// Stories and tasks dropped because their parent was not selected.
    pub skipped_orphans: usize,
}

/// Rebuild parent/child groups from a flat selection.
///
/// A story or task whose parent is not part of the selection cannot be
/// placed and is dropped; the number dropped is reported, never raised as an
/// error. Tickets without a remote id, and repeats of a remote id already
/// seen in the same tier, are ignored.
pub fn group(selection: &Selection) -> Grouping {
    let tops = unique(&selection.top, Tier::Top);
    let mids = unique(&selection.mid, Tier::Mid);
    let leaves = unique(&selection.leaf, Tier::Leaf);

    let mut placed_mid = 0;
    let mut placed_leaf = 0;
    let mut groups = Vec::with_capacity(tops.len());

    for top in tops {
        let top_id = top.remote_id().unwrap_or_default();
        let mid: Vec<Ticket> = mids
            .iter()
            .filter(|m| m.remote_parent_id.as_deref() == Some(top_id))
            .map(|m| (*m).clone())
            .collect();

        let mut leaf = BTreeMap::new();
        for story in &mid {
            let story_id = story.remote_id().unwrap_or_default();
            let tasks: Vec<Ticket> = leaves
                .iter()
                .filter(|l| l.remote_parent_id.as_deref() == Some(story_id))
                .map(|l| (*l).clone())
                .collect();
            placed_leaf += tasks.len();
            leaf.insert(story_id.to_string(), tasks);
        }
        placed_mid += mid.len();

        groups.push(TicketGroup {
            top: top.clone(),
            mid,
            leaf,
        });
    }

    let skipped_orphans = (mids.len() - placed_mid.min(mids.len()))
        + (leaves.len() - placed_leaf.min(leaves.len()));
    if skipped_orphans > 0 {
        warn!(skipped_orphans, "selected items without a selected parent were skipped");
    }
    debug!(groups = groups.len(), "grouped selection");
    Grouping {
        groups,
        skipped_orphans,
    }
}

fn unique(tickets: &[Ticket], tier: Tier) -> Vec<&Ticket> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(tickets.len());
    for ticket in tickets {
        let Some(id) = ticket.remote_id() else {
            continue;
        };
        if seen.insert(id) {
            out.push(ticket);
        } else {
            debug!(remote_id = id, tier = tier.label(), "duplicate remote id in selection");
        }
    }
    out
}
