use tracing::{debug, warn};

use super::identity::IdentityMap;
use crate::model::{ProjectMetadata, Tier};

/// First number to hand out for a tier.
///
/// A recorded project counter is authoritative: `counter + 1`, even when the
/// local tree holds a higher number. Otherwise the highest number in the
/// tree plus one, or 1 for an empty tier.
pub fn next_id(tier: Tier, identity: &IdentityMap, counter: Option<u32>) -> u32 {
    let scanned = identity.max_local(tier);
    match counter {
        Some(count) => {
            if scanned > count {
                warn!(
                    tier = tier.label(),
                    counter = count,
                    highest_local = scanned,
                    "project counter is behind the local documents, keeping the counter"
                );
            }
            count + 1
        }
        None => scanned + 1,
    }
}

/// Hands out sequential local ids for one sync batch.
///
/// The starting point per tier is computed once; every allocation increments
/// the local cursor instead of asking again, so siblings created in the same
/// batch never collide.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: [u32; 3],
    start: [u32; 3],
}

impl IdAllocator {
    pub fn new(identity: &IdentityMap, metadata: &ProjectMetadata) -> Self {
        let start = Tier::ALL.map(|tier| next_id(tier, identity, metadata.counter(tier)));
        Self { next: start, start }
    }

    pub fn allocate(&mut self, tier: Tier) -> String {
        let slot = &mut self.next[tier.index()];
        let id = tier.format_id(*slot);
        *slot += 1;
        debug!(tier = tier.label(), id = %id, "allocated local id");
        id
    }

    /// The highest number handed out for a tier in this batch, if any.
    pub fn highest_issued(&self, tier: Tier) -> Option<u32> {
        let i = tier.index();
        (self.next[i] > self.start[i]).then(|| self.next[i] - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Ticket;

    fn identity_with(ids: &[(Tier, &str)]) -> IdentityMap {
        let mut map = IdentityMap::build(&[]);
        for (tier, id) in ids {
            map.reserve(*tier, id);
        }
        map
    }

    #[test]
    fn empty_project_starts_at_one() {
        assert_eq!(next_id(Tier::Top, &IdentityMap::build(&[]), None), 1);
    }

    #[test]
    fn scan_uses_highest_local_number() {
        let map = identity_with(&[(Tier::Mid, "US3"), (Tier::Mid, "US11")]);
        assert_eq!(next_id(Tier::Mid, &map, None), 12);
    }

    #[test]
    fn counter_wins_over_scan() {
        let map = identity_with(&[(Tier::Top, "PRD09")]);
        assert_eq!(next_id(Tier::Top, &map, Some(4)), 5);
        assert_eq!(next_id(Tier::Top, &map, Some(20)), 21);
    }

    #[test]
    fn ids_in_one_batch_are_distinct_and_increasing() {
        let tree = vec![Ticket {
            local_id: Some("PRD02".into()),
            ..Ticket::new(Tier::Top, "Existing")
        }];
        let map = IdentityMap::build(&tree);
        let mut alloc = IdAllocator::new(&map, &ProjectMetadata::default());

        let ids: Vec<_> = (0..4).map(|_| alloc.allocate(Tier::Top)).collect();
        assert_eq!(ids, vec!["PRD03", "PRD04", "PRD05", "PRD06"]);
        assert_eq!(alloc.highest_issued(Tier::Top), Some(6));
        assert_eq!(alloc.highest_issued(Tier::Leaf), None);
    }

    #[test]
    fn tiers_are_numbered_independently() {
        let mut metadata = ProjectMetadata::default();
        metadata.raise_counter(Tier::Leaf, 7);
        let mut alloc = IdAllocator::new(&IdentityMap::build(&[]), &metadata);
        assert_eq!(alloc.allocate(Tier::Mid), "US1");
        assert_eq!(alloc.allocate(Tier::Leaf), "TASK8");
        assert_eq!(alloc.allocate(Tier::Mid), "US2");
    }
}
