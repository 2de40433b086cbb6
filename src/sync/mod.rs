//! The bidirectional sync engine.
//!
//! Pull: fetch the remote hierarchy, let the caller pick a selection, group
//! it, merge it with the stored documents and write one batch. Push: read
//! the local hierarchy, create or update every item remotely tier by tier,
//! and write the remote ids back.

pub mod allocator;
pub mod fetcher;
pub mod grouper;
pub mod identity;
pub mod merge;
pub mod pull;
pub mod push;
pub mod reader;

use chrono::{SecondsFormat, Utc};

use crate::config::{SyncConfig, DEFAULT_CONCURRENCY, DEFAULT_PAGE_SIZE};
use crate::error::SyncResult;
use crate::model::Ticket;
use crate::providers::Provider;
use crate::store::DocumentStore;

pub use fetcher::{HierarchyFetcher, HierarchyPage};
pub use grouper::{group, Grouping, Selection, TicketGroup};
pub use identity::IdentityMap;
pub use pull::{PullOutcome, PullSummary};
pub use push::{PushFailure, PushReport, PushedItem};
pub use reader::LocalState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Upper bound on provider calls in flight at once.
    pub concurrency: usize,
    /// Top-level items requested per page when fetching.
    pub page_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            page_size: config.page_size,
        }
    }
}

/// One project paired with one remote system.
///
/// Nothing is cached between calls: every operation reads the store afresh
/// and builds its own identity map, so a session can be reused safely. Two
/// operations on the same project must not run at once.
pub struct SyncSession<'a> {
    store: &'a dyn DocumentStore,
    provider: &'a dyn Provider,
    options: SyncOptions,
    now: Option<String>,
}

impl<'a> SyncSession<'a> {
    pub fn new(store: &'a dyn DocumentStore, provider: &'a dyn Provider, options: SyncOptions) -> Self {
        Self {
            store,
            provider,
            options,
            now: None,
        }
    }

    /// Pin the timestamp written into records instead of reading the clock.
    pub fn at(mut self, now: impl Into<String>) -> Self {
        self.now = Some(now.into());
        self
    }

    fn timestamp(&self) -> String {
        self.now
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// The full remote hierarchy, each ticket marked with the local identity
    /// it was previously imported under, if any.
    pub async fn fetch_hierarchy(&self) -> SyncResult<Vec<Ticket>> {
        let mut tree = HierarchyFetcher::new(self.provider, &self.options)
            .fetch_hierarchy()
            .await?;
        self.annotate(&mut tree).await?;
        Ok(tree)
    }

    /// One page of the remote hierarchy, marked like [`Self::fetch_hierarchy`].
    pub async fn fetch_page(&self, skip: usize, take: usize) -> SyncResult<HierarchyPage> {
        let mut page = HierarchyFetcher::new(self.provider, &self.options)
            .fetch_page(skip, take)
            .await?;
        self.annotate(&mut page.tickets).await?;
        Ok(page)
    }

    async fn annotate(&self, tree: &mut [Ticket]) -> SyncResult<()> {
        let state = LocalState::load(self.store).await?;
        IdentityMap::build(&state.hierarchy()).annotate(tree);
        Ok(())
    }

    pub async fn pull(&self, selection: &Selection) -> SyncResult<PullOutcome> {
        pull::pull(self.store, selection, &self.timestamp()).await
    }

    pub async fn push(&self) -> SyncResult<PushReport> {
        push::push(self.store, self.provider, &self.options, &self.timestamp()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tier;
    use crate::providers::tests::MockProvider;
    use crate::store::MemoryStore;

    fn remote() -> MockProvider {
        MockProvider::new(vec![Ticket::remote(Tier::Top, "F1", "Login").with_children(vec![
            Ticket::remote(Tier::Mid, "S1", "As a user...")
                .with_children(vec![Ticket::remote(Tier::Leaf, "T1", "Implement form")]),
        ])])
    }

    #[tokio::test]
    async fn fetch_pull_then_fetch_marks_updates() {
        let store = MemoryStore::new();
        let provider = remote();
        let session = SyncSession::new(&store, &provider, SyncOptions::default()).at("t0");

        let tree = session.fetch_hierarchy().await.unwrap();
        assert!(!tree[0].is_update);

        let outcome = session.pull(&Selection::all(&tree)).await.unwrap();
        assert!(matches!(outcome, PullOutcome::Done(_)));

        let tree = session.fetch_hierarchy().await.unwrap();
        assert!(tree[0].is_update);
        assert_eq!(tree[0].local_id.as_deref(), Some("PRD01"));
        let task = &tree[0].children[0].children[0];
        assert!(task.is_update);
        assert_eq!(task.local_id.as_deref(), Some("TASK1"));
    }

    #[tokio::test]
    async fn pulled_items_push_back_as_updates() {
        let store = MemoryStore::new();
        let provider = remote();
        let session = SyncSession::new(&store, &provider, SyncOptions::default()).at("t0");

        let tree = session.fetch_hierarchy().await.unwrap();
        session.pull(&Selection::all(&tree)).await.unwrap();

        let report = session.push().await.unwrap();
        assert_eq!(report.pushed.len(), 3);
        assert_eq!(report.created(), 0);
        let ids: Vec<_> = report.pushed.iter().map(|p| p.remote_id.as_str()).collect();
        assert_eq!(ids, vec!["F1", "S1", "T1"]);
    }

    #[test]
    fn options_follow_config() {
        let config = SyncConfig {
            concurrency: 2,
            page_size: 10,
            ..Default::default()
        };
        assert_eq!(
            SyncOptions::from(&config),
            SyncOptions {
                concurrency: 2,
                page_size: 10
            }
        );
    }
}
