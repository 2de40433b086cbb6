use anyhow::{anyhow, Result};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info, warn};

use super::SyncOptions;
use crate::error::{SyncError, SyncResult};
use crate::model::{Ticket, Tier};
use crate::providers::Provider;
use crate::util::fan_out::fan_out;

/// One page of fully expanded top-level tickets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HierarchyPage {
    pub tickets: Vec<Ticket>,
    /// Number of top-level items the remote reports in total.
    pub total_count: usize,
    /// Top-level ids the remote returned for this page. The remote may
    /// return fewer than requested, so the next page starts this far on.
    pub listed: usize,
}

/// Walks the remote hierarchy: top-level items, then their stories, then the
/// stories' tasks.
///
/// Siblings are expanded concurrently through [`fan_out`], while a shared
/// semaphore caps the number of provider calls in flight across the whole
/// tree. A permit is only held for the duration of a single call, so nested
/// expansion cannot starve itself.
pub struct HierarchyFetcher<'a> {
    provider: &'a dyn Provider,
    concurrency: usize,
    page_size: usize,
    permits: Semaphore,
}

impl<'a> HierarchyFetcher<'a> {
    pub fn new(provider: &'a dyn Provider, options: &SyncOptions) -> Self {
        let concurrency = options.concurrency.max(1);
        Self {
            provider,
            concurrency,
            page_size: options.page_size.max(1),
            permits: Semaphore::new(concurrency),
        }
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| anyhow!("fetch was shut down"))
    }

    /// Every top-level item with its two levels of children.
    pub async fn fetch_hierarchy(&self) -> SyncResult<Vec<Ticket>> {
        info!(provider = self.provider.name(), "fetching remote hierarchy");
        let mut tickets = Vec::new();
        let mut skip = 0;
        loop {
            let page = self.fetch_page(skip, self.page_size).await?;
            tickets.extend(page.tickets);
            skip += page.listed;
            if page.listed == 0 || skip >= page.total_count {
                break;
            }
        }
        info!(count = tickets.len(), "fetched remote hierarchy");
        Ok(tickets)
    }

    /// A single page of top-level items, expanded.
    ///
    /// Failing to list or load the top-level items is fatal. Failing to load
    /// the children of any node only empties that node's children.
    pub async fn fetch_page(&self, skip: usize, take: usize) -> SyncResult<HierarchyPage> {
        let page = {
            let _permit = self.permit().await.map_err(SyncError::Fetch)?;
            self.provider
                .list_top_level_ids(skip, take)
                .await
                .map_err(SyncError::Fetch)?
        };
        debug!(skip, take, found = page.ids.len(), total = page.total, "listed top-level ids");
        if page.ids.is_empty() {
            return Ok(HierarchyPage {
                tickets: Vec::new(),
                total_count: page.total,
                listed: 0,
            });
        }

        let tops = {
            let _permit = self.permit().await.map_err(SyncError::Fetch)?;
            self.provider
                .hydrate(&page.ids, Tier::Top)
                .await
                .map_err(SyncError::Fetch)?
        };
        let tops = tops
            .into_iter()
            .map(|mut t| {
                t.tier = Tier::Top;
                t.remote_parent_id = None;
                t
            })
            .collect();

        let tickets = fan_out(tops, self.concurrency, |t| self.expand(t)).await;
        Ok(HierarchyPage {
            tickets,
            total_count: page.total,
            listed: page.ids.len(),
        })
    }

    fn expand(&self, mut node: Ticket) -> BoxFuture<'_, Ticket> {
        async move {
            let Some(child_tier) = node.tier.child() else {
                return node;
            };
            let Some(parent_id) = node.remote_id().map(String::from) else {
                return node;
            };
            match self.children_of(&parent_id, child_tier).await {
                Ok(kids) => {
                    node.children = fan_out(kids, self.concurrency, |k| self.expand(k)).await;
                }
                Err(e) => {
                    warn!(
                        parent = %parent_id,
                        tier = child_tier.label(),
                        "failed to fetch children, continuing without them: {e:#}"
                    );
                    node.children = Vec::new();
                }
            }
            node
        }
        .boxed()
    }

    async fn children_of(&self, parent_id: &str, tier: Tier) -> Result<Vec<Ticket>> {
        let ids = {
            let _permit = self.permit().await?;
            self.provider.list_children_ids(parent_id, tier).await?
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut kids = {
            let _permit = self.permit().await?;
            self.provider.hydrate(&ids, tier).await?
        };
        for kid in &mut kids {
            kid.tier = tier;
            kid.remote_parent_id = Some(parent_id.to_string());
        }
        Ok(kids)
    }
}
