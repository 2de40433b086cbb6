use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::{create_provider, IdPage, KindNames, Provider};
use crate::config::parse_config;
use crate::error::SyncError;
use crate::model::{Ticket, Tier};

/// One recorded `create_or_update` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PushCall {
    pub local_id: Option<String>,
    pub title: String,
    pub parent_remote_id: Option<String>,
    pub remote_id: String,
    pub created: bool,
}

/// In-memory remote system for engine tests.
///
/// Holds a tree of remote tickets, can be told to fail child listing for a
/// given parent or pushes for a given local id, and records every push.
/// Optionally caps page sizes like a real API and simulates call latency
/// while tracking the peak number of read calls in flight.
pub struct MockProvider {
    top_ids: Vec<String>,
    items: HashMap<String, Ticket>,
    children: HashMap<String, Vec<String>>,
    failing_parents: HashSet<String>,
    failing_pushes: HashSet<String>,
    kinds: KindNames,
    pub pushes: Arc<Mutex<Vec<PushCall>>>,
    next_id: Mutex<usize>,
    page_cap: Option<usize>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockProvider {
    pub fn new(tree: Vec<Ticket>) -> Self {
        let mut provider = Self {
            top_ids: Vec::new(),
            items: HashMap::new(),
            children: HashMap::new(),
            failing_parents: HashSet::new(),
            failing_pushes: HashSet::new(),
            kinds: KindNames::jira(),
            pushes: Arc::new(Mutex::new(Vec::new())),
            next_id: Mutex::new(100),
            page_cap: None,
            latency: None,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        for top in tree {
            if let Some(id) = top.remote_id() {
                provider.top_ids.push(id.to_string());
            }
            provider.insert(top, None);
        }
        provider
    }

    fn insert(&mut self, mut ticket: Ticket, parent: Option<&str>) {
        let Some(id) = ticket.remote_id().map(String::from) else {
            return;
        };
        if let Some(parent) = parent {
            ticket.remote_parent_id = Some(parent.to_string());
        }
        let kids = std::mem::take(&mut ticket.children);
        let child_ids: Vec<String> = kids.iter().filter_map(|c| c.remote_id().map(String::from)).collect();
        self.children.insert(id.clone(), child_ids);
        self.items.insert(id.clone(), ticket);
        for kid in kids {
            self.insert(kid, Some(&id));
        }
    }

    pub fn failing_children_of(mut self, parent_id: &str) -> Self {
        self.failing_parents.insert(parent_id.to_string());
        self
    }

    pub fn failing_push_of(mut self, local_id: &str) -> Self {
        self.failing_pushes.insert(local_id.to_string());
        self
    }

    pub fn recorded_pushes(&self) -> Vec<PushCall> {
        self.pushes.lock().unwrap().clone()
    }

    /// Return at most `cap` top-level ids per page, whatever was asked for.
    pub fn with_page_cap(mut self, cap: usize) -> Self {
        self.page_cap = Some(cap);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Most read calls ever observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn simulate_call(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "Mock"
    }

    fn kind_for(&self, tier: Tier) -> &str {
        self.kinds.get(tier)
    }

    async fn validate_credentials(&self) -> Result<()> {
        Ok(())
    }

    async fn list_top_level_ids(&self, skip: usize, take: usize) -> Result<IdPage> {
        self.simulate_call().await;
        let take = self.page_cap.map_or(take, |cap| take.min(cap));
        Ok(IdPage {
            ids: self.top_ids.iter().skip(skip).take(take).cloned().collect(),
            total: self.top_ids.len(),
        })
    }

    async fn list_children_ids(&self, parent_id: &str, _child: Tier) -> Result<Vec<String>> {
        self.simulate_call().await;
        if self.failing_parents.contains(parent_id) {
            anyhow::bail!("Mock failure listing children of {parent_id}");
        }
        Ok(self.children.get(parent_id).cloned().unwrap_or_default())
    }

    async fn hydrate(&self, ids: &[String], tier: Tier) -> Result<Vec<Ticket>> {
        self.simulate_call().await;
        Ok(ids
            .iter()
            .filter_map(|id| self.items.get(id))
            .map(|t| Ticket {
                tier,
                ..t.clone()
            })
            .collect())
    }

    async fn create_or_update(&self, item: &Ticket, parent_remote_id: Option<&str>) -> Result<String> {
        if let Some(local) = &item.local_id {
            if self.failing_pushes.contains(local) {
                anyhow::bail!("Mock failure pushing {local}");
            }
        }
        let (remote_id, created) = match item.remote_id() {
            Some(id) => (id.to_string(), false),
            None => {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                (format!("R{}", *next), true)
            }
        };
        self.pushes.lock().unwrap().push(PushCall {
            local_id: item.local_id.clone(),
            title: item.title.clone(),
            parent_remote_id: parent_remote_id.map(String::from),
            remote_id: remote_id.clone(),
            created,
        });
        Ok(remote_id)
    }
}

fn sample_tree() -> Vec<Ticket> {
    vec![Ticket::remote(Tier::Top, "F1", "Login").with_children(vec![
        Ticket::remote(Tier::Mid, "S1", "As a user...")
            .with_children(vec![Ticket::remote(Tier::Leaf, "T1", "Implement form")]),
    ])]
}

#[tokio::test]
async fn mock_lists_children_with_parent_links() {
    let provider = MockProvider::new(sample_tree());
    let page = provider.list_top_level_ids(0, 10).await.unwrap();
    assert_eq!(page.ids, vec!["F1"]);
    assert_eq!(page.total, 1);

    let stories = provider.list_children_ids("F1", Tier::Mid).await.unwrap();
    assert_eq!(stories, vec!["S1"]);

    let hydrated = provider.hydrate(&stories, Tier::Mid).await.unwrap();
    assert_eq!(hydrated[0].remote_parent_id.as_deref(), Some("F1"));
    assert!(hydrated[0].children.is_empty());
}

#[tokio::test]
async fn mock_page_cap_limits_returned_ids() {
    let tree = (1..=3).map(|i| Ticket::remote(Tier::Top, format!("F{i}"), "x")).collect();
    let provider = MockProvider::new(tree).with_page_cap(2);
    let page = provider.list_top_level_ids(0, 50).await.unwrap();
    assert_eq!(page.ids, vec!["F1", "F2"]);
    assert_eq!(page.total, 3);
}

#[tokio::test]
async fn mock_failure_propagates() {
    let provider = MockProvider::new(sample_tree()).failing_children_of("F1");
    let result = provider.list_children_ids("F1", Tier::Mid).await;
    assert!(result.unwrap_err().to_string().contains("Mock failure"));
}

#[tokio::test]
async fn create_or_update_reuses_existing_remote_id() {
    let provider = MockProvider::new(vec![]);
    let mut ticket = Ticket::new(Tier::Top, "Checkout");
    ticket.local_id = Some("PRD01".into());

    let created = provider.create_or_update(&ticket, None).await.unwrap();
    ticket.remote_id = Some(created.clone());
    let updated = provider.create_or_update(&ticket, None).await.unwrap();

    assert_eq!(created, updated);
    let calls = provider.recorded_pushes();
    assert!(calls[0].created);
    assert!(!calls[1].created);
}

#[test]
fn kind_names_map_both_ways() {
    let kinds = KindNames::ado();
    assert_eq!(kinds.get(Tier::Mid), "Platform Feature");
    assert_eq!(kinds.tier_of("user story"), Some(Tier::Leaf));
    assert_eq!(kinds.tier_of("Bug"), None);
    assert_eq!(KindNames::jira().get(Tier::Leaf), "Sub-task");
}

#[test]
fn create_provider_rejects_blank_credentials() {
    let config = parse_config(
        r#"
        [ado]
        organization = "acme"
        project = "portal"
        personal_access_token = ""
        "#,
    )
    .unwrap();
    let err = create_provider(&config).err().unwrap();
    assert!(matches!(err, SyncError::Config(_)));
}

#[test]
fn create_provider_requires_selected_section() {
    let config = parse_config(
        r#"
        [sync]
        provider = "jira"
        "#,
    )
    .unwrap();
    let err = create_provider(&config).err().unwrap();
    assert!(err.to_string().contains("[jira]"));
}

#[test]
fn create_provider_builds_configured_adapter() {
    let config = parse_config(
        r#"
        [jira]
        domain = "acme"
        email = "dev@acme.io"
        api_token = "secret"
        project_key = "REQ"
        "#,
    )
    .unwrap();
    let provider = create_provider(&config).unwrap();
    assert_eq!(provider.name(), "Jira");
    assert_eq!(provider.kind_for(Tier::Top), "Epic");
}
