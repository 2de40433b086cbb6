pub mod ado;
pub mod jira;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{AppConfig, ProviderKind};
use crate::error::{SyncError, SyncResult};
use crate::model::{Ticket, Tier};

/// One page of top-level remote ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdPage {
    pub ids: Vec<String>,
    /// Total number of top-level items the remote reports, across all pages.
    pub total: usize,
}

/// Uniform contract over a remote work-item system.
///
/// The sync engine only ever talks to this trait; query languages, auth
/// headers and URL construction stay inside each adapter.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Remote work-item type used for a local tier.
    fn kind_for(&self, tier: Tier) -> &str;

    /// One cheap authenticated request to confirm the credentials work.
    async fn validate_credentials(&self) -> Result<()>;

    async fn list_top_level_ids(&self, skip: usize, take: usize) -> Result<IdPage>;

    /// Ids of the direct children of `parent_id` at tier `child`.
    async fn list_children_ids(&self, parent_id: &str, child: Tier) -> Result<Vec<String>>;

    /// Load full tickets for `ids`, returned in the order given.
    async fn hydrate(&self, ids: &[String], tier: Tier) -> Result<Vec<Ticket>>;

    /// Create the item remotely, or update it when it already carries a
    /// remote id. Returns the (possibly new) remote id.
    async fn create_or_update(&self, item: &Ticket, parent_remote_id: Option<&str>)
        -> Result<String>;
}

/// Remote type names per tier, configurable per provider.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct KindNames {
    pub top: String,
    pub mid: String,
    pub leaf: String,
}

impl KindNames {
    pub fn jira() -> Self {
        Self {
            top: "Epic".into(),
            mid: "Story".into(),
            leaf: "Sub-task".into(),
        }
    }

    pub fn ado() -> Self {
        Self {
            top: "Feature".into(),
            mid: "Platform Feature".into(),
            leaf: "User Story".into(),
        }
    }

    pub fn get(&self, tier: Tier) -> &str {
        match tier {
            Tier::Top => &self.top,
            Tier::Mid => &self.mid,
            Tier::Leaf => &self.leaf,
        }
    }

    /// Reverse lookup, case-insensitive.
    pub fn tier_of(&self, kind: &str) -> Option<Tier> {
        Tier::ALL
            .into_iter()
            .find(|tier| self.get(*tier).eq_ignore_ascii_case(kind))
    }
}

#[cfg(test)]
pub mod tests;

/// Build the provider selected in config. Credentials are validated for
/// presence here, before any network traffic.
pub fn create_provider(config: &AppConfig) -> SyncResult<Box<dyn Provider>> {
    let kind = config.provider_kind()?;
    match kind {
        ProviderKind::Jira => {
            let cfg = config
                .jira
                .as_ref()
                .ok_or_else(|| SyncError::Config("[jira] section is missing".into()))?;
            cfg.validate()?;
            Ok(Box::new(jira::JiraProvider::new(cfg)))
        }
        ProviderKind::Ado => {
            let cfg = config
                .ado
                .as_ref()
                .ok_or_else(|| SyncError::Config("[ado] section is missing".into()))?;
            cfg.validate()?;
            Ok(Box::new(ado::AdoProvider::new(cfg)))
        }
    }
}
