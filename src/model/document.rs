use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ticket::{Ticket, Tier};

pub const NEW_TASK_STATUS: &str = "To Do";
pub const NEW_BASE_STATE: &str = "Active";

/// Top-level requirement record, persisted as `{id}-base.json`.
///
/// Keys this crate does not know about are kept in `extra` so a rewrite
/// never drops data written by other tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub requirement: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_kind: Option<String>,
    #[serde(default)]
    pub chat_history: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BaseRecord {
    pub fn from_ticket(local_id: &str, ticket: &Ticket, now: &str) -> Self {
        Self {
            id: local_id.to_string(),
            title: ticket.title.clone(),
            requirement: ticket.description_text().to_string(),
            state: NEW_BASE_STATE.to_string(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
            remote_id: ticket.remote_id().map(String::from),
            remote_kind: non_empty(&ticket.remote_kind),
            chat_history: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// All stories (and their tasks) belonging to one requirement, persisted as
/// `{id}-feature.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureFile {
    #[serde(default)]
    pub features: Vec<FeatureRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_kind: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    #[serde(default)]
    pub list: String,
    #[serde(default)]
    pub acceptance: String,
    #[serde(default)]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_kind: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Project-level metadata (`.metadata.json`). Only the per-tier counters are
/// interpreted; everything else round-trips through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    #[serde(rename = "PRD", default, skip_serializing_if = "Option::is_none")]
    pub prd: Option<TierCounter>,
    #[serde(rename = "US", default, skip_serializing_if = "Option::is_none")]
    pub us: Option<TierCounter>,
    #[serde(rename = "TASK", default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TierCounter>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierCounter {
    #[serde(default)]
    pub count: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProjectMetadata {
    fn slot(&self, tier: Tier) -> &Option<TierCounter> {
        match tier {
            Tier::Top => &self.prd,
            Tier::Mid => &self.us,
            Tier::Leaf => &self.task,
        }
    }

    fn slot_mut(&mut self, tier: Tier) -> &mut Option<TierCounter> {
        match tier {
            Tier::Top => &mut self.prd,
            Tier::Mid => &mut self.us,
            Tier::Leaf => &mut self.task,
        }
    }

    /// The stored counter for a tier. A zero count counts as "not recorded".
    pub fn counter(&self, tier: Tier) -> Option<u32> {
        self.slot(tier).as_ref().map(|c| c.count).filter(|n| *n > 0)
    }

    /// Raise the counter to `value`; never lowers it. Returns true if changed.
    pub fn raise_counter(&mut self, tier: Tier, value: u32) -> bool {
        let slot = self.slot_mut(tier).get_or_insert_with(TierCounter::default);
        if value > slot.count {
            slot.count = value;
            true
        } else {
            false
        }
    }
}

pub(crate) fn non_empty(s: &str) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
