use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{IdPage, KindNames, Provider};
use crate::config::AdoConfig;
use crate::model::{Ticket, Tier};
use crate::util::html::{html_to_text, text_to_html};

const API_VERSION: &str = "7.0";
/// The work-items batch endpoint accepts at most 200 ids.
const BATCH_LIMIT: usize = 200;
const HIERARCHY_FORWARD: &str = "System.LinkTypes.Hierarchy-Forward";
const HIERARCHY_REVERSE: &str = "System.LinkTypes.Hierarchy-Reverse";

pub struct AdoProvider {
    org_url: String,
    /// Project name, already URL-encoded.
    project: String,
    project_url: String,
    auth_header: String,
    kinds: KindNames,
    client: reqwest::Client,
}

impl AdoProvider {
    pub fn new(cfg: &AdoConfig) -> Self {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!(":{}", cfg.personal_access_token));
        let org_url = format!("{}/{}", cfg.base_url(), cfg.organization);
        let project = urlencoding::encode(&cfg.project).into_owned();
        Self {
            project_url: format!("{org_url}/{project}"),
            project,
            org_url,
            auth_header: format!("Basic {encoded}"),
            kinds: cfg.kinds.clone().unwrap_or_else(KindNames::ado),
            client: reqwest::Client::new(),
        }
    }

    fn project_info_url(&self) -> String {
        format!("{}/_apis/projects/{}?api-version={API_VERSION}", self.org_url, self.project)
    }

    fn work_item_url(&self, id: &str) -> String {
        format!("{}/_apis/wit/workitems/{id}", self.project_url)
    }

    async fn wiql(&self, query: &str) -> Result<WiqlResponse> {
        self.client
            .post(format!("{}/_apis/wit/wiql?api-version={API_VERSION}", self.project_url))
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .json(&json!({ "query": query }))
            .send()
            .await
            .context("Azure DevOps WIQL request failed")?
            .error_for_status()
            .context("Azure DevOps rejected WIQL query")?
            .json()
            .await
            .context("Failed to parse Azure DevOps WIQL response")
    }

    async fn patch(&self, url: &str, ops: &Value) -> Result<reqwest::Response> {
        self.client
            .patch(url)
            .header("Authorization", &self.auth_header)
            .header("Content-Type", "application/json-patch+json")
            .header("Accept", "application/json")
            .body(ops.to_string())
            .send()
            .await
            .context("Azure DevOps work item request failed")
    }

    fn field_ops(item: &Ticket) -> Vec<Value> {
        vec![
            json!({ "op": "add", "path": "/fields/System.Title", "value": item.title }),
            json!({
                "op": "add",
                "path": "/fields/System.Description",
                "value": text_to_html(item.description_text()),
            }),
        ]
    }

    async fn create(&self, item: &Ticket, parent_remote_id: Option<&str>) -> Result<String> {
        let kind = if item.remote_kind.is_empty() {
            self.kinds.get(item.tier)
        } else {
            item.remote_kind.as_str()
        };
        let mut ops = Self::field_ops(item);
        if let Some(parent) = parent_remote_id {
            ops.push(json!({
                "op": "add",
                "path": "/relations/-",
                "value": { "rel": HIERARCHY_REVERSE, "url": self.work_item_url(parent) },
            }));
        }

        let url = format!(
            "{}/_apis/wit/workitems/${}?api-version={API_VERSION}",
            self.project_url,
            urlencoding::encode(kind)
        );
        let created: WorkItemRef = self
            .patch(&url, &Value::Array(ops))
            .await?
            .error_for_status()
            .context("Azure DevOps rejected work item creation")?
            .json()
            .await
            .context("Failed to parse Azure DevOps create response")?;

        Ok(created.id.to_string())
    }

    /// Returns false when the work item no longer exists.
    async fn update(&self, id: &str, item: &Ticket) -> Result<bool> {
        let url = format!("{}?api-version={API_VERSION}", self.work_item_url(id));
        let resp = self.patch(&url, &Value::Array(Self::field_ops(item))).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        resp.error_for_status()
            .with_context(|| format!("Azure DevOps rejected update of {id}"))?;
        Ok(true)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WiqlResponse {
    #[serde(default)]
    work_items: Vec<WorkItemRef>,
    #[serde(default)]
    work_item_relations: Vec<WorkItemLink>,
}

#[derive(Deserialize)]
struct WorkItemRef {
    id: u64,
}

#[derive(Deserialize)]
struct WorkItemLink {
    source: Option<WorkItemRef>,
    target: Option<WorkItemRef>,
}

#[derive(Deserialize)]
struct BatchResponse {
    value: Vec<WorkItem>,
}

#[derive(Deserialize)]
struct WorkItem {
    id: u64,
    fields: WorkItemFields,
}

#[derive(Deserialize)]
struct WorkItemFields {
    #[serde(rename = "System.Title")]
    title: Option<String>,
    #[serde(rename = "System.Description")]
    description: Option<String>,
    #[serde(rename = "System.WorkItemType")]
    work_item_type: Option<String>,
    #[serde(rename = "System.Parent")]
    parent: Option<u64>,
}

fn wiql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[async_trait]
impl Provider for AdoProvider {
    fn name(&self) -> &str {
        "Azure DevOps"
    }

    fn kind_for(&self, tier: Tier) -> &str {
        self.kinds.get(tier)
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.client
            .get(self.project_info_url())
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .context("Azure DevOps API request failed")?
            .error_for_status()
            .context("Azure DevOps rejected the configured credentials")?;
        Ok(())
    }

    async fn list_top_level_ids(&self, skip: usize, take: usize) -> Result<IdPage> {
        let query = format!(
            "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = @project \
             AND [System.WorkItemType] = {} ORDER BY [System.Id] ASC",
            wiql_literal(self.kinds.get(Tier::Top)),
        );
        let resp = self.wiql(&query).await?;
        let total = resp.work_items.len();
        let ids = resp
            .work_items
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|w| w.id.to_string())
            .collect();
        Ok(IdPage { ids, total })
    }

    async fn list_children_ids(&self, parent_id: &str, child: Tier) -> Result<Vec<String>> {
        let parent: u64 = parent_id
            .parse()
            .with_context(|| format!("invalid Azure DevOps work item id {parent_id:?}"))?;
        let query = format!(
            "SELECT [System.Id] FROM WorkItemLinks WHERE [Source].[System.Id] = {parent} \
             AND [System.Links.LinkType] = '{HIERARCHY_FORWARD}' \
             AND [Target].[System.WorkItemType] = {} MODE (MustContain)",
            wiql_literal(self.kinds.get(child)),
        );
        let resp = self.wiql(&query).await?;

        // The first relation has no source; it is the parent itself.
        let ids: Vec<String> = resp
            .work_item_relations
            .into_iter()
            .filter(|link| link.source.as_ref().is_some_and(|s| s.id == parent))
            .filter_map(|link| link.target.map(|t| t.id.to_string()))
            .collect();
        debug!(parent = parent_id, count = ids.len(), "listed Azure DevOps children");
        Ok(ids)
    }

    async fn hydrate(&self, ids: &[String], tier: Tier) -> Result<Vec<Ticket>> {
        let mut by_id: HashMap<String, Ticket> = HashMap::new();

        for chunk in ids.chunks(BATCH_LIMIT) {
            let numeric: Vec<u64> = chunk
                .iter()
                .map(|id| id.parse::<u64>())
                .collect::<std::result::Result<_, _>>()
                .context("invalid Azure DevOps work item id")?;

            let batch: BatchResponse = self
                .client
                .post(format!("{}/_apis/wit/workitemsbatch?api-version={API_VERSION}", self.project_url))
                .header("Authorization", &self.auth_header)
                .header("Accept", "application/json")
                .json(&json!({
                    "ids": numeric,
                    "fields": [
                        "System.Id",
                        "System.Title",
                        "System.Description",
                        "System.WorkItemType",
                        "System.Parent",
                    ],
                }))
                .send()
                .await
                .context("Azure DevOps batch request failed")?
                .error_for_status()
                .context("Azure DevOps rejected batch request")?
                .json()
                .await
                .context("Failed to parse Azure DevOps batch response")?;

            for item in batch.value {
                let id = item.id.to_string();
                let description = item
                    .fields
                    .description
                    .map(|html| html_to_text(&html))
                    .filter(|text| !text.is_empty());
                let ticket = Ticket {
                    remote_kind: item
                        .fields
                        .work_item_type
                        .unwrap_or_else(|| self.kinds.get(tier).to_string()),
                    remote_parent_id: item.fields.parent.map(|p| p.to_string()),
                    description,
                    ..Ticket::remote(tier, id.clone(), item.fields.title.unwrap_or_default())
                };
                by_id.insert(id, ticket);
            }
        }

        let tickets: Vec<Ticket> = ids.iter().filter_map(|id| by_id.remove(id)).collect();
        if tickets.len() < ids.len() {
            warn!(
                requested = ids.len(),
                returned = tickets.len(),
                "Azure DevOps returned fewer work items than requested"
            );
        }
        Ok(tickets)
    }

    async fn create_or_update(&self, item: &Ticket, parent_remote_id: Option<&str>) -> Result<String> {
        if item.title.trim().is_empty() {
            bail!("cannot push an item without a title");
        }
        if let Some(id) = item.remote_id() {
            if self.update(id, item).await? {
                return Ok(id.to_string());
            }
            warn!(id, "Azure DevOps work item no longer exists, creating it again");
        }
        self.create(item, parent_remote_id).await
    }
}
