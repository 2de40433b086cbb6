use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{IdPage, KindNames, Provider};
use crate::config::JiraConfig;
use crate::model::{Ticket, Tier};
use crate::util::adf::{extract_text_from_adf, text_to_adf};

/// Upper bound on issues requested per search call.
const MAX_RESULTS: usize = 100;

pub struct JiraProvider {
    base_url: String,
    auth_header: String,
    project_key: String,
    kinds: KindNames,
    client: reqwest::Client,
}

impl JiraProvider {
    pub fn new(cfg: &JiraConfig) -> Self {
        let creds = format!("{}:{}", cfg.email, cfg.api_token);
        let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
        Self {
            base_url: format!("https://{}.atlassian.net", cfg.domain),
            auth_header: format!("Basic {encoded}"),
            project_key: cfg.project_key.clone(),
            kinds: cfg.kinds.clone().unwrap_or_else(KindNames::jira),
            client: reqwest::Client::new(),
        }
    }

    async fn search(&self, jql: &str, start_at: usize, max_results: usize) -> Result<SearchResponse> {
        let url = format!(
            "{}/rest/api/3/search?jql={}&startAt={}&maxResults={}&fields=summary,description,issuetype,parent",
            self.base_url,
            urlencoding::encode(jql),
            start_at,
            max_results,
        );

        let resp = self
            .client
            .get(&url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Jira search request failed")?
            .error_for_status()
            .context("Jira search rejected")?;

        resp.json().await.context("Failed to parse Jira search response")
    }

    async fn create(&self, item: &Ticket, parent_remote_id: Option<&str>) -> Result<String> {
        let mut fields = json!({
            "project": { "key": self.project_key },
            "summary": item.title,
            "description": text_to_adf(item.description_text()),
            "issuetype": { "name": self.kind_of(item) },
        });
        if let Some(parent) = parent_remote_id {
            fields["parent"] = json!({ "key": parent });
        }

        let created: CreatedIssue = self
            .client
            .post(format!("{}/rest/api/3/issue", self.base_url))
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .context("Jira create request failed")?
            .error_for_status()
            .context("Jira rejected issue creation")?
            .json()
            .await
            .context("Failed to parse Jira create response")?;

        Ok(created.key)
    }

    /// Returns false when the issue no longer exists.
    async fn update(&self, key: &str, item: &Ticket) -> Result<bool> {
        let body = json!({
            "fields": {
                "summary": item.title,
                "description": text_to_adf(item.description_text()),
            }
        });

        let resp = self
            .client
            .put(format!("{}/rest/api/3/issue/{key}", self.base_url))
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .context("Jira update request failed")?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        resp.error_for_status()
            .with_context(|| format!("Jira rejected update of {key}"))?;
        Ok(true)
    }

    fn kind_of<'a>(&'a self, item: &'a Ticket) -> &'a str {
        if item.remote_kind.is_empty() {
            self.kinds.get(item.tier)
        } else {
            item.remote_kind.as_str()
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total: usize,
    issues: Vec<JiraIssue>,
}

#[derive(Deserialize)]
struct JiraIssue {
    key: String,
    fields: IssueFields,
}

#[derive(Deserialize)]
struct IssueFields {
    summary: Option<String>,
    description: Option<serde_json::Value>,
    issuetype: Option<IssueTypeField>,
    parent: Option<ParentField>,
}

#[derive(Deserialize)]
struct IssueTypeField {
    name: String,
}

#[derive(Deserialize)]
struct ParentField {
    key: String,
}

#[derive(Deserialize)]
struct CreatedIssue {
    key: String,
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\\\""))
}

#[async_trait]
impl Provider for JiraProvider {
    fn name(&self) -> &str {
        "Jira"
    }

    fn kind_for(&self, tier: Tier) -> &str {
        self.kinds.get(tier)
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.client
            .get(format!("{}/rest/api/3/myself", self.base_url))
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Jira API request failed")?
            .error_for_status()
            .context("Jira rejected the configured credentials")?;
        Ok(())
    }

    async fn list_top_level_ids(&self, skip: usize, take: usize) -> Result<IdPage> {
        let jql = format!(
            "project = {} AND issuetype = {} ORDER BY created ASC",
            quote(&self.project_key),
            quote(self.kinds.get(Tier::Top)),
        );
        let page = self.search(&jql, skip, take.min(MAX_RESULTS)).await?;
        Ok(IdPage {
            total: page.total,
            ids: page.issues.into_iter().map(|i| i.key).collect(),
        })
    }

    async fn list_children_ids(&self, parent_id: &str, child: Tier) -> Result<Vec<String>> {
        let jql = format!(
            "parent = {} AND issuetype = {} ORDER BY created ASC",
            quote(parent_id),
            quote(self.kinds.get(child)),
        );

        let mut ids = Vec::new();
        loop {
            let page = self.search(&jql, ids.len(), MAX_RESULTS).await?;
            let fetched = page.issues.len();
            ids.extend(page.issues.into_iter().map(|i| i.key));
            if fetched == 0 || ids.len() >= page.total {
                break;
            }
        }
        debug!(parent = parent_id, count = ids.len(), "listed Jira children");
        Ok(ids)
    }

    async fn hydrate(&self, ids: &[String], tier: Tier) -> Result<Vec<Ticket>> {
        let mut by_key: HashMap<String, Ticket> = HashMap::new();

        for chunk in ids.chunks(MAX_RESULTS) {
            let keys: Vec<String> = chunk.iter().map(|k| quote(k)).collect();
            let jql = format!("key in ({})", keys.join(","));
            let page = self.search(&jql, 0, chunk.len()).await?;

            for issue in page.issues {
                let description = issue
                    .fields
                    .description
                    .as_ref()
                    .and_then(extract_text_from_adf);
                let kind = issue
                    .fields
                    .issuetype
                    .map(|t| t.name)
                    .unwrap_or_else(|| self.kinds.get(tier).to_string());

                let ticket = Ticket {
                    remote_kind: kind,
                    remote_parent_id: issue.fields.parent.map(|p| p.key),
                    description,
                    ..Ticket::remote(tier, issue.key.clone(), issue.fields.summary.unwrap_or_default())
                };
                by_key.insert(issue.key, ticket);
            }
        }

        let tickets: Vec<Ticket> = ids.iter().filter_map(|id| by_key.remove(id)).collect();
        if tickets.len() < ids.len() {
            warn!(
                requested = ids.len(),
                returned = tickets.len(),
                "Jira returned fewer issues than requested"
            );
        }
        Ok(tickets)
    }

    async fn create_or_update(&self, item: &Ticket, parent_remote_id: Option<&str>) -> Result<String> {
        if item.title.trim().is_empty() {
            bail!("cannot push an item without a title");
        }
        if let Some(key) = item.remote_id() {
            if self.update(key, item).await? {
                return Ok(key.to_string());
            }
            warn!(key, "Jira issue no longer exists, creating it again");
        }
        self.create(item, parent_remote_id).await
    }
}
