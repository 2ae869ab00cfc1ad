//! Jira search client: JQL synthesis, role table and offset pagination.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use jns_core::{ConfigError, JiraConfig, SourceRecord};
use jns_http::{HttpClient, HttpError};
use reqwest::Method;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "jns-jira";

const PROJECT_KEY: &str = "CFM";
const EXCLUDED_STATUS: &str = "Resolved";
const CREATED_CUTOFF: &str = "2024-01-01";

#[derive(Debug, Error)]
pub enum JiraError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to fetch Jira issues: {0}")]
    Transport(#[from] HttpError),
}

/// People-picker roles a sync can be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Designer,
    Copywriter,
    BrandLead,
    ProjectLead,
    PrintProducer,
    SocialMedia,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Designer,
        Role::Copywriter,
        Role::BrandLead,
        Role::ProjectLead,
        Role::PrintProducer,
        Role::SocialMedia,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Role::Designer => "designer",
            Role::Copywriter => "copywriter",
            Role::BrandLead => "brand_lead",
            Role::ProjectLead => "project_lead",
            Role::PrintProducer => "print_producer",
            Role::SocialMedia => "social_media",
        }
    }

    /// JQL reference to the custom field holding this role's assignee.
    pub fn field_id(self) -> &'static str {
        match self {
            Role::Designer => "cf[13403]",
            Role::Copywriter => "cf[13402]",
            Role::BrandLead => "cf[13902]",
            Role::ProjectLead => "cf[13400]",
            Role::PrintProducer => "cf[15530]",
            Role::SocialMedia => "cf[14200]",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Role::ALL
            .into_iter()
            .find(|role| role.name() == wanted)
            .ok_or_else(|| ConfigError::UnsupportedRole {
                role: s.to_string(),
                valid: Role::ALL.iter().map(|r| r.name().to_string()).collect(),
            })
    }
}

/// Resolve the query for a run: the explicit JQL if set, otherwise one
/// synthesized from role and display name.
pub fn build_jql(config: &JiraConfig) -> Result<String, ConfigError> {
    if let Some(jql) = &config.jql {
        return Ok(jql.clone());
    }
    let (Some(display_name), Some(role)) = (&config.display_name, &config.role) else {
        return Err(ConfigError::MissingQuery);
    };
    let role: Role = role.parse()?;
    Ok(synthesize_jql(role, display_name))
}

pub fn synthesize_jql(role: Role, display_name: &str) -> String {
    format!(
        "project = {PROJECT_KEY} AND status != {EXCLUDED_STATUS} AND created >= \"{CREATED_CUTOFF}\" \
         AND {} = {} ORDER BY created DESC",
        role.field_id(),
        quote_jql(display_name)
    )
}

fn quote_jql(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if matches!(ch, '"' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    #[serde(default)]
    pub issues: Vec<SourceRecord>,
    #[serde(default)]
    pub total: u64,
    /// Page size the server actually applied.
    #[serde(default)]
    pub max_results: u64,
}

#[async_trait]
pub trait IssueSource: Send + Sync {
    async fn search(&self, jql: &str, start_at: u64, max_results: u32) -> Result<SearchPage, HttpError>;
}

#[derive(Debug, Clone)]
pub struct JiraClient {
    http: HttpClient,
    search_url: String,
    email: String,
    api_token: String,
}

impl JiraClient {
    pub fn new(http: HttpClient, config: &JiraConfig) -> Self {
        Self {
            http,
            search_url: format!("{}/rest/api/3/search", config.api_base()),
            email: config.email.clone(),
            api_token: config.api_token.clone(),
        }
    }
}

#[async_trait]
impl IssueSource for JiraClient {
    async fn search(&self, jql: &str, start_at: u64, max_results: u32) -> Result<SearchPage, HttpError> {
        let request = self
            .http
            .request(Method::GET, &self.search_url)
            .basic_auth(&self.email, Some(&self.api_token))
            .header("Accept", "application/json")
            .query(&[
                ("jql", jql.to_string()),
                ("startAt", start_at.to_string()),
                ("maxResults", max_results.to_string()),
                ("fields", "*all".to_string()),
            ]);
        self.http.send_json(request).await
    }
}

/// Fetch every issue matching the configured query, in server order.
pub async fn fetch_filtered_records(
    source: &dyn IssueSource,
    config: &JiraConfig,
) -> Result<Vec<SourceRecord>, JiraError> {
    let jql = build_jql(config)?;
    info!(%jql, "querying jira");
    info!(
        scope = config.display_name.as_deref().unwrap_or("custom JQL"),
        "fetching jira issues"
    );

    let mut issues = Vec::new();
    let mut start_at = 0u64;
    loop {
        let page = source.search(&jql, start_at, config.page_size).await?;
        debug!(
            start_at,
            returned = page.issues.len(),
            total = page.total,
            "jira page received"
        );
        let step = page.max_results;
        issues.extend(page.issues);
        let next = start_at.saturating_add(step);
        if step == 0 || next >= page.total {
            break;
        }
        start_at = next;
    }

    info!(count = issues.len(), "jira issues fetched");
    Ok(issues)
}
