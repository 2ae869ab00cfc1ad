//! Core domain model, value-shape classification and run configuration for JNS.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

pub const CRATE_NAME: &str = "jns-core";

pub const DEFAULT_JIRA_PAGE_SIZE: u32 = 1000;
pub const MAX_JIRA_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_NOTION_BASE_URL: &str = "https://api.notion.com/v1";
pub const DEFAULT_SYNC_CRON: &str = "0 0 */6 * * *";
pub const DEFAULT_USER_AGENT: &str = "jns-bot/0.1";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("either JIRA_JQL must be provided, or both JIRA_DISPLAY_NAME and JIRA_ROLE must be set")]
    MissingQuery,
    #[error("unsupported JIRA_ROLE: {role}. Must be one of: {}", .valid.join(", "))]
    UnsupportedRole { role: String, valid: Vec<String> },
}

/// Issue as returned by the Jira search endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub key: String,
    #[serde(default)]
    pub fields: BTreeMap<String, JsonValue>,
}

impl SourceRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field_id: impl Into<String>, value: JsonValue) -> Self {
        self.fields.insert(field_id.into(), value);
        self
    }

    pub fn field(&self, field_id: &str) -> RawFieldValue {
        self.fields
            .get(field_id)
            .map(RawFieldValue::from_json)
            .unwrap_or(RawFieldValue::Absent)
    }
}

/// Shape of one raw Jira field value.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFieldValue {
    Absent,
    Scalar(String),
    /// Object carrying a `displayName` (users, most pickers).
    NamedRef(String),
    /// Array whose first element is a named object; the first name is authoritative.
    NamedRefList(Vec<String>),
    Other(JsonValue),
}

impl RawFieldValue {
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Absent,
            JsonValue::String(s) => Self::Scalar(s.clone()),
            JsonValue::Object(map) => match map.get("displayName") {
                Some(name) => Self::NamedRef(display_name_text(name)),
                None => Self::Other(value.clone()),
            },
            JsonValue::Array(items) => {
                let first_is_named = items
                    .first()
                    .and_then(JsonValue::as_object)
                    .is_some_and(|obj| obj.contains_key("displayName"));
                if !first_is_named {
                    return Self::Other(value.clone());
                }
                let names = items
                    .iter()
                    .filter_map(|item| item.get("displayName"))
                    .map(display_name_text)
                    .collect();
                Self::NamedRefList(names)
            }
            _ => Self::Other(value.clone()),
        }
    }

    /// Pull the display string out of a raw value for a destination of `kind`.
    ///
    /// Unrecognised shapes only pass through for date fields; everything else
    /// is treated as absent.
    pub fn extract(&self, kind: ValueKind) -> Option<String> {
        match self {
            Self::NamedRef(name) => Some(name.clone()),
            Self::NamedRefList(names) => names.first().cloned(),
            Self::Scalar(text) => Some(text.clone()),
            Self::Other(value) if kind == ValueKind::Date && is_truthy(value) => {
                Some(match value {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                })
            }
            Self::Other(_) | Self::Absent => None,
        }
    }
}

fn display_name_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Title,
    Select,
    Date,
    RichText,
}

/// One row of the fixed Notion property ← Jira field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub property: &'static str,
    pub source_field: &'static str,
    pub kind: ValueKind,
}

impl FieldMapping {
    pub const fn new(property: &'static str, source_field: &'static str, kind: ValueKind) -> Self {
        Self {
            property,
            source_field,
            kind,
        }
    }
}

/// Serialized form of one Notion property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationProperty {
    Title(String),
    Select(String),
    /// ISO date, already truncated to `YYYY-MM-DD`.
    Date(String),
    RichText { content: String, link: Option<String> },
    Status(String),
}

impl DestinationProperty {
    /// Format an extracted value for `kind`. Empty results yield `None` so the
    /// property is left out of the payload entirely.
    pub fn format(value: &str, kind: ValueKind) -> Option<Self> {
        if value.is_empty() {
            return None;
        }
        match kind {
            ValueKind::Title => Some(Self::Title(value.to_string())),
            ValueKind::Select => {
                let name = value.trim();
                (!name.is_empty()).then(|| Self::Select(name.to_string()))
            }
            ValueKind::Date => Some(Self::Date(value.chars().take(10).collect())),
            ValueKind::RichText => Some(Self::RichText {
                content: value.to_string(),
                link: None,
            }),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Title(content) => json!({ "title": [{ "text": { "content": content } }] }),
            Self::Select(name) => json!({ "select": { "name": name } }),
            Self::Date(start) => json!({ "date": { "start": start } }),
            Self::RichText { content, link } => {
                let mut text = json!({ "content": content });
                if let Some(url) = link {
                    text["link"] = json!({ "url": url });
                }
                json!({ "rich_text": [{ "text": text }] })
            }
            Self::Status(name) => json!({ "status": { "name": name } }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Created,
    SkippedExisting,
    Failed,
}

impl fmt::Display for ReconciliationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::SkippedExisting => "skipped-existing",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub key: String,
    pub outcome: ReconciliationOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JiraConfig {
    pub domain: String,
    pub email: String,
    pub api_token: String,
    pub jql: Option<String>,
    pub display_name: Option<String>,
    pub role: Option<String>,
    pub api_base_url: Option<String>,
    pub page_size: u32,
}

impl JiraConfig {
    pub fn api_base(&self) -> String {
        match &self.api_base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}", self.domain),
        }
    }

    /// Human-facing link for an issue; always points at the public domain.
    pub fn browse_url(&self, key: &str) -> String {
        format!("https://{}/browse/{}", self.domain, key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotionConfig {
    pub api_key: String,
    pub database_id: String,
    pub text_block_id: Option<String>,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub jira: JiraConfig,
    pub notion: NotionConfig,
    pub dry_run: bool,
    pub continue_on_error: bool,
    pub sync_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: Option<u64>,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let page_size = match get("JIRA_PAGE_SIZE") {
            Some(raw) => parse_number::<u32>("JIRA_PAGE_SIZE", &raw)?.clamp(1, MAX_JIRA_PAGE_SIZE),
            None => DEFAULT_JIRA_PAGE_SIZE,
        };
        let http_timeout_secs = get("SYNC_HTTP_TIMEOUT_SECS")
            .map(|raw| parse_number::<u64>("SYNC_HTTP_TIMEOUT_SECS", &raw))
            .transpose()?;

        let jira = JiraConfig {
            domain: require("JIRA_DOMAIN")?,
            email: require("JIRA_EMAIL")?,
            api_token: require("JIRA_API_TOKEN")?,
            jql: get("JIRA_JQL"),
            display_name: get("JIRA_DISPLAY_NAME"),
            role: get("JIRA_ROLE"),
            api_base_url: get("JIRA_BASE_URL"),
            page_size,
        };
        let notion = NotionConfig {
            api_key: require("NOTION_API_KEY")?,
            database_id: require("NOTION_DATABASE_ID")?,
            text_block_id: get("NOTION_TEXT_BLOCK_ID"),
            base_url: get("NOTION_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_NOTION_BASE_URL.to_string()),
        };

        Ok(Self {
            jira,
            notion,
            dry_run: get("SYNC_DRY_RUN").is_some_and(|v| is_truthy_flag(&v)),
            continue_on_error: get("SYNC_CONTINUE_ON_ERROR").is_some_and(|v| is_truthy_flag(&v)),
            sync_cron: get("SYNC_CRON").unwrap_or_else(|| DEFAULT_SYNC_CRON.to_string()),
            user_agent: get("SYNC_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs,
        })
    }
}

fn is_truthy_flag(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True")
}

fn parse_number<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
