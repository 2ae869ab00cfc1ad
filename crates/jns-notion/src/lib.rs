//! Notion side of the sync: existing-ticket index, page creation and the
//! "last synced" marker block.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::America::New_York;
use jns_core::{
    DestinationProperty, FieldMapping, JiraConfig, NotionConfig, ReconciliationOutcome,
    ReconciliationResult, SourceRecord, SyncConfig, ValueKind,
};
use jns_http::{HttpClient, HttpError};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use thiserror::Error;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "jns-notion";

pub const NOTION_VERSION: &str = "2022-06-28";
pub const QUERY_PAGE_SIZE: u32 = 100;
pub const TICKET_ID_PROPERTY: &str = "Ticket ID";
pub const STATUS_PROPERTY: &str = "Status";
pub const INITIAL_STATUS: &str = "Not started";

/// Notion property ← Jira field table for the campaign tracker database.
pub static FIELD_MAP: &[FieldMapping] = &[
    FieldMapping::new("Name", "summary", ValueKind::Title),
    FieldMapping::new("Designer", "customfield_13403", ValueKind::Select),
    FieldMapping::new("Copy due date", "customfield_13406", ValueKind::Date),
    FieldMapping::new("CR3", "customfield_15039", ValueKind::Date),
    FieldMapping::new("Ideal go-live date", "customfield_13607", ValueKind::Date),
    FieldMapping::new("Brand lead", "customfield_13902", ValueKind::Select),
    FieldMapping::new("Brief date", "customfield_15011", ValueKind::Date),
    FieldMapping::new("Due date", "customfield_13408", ValueKind::Date),
    FieldMapping::new("Design due date", "customfield_13607", ValueKind::Date),
    FieldMapping::new("Copywriter", "customfield_13402", ValueKind::Select),
    FieldMapping::new("Sizing (brand)", "customfield_15159", ValueKind::Select),
    FieldMapping::new("Illustration due date", "customfield_13407", ValueKind::Date),
    FieldMapping::new("Project lead", "customfield_13400", ValueKind::Select),
    FieldMapping::new("Head of Brand Design Review", "customfield_14610", ValueKind::Select),
    FieldMapping::new("Video due date", "customfield_15100", ValueKind::Date),
    FieldMapping::new("Illustration", "customfield_14110", ValueKind::Select),
    FieldMapping::new("CR2", "customfield_14112", ValueKind::Date),
    FieldMapping::new("CR1", "customfield_14111", ValueKind::Date),
    FieldMapping::new("Social media due date", "customfield_14201", ValueKind::Date),
    FieldMapping::new("Print producer", "customfield_15530", ValueKind::Select),
    FieldMapping::new("Social media", "customfield_14200", ValueKind::Select),
];

#[derive(Debug, Error)]
pub enum NotionError {
    #[error("notion request failed: {0}")]
    Transport(#[from] HttpError),
    #[error("failed to create ticket {key} in Notion: {source}\npayload:\n{payload}")]
    Create {
        key: String,
        #[source]
        source: HttpError,
        payload: String,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageObject {
    #[serde(default)]
    pub properties: Map<String, JsonValue>,
}

impl PageObject {
    /// Content of the first `Ticket ID` text run, if any.
    pub fn ticket_id(&self) -> Option<&str> {
        self.properties
            .get(TICKET_ID_PROPERTY)?
            .get("rich_text")?
            .as_array()?
            .first()?
            .get("text")?
            .get("content")?
            .as_str()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryPage {
    #[serde(default)]
    pub results: Vec<PageObject>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait DestinationStore: Send + Sync {
    async fn query_database(&self, database_id: &str, start_cursor: Option<&str>) -> Result<QueryPage, HttpError>;

    async fn create_page(&self, payload: &JsonValue) -> Result<(), HttpError>;

    async fn update_block(&self, block_id: &str, payload: &JsonValue) -> Result<(), HttpError>;
}

#[derive(Debug, Clone)]
pub struct NotionClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl NotionClient {
    pub fn new(http: HttpClient, config: &NotionConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, &format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
    }
}

#[async_trait]
impl DestinationStore for NotionClient {
    async fn query_database(&self, database_id: &str, start_cursor: Option<&str>) -> Result<QueryPage, HttpError> {
        let mut body = json!({ "page_size": QUERY_PAGE_SIZE });
        if let Some(cursor) = start_cursor {
            body["start_cursor"] = json!(cursor);
        }
        let request = self
            .request(Method::POST, &format!("/databases/{database_id}/query"))
            .json(&body);
        self.http.send_json(request).await
    }

    async fn create_page(&self, payload: &JsonValue) -> Result<(), HttpError> {
        self.http
            .send(self.request(Method::POST, "/pages").json(payload))
            .await
    }

    async fn update_block(&self, block_id: &str, payload: &JsonValue) -> Result<(), HttpError> {
        self.http
            .send(
                self.request(Method::PATCH, &format!("/blocks/{block_id}"))
                    .json(payload),
            )
            .await
    }
}

/// Collect the ticket ids already present in the database, following cursors
/// until the store reports no more pages.
pub async fn existing_identifiers(
    store: &dyn DestinationStore,
    database_id: &str,
) -> Result<HashSet<String>, NotionError> {
    let mut ids = HashSet::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = store.query_database(database_id, cursor.as_deref()).await?;
        ids.extend(
            page.results
                .iter()
                .filter_map(PageObject::ticket_id)
                .map(ToString::to_string),
        );
        match (page.has_more, page.next_cursor) {
            (true, Some(next)) => cursor = Some(next),
            (true, None) => {
                warn!("notion reported more results without a cursor; stopping");
                break;
            }
            (false, _) => break,
        }
    }
    info!(count = ids.len(), "existing notion tickets indexed");
    Ok(ids)
}

pub struct Reconciler<'a> {
    store: &'a dyn DestinationStore,
    jira: &'a JiraConfig,
    database_id: &'a str,
    mappings: &'a [FieldMapping],
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn DestinationStore, config: &'a SyncConfig) -> Self {
        Self {
            store,
            jira: &config.jira,
            database_id: &config.notion.database_id,
            mappings: FIELD_MAP,
        }
    }

    pub fn with_mappings(mut self, mappings: &'a [FieldMapping]) -> Self {
        self.mappings = mappings;
        self
    }

    /// Mapped properties plus the linked `Ticket ID`. Fields that are absent or
    /// format to nothing are left out.
    pub fn build_properties(&self, record: &SourceRecord) -> Map<String, JsonValue> {
        let mut props = Map::new();
        for mapping in self.mappings {
            let formatted = record
                .field(mapping.source_field)
                .extract(mapping.kind)
                .and_then(|value| DestinationProperty::format(&value, mapping.kind));
            if let Some(property) = formatted {
                props.insert(mapping.property.to_string(), property.to_json());
            }
        }

        let ticket = DestinationProperty::RichText {
            content: record.key.clone(),
            link: Some(self.jira.browse_url(&record.key)),
        };
        props.insert(TICKET_ID_PROPERTY.to_string(), ticket.to_json());
        props
    }

    pub async fn upsert(
        &self,
        record: &SourceRecord,
        existing: &HashSet<String>,
        dry_run: bool,
    ) -> Result<ReconciliationResult, NotionError> {
        let key = record.key.clone();
        let mut props = self.build_properties(record);

        if existing.contains(&key) {
            info!(%key, "ticket already exists; skipping create");
            return Ok(ReconciliationResult {
                key,
                outcome: ReconciliationOutcome::SkippedExisting,
            });
        }

        props.insert(
            STATUS_PROPERTY.to_string(),
            DestinationProperty::Status(INITIAL_STATUS.to_string()).to_json(),
        );

        if dry_run {
            info!(%key, "dry run: would create ticket");
            return Ok(ReconciliationResult {
                key,
                outcome: ReconciliationOutcome::Created,
            });
        }

        let payload = json!({
            "parent": { "database_id": self.database_id },
            "properties": props,
        });

        if let Err(source) = self.store.create_page(&payload).await {
            let payload = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
            error!(%key, status = ?source.status(), error = %source, %payload, "failed to create ticket in notion");
            return Err(NotionError::Create { key, source, payload });
        }

        info!(%key, "created ticket in notion");
        Ok(ReconciliationResult {
            key,
            outcome: ReconciliationOutcome::Created,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampOutcome {
    Unconfigured,
    Updated { text: String },
    Failed,
}

/// `"✅ Last synced: Wednesday, May 01 at 06:00 AM ET"`, rendered in US Eastern time.
pub fn last_synced_text(now: DateTime<Utc>) -> String {
    let local = now.with_timezone(&New_York);
    format!("✅ Last synced: {}", local.format("%A, %B %d at %I:%M %p ET"))
}

/// Overwrite the marker block. Failures are logged and reported, never raised.
pub async fn update_last_synced(
    store: &dyn DestinationStore,
    block_id: Option<&str>,
    now: DateTime<Utc>,
) -> TimestampOutcome {
    let Some(block_id) = block_id else {
        info!("no NOTION_TEXT_BLOCK_ID set; skipping timestamp update");
        return TimestampOutcome::Unconfigured;
    };

    let text = last_synced_text(now);
    let payload = json!({
        "paragraph": {
            "rich_text": [{ "type": "text", "text": { "content": text } }]
        }
    });

    match store.update_block(block_id, &payload).await {
        Ok(()) => {
            info!(%text, "updated notion timestamp block");
            TimestampOutcome::Updated { text }
        }
        Err(err) => {
            warn!(status = ?err.status(), error = %err, "failed to update notion timestamp block");
            TimestampOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use axum::{
        extract::{Path, State},
        http::{header, HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{patch, post},
        Json, Router,
    };
    use chrono::TimeZone;
    use jns_core::{NotionConfig, DEFAULT_SYNC_CRON, DEFAULT_USER_AGENT};
    use jns_http::HttpClientConfig;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn sync_config() -> SyncConfig {
        SyncConfig {
            jira: JiraConfig {
                domain: "acme.atlassian.net".into(),
                email: "sync@acme.test".into(),
                api_token: "jira-token".into(),
                jql: Some("project = CFM".into()),
                display_name: None,
                role: None,
                api_base_url: None,
                page_size: 1000,
            },
            notion: NotionConfig {
                api_key: "secret_abc".into(),
                database_id: "db-123".into(),
                text_block_id: None,
                base_url: "https://api.notion.com/v1".into(),
            },
            dry_run: false,
            continue_on_error: false,
            sync_cron: DEFAULT_SYNC_CRON.into(),
            user_agent: DEFAULT_USER_AGENT.into(),
            http_timeout_secs: None,
        }
    }

    fn ticket_page(id: &str) -> PageObject {
        serde_json::from_value(json!({
            "properties": {
                "Ticket ID": { "rich_text": [{ "text": { "content": id } }] }
            }
        }))
        .unwrap()
    }

    #[derive(Default)]
    struct MemoryStore {
        pages: Mutex<VecDeque<QueryPage>>,
        cursors: Mutex<Vec<Option<String>>>,
        created: Mutex<Vec<JsonValue>>,
        blocks: Mutex<Vec<(String, JsonValue)>>,
        fail_create: bool,
        fail_update: bool,
    }

    #[async_trait]
    impl DestinationStore for MemoryStore {
        async fn query_database(&self, _database_id: &str, start_cursor: Option<&str>) -> Result<QueryPage, HttpError> {
            self.cursors.lock().unwrap().push(start_cursor.map(ToString::to_string));
            Ok(self.pages.lock().unwrap().pop_front().unwrap_or_default())
        }

        async fn create_page(&self, payload: &JsonValue) -> Result<(), HttpError> {
            if self.fail_create {
                return Err(HttpError::Status {
                    status: 400,
                    url: "https://api.notion.com/v1/pages".into(),
                    body: r#"{"message":"Status is not a property that exists."}"#.into(),
                });
            }
            self.created.lock().unwrap().push(payload.clone());
            Ok(())
        }

        async fn update_block(&self, block_id: &str, payload: &JsonValue) -> Result<(), HttpError> {
            if self.fail_update {
                return Err(HttpError::Status {
                    status: 404,
                    url: format!("https://api.notion.com/v1/blocks/{block_id}"),
                    body: "object_not_found".into(),
                });
            }
            self.blocks.lock().unwrap().push((block_id.to_string(), payload.clone()));
            Ok(())
        }
    }

    fn sample_record() -> SourceRecord {
        SourceRecord::new("CFM-42")
            .with_field("summary", json!("Spring launch"))
            .with_field("customfield_13403", json!({ "displayName": "Alex" }))
            .with_field("customfield_13402", json!([{ "displayName": "Sam" }, { "displayName": "Kim" }]))
            .with_field("customfield_13408", json!("2024-05-01T10:00:00Z"))
            .with_field("customfield_15159", json!({ "value": "Large" }))
            .with_field("customfield_13400", JsonValue::Null)
    }

    #[test]
    fn field_map_property_names_are_unique() {
        let mut seen = HashSet::new();
        for mapping in FIELD_MAP {
            assert!(seen.insert(mapping.property), "duplicate {}", mapping.property);
            assert_ne!(mapping.property, TICKET_ID_PROPERTY);
            assert_ne!(mapping.property, STATUS_PROPERTY);
        }
        assert_eq!(FIELD_MAP.len(), 21);
    }

    #[test]
    fn properties_follow_extraction_precedence() {
        let config = sync_config();
        let store = MemoryStore::default();
        let props = Reconciler::new(&store, &config).build_properties(&sample_record());

        assert_eq!(props["Name"], json!({ "title": [{ "text": { "content": "Spring launch" } }] }));
        assert_eq!(props["Designer"], json!({ "select": { "name": "Alex" } }));
        assert_eq!(props["Copywriter"], json!({ "select": { "name": "Sam" } }));
        assert_eq!(props["Due date"], json!({ "date": { "start": "2024-05-01" } }));
        assert!(!props.contains_key("Sizing (brand)"));
        assert!(!props.contains_key("Project lead"));
        assert!(!props.contains_key("Brand lead"));
        assert!(!props.contains_key(STATUS_PROPERTY));
        assert_eq!(
            props[TICKET_ID_PROPERTY],
            json!({ "rich_text": [{ "text": {
                "content": "CFM-42",
                "link": { "url": "https://acme.atlassian.net/browse/CFM-42" }
            } }] })
        );
    }

    #[test]
    fn injected_mappings_replace_default_table() {
        static ONLY_TITLE: &[FieldMapping] = &[FieldMapping::new("Title", "summary", ValueKind::Title)];
        let config = sync_config();
        let store = MemoryStore::default();
        let props = Reconciler::new(&store, &config)
            .with_mappings(ONLY_TITLE)
            .build_properties(&sample_record());
        let mut keys: Vec<&str> = props.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["Ticket ID", "Title"]);
    }

    #[tokio::test]
    async fn existing_tickets_are_skipped_every_time() {
        let config = sync_config();
        let store = MemoryStore::default();
        let reconciler = Reconciler::new(&store, &config);
        let existing = HashSet::from(["CFM-42".to_string()]);

        for _ in 0..2 {
            let result = reconciler.upsert(&sample_record(), &existing, false).await.unwrap();
            assert_eq!(result.key, "CFM-42");
            assert_eq!(result.outcome, ReconciliationOutcome::SkippedExisting);
        }
        assert!(store.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dry_run_reports_created_without_writing() {
        let config = sync_config();
        let store = MemoryStore::default();
        let result = Reconciler::new(&store, &config)
            .upsert(&sample_record(), &HashSet::new(), true)
            .await
            .unwrap();
        assert_eq!(result.outcome, ReconciliationOutcome::Created);
        assert!(store.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn new_ticket_is_created_under_database_with_initial_status() {
        let config = sync_config();
        let store = MemoryStore::default();
        let result = Reconciler::new(&store, &config)
            .upsert(&sample_record(), &HashSet::from(["CFM-1".to_string()]), false)
            .await
            .unwrap();
        assert_eq!(result.outcome, ReconciliationOutcome::Created);

        let created = store.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        let payload = &created[0];
        assert_eq!(payload["parent"], json!({ "database_id": "db-123" }));
        assert_eq!(
            payload["properties"][STATUS_PROPERTY],
            json!({ "status": { "name": "Not started" } })
        );
        assert_eq!(
            payload["properties"]["Designer"],
            json!({ "select": { "name": "Alex" } })
        );
    }

    #[tokio::test]
    async fn create_failure_is_fatal_and_carries_payload() {
        let config = sync_config();
        let store = MemoryStore {
            fail_create: true,
            ..Default::default()
        };
        let err = Reconciler::new(&store, &config)
            .upsert(&sample_record(), &HashSet::new(), false)
            .await
            .unwrap_err();
        match err {
            NotionError::Create { key, source, payload } => {
                assert_eq!(key, "CFM-42");
                assert_eq!(source.status(), Some(400));
                assert!(payload.contains("\"database_id\": \"db-123\""), "{payload}");
                assert!(payload.contains("Not started"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn existing_identifiers_follow_cursor_across_pages() {
        let store = MemoryStore::default();
        store.pages.lock().unwrap().extend([
            QueryPage {
                results: vec![ticket_page("CFM-1"), ticket_page("CFM-2"), PageObject::default()],
                has_more: true,
                next_cursor: Some("cursor-2".into()),
            },
            QueryPage {
                results: vec![ticket_page("CFM-3"), ticket_page("CFM-1")],
                has_more: false,
                next_cursor: None,
            },
        ]);

        let ids = existing_identifiers(&store, "db-123").await.unwrap();
        assert_eq!(
            ids,
            HashSet::from(["CFM-1".to_string(), "CFM-2".to_string(), "CFM-3".to_string()])
        );
        assert_eq!(
            *store.cursors.lock().unwrap(),
            vec![None, Some("cursor-2".to_string())]
        );
    }

    #[tokio::test]
    async fn has_more_without_cursor_ends_paging() {
        let store = MemoryStore::default();
        store.pages.lock().unwrap().extend([
            QueryPage {
                results: vec![ticket_page("CFM-1")],
                has_more: true,
                next_cursor: None,
            },
            QueryPage {
                results: vec![ticket_page("CFM-2")],
                has_more: false,
                next_cursor: None,
            },
        ]);

        let ids = existing_identifiers(&store, "db-123").await.unwrap();
        assert_eq!(ids, HashSet::from(["CFM-1".to_string()]));
        assert_eq!(*store.cursors.lock().unwrap(), vec![None]);
    }

    #[test]
    fn timestamp_renders_in_eastern_time() {
        let summer = Utc.with_ymd_and_hms(2024, 5, 1, 14, 5, 0).unwrap();
        assert_eq!(
            last_synced_text(summer),
            "✅ Last synced: Wednesday, May 01 at 10:05 AM ET"
        );
        let winter = Utc.with_ymd_and_hms(2024, 1, 15, 23, 30, 0).unwrap();
        assert_eq!(
            last_synced_text(winter),
            "✅ Last synced: Monday, January 15 at 06:30 PM ET"
        );
    }

    #[tokio::test]
    async fn timestamp_update_writes_paragraph() {
        let store = MemoryStore::default();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 14, 5, 0).unwrap();
        let outcome = update_last_synced(&store, Some("block-9"), now).await;
        assert!(matches!(outcome, TimestampOutcome::Updated { .. }));

        let blocks = store.blocks.lock().unwrap();
        assert_eq!(blocks[0].0, "block-9");
        assert_eq!(
            blocks[0].1["paragraph"]["rich_text"][0]["text"]["content"],
            json!("✅ Last synced: Wednesday, May 01 at 10:05 AM ET")
        );
    }

    #[tokio::test]
    async fn timestamp_update_is_optional_and_non_fatal() {
        let store = MemoryStore {
            fail_update: true,
            ..Default::default()
        };
        let now = Utc::now();
        assert_eq!(update_last_synced(&store, None, now).await, TimestampOutcome::Unconfigured);
        assert_eq!(update_last_synced(&store, Some("block-9"), now).await, TimestampOutcome::Failed);
    }

    #[derive(Default)]
    struct Recorded {
        query_bodies: Vec<JsonValue>,
        created: Vec<JsonValue>,
        patched: HashMap<String, JsonValue>,
    }

    type Shared = Arc<Mutex<Recorded>>;

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some("Bearer secret_abc")
            && headers.get("Notion-Version").and_then(|v| v.to_str().ok()) == Some(NOTION_VERSION)
    }

    async fn query_handler(
        State(state): State<Shared>,
        Path(database_id): Path<String>,
        headers: HeaderMap,
        Json(body): Json<JsonValue>,
    ) -> Response {
        if !authorized(&headers) || database_id != "db-123" {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
        let first_page = body.get("start_cursor").is_none();
        state.lock().unwrap().query_bodies.push(body);
        if first_page {
            Json(json!({
                "results": [{ "properties": { "Ticket ID": { "rich_text": [{ "text": { "content": "CFM-1" } }] } } }],
                "has_more": true,
                "next_cursor": "abc"
            }))
            .into_response()
        } else {
            Json(json!({
                "results": [{ "properties": { "Ticket ID": { "rich_text": [] } } }],
                "has_more": false,
                "next_cursor": null
            }))
            .into_response()
        }
    }

    async fn pages_handler(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<JsonValue>) -> Response {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
        state.lock().unwrap().created.push(body);
        Json(json!({ "object": "page" })).into_response()
    }

    async fn block_handler(
        State(state): State<Shared>,
        Path(block_id): Path<String>,
        Json(body): Json<JsonValue>,
    ) -> Response {
        state.lock().unwrap().patched.insert(block_id, body);
        Json(json!({ "object": "block" })).into_response()
    }

    #[tokio::test]
    async fn http_client_speaks_notion_api() {
        let state: Shared = Arc::default();
        let app = Router::new()
            .route("/v1/databases/{database_id}/query", post(query_handler))
            .route("/v1/pages", post(pages_handler))
            .route("/v1/blocks/{block_id}", patch(block_handler))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut config = sync_config();
        config.notion.base_url = format!("http://{addr}/v1");
        let client = NotionClient::new(
            HttpClient::new(HttpClientConfig::default()).unwrap(),
            &config.notion,
        );

        let ids = existing_identifiers(&client, "db-123").await.unwrap();
        assert_eq!(ids, HashSet::from(["CFM-1".to_string()]));

        let result = Reconciler::new(&client, &config)
            .upsert(&sample_record(), &ids, false)
            .await
            .unwrap();
        assert_eq!(result.outcome, ReconciliationOutcome::Created);

        let outcome = update_last_synced(&client, Some("block-9"), Utc::now()).await;
        assert!(matches!(outcome, TimestampOutcome::Updated { .. }));

        let recorded = state.lock().unwrap();
        assert_eq!(recorded.query_bodies[0], json!({ "page_size": 100 }));
        assert_eq!(
            recorded.query_bodies[1],
            json!({ "page_size": 100, "start_cursor": "abc" })
        );
        assert_eq!(recorded.created.len(), 1);
        assert_eq!(recorded.created[0]["parent"]["database_id"], json!("db-123"));
        assert!(recorded.patched.contains_key("block-9"));
    }
}
