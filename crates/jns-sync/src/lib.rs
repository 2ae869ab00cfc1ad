//! Sync run orchestration: Jira query → Notion index → per-ticket reconciliation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use jns_core::{ReconciliationOutcome, ReconciliationResult, SyncConfig};
use jns_http::{HttpClient, HttpClientConfig};
use jns_jira::{fetch_filtered_records, IssueSource, JiraClient};
use jns_notion::{
    existing_identifiers, update_last_synced, DestinationStore, NotionClient, Reconciler,
    TimestampOutcome,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jns-sync";

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub fetched: usize,
    pub existing: usize,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub timestamp_updated: bool,
    pub results: Vec<ReconciliationResult>,
}

impl SyncRunSummary {
    fn count(results: &[ReconciliationResult], outcome: ReconciliationOutcome) -> usize {
        results.iter().filter(|r| r.outcome == outcome).count()
    }
}

/// One full sync against arbitrary source and destination implementations.
///
/// The first failed create aborts the run unless `continue_on_error` is set,
/// in which case remaining tickets are still processed and the run fails at
/// the end with the list of failed keys. The timestamp marker is only touched
/// by clean, non-dry runs.
pub async fn run_sync(
    source: &dyn IssueSource,
    store: &dyn DestinationStore,
    config: &SyncConfig,
) -> Result<SyncRunSummary> {
    let started_at = Utc::now();
    let run_id = Uuid::new_v4();
    info!(%run_id, dry_run = config.dry_run, "sync run started");

    let records = fetch_filtered_records(source, &config.jira)
        .await
        .context("fetching jira issues")?;
    let existing = existing_identifiers(store, &config.notion.database_id)
        .await
        .context("indexing existing notion tickets")?;

    let reconciler = Reconciler::new(store, config);
    let mut results = Vec::with_capacity(records.len());
    let mut failed_keys = Vec::new();
    for record in &records {
        match reconciler.upsert(record, &existing, config.dry_run).await {
            Ok(result) => results.push(result),
            Err(err) if config.continue_on_error => {
                error!(key = %record.key, error = %err, "ticket failed; continuing");
                failed_keys.push(record.key.clone());
                results.push(ReconciliationResult {
                    key: record.key.clone(),
                    outcome: ReconciliationOutcome::Failed,
                });
            }
            Err(err) => {
                return Err(err).with_context(|| format!("syncing ticket {}", record.key));
            }
        }
    }

    if !failed_keys.is_empty() {
        bail!(
            "{} ticket(s) failed to sync: {}",
            failed_keys.len(),
            failed_keys.join(", ")
        );
    }

    let timestamp_updated = if config.dry_run {
        info!("dry run: leaving timestamp block untouched");
        false
    } else {
        let outcome =
            update_last_synced(store, config.notion.text_block_id.as_deref(), Utc::now()).await;
        matches!(outcome, TimestampOutcome::Updated { .. })
    };

    let summary = SyncRunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        dry_run: config.dry_run,
        fetched: records.len(),
        existing: existing.len(),
        created: SyncRunSummary::count(&results, ReconciliationOutcome::Created),
        skipped: SyncRunSummary::count(&results, ReconciliationOutcome::SkippedExisting),
        failed: SyncRunSummary::count(&results, ReconciliationOutcome::Failed),
        timestamp_updated,
        results,
    };
    info!(
        %run_id,
        fetched = summary.fetched,
        created = summary.created,
        skipped = summary.skipped,
        "sync run finished"
    );
    Ok(summary)
}

pub struct SyncPipeline {
    config: SyncConfig,
    jira: JiraClient,
    notion: NotionClient,
    run_lock: Mutex<()>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let http = HttpClient::new(HttpClientConfig {
            timeout: config.http_timeout_secs.map(Duration::from_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;
        let jira = JiraClient::new(http.clone(), &config.jira);
        let notion = NotionClient::new(http, &config.notion);
        Ok(Self {
            config,
            jira,
            notion,
            run_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Runs never overlap, even when a scheduled tick fires mid-run.
    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let _guard = self.run_lock.lock().await;
        run_sync(&self.jira, &self.notion, &self.config).await
    }

    pub async fn build_scheduler(self: Arc<Self>) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = &self.config.sync_cron;
        let pipeline = Arc::clone(&self);
        let job = Job::new_async(cron, move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        created = summary.created,
                        "scheduled sync complete"
                    ),
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled sync failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(sched)
    }
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env().context("loading configuration")?;
    SyncPipeline::new(config)?.run_once().await
}
