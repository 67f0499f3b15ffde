//! Crawler coordinator - session orchestration
//!
//! This module ties one crawl session together:
//! - Opening the store and recording the run
//! - Walking the frontier
//! - Resume filtering and the scheduled item phase
//! - The deletion pass
//! - Closing the store on every exit path and producing the summary

use crate::config::{config_hash, Config};
use crate::crawler::fetcher::build_http_client;
use crate::crawler::frontier::build_frontier;
use crate::crawler::retry::RetryPolicy;
use crate::crawler::scheduler::{filter_known, CrawlScheduler, CrawlStats};
use crate::model::{SessionStatus, SessionSummary};
use crate::reconcile::{Reconciler, ReconcilerHandle};
use crate::storage::{RecordStore, SqliteStorage};
use crate::CrawlError;
use chrono::Utc;
use reqwest::Client;
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Counters gathered while the store is owned by the reconciler
struct SessionOutcome {
    frontier_size: u64,
    skipped: u64,
    stats: CrawlStats,
    deleted: u64,
}

/// Main crawl coordinator
pub struct Coordinator {
    config: Config,
    config_hash: String,
}

impl Coordinator {
    /// Creates a coordinator for one session
    ///
    /// # Errors
    ///
    /// Returns `CrawlError::Config` if the configuration cannot be hashed.
    pub fn new(config: Config) -> Result<Self, CrawlError> {
        let config_hash = config_hash(&config)?;
        Ok(Self {
            config,
            config_hash,
        })
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    /// Runs the session to completion or cancellation
    ///
    /// The store is opened here and closed before returning, whatever the
    /// outcome. A run row is always left in a final state.
    ///
    /// # Errors
    ///
    /// Session-fatal conditions (store unavailable, index root unreachable)
    /// and systemic failure, which carries the summary in
    /// `CrawlError::AllItemsFailed`.
    pub async fn run(self, cancel: CancellationToken) -> Result<SessionSummary, CrawlError> {
        let started_at = Utc::now();
        let start = Instant::now();
        let crawler = &self.config.crawler;

        let mut store = SqliteStorage::new(Path::new(&self.config.output.database_path))?;
        let run_id = store.create_run(&self.config_hash)?;

        tracing::info!(
            "Starting crawl run {} of {} (concurrency {}, batch size {}, max attempts {}, skip existing {})",
            run_id,
            self.config.target.base_url,
            crawler.max_concurrent_requests,
            crawler.batch_size,
            crawler.max_retries,
            crawler.skip_existing
        );

        let client = match build_http_client(&self.config) {
            Ok(client) => client,
            Err(e) => {
                mark_failed(&mut store, run_id);
                return Err(e.into());
            }
        };

        let reconciler = Reconciler::new(store, run_id, RetryPolicy::for_store(crawler));
        let (handle, task) = reconciler.spawn(crawler.max_concurrent_requests * 2);

        let session = self.execute(client, handle, cancel).await;

        // Every handle is gone once execute returns, so the task ends and
        // hands the store back.
        let mut store = task
            .await
            .map_err(|e| CrawlError::Worker(format!("reconciler task: {}", e)))?;

        let outcome = match session {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Crawl run {} failed: {}", run_id, e);
                mark_failed(&mut store, run_id);
                return Err(e);
            }
        };

        let stats = &outcome.stats;
        let summary = SessionSummary {
            run_id,
            status: SessionStatus::classify(
                stats.attempted,
                stats.succeeded,
                stats.failed,
                stats.cancelled,
            ),
            started_at,
            frontier_size: outcome.frontier_size,
            attempted: stats.attempted,
            succeeded: stats.succeeded,
            failed: stats.failed,
            skipped: outcome.skipped,
            new_count: stats.new,
            updated_count: stats.updated,
            unchanged_count: stats.unchanged,
            deleted_count: outcome.deleted,
            fields_changed: stats.fields_changed.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        store.finish_run(&summary)?;
        drop(store);

        tracing::info!(
            "Crawl run {} {:?}: {} attempted, {} succeeded, {} failed, {} new, {} updated, {} deleted in {}ms",
            run_id,
            summary.status,
            summary.attempted,
            summary.succeeded,
            summary.failed,
            summary.new_count,
            summary.updated_count,
            summary.deleted_count,
            summary.duration_ms
        );

        if summary.status == SessionStatus::Failed {
            return Err(CrawlError::AllItemsFailed(Box::new(summary)));
        }

        Ok(summary)
    }

    async fn execute(
        &self,
        client: Client,
        reconciler: ReconcilerHandle,
        cancel: CancellationToken,
    ) -> Result<SessionOutcome, CrawlError> {
        let crawler = &self.config.crawler;
        let fetch_policy = RetryPolicy::from_config(crawler);

        let frontier = build_frontier(&client, &fetch_policy, &self.config.target, &cancel).await?;
        let frontier_size = frontier.len() as u64;
        let frontier_urls = frontier.url_set();
        let frontier_complete = frontier.is_complete();
        let pages_skipped = frontier.pages_skipped;

        let known = reconciler.known_urls().await?;
        let (work, skipped) = filter_known(frontier.items, &known, crawler.skip_existing);

        let scheduler = CrawlScheduler::new(
            client,
            fetch_policy,
            crawler.max_concurrent_requests,
            crawler.batch_size,
        );
        let stats = scheduler
            .run(work, reconciler.clone(), cancel.clone())
            .await?;

        let deleted = if stats.cancelled {
            tracing::warn!("Skipping deletion pass: session was cancelled");
            0
        } else if frontier_urls.is_empty() {
            tracing::warn!("Skipping deletion pass: frontier is empty");
            0
        } else if !frontier_complete {
            tracing::warn!(
                "Skipping deletion pass: {} index page(s) could not be read",
                pages_skipped
            );
            0
        } else {
            reconciler.detect_deletions(frontier_urls).await?.len() as u64
        };

        Ok(SessionOutcome {
            frontier_size,
            skipped,
            stats,
            deleted,
        })
    }
}

fn mark_failed(store: &mut SqliteStorage, run_id: i64) {
    if let Err(e) = store.fail_run(run_id) {
        tracing::warn!("Could not mark run {} as failed: {}", run_id, e);
    }
}

/// Runs one crawl session with the given configuration
///
/// This is the entry point for whatever decides when a crawl happens.
///
/// # Arguments
///
/// * `config` - The crawl configuration
/// * `cancel` - Stops dispatching new items once cancelled
///
/// # Returns
///
/// * `Ok(SessionSummary)` - The session finished, possibly with item failures or cancelled
/// * `Err(CrawlError)` - Session-fatal error, or every attempted item failed
pub async fn run_crawl(
    config: Config,
    cancel: CancellationToken,
) -> Result<SessionSummary, CrawlError> {
    Coordinator::new(config)?.run(cancel).await
}
