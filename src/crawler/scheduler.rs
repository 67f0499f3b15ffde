//! Bounded-concurrency crawl scheduler
//!
//! This module handles:
//! - Removing already-known URLs from the work set (resume)
//! - A fixed pool of workers pulling from a shared queue
//! - The per-item fetch, parse and reconcile chain
//! - Batch checkpoints and session counters
//! - Cooperative cancellation

use crate::config::CrawlerConfig;
use crate::crawler::fetcher::{fetch_with_retry, FetchError};
use crate::crawler::frontier::ItemUrl;
use crate::crawler::parser::{parse_record, ParseError};
use crate::crawler::retry::RetryPolicy;
use crate::crawler::work_queue::WorkQueue;
use crate::reconcile::{Reconciliation, ReconcilerHandle};
use crate::CrawlError;
use chrono::Utc;
use reqwest::Client;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Why an item did not produce a record
#[derive(Debug)]
pub enum ItemFailure {
    /// Permanent error, or transient errors until retries ran out
    Fetch {
        url: String,
        attempts: u32,
        error: FetchError,
    },
    /// The page was fetched but a required field was missing
    Parse { url: String, error: ParseError },
}

impl ItemFailure {
    pub fn url(&self) -> &str {
        match self {
            Self::Fetch { url, .. } | Self::Parse { url, .. } => url,
        }
    }
}

/// Terminal state of one item
#[derive(Debug)]
pub enum ItemOutcome {
    Reconciled {
        url: String,
        attempts: u32,
        reconciliation: Reconciliation,
    },
    Failed(ItemFailure),
}

/// Counters for the item phase of a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlStats {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub fetch_failures: u64,
    pub parse_failures: u64,
    pub new: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Field name -> number of UPDATED entries that touched it
    pub fields_changed: BTreeMap<String, u64>,
    /// The cancellation signal fired during the run
    pub cancelled: bool,
}

impl CrawlStats {
    pub fn record(&mut self, outcome: &ItemOutcome) {
        self.attempted += 1;

        match outcome {
            ItemOutcome::Reconciled { reconciliation, .. } => {
                self.succeeded += 1;
                match reconciliation {
                    Reconciliation::New(_) => self.new += 1,
                    Reconciliation::Updated(entry) => {
                        self.updated += 1;
                        for field in entry.changed_fields() {
                            *self.fields_changed.entry(field.to_string()).or_insert(0) += 1;
                        }
                    }
                    Reconciliation::Unchanged => self.unchanged += 1,
                }
            }
            ItemOutcome::Failed(failure) => {
                self.failed += 1;
                match failure {
                    ItemFailure::Fetch { .. } => self.fetch_failures += 1,
                    ItemFailure::Parse { .. } => self.parse_failures += 1,
                }
            }
        }
    }
}

/// Drops URLs the store already holds, when resuming
///
/// Returns the remaining items and how many were skipped.
pub fn filter_known(
    items: Vec<ItemUrl>,
    known: &HashSet<String>,
    skip_existing: bool,
) -> (Vec<ItemUrl>, u64) {
    if !skip_existing || known.is_empty() {
        return (items, 0);
    }

    let before = items.len();
    let remaining: Vec<ItemUrl> = items
        .into_iter()
        .filter(|item| !known.contains(item.as_str()))
        .collect();
    let skipped = (before - remaining.len()) as u64;

    tracing::info!(
        "Skipping {} already-known item(s), {} left to crawl",
        skipped,
        remaining.len()
    );

    (remaining, skipped)
}

/// Drives item URLs through fetch, parse and reconcile with a fixed worker pool
pub struct CrawlScheduler {
    client: Client,
    retry: RetryPolicy,
    max_concurrent: usize,
    batch_size: usize,
}

impl CrawlScheduler {
    pub fn new(client: Client, retry: RetryPolicy, max_concurrent: usize, batch_size: usize) -> Self {
        Self {
            client,
            retry,
            max_concurrent: max_concurrent.max(1),
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(client: Client, config: &CrawlerConfig) -> Self {
        Self::new(
            client,
            RetryPolicy::from_config(config),
            config.max_concurrent_requests,
            config.batch_size,
        )
    }

    /// Crawls every item, returning once each has reached a terminal state
    ///
    /// Item failures are counted, never returned. The only errors are store
    /// failures that outlived their retries (which stop all workers) and
    /// worker panics. On cancellation, workers finish their current item and
    /// take no new ones.
    pub async fn run(
        &self,
        items: Vec<ItemUrl>,
        reconciler: ReconcilerHandle,
        cancel: CancellationToken,
    ) -> Result<CrawlStats, CrawlError> {
        let total = items.len();
        let mut stats = CrawlStats::default();

        if total == 0 {
            stats.cancelled = cancel.is_cancelled();
            return Ok(stats);
        }

        let queue = Arc::new(WorkQueue::new(items));
        let stop = cancel.child_token();
        let (tx, mut rx) = mpsc::channel(self.max_concurrent * 2);
        let mut workers = JoinSet::new();

        let worker_count = self.max_concurrent.min(total);
        tracing::info!(
            "Crawling {} item(s) with {} worker(s), batch size {}",
            total,
            worker_count,
            self.batch_size
        );

        for worker_id in 0..worker_count {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let client = self.client.clone();
            let retry = self.retry;
            let reconciler = reconciler.clone();
            let stop = stop.clone();

            workers.spawn(async move {
                while !stop.is_cancelled() {
                    let Some((_, item)) = queue.claim() else {
                        break;
                    };
                    let outcome = process_item(&client, &retry, &reconciler, item).await;
                    let fatal = outcome.is_err();
                    if tx.send(outcome).await.is_err() || fatal {
                        break;
                    }
                }
                tracing::debug!("Worker {} finished", worker_id);
            });
        }
        drop(tx);
        drop(reconciler);

        let started = Instant::now();
        let mut fatal: Option<CrawlError> = None;

        while let Some(result) = rx.recv().await {
            match result {
                Ok(outcome) => {
                    if let ItemOutcome::Reconciled {
                        url,
                        attempts,
                        reconciliation,
                    } = &outcome
                    {
                        tracing::debug!(
                            "{} done after {} attempt(s): {}",
                            url,
                            attempts,
                            reconciliation
                                .kind()
                                .map_or("unchanged", |kind| kind.to_db_string())
                        );
                    }
                    stats.record(&outcome);
                    self.checkpoint(&stats, total, started);
                }
                Err(e) => {
                    if fatal.is_none() {
                        tracing::error!("Stopping crawl: {}", e);
                        stop.cancel();
                        fatal = Some(e);
                    }
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if fatal.is_none() {
                    stop.cancel();
                    fatal = Some(CrawlError::Worker(e.to_string()));
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        stats.cancelled = cancel.is_cancelled();
        if stats.cancelled {
            tracing::warn!(
                "Crawl cancelled after {}/{} item(s); {} never started",
                stats.attempted,
                total,
                queue.remaining()
            );
        }

        Ok(stats)
    }

    fn checkpoint(&self, stats: &CrawlStats, total: usize, started: Instant) {
        let done = stats.attempted as usize;
        if done % self.batch_size != 0 && done != total {
            return;
        }

        let batch = done.div_ceil(self.batch_size);
        let batches = total.div_ceil(self.batch_size);
        let elapsed = started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            done as f64 / elapsed
        } else {
            0.0
        };

        tracing::info!(
            "Batch {}/{}: {}/{} items ({} ok, {} failed, {} new, {} updated) {:.1} items/s",
            batch,
            batches,
            done,
            total,
            stats.succeeded,
            stats.failed,
            stats.new,
            stats.updated,
            rate
        );
    }
}

/// Runs the full chain for one item
///
/// Only a store failure is returned as an error.
async fn process_item(
    client: &Client,
    retry: &RetryPolicy,
    reconciler: &ReconcilerHandle,
    item: &ItemUrl,
) -> Result<ItemOutcome, CrawlError> {
    let url = item.as_str();
    let fetched = fetch_with_retry(client, retry, url).await;
    let attempts = fetched.attempts;

    let page = match fetched.outcome {
        Ok(page) => page,
        Err(error) => {
            tracing::warn!(
                "Item #{} {} failed after {} attempt(s): {}",
                item.index,
                url,
                attempts,
                error
            );
            return Ok(ItemOutcome::Failed(ItemFailure::Fetch {
                url: url.to_string(),
                attempts,
                error,
            }));
        }
    };

    match parse_record(&page.body, url, Utc::now()) {
        Ok(record) => {
            let reconciliation = reconciler.reconcile(record).await?;
            Ok(ItemOutcome::Reconciled {
                url: url.to_string(),
                attempts,
                reconciliation,
            })
        }
        Err(error) => {
            tracing::warn!("Item #{} {} could not be parsed: {}", item.index, url, error);
            reconciler
                .record_parse_failure(url.to_string(), error.to_string(), Some(page.body))
                .await?;
            Ok(ItemOutcome::Failed(ItemFailure::Parse {
                url: url.to_string(),
                error,
            }))
        }
    }
}
