//! Change detection against the record store
//!
//! The [`Reconciler`] owns the store for the whole session. Workers reach it
//! through a [`ReconcilerHandle`], which queues requests to a single blocking
//! task, so every lookup-compare-write for a given URL happens without any
//! other write in between.

use crate::crawler::RetryPolicy;
use crate::model::{ChangeKind, ChangelogEntry, Record};
use crate::storage::{RecordStore, StorageResult};
use crate::CrawlError;
use std::collections::HashSet;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Classification of one freshly parsed record
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    New(ChangelogEntry),
    Updated(ChangelogEntry),
    Unchanged,
}

impl Reconciliation {
    pub fn kind(&self) -> Option<ChangeKind> {
        match self {
            Self::New(_) => Some(ChangeKind::New),
            Self::Updated(_) => Some(ChangeKind::Updated),
            Self::Unchanged => None,
        }
    }

    pub fn entry(&self) -> Option<&ChangelogEntry> {
        match self {
            Self::New(entry) | Self::Updated(entry) => Some(entry),
            Self::Unchanged => None,
        }
    }
}

/// Compares records against the store and appends changelog entries
pub struct Reconciler<S> {
    store: S,
    retry: RetryPolicy,
    run_id: i64,
}

impl<S: RecordStore> Reconciler<S> {
    pub fn new(store: S, run_id: i64, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            run_id,
        }
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Gives the store back
    pub fn into_store(self) -> S {
        self.store
    }

    fn with_retry<T>(
        &mut self,
        label: &str,
        mut op: impl FnMut(&mut S) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let Self { store, retry, .. } = self;
        retry.run_blocking(label, || op(&mut *store)).result
    }

    /// Classifies a record and brings the store up to date
    ///
    /// | Stored state | Action | Entry |
    /// |--------------|--------|-------|
    /// | absent | insert | NEW |
    /// | soft-deleted | reactivate | NEW (with previous fingerprint) |
    /// | same fingerprint | refresh crawl time | none |
    /// | different fingerprint | replace | UPDATED with changed fields |
    pub fn reconcile(&mut self, record: Record) -> StorageResult<Reconciliation> {
        let url = record.source_url().to_string();
        let existing = self.with_retry("find_by_url", |s| s.find_by_url(&url))?;

        let stored = match existing {
            None => {
                let entry = ChangelogEntry::new_record(self.run_id, &record, None);
                self.commit(&record, Some(&entry))?;
                info!("NEW {}", url);
                return Ok(Reconciliation::New(entry));
            }
            Some(stored) if !stored.is_active() => {
                let entry = ChangelogEntry::new_record(
                    self.run_id,
                    &record,
                    Some(stored.record.fingerprint),
                );
                self.commit(&record, Some(&entry))?;
                info!("NEW {} (reappeared after deletion)", url);
                return Ok(Reconciliation::New(entry));
            }
            Some(stored) => stored,
        };

        if stored.record.fingerprint == record.fingerprint {
            let crawled_at = record.crawled_at;
            self.with_retry("touch", |s| s.touch(&url, crawled_at))?;
            debug!("Unchanged {}", url);
            return Ok(Reconciliation::Unchanged);
        }

        let changes = stored.record.fields.diff(&record.fields);
        if changes.is_empty() {
            self.commit(&record, None)?;
            debug!("Fingerprint of {} changed without a field difference", url);
            return Ok(Reconciliation::Unchanged);
        }

        let entry = ChangelogEntry::updated(self.run_id, &record, stored.record.fingerprint, changes);
        self.commit(&record, Some(&entry))?;
        info!("UPDATED {} [{}]", url, entry.changed_fields().join(", "));

        Ok(Reconciliation::Updated(entry))
    }

    /// Soft-deletes active records the frontier no longer lists
    ///
    /// Must only be called with a complete frontier; a URL that merely failed
    /// to fetch is still in the frontier and therefore never deleted.
    pub fn detect_deletions(
        &mut self,
        frontier_urls: &HashSet<String>,
    ) -> StorageResult<Vec<ChangelogEntry>> {
        let known = self.with_retry("list_known_urls", |s| s.list_known_urls())?;

        let mut missing: Vec<String> = known.difference(frontier_urls).cloned().collect();
        missing.sort();

        let mut entries = Vec::with_capacity(missing.len());
        for url in missing {
            let Some(stored) = self.with_retry("find_by_url", |s| s.find_by_url(&url))? else {
                continue;
            };

            let entry = ChangelogEntry::deleted(self.run_id, &stored.record);
            let at = entry.changed_at;
            self.with_retry("apply_deletion", |s| s.apply_deletion(&entry, at))?;
            info!("DELETED {}", url);
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Source URLs of all active records
    pub fn known_urls(&mut self) -> StorageResult<HashSet<String>> {
        self.with_retry("list_known_urls", |s| s.list_known_urls())
    }

    /// Keeps a page that could not be parsed for later diagnosis
    pub fn record_parse_failure(
        &mut self,
        url: &str,
        error: &str,
        raw_snapshot: Option<&str>,
    ) -> StorageResult<()> {
        let run_id = self.run_id;
        self.with_retry("record_parse_failure", |s| {
            s.record_parse_failure(run_id, url, error, raw_snapshot)
        })
    }

    /// Record and entry land together or not at all
    fn commit(&mut self, record: &Record, entry: Option<&ChangelogEntry>) -> StorageResult<()> {
        self.with_retry("apply_change", |s| s.apply_change(record, entry))
    }

    fn handle(&mut self, request: Request) {
        // A dropped reply receiver means the worker is gone; nothing to do.
        match request {
            Request::KnownUrls { reply } => {
                let _ = reply.send(self.known_urls());
            }
            Request::Reconcile { record, reply } => {
                let _ = reply.send(self.reconcile(*record));
            }
            Request::ParseFailure {
                url,
                error,
                raw_snapshot,
                reply,
            } => {
                let _ = reply.send(self.record_parse_failure(&url, &error, raw_snapshot.as_deref()));
            }
            Request::DetectDeletions { frontier, reply } => {
                let _ = reply.send(self.detect_deletions(&frontier));
            }
        }
    }
}

impl<S: RecordStore + Send + 'static> Reconciler<S> {
    /// Moves the reconciler onto a blocking task serving a request queue
    ///
    /// The task ends once every handle is dropped and returns the store.
    pub fn spawn(self, capacity: usize) -> (ReconcilerHandle, JoinHandle<S>) {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));

        let task = tokio::task::spawn_blocking(move || {
            let mut reconciler = self;
            while let Some(request) = rx.blocking_recv() {
                reconciler.handle(request);
            }
            reconciler.into_store()
        });

        (ReconcilerHandle { tx }, task)
    }
}

enum Request {
    KnownUrls {
        reply: oneshot::Sender<StorageResult<HashSet<String>>>,
    },
    Reconcile {
        record: Box<Record>,
        reply: oneshot::Sender<StorageResult<Reconciliation>>,
    },
    ParseFailure {
        url: String,
        error: String,
        raw_snapshot: Option<String>,
        reply: oneshot::Sender<StorageResult<()>>,
    },
    DetectDeletions {
        frontier: HashSet<String>,
        reply: oneshot::Sender<StorageResult<Vec<ChangelogEntry>>>,
    },
}

/// Cloneable async front of a spawned [`Reconciler`]
#[derive(Clone)]
pub struct ReconcilerHandle {
    tx: mpsc::Sender<Request>,
}

impl ReconcilerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<StorageResult<T>>) -> Request,
    ) -> Result<T, CrawlError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| CrawlError::ReconcilerClosed)?;
        let result = rx.await.map_err(|_| CrawlError::ReconcilerClosed)?;
        Ok(result?)
    }

    pub async fn known_urls(&self) -> Result<HashSet<String>, CrawlError> {
        self.request(|reply| Request::KnownUrls { reply }).await
    }

    pub async fn reconcile(&self, record: Record) -> Result<Reconciliation, CrawlError> {
        self.request(|reply| Request::Reconcile {
            record: Box::new(record),
            reply,
        })
        .await
    }

    pub async fn record_parse_failure(
        &self,
        url: String,
        error: String,
        raw_snapshot: Option<String>,
    ) -> Result<(), CrawlError> {
        self.request(|reply| Request::ParseFailure {
            url,
            error,
            raw_snapshot,
            reply,
        })
        .await
    }

    pub async fn detect_deletions(
        &self,
        frontier: HashSet<String>,
    ) -> Result<Vec<ChangelogEntry>, CrawlError> {
        self.request(|reply| Request::DetectDeletions { frontier, reply })
            .await
    }
}
