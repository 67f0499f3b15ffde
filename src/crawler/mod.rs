//! Crawler module for catalogue fetching and processing
//!
//! This module contains the crawl engine, including:
//! - HTTP fetching with failure classification and bounded retries
//! - Frontier discovery over the paginated index
//! - Item page parsing into records
//! - The bounded worker pool and session coordination

mod coordinator;
mod fetcher;
mod frontier;
mod parser;
mod retry;
mod scheduler;
mod work_queue;

pub use coordinator::{run_crawl, Coordinator};
pub use fetcher::{
    build_http_client, fetch_url, fetch_with_retry, FetchError, FetchResult, FetchStatus,
    FetchedPage,
};
pub use frontier::{build_frontier, Frontier, FrontierError, ItemUrl};
pub use parser::{extract_item_links, extract_page_count, parse_record, ParseError};
pub use retry::{Attempted, RetryPolicy, Retryable};
pub use scheduler::{filter_known, CrawlScheduler, CrawlStats, ItemFailure, ItemOutcome};
pub use work_queue::WorkQueue;
