//! Frontier builder
//!
//! Walks the paginated catalogue index and collects every item URL before any
//! item is fetched.

use crate::config::TargetConfig;
use crate::crawler::fetcher::{fetch_with_retry, FetchError};
use crate::crawler::parser::{extract_item_links, extract_page_count};
use crate::crawler::retry::RetryPolicy;
use reqwest::Client;
use std::collections::HashSet;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// An item page address and its position in discovery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemUrl {
    pub url: Url,
    pub index: usize,
}

impl ItemUrl {
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

/// Result of a frontier walk
#[derive(Debug, Default)]
pub struct Frontier {
    /// Unique item URLs in discovery order
    pub items: Vec<ItemUrl>,
    pub pages_walked: u32,
    /// Index pages that failed to fetch or listed no items
    pub pages_skipped: u32,
    /// The walk stopped early on cancellation
    pub truncated: bool,
}

impl Frontier {
    /// Whether every index page was read; only a complete frontier may drive deletions
    pub fn is_complete(&self) -> bool {
        self.pages_skipped == 0 && !self.truncated
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item URLs as strings, for comparison against the store
    pub fn url_set(&self) -> HashSet<String> {
        self.items.iter().map(|i| i.url.to_string()).collect()
    }
}

/// Session-fatal frontier errors
#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("Invalid index URL: {0}")]
    InvalidUrl(String),

    #[error("Index root unreachable: {0}")]
    RootUnreachable(#[source] FetchError),
}

/// Walks the catalogue index sequentially
///
/// The root page gives the page count ("Page 1 of N") and the first items;
/// pages 2..=N come from `page_pattern`. A failed or empty later page is
/// skipped with a warning.
///
/// # Errors
///
/// Returns `FrontierError` if the root cannot be fetched after retries.
pub async fn build_frontier(
    client: &Client,
    policy: &RetryPolicy,
    target: &TargetConfig,
    cancel: &CancellationToken,
) -> Result<Frontier, FrontierError> {
    let base = Url::parse(&target.base_url)
        .map_err(|e| FrontierError::InvalidUrl(format!("{}: {}", target.base_url, e)))?;

    let root = fetch_with_retry(client, policy, base.as_str()).await;
    let root_page = root.outcome.map_err(FrontierError::RootUnreachable)?;

    let total_pages = extract_page_count(&root_page.body).unwrap_or(1).max(1);
    info!("Index reports {} page(s)", total_pages);

    let mut frontier = Frontier::default();
    let mut seen = HashSet::new();

    let root_links = extract_item_links(&root_page.body, &base);
    frontier.pages_walked += 1;
    add_links(&mut frontier, &mut seen, root_links);
    debug!("Index page 1/{}: {} items so far", total_pages, frontier.len());

    for page in 2..=total_pages {
        if cancel.is_cancelled() {
            warn!("Frontier walk cancelled at page {}/{}", page, total_pages);
            frontier.truncated = true;
            break;
        }

        let page_url = match base.join(&target.page_pattern.replace("{}", &page.to_string())) {
            Ok(url) => url,
            Err(e) => {
                warn!("Skipping index page {}: invalid URL: {}", page, e);
                frontier.pages_skipped += 1;
                continue;
            }
        };

        let result = fetch_with_retry(client, policy, page_url.as_str()).await;
        let body = match result.outcome {
            Ok(fetched) => fetched.body,
            Err(e) => {
                warn!("Skipping index page {}: {}", page, e);
                frontier.pages_skipped += 1;
                continue;
            }
        };

        let links = extract_item_links(&body, &page_url);
        if links.is_empty() {
            warn!("Skipping index page {}: no items found", page);
            frontier.pages_skipped += 1;
            continue;
        }

        frontier.pages_walked += 1;
        add_links(&mut frontier, &mut seen, links);

        if page % 10 == 0 || page == total_pages {
            info!(
                "Index page {}/{}: {} items so far",
                page,
                total_pages,
                frontier.len()
            );
        }
    }

    info!(
        "Frontier complete: {} items from {} page(s), {} skipped",
        frontier.len(),
        frontier.pages_walked,
        frontier.pages_skipped
    );

    Ok(frontier)
}

fn add_links(frontier: &mut Frontier, seen: &mut HashSet<String>, links: Vec<Url>) {
    for url in links {
        if seen.insert(url.to_string()) {
            let index = frontier.items.len();
            frontier.items.push(ItemUrl { url, index });
        }
    }
}
