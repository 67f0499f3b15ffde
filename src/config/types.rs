use serde::{Deserialize, Serialize};

/// Main configuration structure for Catalog-Watch
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    pub target: TargetConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
}

/// Crawl session tuning
///
/// Every field has a default, so the whole `[crawler]` table may be omitted.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CrawlerConfig {
    /// Number of item pipelines running at once
    pub max_concurrent_requests: usize,

    /// Items per progress checkpoint
    pub batch_size: usize,

    /// Total fetch attempts per URL, the first attempt included
    pub max_retries: u32,

    /// Skip URLs already present (and active) in the store
    pub skip_existing: bool,

    /// Per-request timeout (milliseconds)
    pub request_timeout_ms: u64,

    /// First backoff delay; doubled on every further attempt (milliseconds)
    pub retry_base_delay_ms: u64,

    /// Upper bound for a single backoff delay (milliseconds)
    pub retry_max_delay_ms: u64,

    /// Total attempts per record store operation
    pub store_retries: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            batch_size: 50,
            max_retries: 3,
            skip_existing: true,
            request_timeout_ms: 10_000,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 10_000,
            store_retries: 2,
        }
    }
}

/// The catalogue being crawled
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetConfig {
    /// Index root; also page 1 of the paginated index
    pub base_url: String,

    /// Path of index page N relative to `base_url`, with `{}` standing for N
    #[serde(default = "default_page_pattern")]
    pub page_pattern: String,
}

fn default_page_pattern() -> String {
    "catalogue/page-{}.html".to_string()
}

/// User agent identification
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserAgentConfig {
    pub crawler_name: String,
    pub crawler_version: String,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "CatalogWatch".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl UserAgentConfig {
    /// Header value in `Name/Version` form
    pub fn header_value(&self) -> String {
        format!("{}/{}", self.crawler_name, self.crawler_version)
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite record store
    pub database_path: String,
}
