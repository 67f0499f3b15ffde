//! Catalog-Watch: a crawl-and-reconcile engine for a paginated product catalogue
//!
//! This crate walks a catalogue's paginated index, fetches every item page under
//! bounded concurrency, converts each page into a structured record, and
//! reconciles the records against a SQLite store, appending a changelog of
//! new, updated and deleted items.

pub mod config;
pub mod crawler;
pub mod model;
pub mod output;
pub mod reconcile;
pub mod storage;

use thiserror::Error;

/// Session-level error type
///
/// Per-item failures never surface here; they are counted in the session
/// summary. Only conditions that make the whole session meaningless do.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Frontier discovery failed: {0}")]
    Frontier(#[from] crawler::FrontierError),

    #[error("Record store error: {0}")]
    Store(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Reconciler stopped before the session finished")]
    ReconcilerClosed,

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("All {} attempted items failed", .0.attempted)]
    AllItemsFailed(Box<model::SessionSummary>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Catalog-Watch operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{run_crawl, Coordinator};
pub use model::{ChangeKind, ChangelogEntry, Record, SessionStatus, SessionSummary};
