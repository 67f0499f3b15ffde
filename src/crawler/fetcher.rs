//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with the configured user agent and timeouts
//! - GET requests for listing and item pages
//! - Classifying failures as transient or permanent
//! - Bounded retries for transient failures

use crate::config::Config;
use crate::crawler::retry::{Retryable, RetryPolicy};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: String,
    /// HTTP status code
    pub status_code: u16,
    /// Page body content
    pub body: String,
}

/// Errors that can occur while fetching a single URL
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Failed to read body of {url}: {message}")]
    Body { url: String, message: String },

    #[error("Invalid request for {url}: {message}")]
    Request { url: String, message: String },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            Self::Status { url, .. }
            | Self::Timeout { url }
            | Self::Network { url, .. }
            | Self::Body { url, .. }
            | Self::Request { url, .. } => url,
        }
    }

    fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        let url = url.to_string();
        if e.is_timeout() {
            Self::Timeout { url }
        } else if e.is_builder() || e.is_redirect() {
            Self::Request {
                url,
                message: e.to_string(),
            }
        } else {
            Self::Network {
                url,
                message: e.to_string(),
            }
        }
    }
}

impl Retryable for FetchError {
    /// | Condition | Retry |
    /// |-----------|-------|
    /// | HTTP 5xx, 429 | yes |
    /// | Other non-2xx | no |
    /// | Timeout, connection, body read | yes |
    /// | Malformed request, redirect loop | no |
    fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => {
                *status >= 500 || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            Self::Timeout { .. } | Self::Network { .. } | Self::Body { .. } => true,
            Self::Request { .. } => false,
        }
    }
}

/// Classification of a fetch outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Success,
    /// Retries were exhausted on a retryable failure
    TransientFailure,
    PermanentFailure,
}

/// Result of a fetch with retries
#[derive(Debug)]
pub struct FetchResult {
    pub url: String,
    /// Total attempts made, including the first
    pub attempts: u32,
    pub outcome: Result<FetchedPage, FetchError>,
}

impl FetchResult {
    pub fn status(&self) -> FetchStatus {
        match &self.outcome {
            Ok(_) => FetchStatus::Success,
            Err(e) if e.is_retryable() => FetchStatus::TransientFailure,
            Err(_) => FetchStatus::PermanentFailure,
        }
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The crawl configuration (user agent and request timeout)
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &Config) -> Result<Client, reqwest::Error> {
    let timeout = Duration::from_millis(config.crawler.request_timeout_ms);

    Client::builder()
        .user_agent(config.user_agent.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a URL once
///
/// Non-2xx responses are errors; redirects are followed by the client.
pub async fn fetch_url(client: &Client, url: &str) -> Result<FetchedPage, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(url, e))?;

    let status = response.status();
    let final_url = response.url().to_string();

    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.text().await.map_err(|e| {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Body {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    })?;

    Ok(FetchedPage {
        final_url,
        status_code: status.as_u16(),
        body,
    })
}

/// Fetches a URL, retrying transient failures per the given policy
pub async fn fetch_with_retry(client: &Client, policy: &RetryPolicy, url: &str) -> FetchResult {
    let attempted = policy.run(url, |_| fetch_url(client, url)).await;

    FetchResult {
        url: url.to_string(),
        attempts: attempted.attempts,
        outcome: attempted.result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> Config {
        parse_config(
            r#"
[crawler]
request-timeout-ms = 500

[target]
base-url = "https://books.toscrape.com/"

[user-agent]
crawler-name = "TestCrawler"
crawler-version = "1.0"

[output]
database-path = "./test.db"
"#,
        )
        .unwrap()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn test_build_http_client() {
        let client = build_http_client(&test_config());
        assert!(client.is_ok());
    }

    #[test]
    fn test_status_classification() {
        let status = |status| FetchError::Status {
            url: "u".to_string(),
            status,
        };
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(FetchError::Timeout { url: "u".into() }.is_retryable());
        assert!(!FetchError::Request {
            url: "u".into(),
            message: "bad".into()
        }
        .is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/item"))
            .and(header("user-agent", "TestCrawler/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let client = build_http_client(&test_config()).unwrap();
        let page = fetch_url(&client, &format!("{}/item", server.uri()))
            .await
            .unwrap();

        assert_eq!(page.status_code, 200);
        assert_eq!(page.body, "<html>ok</html>");
    }

    #[tokio::test]
    async fn test_server_error_is_retried_to_the_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = build_http_client(&test_config()).unwrap();
        let result = fetch_with_retry(&client, &fast_policy(), &format!("{}/x", server.uri())).await;

        assert_eq!(result.attempts, 3);
        assert_eq!(result.status(), FetchStatus::TransientFailure);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = build_http_client(&test_config()).unwrap();
        let result = fetch_with_retry(&client, &fast_policy(), &format!("{}/x", server.uri())).await;

        assert_eq!(result.attempts, 1);
        assert_eq!(result.status(), FetchStatus::PermanentFailure);
        assert!(matches!(
            result.outcome,
            Err(FetchError::Status { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = build_http_client(&test_config()).unwrap();
        let policy = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1));
        let result = fetch_with_retry(&client, &policy, &format!("{}/slow", server.uri())).await;

        assert!(matches!(result.outcome, Err(FetchError::Timeout { .. })));
        assert_eq!(result.status(), FetchStatus::TransientFailure);
    }
}
