use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::Config;
use crate::url_utils;

/// Anything that can fetch a URL for a worker. The production implementation
/// is [`HttpClient`]; tests substitute canned responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError>;
}

/// Status codes a worker accepts content from: 2xx except 204 No Content.
pub fn is_acceptable_status(status: u16) -> bool {
    matches!(status, 200..=203 | 205..=299)
}

/// HTTP client for making web requests
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout_duration: Duration,
    user_agent: String,
    max_content_size: usize,
}

impl HttpClient {
    /// Create a client with the [`Config::MAX_CONTENT_SIZE`] body limit.
    pub fn new(user_agent: &str, timeout_secs: u64) -> Result<Self, FetchError> {
        Self::with_content_limit(user_agent, timeout_secs, Config::MAX_CONTENT_SIZE)
    }

    pub fn with_content_limit(
        user_agent: &str,
        timeout_secs: u64,
        max_content_size: usize,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            // one host per shard at a time, a small idle pool is plenty
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .http1_only()
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            timeout_duration: Duration::from_secs(timeout_secs),
            user_agent: user_agent.to_string(),
            max_content_size,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Classify reqwest errors into our FetchError types
    fn classify_error(error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            return FetchError::Timeout;
        }
        if error.is_builder() {
            return FetchError::InvalidUrl(error.to_string());
        }

        let error_msg = error.to_string().to_lowercase();
        if error_msg.contains("connection refused") {
            return FetchError::ConnectionRefused;
        }
        if error_msg.contains("dns") || error_msg.contains("name resolution") {
            return FetchError::DnsError;
        }
        if error_msg.contains("ssl") || error_msg.contains("tls") || error_msg.contains("certificate") {
            return FetchError::SslError;
        }

        FetchError::NetworkError(error.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpClient {
    /// Single attempt, bounded by the client timeout. Failures are terminal
    /// for the URL; the crawl never retries a fetch.
    async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        let response = timeout(
            self.timeout_duration,
            self.client
                .get(url)
                .header(
                    "Accept",
                    "text/html,application/xhtml+xml,application/xml;q=0.9,text/plain;q=0.8,*/*;q=0.5",
                )
                .header("Accept-Language", "en-US,en;q=0.5")
                .send(),
        )
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(Self::classify_error)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        if let Some(length) = response.content_length() {
            if length as usize > self.max_content_size {
                return Err(FetchError::ContentTooLarge(length as usize, self.max_content_size));
            }
        }

        if !is_acceptable_status(status) {
            return Ok(FetchResult {
                status,
                final_url,
                body: None,
            });
        }

        let body = timeout(self.timeout_duration, response.text())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::BodyError(e.to_string()))?;

        if body.len() > self.max_content_size {
            return Err(FetchError::ContentTooLarge(body.len(), self.max_content_size));
        }

        Ok(FetchResult {
            status,
            final_url,
            body: Some(body),
        })
    }
}

/// What came back for a requested URL.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
    /// Absent for unacceptable statuses and empty responses.
    pub body: Option<String>,
}

impl FetchResult {
    pub fn ok(url: &str, body: impl Into<String>) -> Self {
        Self {
            status: 200,
            final_url: url.to_string(),
            body: Some(body.into()),
        }
    }

    pub fn status_only(url: &str, status: u16) -> Self {
        Self {
            status,
            final_url: url.to_string(),
            body: None,
        }
    }
}

/// Test double serving canned responses keyed by normalized URL; anything
/// unknown is a 404. Public so integration tests can drive whole crawls
/// without a network.
#[derive(Default)]
pub struct StaticFetcher {
    responses: HashMap<String, Result<FetchResult, String>>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(url: &str) -> String {
        url_utils::normalize_url(url).unwrap_or_else(|| url.to_string())
    }

    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.with_response(url, FetchResult::ok(url, body))
    }

    pub fn with_response(mut self, url: &str, result: FetchResult) -> Self {
        self.responses.insert(Self::key(url), Ok(result));
        self
    }

    /// Make `url` fail at the network level.
    pub fn with_failure(mut self, url: &str, reason: &str) -> Self {
        self.responses.insert(Self::key(url), Err(reason.to_string()));
        self
    }

    /// Every URL fetched so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        self.requests.lock().push(url.to_string());
        match self.responses.get(&Self::key(url)) {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(reason)) => Err(FetchError::NetworkError(reason.clone())),
            None => Ok(FetchResult::status_only(url, 404)),
        }
    }
}

/// Errors that can occur during HTTP fetching
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection refused - server not accepting connections")]
    ConnectionRefused,

    #[error("DNS resolution failed")]
    DnsError,

    #[error("SSL/TLS error - certificate or encryption issue")]
    SslError,

    #[error("Request timeout")]
    Timeout,

    #[error("Failed to read response body: {0}")]
    BodyError(String),

    #[error("Content too large: {0} bytes (max: {1} bytes)")]
    ContentTooLarge(usize, usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceptable_status() {
        assert!(is_acceptable_status(200));
        assert!(is_acceptable_status(203));
        assert!(is_acceptable_status(206));
        assert!(!is_acceptable_status(204));
        assert!(!is_acceptable_status(301));
        assert!(!is_acceptable_status(404));
        assert!(!is_acceptable_status(503));
        assert!(!is_acceptable_status(601));
    }

    #[tokio::test]
    async fn test_fetch_invalid_url() {
        let client = HttpClient::new("AcademicCrawler/0.1", 5).unwrap();
        let result = client.fetch("not-a-url").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_default_content_limit() {
        let client = HttpClient::new("AcademicCrawler/0.1", 5).unwrap();
        assert_eq!(client.max_content_size, Config::MAX_CONTENT_SIZE);

        let small = HttpClient::with_content_limit("AcademicCrawler/0.1", 5, 1024).unwrap();
        assert_eq!(small.max_content_size, 1024);
    }

    #[tokio::test]
    async fn test_static_fetcher() {
        let fetcher = StaticFetcher::new()
            .with_page("https://cs.uci.edu/", "<html></html>")
            .with_failure("https://cs.uci.edu/down", "connection reset");

        let page = fetcher.fetch("https://cs.uci.edu").await.unwrap();
        assert_eq!(page.status, 200);
        assert_eq!(page.body.as_deref(), Some("<html></html>"));

        let missing = fetcher.fetch("https://cs.uci.edu/missing").await.unwrap();
        assert_eq!(missing.status, 404);
        assert!(missing.body.is_none());

        assert!(fetcher.fetch("https://cs.uci.edu/down").await.is_err());
        assert_eq!(fetcher.requests().len(), 3);
    }

    #[test]
    fn test_http_client_creation() {
        let client = HttpClient::new("AcademicCrawler/0.1", 30).unwrap();
        assert_eq!(client.user_agent(), "AcademicCrawler/0.1");
    }
}
