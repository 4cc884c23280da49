mod cache;
mod company;
mod parser;

pub use cache::{Freshness, TtlCache};
pub use company::{parse_financials, parse_shareholders};
pub use parser::{parse_synthesis, parse_synthesis_with, Rows, SynthesisPage};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use std::time::Duration;
use synthesis_core::{FetchError, PageSource};

pub const BASE_URL: &str = "https://www.ilboursa.com";
pub const SYNTHESIS_PATH: &str = "/analyses/synthese_fiches";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Plain HTTP fetcher for ilboursa pages. One request per call, no retries.
#[derive(Clone)]
pub struct IlboursaClient {
    client: Client,
    base_url: String,
    synthesis_url: String,
}

impl IlboursaClient {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Self::with_urls(BASE_URL, &format!("{BASE_URL}{SYNTHESIS_PATH}"), timeout)
    }

    /// Point the client at another host, e.g. a mirror or a local fixture server.
    pub fn with_urls(base_url: &str, synthesis_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            synthesis_url: synthesis_url.to_string(),
        })
    }

    pub fn synthesis_url(&self) -> &str {
        &self.synthesis_url
    }

    /// Company page holding the shareholder and financials tables
    pub fn company_url(&self, code: &str) -> String {
        format!("{}/marches/societe/{}", self.base_url, code)
    }

    /// GET `url` and return the body. Non-2xx statuses are errors.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| map_reqwest_error(url, e))
    }

    pub async fn fetch_company_page(&self, code: &str) -> Result<String, FetchError> {
        self.fetch(&self.company_url(code)).await
    }
}

#[async_trait]
impl PageSource for IlboursaClient {
    async fn fetch_synthesis(&self) -> Result<String, FetchError> {
        self.fetch(&self.synthesis_url).await
    }
}

fn map_reqwest_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout { url: url.to_string() }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_url() {
        let client = IlboursaClient::with_urls("https://example.test/", "https://example.test/s", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(client.company_url("AETEC"), "https://example.test/marches/societe/AETEC");
        assert_eq!(client.synthesis_url(), "https://example.test/s");
    }

    #[test]
    fn test_default_urls() {
        let client = IlboursaClient::new(DEFAULT_TIMEOUT).unwrap();
        assert_eq!(
            client.synthesis_url(),
            "https://www.ilboursa.com/analyses/synthese_fiches"
        );
    }

    #[tokio::test]
    #[ignore] // Hits the live site
    async fn test_fetch_live_synthesis() {
        let client = IlboursaClient::new(DEFAULT_TIMEOUT).unwrap();
        let html = client.fetch_synthesis().await.unwrap();
        let batch = parse_synthesis(&html, chrono::Utc::now()).unwrap();
        println!("{} rows, {} skipped", batch.len(), batch.skipped);
        assert!(!batch.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let client = IlboursaClient::with_urls(
            "http://127.0.0.1:9",
            "http://127.0.0.1:9/analyses/synthese_fiches",
            Duration::from_secs(2),
        )
        .unwrap();
        let err = client.fetch_synthesis().await.unwrap_err();
        assert!(matches!(err, FetchError::Network { .. } | FetchError::Timeout { .. }));
    }
}
