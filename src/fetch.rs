use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("listings page returned {status}")]
    Status { status: StatusCode },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Source of raw page markup.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Plain HTTP GET. Pages that need script execution are out of reach.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .build()?;
        Ok(Self { http, timeout })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let res = self.http.get(url).send().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Transport(err)
            }
        })?;
        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::Status { status });
        }
        let body = res.text().await?;
        debug!(url, bytes = body.len(), "fetched listings page");
        Ok(body)
    }
}
