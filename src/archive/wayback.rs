//! HTTP client for Wayback Machine playback.

use super::{FetchError, Memento, MementoFetcher};
use crate::config::{ArchiveConfig, RetryConfig};
use crate::db::CdxRecordSpecimen;
use crate::error::Result;
use crate::rate_limiter::RequestLimiter;
use crate::retry::with_retry;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use url::Url;

/// Header the archive sets on every response that replays a capture
const MEMENTO_DATETIME: &str = "memento-datetime";

/// Archive client owned by one worker
///
/// Wraps a pooled `reqwest::Client`, a request rate limiter and the
/// connection-level retry policy. Build one per worker and reuse it for every
/// task that worker runs.
#[derive(Clone, Debug)]
pub struct WaybackClient {
    http: reqwest::Client,
    limiter: RequestLimiter,
    retry: RetryConfig,
}

impl WaybackClient {
    /// Create a client from the archive configuration
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: &ArchiveConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            limiter: RequestLimiter::new(config.requests_per_second),
            retry: config.retry.clone(),
        })
    }

    async fn request(&self, url: &Url) -> std::result::Result<Memento, FetchError> {
        self.limiter.acquire().await;

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(FetchError::from_transport)?;

        let status = response.status();
        if is_overloaded(status) {
            return Err(FetchError::Unavailable(status.as_u16()));
        }

        if !response.headers().contains_key(MEMENTO_DATETIME) {
            return Err(FetchError::Playback(format!(
                "{} could not be played back (HTTP {})",
                url,
                status.as_u16()
            )));
        }

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let content = response
            .bytes()
            .await
            .map_err(FetchError::from_transport)?
            .to_vec();

        Ok(Memento {
            status_code: status.as_u16(),
            ok: !(status.is_client_error() || status.is_server_error()),
            content,
            mime_type,
        })
    }
}

fn is_overloaded(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

#[async_trait::async_trait]
impl MementoFetcher for WaybackClient {
    async fn fetch_memento(
        &self,
        record: &CdxRecordSpecimen,
    ) -> std::result::Result<Memento, FetchError> {
        let url = Url::parse(&record.raw_url).map_err(|e| {
            FetchError::Other(format!("invalid raw URL '{}': {}", record.raw_url, e))
        })?;

        with_retry(&self.retry, || self.request(&url)).await
    }
}
