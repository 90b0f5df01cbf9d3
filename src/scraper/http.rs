use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;

use super::{PageRequest, PageStrategy};
use crate::config::ScraperConfig;
use crate::element_finder::extract_signals;
use crate::models::PageSignals;
use crate::utils::error::{AppError, FetchError};

/// Single bounded GET of the raw document.
pub struct HttpStrategy {
    client: Client,
}

impl HttpStrategy {
    pub fn new(config: &ScraperConfig) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(header::ACCEPT_LANGUAGE, header::HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .timeout(config.http_timeout())
            .connect_timeout(config.http_timeout())
            .build()?;

        Ok(Self { client })
    }

    async fn download(&self, request: &PageRequest<'_>) -> Result<(String, String), FetchError> {
        let url = request.url.as_str();
        let response = self
            .client
            .get(request.url.clone())
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| transport_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(url, status, response.headers()));
        }

        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| transport_error(url, &e))?;
        Ok((body, final_url))
    }
}

#[async_trait]
impl PageStrategy for HttpStrategy {
    fn name(&self) -> &str {
        "lightweight"
    }

    async fn acquire(&self, request: PageRequest<'_>) -> Result<PageSignals, FetchError> {
        let (body, final_url) = request.shutdown.guard(self.download(&request)).await?;
        tracing::debug!(
            url = %request.url,
            vendor = request.vendor,
            bytes = body.len(),
            "Downloaded page"
        );
        Ok(extract_signals(&body, request.selectors, &final_url))
    }
}

fn transport_error(url: &str, err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout { url: url.to_string() }
    } else {
        FetchError::Network(err.to_string())
    }
}

fn status_error(url: &str, status: StatusCode, headers: &header::HeaderMap) -> FetchError {
    let url = url.to_string();
    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
            url,
            retry_after: retry_after(headers),
        },
        StatusCode::FORBIDDEN => FetchError::Blocked {
            url,
            status: status.as_u16(),
        },
        _ => FetchError::HttpStatus {
            url,
            status: status.as_u16(),
        },
    }
}

/// Only the delta-seconds form; HTTP dates fall back to our own backoff.
fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
