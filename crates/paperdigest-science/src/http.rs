use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::error::{Result, ScienceError};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) paperdigest/0.1";

/// A fetched HTML page together with the URL it was finally served from.
#[derive(Debug, Clone)]
pub struct Page {
    pub final_url: String,
    pub body: String,
}

/// A fetched binary resource.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub final_url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

// ─── RateLimitedClient ────────────────────────────────────────────────────────

/// HTTP client shared by every strategy: enforces a minimum spacing between
/// requests, honours `Retry-After` on 429 and backs off exponentially on
/// transport errors.
pub struct RateLimitedClient {
    client: reqwest::Client,
    min_interval: Duration,
    last_request: Arc<Mutex<Option<Instant>>>,
    max_retries: u32,
    max_retry_wait: Duration,
}

impl RateLimitedClient {
    pub fn new(min_interval: Duration, max_retries: u32, user_agent: &str) -> Result<Self> {
        Self::with_timeout(min_interval, max_retries, user_agent, Duration::from_secs(30))
    }

    pub fn with_timeout(
        min_interval: Duration,
        max_retries: u32,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            min_interval,
            last_request: Arc::new(Mutex::new(None)),
            max_retries,
            max_retry_wait: Duration::from_secs(60),
        })
    }

    /// Upper bound on a single `Retry-After` sleep.
    pub fn max_retry_wait(mut self, wait: Duration) -> Self {
        self.max_retry_wait = wait;
        self
    }

    async fn wait_for_rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(t) = *last {
            let elapsed = t.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn send(&self, url: &str, headers: &HeaderMap) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            self.wait_for_rate_limit().await;
            let resp = self.client.get(url).headers(headers.clone()).send().await;
            match resp {
                Ok(r) if r.status() == 429 => {
                    let wait = r
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(60);
                    if attempt >= self.max_retries {
                        return Err(ScienceError::RateLimit(url.to_string(), wait));
                    }
                    tracing::debug!(url, wait, "rate limited, retrying");
                    sleep(Duration::from_secs(wait).min(self.max_retry_wait)).await;
                    attempt += 1;
                }
                Ok(r) if !r.status().is_success() => {
                    return Err(ScienceError::Status {
                        url: url.to_string(),
                        status: r.status().as_u16(),
                    });
                }
                Ok(r) => return Ok(r),
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(ScienceError::Http(e));
                    }
                    let backoff = 2u64.pow(attempt);
                    tracing::debug!(url, error = %e, backoff, "request failed, retrying");
                    sleep(Duration::from_secs(backoff)).await;
                    attempt += 1;
                }
            }
        }
    }

    pub async fn get(&self, url: &str) -> Result<String> {
        let resp = self.send(url, &HeaderMap::new()).await?;
        resp.text().await.map_err(ScienceError::Http)
    }

    pub async fn get_page(&self, url: &str) -> Result<Page> {
        let resp = self.send(url, &HeaderMap::new()).await?;
        let final_url = resp.url().to_string();
        let body = resp.text().await?;
        Ok(Page { final_url, body })
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Fetched> {
        let resp = self.send(url, &HeaderMap::new()).await?;
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_ascii_lowercase());
        let bytes = resp.bytes().await?.to_vec();
        Ok(Fetched {
            final_url,
            content_type,
            bytes,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let text = self.get(url).await?;
        serde_json::from_str(&text).map_err(|e| ScienceError::Parse(e.to_string()))
    }
}

/// Resolve `href` against the page it was found on.
pub fn absolutize(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("data:") {
        return None;
    }
    let base = reqwest::Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RateLimitedClient {
        RateLimitedClient::new(Duration::ZERO, 0, DEFAULT_USER_AGENT).unwrap()
    }

    #[tokio::test]
    async fn non_success_status_is_reported_with_code() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let err = client()
            .get(&format!("{}/missing", server.url()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(err.is_soft());
    }

    #[tokio::test]
    async fn rate_limit_without_retries_is_soft() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/busy")
            .with_status(429)
            .with_header("retry-after", "7")
            .create_async()
            .await;

        let err = client()
            .get(&format!("{}/busy", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, ScienceError::RateLimit(_, 7)));
        assert!(err.is_soft());
    }

    #[tokio::test]
    async fn rate_limit_is_retried_after_wait() {
        let mut server = mockito::Server::new_async().await;
        let busy = server
            .mock("GET", "/flaky")
            .with_status(429)
            .with_header("retry-after", "0")
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/flaky")
            .with_status(200)
            .with_body("ready")
            .create_async()
            .await;

        let client = RateLimitedClient::new(Duration::ZERO, 2, DEFAULT_USER_AGENT).unwrap();
        let body = client.get(&format!("{}/flaky", server.url())).await.unwrap();
        assert_eq!(body, "ready");
        busy.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn get_bytes_reports_content_type() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/fig.png")
            .with_status(200)
            .with_header("content-type", "Image/PNG")
            .with_body([0x89, b'P', b'N', b'G'])
            .create_async()
            .await;

        let fetched = client()
            .get_bytes(&format!("{}/fig.png", server.url()))
            .await
            .unwrap();
        assert_eq!(fetched.content_type.as_deref(), Some("image/png"));
        assert_eq!(fetched.bytes.len(), 4);
        assert!(fetched.final_url.ends_with("/fig.png"));
    }

    #[test]
    fn absolutize_handles_relative_and_protocol_relative() {
        let base = "https://example.org/articles/123";
        assert_eq!(
            absolutize(base, "/figures/1.jpg").as_deref(),
            Some("https://example.org/figures/1.jpg")
        );
        assert_eq!(
            absolutize(base, "//cdn.example.org/f.png").as_deref(),
            Some("https://cdn.example.org/f.png")
        );
        assert_eq!(absolutize(base, "data:image/png;base64,AAAA"), None);
    }
}
