use anyhow::Result;
use reqwest::{header::{HeaderMap, HeaderValue, CONTENT_LENGTH}, Client};
use std::time::{Duration, Instant};
use tracing::debug;

use super::user_agent::UserAgentRotator;
use crate::config::ScrapingConfig;
use crate::logging::LogContext;

/// Single-shot HTML fetcher for retail and video search pages
///
/// There are no retries: every lookup is best effort and a miss just means
/// the next strategy gets a turn.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    user_agents: UserAgentRotator,
}

impl HttpClient {
    pub fn new(config: &ScrapingConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("Accept", HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"));
        headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert("DNT", HeaderValue::from_static("1"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.retail_timeout_seconds))
            .connect_timeout(Duration::from_secs(5))
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            user_agents: UserAgentRotator::new(&config.user_agents),
        })
    }

    /// GET a page as text. Non-2xx responses yield `Ok(None)`.
    pub async fn fetch_html(&self, url: &str, timeout: Duration) -> Result<Option<String>> {
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .header("User-Agent", self.user_agents.get_random_user_agent())
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let context = LogContext::new("scraper", "fetch_html")
                .with_url(url)
                .with_field("status_code", status.as_u16())
                .with_duration(start.elapsed());
            crate::log_debug!(context, "Page request was not successful");
            return Ok(None);
        }

        let body = response.text().await?;
        debug!("GET {} returned {} bytes in {:?}", url, body.len(), start.elapsed());
        Ok(Some(body))
    }

    /// HEAD a URL and report whether it answered with a success status.
    /// A declared body of 100 bytes or less counts as missing.
    pub async fn check_url(&self, url: &str, timeout: Duration) -> bool {
        match self
            .client
            .head(url)
            .header("User-Agent", self.user_agents.get_random_user_agent())
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => {
                let declared_length = response
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                response.status().is_success() && declared_length.map_or(true, |len| len > 100)
            }
            Err(e) => {
                debug!("HEAD {} failed: {}", url, e);
                false
            }
        }
    }
}
