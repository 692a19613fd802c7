//! SEC XBRL API client with rate limiting.

use super::compustat::pad_cik;
use super::facts::XbrlDocument;
use crate::error::{DataError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// SEC XBRL API base URL
const XBRL_BASE_URL: &str = "https://data.sec.gov/api/xbrl";

/// SEC allows at most 10 requests per second
const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(100);

/// Default User-Agent; the SEC rejects requests without contact details
pub const DEFAULT_USER_AGENT: &str = "riskfeed/0.1 (https://github.com/factordynamics/riskfeed)";

#[derive(Debug)]
struct RateLimiter {
    last_request: Instant,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Instant::now() - min_interval,
            min_interval,
        }
    }

    async fn wait(&mut self) {
        let elapsed = self.last_request.elapsed();
        if elapsed < self.min_interval {
            sleep(self.min_interval - elapsed).await;
        }
        self.last_request = Instant::now();
    }
}

/// Client for the SEC company-facts endpoint.
pub struct XbrlClient {
    client: reqwest::Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    base_url: String,
}

impl XbrlClient {
    /// Create a client with the default User-Agent.
    pub fn new() -> Result<Self> {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    /// Create a client with a custom User-Agent.
    ///
    /// The SEC expects the form "Company Name contact@email.com".
    pub fn with_user_agent(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(DataError::Network)?;

        Ok(Self {
            client,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(DEFAULT_RATE_LIMIT))),
            base_url: XBRL_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// URL of the company-facts document for a CIK.
    pub fn company_facts_url(&self, cik: &str) -> String {
        format!("{}/companyfacts/CIK{}.json", self.base_url, pad_cik(cik))
    }

    /// Fetch all company facts for a CIK (padded or unpadded).
    ///
    /// # Example
    ///
    /// ```no_run
    /// use riskfeed_data::xbrl::XbrlClient;
    ///
    /// # async fn example() -> riskfeed_data::Result<()> {
    /// let client = XbrlClient::new()?;
    /// let doc = client.fetch_company_facts("320193").await?;
    /// if let Some(fact) = doc.facts_for("us-gaap:Assets").first() {
    ///     println!("Total Assets: {} {}", fact.value, fact.unit);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn fetch_company_facts(&self, cik: &str) -> Result<XbrlDocument> {
        if cik.trim().is_empty() || !cik.trim().chars().all(|c| c.is_ascii_digit()) {
            return Err(DataError::Parse(format!("Invalid CIK: '{}'", cik)));
        }
        let url = self.company_facts_url(cik);
        let body = self.get_text(&url).await?;
        XbrlDocument::parse_json(&body)
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        self.rate_limiter.lock().await.wait().await;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(DataError::Http(format!(
                "{} returned HTTP {}",
                url,
                response.status()
            )));
        }
        Ok(response.text().await?)
    }
}

impl std::fmt::Debug for XbrlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XbrlClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
