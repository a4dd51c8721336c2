//! Retrying HTTP fetch client for the upstream site.
//!
//! Every fetch holds one of `max_in_flight` permits, runs each attempt under
//! `per_attempt_timeout`, and gives up once `request_timeout` or the retry
//! budget is spent. Transport errors, 5xx and 429 are retried with capped
//! exponential backoff plus jitter; other 4xx responses fail immediately.

use std::time::Duration;

use campusbot_shared::{CampusBotError, RequestContext, Result, ScraperConfig};
use rand::Rng;
use reqwest::{Client, StatusCode, header};
use scraper::Html;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};
use url::Url;

// ---------------------------------------------------------------------------
// FetchedDocument
// ---------------------------------------------------------------------------

/// A successfully fetched page.
///
/// The body is kept as text; [`FetchedDocument::html`] parses it on demand
/// because the DOM type cannot cross `.await` points in `Send` futures.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// The URL that answered (after origin failover).
    pub url: Url,
    pub status: u16,
    pub body: String,
}

impl FetchedDocument {
    pub fn html(&self) -> Html {
        Html::parse_document(&self.body)
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// How a single attempt ended, when it did not produce a document.
enum AttemptError {
    /// Worth another try (transport error, timeout, 5xx, 429).
    Retryable(String),
    /// Stop now and report this error.
    Fatal(CampusBotError),
}

/// Bounded, retrying HTTP client.
pub struct Fetcher {
    client: Client,
    permits: Semaphore,
    user_agents: Vec<String>,
    request_timeout: Duration,
    per_attempt_timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

impl Fetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        if config.user_agents.is_empty() {
            return Err(CampusBotError::config("scraper.user_agents must not be empty"));
        }

        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| CampusBotError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            permits: Semaphore::new(config.max_in_flight.max(1)),
            user_agents: config.user_agents.clone(),
            request_timeout: config.request_timeout,
            per_attempt_timeout: config.per_attempt_timeout,
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
            retry_max_delay: config.retry_max_delay,
        })
    }

    /// Fetch a single URL.
    pub async fn fetch(&self, ctx: &RequestContext, url: &Url) -> Result<FetchedDocument> {
        self.fetch_any(ctx, std::slice::from_ref(url)).await
    }

    /// Fetch the same resource from any of several origins. Attempt `i`
    /// targets `candidates[i % len]`, so retries fail over between origins.
    #[instrument(skip_all, fields(url = %candidates.first().map(Url::as_str).unwrap_or("")))]
    pub async fn fetch_any(
        &self,
        ctx: &RequestContext,
        candidates: &[Url],
    ) -> Result<FetchedDocument> {
        if candidates.is_empty() {
            return Err(CampusBotError::invalid("no candidate URLs to fetch"));
        }

        let budget = ctx.with_timeout(self.request_timeout);
        let outcome = self.fetch_within(&budget, candidates).await;

        // Our own request budget running out is an upstream failure, not a
        // caller cancellation.
        match outcome {
            Err(e) if e.is_cancelled() && !ctx.is_done() => Err(CampusBotError::Unavailable(
                format!(
                    "{}: no response within {:?}",
                    candidates[0], self.request_timeout
                ),
            )),
            other => other,
        }
    }

    async fn fetch_within(
        &self,
        ctx: &RequestContext,
        candidates: &[Url],
    ) -> Result<FetchedDocument> {
        let _permit = ctx
            .run(async {
                self.permits
                    .acquire()
                    .await
                    .map_err(|_| CampusBotError::Unavailable("fetcher is shut down".into()))
            })
            .await?;

        let mut last_cause = String::new();
        for attempt in 0..=self.max_retries {
            ctx.check()?;
            let url = &candidates[attempt as usize % candidates.len()];

            match self.attempt(ctx, url).await {
                Ok(doc) => {
                    debug!(url = %doc.url, attempt, "fetched");
                    return Ok(doc);
                }
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable(cause)) => {
                    warn!(url = %url, attempt, cause = %cause, "fetch attempt failed");
                    last_cause = cause;
                    if attempt < self.max_retries {
                        ctx.sleep(self.backoff(attempt)).await?;
                    }
                }
            }
        }

        Err(CampusBotError::Unavailable(format!(
            "{}: gave up after {} attempts: {last_cause}",
            candidates[0],
            self.max_retries + 1
        )))
    }

    async fn attempt(
        &self,
        ctx: &RequestContext,
        url: &Url,
    ) -> std::result::Result<FetchedDocument, AttemptError> {
        let request = async {
            let response = self
                .client
                .get(url.clone())
                .header(header::USER_AGENT, self.user_agent_for(url))
                .send()
                .await?;
            let status = response.status();
            // Read the body even for error statuses so the connection can be
            // reused.
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let result = tokio::select! {
            biased;
            _ = ctx.done() => return Err(AttemptError::Fatal(CampusBotError::Cancelled)),
            r = tokio::time::timeout(self.per_attempt_timeout, request) => r,
        };

        let (status, body) = match result {
            Err(_) => {
                return Err(AttemptError::Retryable(format!(
                    "timed out after {:?}",
                    self.per_attempt_timeout
                )));
            }
            Ok(Err(e)) => return Err(AttemptError::Retryable(e.to_string())),
            Ok(Ok(response)) => response,
        };

        classify(url, status, body)
    }

    /// `min(max_delay, base_delay * 2^attempt)` plus up to half a base delay
    /// of jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let delay = exp.min(self.retry_max_delay);
        let jitter_ms = (self.retry_base_delay.as_millis() / 2) as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        delay + Duration::from_millis(jitter)
    }

    /// User-Agent for a URL: the same URL always gets the same agent.
    pub fn user_agent_for(&self, url: &Url) -> &str {
        let digest = Sha256::digest(url.as_str().as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let idx = (u64::from_be_bytes(prefix) % self.user_agents.len() as u64) as usize;
        &self.user_agents[idx]
    }
}

fn classify(
    url: &Url,
    status: StatusCode,
    body: String,
) -> std::result::Result<FetchedDocument, AttemptError> {
    if status.is_success() {
        return Ok(FetchedDocument {
            url: url.clone(),
            status: status.as_u16(),
            body,
        });
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(AttemptError::Retryable(format!("HTTP {status}")));
    }
    if status.is_client_error() {
        return Err(AttemptError::Fatal(CampusBotError::ClientError {
            url: url.to_string(),
            status: status.as_u16(),
        }));
    }
    Err(AttemptError::Fatal(CampusBotError::Network(format!(
        "{url}: unexpected HTTP {status}"
    ))))
}
