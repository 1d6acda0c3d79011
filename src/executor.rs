//! Retry executor with proxy rotation and direct fallback
//!
//! Each request gets up to `PROXY_RETRY_COUNT` proxied attempts, each against
//! a fresh proxy, then one direct attempt. Attempts are bounded by the
//! per-attempt timeout and any caller deadline, with exponential backoff
//! between proxied attempts. Exhaustion surfaces as a single aggregate error
//! listing every attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SharedConfig;
use crate::error::{AttemptFailure, Result, TrawlError};
use crate::models::{ProxyOutcome, ProxyRecord, UsageLogEntry};
use crate::rotation::ProxySelector;

/// Outbound HTTP transport seam
///
/// The pool owns retries, timeouts, and proxy assignment; implementations
/// only perform one fetch through the given proxy (or directly when `None`).
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        method: &str,
        proxy: Option<&ProxyRecord>,
    ) -> Result<FetchResponse>;
}

/// Response from a single fetch attempt
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Bytes,
    pub response_time: Duration,
}

/// One outbound scrape request
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub id: Uuid,
    pub url: String,
    pub method: String,
    /// Overall deadline across all attempts; per-attempt timeouts still apply
    pub timeout: Option<Duration>,
}

impl ScrapeRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            method: "GET".to_string(),
            timeout: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How a successful request was routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Via {
    Proxy(i32),
    Direct,
}

/// Successful scrape result
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub request_id: Uuid,
    pub status: u16,
    pub body: Bytes,
    pub response_time: Duration,
    pub via: Via,
    /// Attempts made including the successful one
    pub attempts: u32,
}

/// Runs requests through the pool with rotation, backoff, and fallback
pub struct RequestExecutor {
    selector: Arc<ProxySelector>,
    fetcher: Arc<dyn Fetcher>,
    config: SharedConfig,
}

impl RequestExecutor {
    pub fn new(
        selector: Arc<ProxySelector>,
        fetcher: Arc<dyn Fetcher>,
        config: SharedConfig,
    ) -> Self {
        Self {
            selector,
            fetcher,
            config,
        }
    }

    /// Execute a request, rotating through proxies and falling back to a
    /// direct connection when the pool is exhausted
    pub async fn execute(&self, request: &ScrapeRequest) -> Result<ScrapeOutcome> {
        let config = self.config.load();
        let deadline = request.timeout.map(|t| Instant::now() + t);

        let mut failures: Vec<AttemptFailure> = Vec::new();
        let mut tried: Vec<i32> = Vec::new();
        let mut attempts: u32 = 0;

        for attempt in 0..config.retry.proxy_retry_count {
            let proxy = match self.selector.select(&tried) {
                Some(proxy) => proxy,
                None => break,
            };
            tried.push(proxy.id);

            let budget = match attempt_budget(config.attempt_timeout(), deadline) {
                Some(budget) => budget,
                None => break,
            };

            attempts += 1;
            debug!(
                request_id = %request.id,
                proxy_id = proxy.id,
                attempt = attempts,
                url = %request.url,
                "Proxied fetch attempt"
            );

            match self.attempt(request, &proxy, budget).await {
                Ok(response) => {
                    let outcome = ProxyOutcome::Success {
                        status_code: response.status as i32,
                        response_time_ms: response.response_time.as_millis() as i32,
                    };
                    self.selector
                        .mark_success(UsageLogEntry::from_outcome(
                            proxy.id,
                            &request.url,
                            &request.method,
                            &outcome,
                        ))
                        .await;

                    return Ok(ScrapeOutcome {
                        request_id: request.id,
                        status: response.status,
                        body: response.body,
                        response_time: response.response_time,
                        via: Via::Proxy(proxy.id),
                        attempts,
                    });
                }
                Err(reason) => {
                    warn!(
                        request_id = %request.id,
                        proxy_id = proxy.id,
                        attempt = attempts,
                        reason = %reason,
                        "Proxied fetch attempt failed"
                    );
                    self.selector
                        .mark_failed(UsageLogEntry::from_outcome(
                            proxy.id,
                            &request.url,
                            &request.method,
                            &ProxyOutcome::Failure {
                                reason: reason.clone(),
                            },
                        ))
                        .await;
                    failures.push(AttemptFailure {
                        via: proxy.label(),
                        reason,
                    });
                }
            }

            if attempt + 1 < config.retry.proxy_retry_count {
                let delay = backoff_delay(&config.retry, attempt);
                match attempt_budget(delay, deadline) {
                    Some(capped) => sleep(capped).await,
                    None => break,
                }
            }
        }

        // Direct fallback: one attempt with no proxy, not reported to the
        // health tracker. Whatever response the direct connection gets is
        // the caller's answer, error statuses included; only transport
        // failures and timeouts turn into the aggregate error.
        match attempt_budget(config.attempt_timeout(), deadline) {
            Some(budget) => {
                attempts += 1;
                debug!(
                    request_id = %request.id,
                    attempt = attempts,
                    url = %request.url,
                    "Direct fetch attempt"
                );
                let fut = self.fetcher.fetch(&request.url, &request.method, None);
                match timeout(budget, fut).await {
                    Ok(Ok(response)) => {
                        return Ok(ScrapeOutcome {
                            request_id: request.id,
                            status: response.status,
                            body: response.body,
                            response_time: response.response_time,
                            via: Via::Direct,
                            attempts,
                        });
                    }
                    Ok(Err(e)) => failures.push(AttemptFailure {
                        via: "direct".to_string(),
                        reason: e.to_string(),
                    }),
                    Err(_) => failures.push(AttemptFailure {
                        via: "direct".to_string(),
                        reason: TrawlError::AttemptTimeout.to_string(),
                    }),
                }
            }
            None => failures.push(AttemptFailure {
                via: "direct".to_string(),
                reason: "request deadline exhausted".to_string(),
            }),
        }

        Err(TrawlError::AllAttemptsFailed { attempts: failures })
    }

    /// One bounded proxied fetch attempt; any HTTP status of 400 or above
    /// counts as a failure of the assigned proxy for rotation purposes.
    async fn attempt(
        &self,
        request: &ScrapeRequest,
        proxy: &ProxyRecord,
        budget: Duration,
    ) -> std::result::Result<FetchResponse, String> {
        let fut = self.fetcher.fetch(&request.url, &request.method, Some(proxy));
        match timeout(budget, fut).await {
            Ok(Ok(response)) if response.status < 400 => Ok(response),
            Ok(Ok(response)) => Err(format!("HTTP {}", response.status)),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(TrawlError::AttemptTimeout.to_string()),
        }
    }
}

/// Time available for the next attempt, or `None` when the caller deadline
/// has already passed
fn attempt_budget(per_attempt: Duration, deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        None => Some(per_attempt),
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                None
            } else {
                Some(per_attempt.min(remaining))
            }
        }
    }
}

/// Exponential backoff with a ceiling: base * 2^attempt, capped
fn backoff_delay(retry: &crate::config::RetryConfig, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    let ms = retry.backoff_base_ms.saturating_mul(factor);
    Duration::from_millis(ms.min(retry.backoff_cap_ms))
}
