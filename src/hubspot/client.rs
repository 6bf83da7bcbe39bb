// ABOUTME: HTTP client for the HubSpot CRM v3 API
// ABOUTME: Pages through list results, filters incrementally and backs off on rate limits

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::error::FetchError;
use super::models::{ListPage, PropertiesResponse, SourceRecord};
use crate::config::{RateLimitConfig, SourceConfig, MAX_PAGE_SIZE};

/// Property the source uses for the last modification time of a record.
pub const LAST_MODIFIED_PROPERTY: &str = "hs_lastmodifieddate";

/// Bounded exponential backoff for 429 responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub default_retry_after: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_elapsed: Duration,
}

impl From<&RateLimitConfig> for RateLimitPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            default_retry_after: Duration::from_secs(config.default_retry_after_secs),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            max_elapsed: Duration::from_secs(config.max_elapsed_secs),
        }
    }
}

impl RateLimitPolicy {
    /// Wait before retry number `attempt` (0-based).
    ///
    /// The server hint (or the default when absent) is a floor; the exponential
    /// step grows on top of it up to `max_backoff`.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        let backoff = self
            .initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff);
        hint.unwrap_or(self.default_retry_after).max(backoff)
    }
}

/// Records fetched for one object type, and why paging stopped early if it did.
#[derive(Debug)]
pub struct FetchOutcome {
    pub records: Vec<SourceRecord>,
    pub pages: u32,
    pub interruption: Option<FetchError>,
}

pub struct CrmClient {
    client: Client,
    base_url: String,
    api_key: String,
    page_size: u32,
    page_delay: Duration,
    rate_limit: RateLimitPolicy,
}

impl CrmClient {
    pub fn new(config: &SourceConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            page_size: config.page_size.clamp(1, MAX_PAGE_SIZE),
            page_delay: Duration::from_millis(config.page_delay_ms),
            rate_limit: RateLimitPolicy::from(&config.rate_limit),
        })
    }

    /// List every property name defined for an object type.
    pub async fn list_properties(&self, object_type: &str) -> Result<Vec<String>, FetchError> {
        let url = format!("{}/properties/{}", self.base_url, object_type);
        let response: PropertiesResponse = self.get_json(&url, &[]).await?;
        Ok(response.results.into_iter().map(|p| p.name).collect())
    }

    /// Fetch all records of `object_type`, optionally only those modified at or after `since`.
    ///
    /// Returns `Err` only for authorization failures. Any other error stops paging and
    /// is reported through [`FetchOutcome::interruption`] together with the records
    /// accumulated so far.
    pub async fn fetch(
        &self,
        object_type: &str,
        properties: &[String],
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, FetchError> {
        let url = format!("{}/objects/{}", self.base_url, object_type);
        let mut records = Vec::new();
        let mut pages = 0u32;
        let mut after: Option<String> = None;

        tracing::info!("Fetching {} from source (since: {:?})", object_type, since);

        loop {
            let query = build_list_query(properties, self.page_size, after.as_deref(), since);

            let page: ListPage = match self.get_json(&url, &query).await {
                Ok(page) => page,
                Err(e) if e.is_fatal() => {
                    tracing::error!("Aborting fetch of {}: {}", object_type, e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        "Fetch of {} interrupted after {} pages ({} records): {}",
                        object_type,
                        pages,
                        records.len(),
                        e
                    );
                    return Ok(FetchOutcome {
                        records,
                        pages,
                        interruption: Some(e),
                    });
                }
            };

            pages += 1;
            let next = page.next_after().map(str::to_string);
            let batch_len = page.results.len();
            records.extend(page.results);

            tracing::info!(
                "Fetched {} {} (total: {})",
                batch_len,
                object_type,
                records.len()
            );

            match next {
                Some(token) => after = Some(token),
                None => break,
            }

            if !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
        }

        Ok(FetchOutcome {
            records,
            pages,
            interruption: None,
        })
    }

    /// GET a JSON document, retrying the same request while the source rate-limits us.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let mut attempts = 0u32;
        let mut waited = Duration::ZERO;

        loop {
            let response = self
                .client
                .get(url)
                .bearer_auth(&self.api_key)
                .header("Content-Type", "application/json")
                .query(query)
                .send()
                .await?;

            let status = response.status();

            if status.is_success() {
                return Ok(response.json::<T>().await?);
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::Unauthorized { status, body });
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let delay = self
                    .rate_limit
                    .delay_for(attempts, retry_after(response.headers()));
                attempts += 1;

                if waited + delay > self.rate_limit.max_elapsed {
                    return Err(FetchError::RateLimited { attempts, waited });
                }

                tracing::warn!(
                    "Rate limit hit. Waiting {:?} before retrying (attempt {})",
                    delay,
                    attempts
                );
                tokio::time::sleep(delay).await;
                waited += delay;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Http { status, body });
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Query parameters for one list request.
///
/// With `since`, results are restricted to records modified at or after it and
/// sorted ascending by modification time, so an interrupted run retried with the
/// same watermark still sees every record it missed.
fn build_list_query(
    properties: &[String],
    page_size: u32,
    after: Option<&str>,
    since: Option<DateTime<Utc>>,
) -> Vec<(&'static str, String)> {
    let mut query = vec![("limit", page_size.min(MAX_PAGE_SIZE).to_string())];

    if !properties.is_empty() {
        query.push(("properties", properties.join(",")));
    }

    if let Some(after) = after {
        query.push(("after", after.to_string()));
    }

    if let Some(since) = since {
        let sorts = serde_json::json!([{
            "propertyName": LAST_MODIFIED_PROPERTY,
            "direction": "ASCENDING"
        }]);
        let filter_groups = serde_json::json!([{
            "filters": [{
                "propertyName": LAST_MODIFIED_PROPERTY,
                "operator": "GTE",
                "value": since.timestamp_millis()
            }]
        }]);
        query.push(("sorts", sorts.to_string()));
        query.push(("filterGroups", filter_groups.to_string()));
    }

    query
}
