use std::collections::HashMap;
use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::item::{sort_newest_first, Item, SourceDescriptor};

const RATE_LIMIT_RESET: &str = "x-rate-limit-reset";
const RETRY_AFTER: &str = "retry-after";
const DEFAULT_API_RESULTS: u32 = 5;

/// Retrieves a bounded, most-recent-first list of items from one source.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<Item>, FetchError>;
}

/// Bounded wait-and-retry on HTTP 429.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_wait_seconds: u64,
    pub default_wait_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_wait_seconds: 15 * 60,
            default_wait_seconds: 60,
        }
    }
}

impl RetryPolicy {
    /// How long to suspend after a 429, from the reset headers.
    ///
    /// `x-rate-limit-reset` (epoch seconds) wins over `retry-after`; without
    /// either the default wait applies. Resets in the past give zero, and
    /// every wait is capped at `max_wait_seconds`.
    pub fn wait_for(&self, headers: &HeaderMap, now: DateTime<Utc>) -> Duration {
        let header_secs = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok())
        };

        let secs = if let Some(reset) = header_secs(RATE_LIMIT_RESET) {
            reset.saturating_sub(now.timestamp())
        } else if let Some(retry_after) = header_secs(RETRY_AFTER) {
            retry_after
        } else {
            self.default_wait_seconds as i64
        };

        Duration::from_secs(secs.max(0) as u64).min(Duration::from_secs(self.max_wait_seconds))
    }
}

/// Sends `request`, sleeping and resending on 429 until `policy` runs out of
/// attempts.
pub(crate) async fn send_with_retry(
    request: RequestBuilder,
    policy: &RetryPolicy,
    source: &str,
) -> Result<Response, FetchError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let response = match request.try_clone() {
            Some(request) => request.send().await?,
            // Streaming bodies cannot be replayed.
            None => return Ok(request.send().await?),
        };

        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            if attempt > 1 {
                debug!(source, attempts = attempt, "request succeeded after rate limiting");
            }
            return Ok(response);
        }
        if attempt >= max_attempts {
            warn!(source, attempts = attempt, "rate limit retries exhausted");
            return Err(FetchError::RateLimited { attempts: attempt });
        }

        let wait = policy.wait_for(response.headers(), Utc::now());
        warn!(
            source,
            attempt,
            wait_secs = wait.as_secs(),
            "rate limited, waiting before retry"
        );
        tokio::time::sleep(wait).await;
    }
}

pub struct FeedFetcher {
    client: Client,
    source: SourceDescriptor,
    policy: RetryPolicy,
}

impl FeedFetcher {
    pub fn new(client: Client, source: SourceDescriptor) -> Self {
        Self {
            client,
            source,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Fetcher for FeedFetcher {
    fn name(&self) -> &str {
        &self.source.name
    }

    async fn fetch(&self) -> Result<Vec<Item>, FetchError> {
        let request = self.client.get(&self.source.url);
        let response = send_with_retry(request, &self.policy, &self.source.name).await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }
        let bytes = response.bytes().await?;

        let mut items = parse_feed(&bytes)?;
        sort_newest_first(&mut items);
        if let Some(max) = self.source.max_results {
            items.truncate(max as usize);
        }
        debug!(source = %self.source.name, count = items.len(), "fetched feed");
        Ok(items)
    }
}

/// Parses an RSS 2.0 document, falling back to Atom.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<Item>, FetchError> {
    let rss_err = match rss::Channel::read_from(Cursor::new(bytes)) {
        Ok(channel) => return Ok(channel.items().iter().map(Item::from_rss_item).collect()),
        Err(e) => e,
    };
    match atom_syndication::Feed::read_from(Cursor::new(bytes)) {
        Ok(feed) => Ok(feed.entries().iter().map(Item::from_atom_entry).collect()),
        Err(atom_err) => Err(FetchError::Parse(format!(
            "not RSS ({rss_err}) and not Atom ({atom_err})"
        ))),
    }
}

/// Bearer-authenticated posts endpoint returning `{ data, includes }`.
pub struct ApiFetcher {
    client: Client,
    source: SourceDescriptor,
    token: String,
    policy: RetryPolicy,
}

impl ApiFetcher {
    pub fn new(client: Client, source: SourceDescriptor, token: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            client,
            source,
            token: token.into(),
            policy,
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                "max_results",
                self.source.max_results.unwrap_or(DEFAULT_API_RESULTS).to_string(),
            ),
            ("tweet.fields", "created_at,text".to_string()),
            ("expansions", "attachments.media_keys".to_string()),
            ("media.fields", "url,preview_image_url".to_string()),
        ]
    }
}

#[async_trait]
impl Fetcher for ApiFetcher {
    fn name(&self) -> &str {
        &self.source.name
    }

    async fn fetch(&self) -> Result<Vec<Item>, FetchError> {
        let request = self
            .client
            .get(&self.source.url)
            .bearer_auth(&self.token)
            .query(&self.query());
        let response = send_with_retry(request, &self.policy, &self.source.name).await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }
        let bytes = response.bytes().await?;
        let body: ApiResponse = serde_json::from_slice(&bytes)?;

        let mut items = body.into_items(&self.source);
        sort_newest_first(&mut items);
        if let Some(max) = self.source.max_results {
            items.truncate(max as usize);
        }
        info!(source = %self.source.name, count = items.len(), "fetched posts");
        Ok(items)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    data: Vec<ApiPost>,
    #[serde(default)]
    includes: ApiIncludes,
}

#[derive(Debug, Deserialize)]
struct ApiPost {
    id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    attachments: Option<ApiAttachments>,
}

#[derive(Debug, Deserialize)]
struct ApiAttachments {
    #[serde(default)]
    media_keys: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiIncludes {
    #[serde(default)]
    media: Vec<ApiMedia>,
}

#[derive(Debug, Deserialize)]
struct ApiMedia {
    media_key: Option<String>,
    url: Option<String>,
    preview_image_url: Option<String>,
}

impl ApiResponse {
    fn into_items(self, source: &SourceDescriptor) -> Vec<Item> {
        let media: HashMap<String, String> = self
            .includes
            .media
            .into_iter()
            .filter_map(|m| {
                let url = m.url.or(m.preview_image_url)?;
                Some((m.media_key?, url))
            })
            .collect();

        self.data
            .into_iter()
            .map(|post| {
                let media_url = post
                    .attachments
                    .iter()
                    .flat_map(|a| a.media_keys.iter())
                    .find_map(|key| media.get(key).cloned());
                Item {
                    url: source.link_for(&post.id),
                    title: post.title.unwrap_or_default(),
                    text: post.text,
                    published_at: post.created_at,
                    media_url,
                    id: post.id,
                }
            })
            .collect()
    }
}
