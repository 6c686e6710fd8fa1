//! Fetch → detect → notify → persist.
//!
//! The marker is only ever written after the webhook accepted the
//! notification, so a crash between the two repeats a notification on the
//! next run instead of silently skipping an item.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use reqwest::Client;
use tracing::{error, info, warn};

use crate::config::WatchConfig;
use crate::detect::Detector;
use crate::error::{ConfigError, FetchError, RunError, StoreError};
use crate::fetcher::{ApiFetcher, FeedFetcher, Fetcher};
use crate::item::{Item, SourceDescriptor, SourceKind};
use crate::marker::{FileMarkerStore, GitMarkerStore, MarkerStore};
use crate::notify::{CardTemplate, MessageBuilder, Notifier, SourceItems, WebhookNotifier};
use crate::status::StatusFetcher;

const USER_AGENT: &str = concat!("feedwatch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Default)]
pub struct RunReport {
    pub selected: Vec<Item>,
    pub delivered: bool,
    pub marker_written: bool,
    pub failed_sources: Vec<(String, FetchError)>,
    pub store_error: Option<StoreError>,
}

impl RunReport {
    pub fn merge(&mut self, other: RunReport) {
        self.selected.extend(other.selected);
        self.delivered |= other.delivered;
        self.marker_written |= other.marker_written;
        self.failed_sources.extend(other.failed_sources);
        if self.store_error.is_none() {
            self.store_error = other.store_error;
        }
    }
}

/// Window strategy over several feeds, reported as one digest.
///
/// A failing feed is logged and recorded but does not stop its siblings.
pub async fn run_window(
    fetchers: &[Arc<dyn Fetcher>],
    detector: Detector,
    now: DateTime<Utc>,
    builder: &MessageBuilder,
    notifier: &dyn Notifier,
) -> Result<RunReport, RunError> {
    let results = join_all(fetchers.iter().map(|f| f.fetch())).await;

    let mut report = RunReport::default();
    let mut groups = Vec::new();
    for (fetcher, result) in fetchers.iter().zip(results) {
        match result {
            Ok(items) => {
                let selected = detector.select(&items, now, None);
                info!(source = fetcher.name(), fetched = items.len(), selected = selected.len(), "checked feed");
                if !selected.is_empty() {
                    report.selected.extend(selected.iter().cloned());
                    groups.push(SourceItems {
                        source: fetcher.name().to_string(),
                        items: selected,
                    });
                }
            }
            Err(e) => {
                error!(source = fetcher.name(), error = %e, "failed to fetch source");
                report.failed_sources.push((fetcher.name().to_string(), e));
            }
        }
    }

    if groups.is_empty() {
        info!("no new updates");
        return Ok(report);
    }

    notifier.deliver(&builder.digest(&groups)).await?;
    report.delivered = true;
    info!(items = report.selected.len(), "digest delivered");
    Ok(report)
}

/// Identity strategy for a single-latest-item source.
pub async fn run_identity(
    fetcher: &dyn Fetcher,
    store: &dyn MarkerStore,
    builder: &MessageBuilder,
    card: &CardTemplate,
    notifier: &dyn Notifier,
) -> Result<RunReport, RunError> {
    let marker = store.read().await;
    let items = fetcher.fetch().await.map_err(|error| RunError::Fetch {
        name: fetcher.name().to_string(),
        error,
    })?;

    let mut report = RunReport::default();
    let selected = Detector::Identity.select(&items, Utc::now(), marker.as_deref());
    let Some(latest) = selected.first() else {
        if items.is_empty() {
            info!(source = fetcher.name(), "no items found");
        } else {
            info!(source = fetcher.name(), latest_id = ?marker, "no new item since last check");
        }
        return Ok(report);
    };

    info!(source = fetcher.name(), id = %latest.id, previous = ?marker, "new item found");
    notifier
        .deliver(&builder.single(fetcher.name(), latest, card))
        .await?;
    report.delivered = true;

    match store.write(&latest.id).await {
        Ok(()) => report.marker_written = true,
        Err(e) => {
            warn!(source = fetcher.name(), error = %e, "notification sent but marker update failed");
            report.store_error = Some(e);
        }
    }
    report.selected = selected;
    Ok(report)
}

struct IdentitySource {
    fetcher: Arc<dyn Fetcher>,
    store: Box<dyn MarkerStore>,
    card: CardTemplate,
}

/// All configured sources wired to one webhook.
pub struct Watcher {
    feeds: Vec<Arc<dyn Fetcher>>,
    identities: Vec<IdentitySource>,
    detector: Detector,
    builder: MessageBuilder,
    notifier: Arc<dyn Notifier>,
}

impl Watcher {
    pub fn build_client(config: &WatchConfig) -> Result<Client, ConfigError> {
        Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConfigError::Invalid {
                name: "http client".to_string(),
                reason: e.to_string(),
            })
    }

    pub fn from_config(config: &WatchConfig) -> Result<Self, ConfigError> {
        let client = Self::build_client(config)?;
        let notifier = Arc::new(WebhookNotifier::new(client.clone(), &config.webhook_url));
        Self::with_notifier(config, client, notifier)
    }

    pub fn with_notifier(
        config: &WatchConfig,
        client: Client,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        let feeds = config
            .feed_sources()
            .map(|source| {
                let fetcher = FeedFetcher::new(client.clone(), source.clone()).with_retry(config.retry);
                Arc::new(fetcher) as Arc<dyn Fetcher>
            })
            .collect();

        let identities = config
            .identity_sources()
            .map(|source| {
                Ok::<_, ConfigError>(IdentitySource {
                    fetcher: identity_fetcher(source, config, &client)?,
                    store: marker_store(source, config),
                    card: source.card.clone().unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            feeds,
            identities,
            detector: Detector::window_hours(config.window_hours),
            builder: MessageBuilder::new(config.webhook_kind),
            notifier,
        })
    }

    pub async fn run_feeds(&self) -> Result<RunReport, RunError> {
        if self.feeds.is_empty() {
            return Ok(RunReport::default());
        }
        run_window(&self.feeds, self.detector, Utc::now(), &self.builder, self.notifier.as_ref()).await
    }

    /// Runs every marker-backed source. A fetch failure only skips that source;
    /// a delivery failure stops the run.
    pub async fn run_latest(&self) -> Result<RunReport, RunError> {
        let mut report = RunReport::default();
        for source in &self.identities {
            let outcome = run_identity(
                source.fetcher.as_ref(),
                source.store.as_ref(),
                &self.builder,
                &source.card,
                self.notifier.as_ref(),
            )
            .await;
            match outcome {
                Ok(outcome) => report.merge(outcome),
                Err(RunError::Fetch { name, error }) => {
                    error!(source = %name, error = %error, "failed to fetch source");
                    report.failed_sources.push((name, error));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    pub async fn run_all(&self) -> Result<RunReport, RunError> {
        let mut report = self.run_feeds().await?;
        report.merge(self.run_latest().await?);
        Ok(report)
    }
}

fn identity_fetcher(
    source: &SourceDescriptor,
    config: &WatchConfig,
    client: &Client,
) -> Result<Arc<dyn Fetcher>, ConfigError> {
    let fetcher: Arc<dyn Fetcher> = match source.kind {
        SourceKind::Api => {
            let token = config
                .auth_token
                .clone()
                .ok_or_else(|| ConfigError::Missing("API bearer token".to_string()))?;
            Arc::new(ApiFetcher::new(client.clone(), source.clone(), token, config.retry))
        }
        SourceKind::Status => {
            Arc::new(StatusFetcher::new(client.clone(), source.clone()).with_retry(config.retry))
        }
        SourceKind::Feed => {
            Arc::new(FeedFetcher::new(client.clone(), source.clone()).with_retry(config.retry))
        }
    };
    Ok(fetcher)
}

fn marker_store(source: &SourceDescriptor, config: &WatchConfig) -> Box<dyn MarkerStore> {
    match &config.git {
        Some(git) => Box::new(GitMarkerStore::new(source.marker_file(), git.clone())),
        None => Box::new(FileMarkerStore::new(source.marker_file())),
    }
}
