use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::fetcher::RetryPolicy;
use crate::item::{SourceDescriptor, SourceKind};
use crate::marker::GitSettings;
use crate::notify::{CardTemplate, WebhookKind};

pub const DEFAULT_WEBHOOK_ENV: &str = "TEAMS_WEBHOOK_URL";
pub const DEFAULT_TOKEN_ENV: &str = "TWITTER_BEARER_TOKEN";

/// On-disk configuration; every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Name of the environment variable holding the webhook URL.
    pub webhook_env: String,
    pub webhook_kind: WebhookKind,
    /// Name of the environment variable holding the API bearer token.
    pub token_env: String,
    pub window_hours: u64,
    pub request_timeout_seconds: u64,
    pub retry: RetryPolicy,
    pub git: Option<GitSettings>,
    pub sources: Vec<SourceDescriptor>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            webhook_env: DEFAULT_WEBHOOK_ENV.to_string(),
            webhook_kind: WebhookKind::Teams,
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            window_hours: 24,
            request_timeout_seconds: 20,
            retry: RetryPolicy::default(),
            git: None,
            sources: default_sources(),
        }
    }
}

fn default_sources() -> Vec<SourceDescriptor> {
    let mut posts = SourceDescriptor::api(
        "Google Search Central on X",
        "https://api.twitter.com/2/users/22046611/tweets",
    );
    posts.max_results = Some(5);
    posts.item_url = Some("https://x.com/googlesearchc/status/{id}".to_string());
    posts.marker_path = Some(PathBuf::from("latest_tweet_id.json"));
    posts.card = Some(CardTemplate {
        summary: Some("Google Search Central X account update".to_string()),
        title: Some("Google Search Central's X account has been updated!".to_string()),
        action_name: Some("View on X".to_string()),
        theme_color: None,
    });

    let mut status = SourceDescriptor::status(
        "Google Search Status",
        "https://status.search.google.com/summary",
    );
    status.product = Some("Ranking".to_string());
    status.marker_path = Some(PathBuf::from("latest_ranking_incident.json"));
    status.card = Some(CardTemplate {
        summary: Some("Google Search status update".to_string()),
        title: Some("Google Search Status Update".to_string()),
        action_name: Some("View incident".to_string()),
        theme_color: None,
    });

    vec![
        SourceDescriptor::feed("Google Official Blog", "https://blog.google/rss"),
        SourceDescriptor::feed(
            "Google Search Central",
            "https://developers.google.com/search/blog/feed/rss.xml",
        ),
        posts,
        status,
    ]
}

impl FileConfig {
    /// Default location: `<config_dir>/feedwatch/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("feedwatch").join("config.json"))
    }

    /// An explicit path must exist and parse; otherwise the default location
    /// is tried and built-in defaults are used when it is absent or broken.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => match Self::load_from_file(&path) {
                Ok(config) => Ok(config),
                Err(e) => {
                    warn!(error = %e, "failed to load config, using defaults");
                    Ok(Self::default())
                }
            },
            _ => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            error,
        })?;
        serde_json::from_str(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }
}

/// Everything a run needs, resolved up front so nothing touches the network
/// with a half-configured watcher.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub webhook_url: String,
    pub webhook_kind: WebhookKind,
    pub auth_token: Option<String>,
    pub sources: Vec<SourceDescriptor>,
    pub window_hours: u64,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub git: Option<GitSettings>,
}

impl WatchConfig {
    /// Resolves secrets through `lookup` (normally `std::env::var`).
    pub fn resolve<F>(file: FileConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let webhook_url = require(&lookup, &file.webhook_env)?;
        validate_http_url(&file.webhook_env, &webhook_url)?;

        for source in &file.sources {
            validate_http_url(&source.name, &source.url)?;
            if source.kind == SourceKind::Api && source.item_url.is_none() {
                return Err(ConfigError::Invalid {
                    name: source.name.clone(),
                    reason: "API sources need an item_url link template".to_string(),
                });
            }
        }

        let needs_token = file.sources.iter().any(|s| s.kind == SourceKind::Api);
        let auth_token = if needs_token {
            Some(require(&lookup, &file.token_env)?)
        } else {
            None
        };

        if file.window_hours == 0 {
            return Err(ConfigError::Invalid {
                name: "window_hours".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            webhook_url,
            webhook_kind: file.webhook_kind,
            auth_token,
            sources: file.sources,
            window_hours: file.window_hours,
            request_timeout: Duration::from_secs(file.request_timeout_seconds.max(1)),
            retry: file.retry,
            git: file.git,
        })
    }

    pub fn from_env(file: FileConfig) -> Result<Self, ConfigError> {
        Self::resolve(file, |name| std::env::var(name).ok())
    }

    pub fn feed_sources(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.iter().filter(|s| s.kind == SourceKind::Feed)
    }

    pub fn api_sources(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.iter().filter(|s| s.kind == SourceKind::Api)
    }

    /// Sources checked against a persisted marker.
    pub fn identity_sources(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.iter().filter(|s| s.kind.uses_marker())
    }
}

fn require<F>(lookup: &F, name: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::Missing(name.to_string()))
}

fn validate_http_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        name: name.to_string(),
        reason,
    };
    let parsed = url::Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(invalid(format!("unsupported URL scheme {scheme}"))),
    }
}
