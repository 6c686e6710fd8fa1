use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::notify::CardTemplate;

/// Where items come from and how to detect that they are new.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Syndication feed, selected by recency window.
    #[default]
    Feed,
    /// JSON posts API, selected by comparing the newest id with the marker.
    Api,
    /// Search status dashboard; its latest incident is selected like an API post.
    Status,
}

impl SourceKind {
    /// Whether new items are detected against a persisted marker.
    pub fn uses_marker(self) -> bool {
        !matches!(self, SourceKind::Feed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDescriptor {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub max_results: Option<u32>,
    /// Link template for API posts; `{id}` is replaced by the post id.
    #[serde(default)]
    pub item_url: Option<String>,
    #[serde(default)]
    pub marker_path: Option<PathBuf>,
    #[serde(default)]
    pub card: Option<CardTemplate>,
    /// Product row to watch on a status dashboard.
    #[serde(default)]
    pub product: Option<String>,
}

impl SourceDescriptor {
    pub fn feed(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            kind: SourceKind::Feed,
            max_results: None,
            item_url: None,
            marker_path: None,
            card: None,
            product: None,
        }
    }

    pub fn api(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Api,
            ..Self::feed(name, url)
        }
    }

    pub fn status(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Status,
            ..Self::feed(name, url)
        }
    }

    /// Canonical link of an API post.
    pub fn link_for(&self, id: &str) -> String {
        match &self.item_url {
            Some(template) => template.replace("{id}", id),
            None => self.url.clone(),
        }
    }

    /// Marker file for identity runs, defaulting to `latest_<name>_id.json`.
    pub fn marker_file(&self) -> PathBuf {
        self.marker_path.clone().unwrap_or_else(|| {
            let slug: String = self
                .name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
                .collect();
            PathBuf::from(format!("latest_{slug}_id.json"))
        })
    }
}

/// One fetched unit of content, normalised across feed formats and APIs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub text: Option<String>,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub media_url: Option<String>,
}

impl Item {
    pub fn from_rss_item(item: &rss::Item) -> Self {
        let published_at = item
            .pub_date()
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let url = item.link().unwrap_or_default().to_owned();
        let id = item
            .guid()
            .map(|guid| guid.value().to_owned())
            .unwrap_or_else(|| url.clone());

        let media_url = item
            .enclosure()
            .filter(|enc| enc.mime_type().starts_with("image/"))
            .map(|enc| enc.url().to_owned());

        Self {
            id,
            title: item.title().unwrap_or_default().to_owned(),
            text: item.description().map(ToOwned::to_owned),
            url,
            published_at,
            media_url,
        }
    }

    pub fn from_atom_entry(entry: &atom_syndication::Entry) -> Self {
        let published_at = entry
            .published()
            .copied()
            .unwrap_or_else(|| *entry.updated())
            .with_timezone(&Utc);

        // Prefer the alternate link, Atom's equivalent of an RSS <link>.
        let url = entry
            .links()
            .iter()
            .find(|link| link.rel() == "alternate")
            .or_else(|| entry.links().first())
            .map(|link| link.href().to_owned())
            .unwrap_or_default();

        Self {
            id: entry.id().to_owned(),
            title: entry.title().value.clone(),
            text: entry.summary().map(|text| text.value.clone()),
            url,
            published_at: Some(published_at),
            media_url: None,
        }
    }

    /// Title for display, falling back to the body text for untitled posts.
    pub fn display_title(&self) -> &str {
        if !self.title.trim().is_empty() {
            &self.title
        } else {
            match self.text.as_deref().map(str::trim) {
                Some(text) if !text.is_empty() => text,
                _ => "(untitled)",
            }
        }
    }
}

/// Sorts most-recent-first; undated items keep their order after dated ones.
pub fn sort_newest_first(items: &mut [Item]) {
    items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
}
