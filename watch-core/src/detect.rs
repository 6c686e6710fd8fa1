//! New-item detection.
//!
//! Feeds are judged by recency: anything published within a trailing window
//! counts as new and no state is kept between runs. Single-latest-item
//! sources are judged by identity: the newest item is new whenever its id
//! differs from the persisted marker.

use chrono::{DateTime, Duration, Utc};

use crate::item::Item;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detector {
    Window(Duration),
    Identity,
}

impl Detector {
    pub fn window_hours(hours: u64) -> Self {
        Detector::Window(Duration::hours(hours as i64))
    }

    pub fn select(&self, items: &[Item], now: DateTime<Utc>, marker: Option<&str>) -> Vec<Item> {
        match self {
            Detector::Window(window) => select_recent(items, now, *window),
            Detector::Identity => select_unseen(items, marker),
        }
    }
}

/// Items published strictly less than `window` before `now`.
///
/// Undated items never qualify.
pub fn select_recent(items: &[Item], now: DateTime<Utc>, window: Duration) -> Vec<Item> {
    items
        .iter()
        .filter(|item| match item.published_at {
            Some(published) => now.signed_duration_since(published) < window,
            None => false,
        })
        .cloned()
        .collect()
}

/// The newest item, if its id differs from the marker.
///
/// Only the single newest item is surfaced even when several arrived since
/// the last run.
pub fn select_unseen(items: &[Item], marker: Option<&str>) -> Vec<Item> {
    match items.first() {
        Some(latest) if marker != Some(latest.id.as_str()) => vec![latest.clone()],
        _ => Vec::new(),
    }
}
