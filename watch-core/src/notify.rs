//! Notification payloads and webhook delivery.
//!
//! Each webhook type has one canonical payload shape:
//!
//! - Teams: a plain-text digest when several items are reported together, a
//!   `MessageCard` with a single `OpenUri` action for one item.
//! - Slack: always `{ "text": ... }` using Slack's `<url|label>` link syntax.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DeliveryError;
use crate::item::Item;

const CARD_CONTEXT: &str = "https://schema.org/extensions";
const DEFAULT_THEME_COLOR: &str = "0076D7";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WebhookKind {
    #[default]
    Teams,
    Slack,
}

/// Per-source overrides for the single-item card.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CardTemplate {
    pub summary: Option<String>,
    pub title: Option<String>,
    pub action_name: Option<String>,
    pub theme_color: Option<String>,
}

/// Items selected from one source, reported under that source's name.
#[derive(Debug, Clone)]
pub struct SourceItems {
    pub source: String,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Copy)]
pub struct MessageBuilder {
    kind: WebhookKind,
}

impl MessageBuilder {
    pub fn new(kind: WebhookKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> WebhookKind {
        self.kind
    }

    /// One combined text message covering every group.
    pub fn digest(&self, groups: &[SourceItems]) -> Payload {
        let mut lines = Vec::new();
        for group in groups.iter().filter(|g| !g.items.is_empty()) {
            let count = group.items.len();
            let noun = if count == 1 { "item" } else { "items" };
            match self.kind {
                WebhookKind::Teams => {
                    lines.push(format!("**{}**: {count} new {noun}", group.source));
                    for item in &group.items {
                        lines.push(format!("- [{}]({})", item.display_title(), item.url));
                    }
                }
                WebhookKind::Slack => {
                    lines.push(format!("*{}*: {count} new {noun}", group.source));
                    for item in &group.items {
                        lines.push(format!("- <{}|{}>", item.url, item.display_title()));
                    }
                }
            }
        }
        Payload::Text {
            text: lines.join("\n"),
        }
    }

    /// Message for a single newly detected item.
    pub fn single(&self, source: &str, item: &Item, template: &CardTemplate) -> Payload {
        let summary = template
            .summary
            .clone()
            .unwrap_or_else(|| format!("New post from {source}"));
        let title = template
            .title
            .clone()
            .unwrap_or_else(|| format!("{source} has been updated"));
        let action_name = template
            .action_name
            .clone()
            .unwrap_or_else(|| "View post".to_string());
        let body = item
            .text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| item.display_title());

        match self.kind {
            WebhookKind::Teams => {
                let sections = item
                    .media_url
                    .iter()
                    .map(|url| CardSection {
                        images: vec![CardImage { image: url.clone() }],
                    })
                    .collect();

                Payload::Card(MessageCard {
                    card_type: "MessageCard".to_string(),
                    context: CARD_CONTEXT.to_string(),
                    summary,
                    theme_color: template
                        .theme_color
                        .clone()
                        .unwrap_or_else(|| DEFAULT_THEME_COLOR.to_string()),
                    title,
                    text: format!(
                        "{body}\n\n[{action_name}]({url})\n\nURL: {url}",
                        url = item.url
                    ),
                    sections,
                    potential_action: vec![OpenUriAction::new(action_name, &item.url)],
                })
            }
            WebhookKind::Slack => Payload::Text {
                text: format!("*{title}*\n{body}\n<{}|{action_name}>", item.url),
            },
        }
    }
}

/// Delivery seam; the pipeline only cares whether a payload got through.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, payload: &Payload) -> Result<(), DeliveryError>;
}

/// Incoming-webhook delivery over HTTP POST.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, payload: &Payload) -> Result<(), DeliveryError> {
        debug!(kind = payload.kind_name(), "sending webhook notification");

        let response = self.client.post(&self.url).json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            debug!(status = %status, "webhook accepted notification");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, body = %body, "webhook rejected notification");
        Err(DeliveryError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Payload {
    Text { text: String },
    Card(MessageCard),
}

impl Payload {
    fn kind_name(&self) -> &'static str {
        match self {
            Payload::Text { .. } => "text",
            Payload::Card(_) => "card",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageCard {
    #[serde(rename = "@type")]
    pub card_type: String,
    #[serde(rename = "@context")]
    pub context: String,
    pub summary: String,
    pub theme_color: String,
    pub title: String,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<CardSection>,
    pub potential_action: Vec<OpenUriAction>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CardSection {
    pub images: Vec<CardImage>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CardImage {
    pub image: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OpenUriAction {
    #[serde(rename = "@type")]
    pub action_type: String,
    pub name: String,
    pub targets: Vec<UriTarget>,
}

impl OpenUriAction {
    pub fn new(name: impl Into<String>, uri: &str) -> Self {
        Self {
            action_type: "OpenUri".to_string(),
            name: name.into(),
            targets: vec![UriTarget {
                os: "default".to_string(),
                uri: uri.to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UriTarget {
    pub os: String,
    pub uri: String,
}
