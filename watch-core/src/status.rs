//! Google Search status dashboard.
//!
//! The summary page lists one table of incidents per product. The newest row
//! of the watched product becomes a single item, unless the dashboard already
//! shows the product as available again.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::FetchError;
use crate::fetcher::{send_with_retry, Fetcher, RetryPolicy};
use crate::item::{Item, SourceDescriptor};

pub const DEFAULT_PRODUCT: &str = "Ranking";

/// Icon colour the dashboard uses for "Available".
const AVAILABLE_COLOR: &str = "#1E8E3E";

const PRODUCT_NAME: &str = "span.nAlKgGlv8Vo__product-name";
const INCIDENT_TABLE: &str = "table.ise88CpWulY__psd-table";
const SUMMARY_CELL: &str = "td.ise88CpWulY__summary";
const DATE_CELL: &str = "td.ise88CpWulY__date";
const DURATION_TEXT: &str = "td.ise88CpWulY__duration span.ise88CpWulY__duration-text";
const STATUS_ICON: &str = "td.ise88CpWulY__duration div.ise88CpWulY__icon-container svg path";

const ADVICE: &str =
    "Avoid large-scale site changes or mass deletions while this update is in progress.";

/// Newest incident row of one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incident {
    pub summary: String,
    pub link: Option<String>,
    pub date: Option<String>,
    pub duration: Option<String>,
    pub status_color: Option<String>,
}

impl Incident {
    pub fn is_available(&self) -> bool {
        self.status_color
            .as_deref()
            .is_some_and(|color| color.eq_ignore_ascii_case(AVAILABLE_COLOR))
    }

    /// Identified by its incident link, or by summary and date when the row has none.
    pub fn id(&self) -> String {
        match &self.link {
            Some(link) => link.clone(),
            None => format!("{}|{}", self.summary, self.date.as_deref().unwrap_or_default()),
        }
    }

    pub fn into_item(self, page_url: &str) -> Item {
        let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
        let text = format!(
            "Summary: {}\nDate: {}\nDuration: {}\nDetails: {}\n\n{ADVICE}",
            self.summary,
            field(&self.date),
            field(&self.duration),
            self.link.as_deref().unwrap_or(page_url),
        );
        Item {
            id: self.id(),
            url: self.link.clone().unwrap_or_else(|| page_url.to_string()),
            title: self.summary,
            text: Some(text),
            published_at: None,
            media_url: None,
        }
    }
}

pub struct StatusFetcher {
    client: Client,
    source: SourceDescriptor,
    policy: RetryPolicy,
}

impl StatusFetcher {
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

    fn product(&self) -> &str {
        self.source.product.as_deref().unwrap_or(DEFAULT_PRODUCT)
    }
}

#[async_trait]
impl Fetcher for StatusFetcher {
    fn name(&self) -> &str {
        &self.source.name
    }

    async fn fetch(&self) -> Result<Vec<Item>, FetchError> {
        let page_url = Url::parse(&self.source.url).map_err(|e| FetchError::Parse(e.to_string()))?;
        let request = self.client.get(page_url.clone());
        let response = send_with_retry(request, &self.policy, &self.source.name).await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }
        let html = response.text().await?;

        let Some(incident) = parse_status_page(&html, &page_url, self.product())? else {
            warn!(source = %self.source.name, product = self.product(), "no incident table found on status page");
            return Ok(Vec::new());
        };
        if incident.is_available() {
            info!(source = %self.source.name, summary = %incident.summary, "product is available, nothing to announce");
            return Ok(Vec::new());
        }

        debug!(source = %self.source.name, id = %incident.id(), "found ongoing incident");
        Ok(vec![incident.into_item(page_url.as_str())])
    }
}

/// Newest incident listed under `product`, if the page has such a table.
pub fn parse_status_page(html: &str, page_url: &Url, product: &str) -> Result<Option<Incident>, FetchError> {
    let document = Html::parse_document(html);
    let anchors = selector(&format!("{PRODUCT_NAME}, {INCIDENT_TABLE}"))?;

    // The incident table follows its product heading in document order.
    let mut in_product = false;
    let mut table = None;
    for element in document.select(&anchors) {
        match element.value().name() {
            "span" if !in_product => in_product = text_of(element) == product,
            "table" if in_product => {
                table = Some(element);
                break;
            }
            _ => {}
        }
    }
    let Some(table) = table else {
        return Ok(None);
    };

    let Some(row) = table.select(&selector("tbody tr")?).next() else {
        return Ok(None);
    };
    let Some(summary_cell) = row.select(&selector(SUMMARY_CELL)?).next() else {
        return Ok(None);
    };

    let link = summary_cell
        .select(&selector("a[href]")?)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| page_url.join(href).ok())
        .map(String::from);
    let first_text = |css: &str| -> Result<Option<String>, FetchError> {
        Ok(row
            .select(&selector(css)?)
            .next()
            .map(text_of)
            .filter(|text| !text.is_empty()))
    };
    let status_color = row
        .select(&selector(STATUS_ICON)?)
        .next()
        .and_then(|path| path.value().attr("fill"))
        .map(ToOwned::to_owned);

    Ok(Some(Incident {
        summary: text_of(summary_cell),
        link,
        date: first_text(DATE_CELL)?,
        duration: first_text(DURATION_TEXT)?,
        status_color,
    }))
}

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Parse(format!("invalid selector {css}: {e}")))
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
