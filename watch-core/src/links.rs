//! Broken-link reports.
//!
//! Link targets come from a plain URL list, from a sitemap index walked down
//! to its page entries, or from a breadth-first crawl of one site. Every
//! broken link keeps the page (or sitemap) it was found on.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::Path;

use futures_util::stream::{self, StreamExt};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ConfigError, FetchError};
use crate::notify::Payload;

const CHECK_CONCURRENCY: usize = 8;

/// Sitemap index → sitemap → sitemap is as deep as real sites nest them.
const MAX_SITEMAP_DEPTH: usize = 3;

pub const DEFAULT_MAX_PAGES: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Http(u16),
    Error(String),
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Http(code) => write!(f, "{code}"),
            LinkStatus::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// A URL to check and where it was referenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    pub url: String,
    pub found_on: Option<String>,
}

impl From<String> for LinkTarget {
    fn from(url: String) -> Self {
        Self { url, found_on: None }
    }
}

impl From<&str> for LinkTarget {
    fn from(url: &str) -> Self {
        Self::from(url.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenLink {
    pub url: String,
    pub status: LinkStatus,
    pub found_on: Option<String>,
}

/// URLs listed in a report file, one per line; blanks and `#` comments are skipped.
pub async fn read_url_list(path: &Path) -> Result<Vec<LinkTarget>, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            error,
        })?;
    Ok(parse_url_list(&content).into_iter().map(LinkTarget::from).collect())
}

pub fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToOwned::to_owned)
        .collect()
}

/// Probes every target and returns the broken ones in input order.
pub async fn check_links(client: &Client, targets: &[LinkTarget]) -> Vec<BrokenLink> {
    let mut results: Vec<(usize, Option<BrokenLink>)> = stream::iter(targets.iter().enumerate())
        .map(|(index, target)| async move { (index, check_link(client, target).await) })
        .buffer_unordered(CHECK_CONCURRENCY)
        .collect()
        .await;
    results.sort_by_key(|(index, _)| *index);

    let broken: Vec<BrokenLink> = results.into_iter().filter_map(|(_, r)| r).collect();
    debug!(checked = targets.len(), broken = broken.len(), "checked links");
    broken
}

async fn check_link(client: &Client, target: &LinkTarget) -> Option<BrokenLink> {
    let url = target.url.as_str();
    let status = match client.head(url).send().await {
        // Some servers refuse HEAD outright; ask again with GET.
        Ok(resp) if resp.status() == StatusCode::METHOD_NOT_ALLOWED => {
            client.get(url).send().await.map(|r| r.status())
        }
        other => other.map(|r| r.status()),
    };

    let status = match status {
        Ok(code) if code.as_u16() >= 400 => LinkStatus::Http(code.as_u16()),
        Ok(_) => return None,
        Err(e) => {
            warn!(url, error = %e, "link request failed");
            LinkStatus::Error(e.to_string())
        }
    };
    debug!(url, status = %status, found_on = ?target.found_on, "broken link");
    Some(BrokenLink {
        url: url.to_owned(),
        status,
        found_on: target.found_on.clone(),
    })
}

/// `<loc>` entries of one sitemap document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sitemap {
    /// `<sitemap><loc>` entries of a sitemap index.
    pub sitemaps: Vec<String>,
    /// `<url><loc>` page entries.
    pub pages: Vec<String>,
}

pub fn parse_sitemap(xml: &str) -> Result<Sitemap, FetchError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut sitemap = Sitemap::default();
    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => path.push(element.local_name().as_ref().to_vec()),
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|e| FetchError::Parse(format!("invalid sitemap text: {e}")))?;
                record_loc(&mut sitemap, &path, value.trim());
            }
            Ok(Event::CData(data)) => {
                let value = String::from_utf8_lossy(&data).into_owned();
                record_loc(&mut sitemap, &path, value.trim());
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(FetchError::Parse(format!(
                    "invalid sitemap XML at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
        }
    }
    Ok(sitemap)
}

fn record_loc(sitemap: &mut Sitemap, path: &[Vec<u8>], value: &str) {
    if value.is_empty() {
        return;
    }
    if let [.., parent, loc] = path {
        if loc.as_slice() != b"loc" {
            return;
        }
        match parent.as_slice() {
            b"sitemap" => sitemap.sitemaps.push(value.to_owned()),
            b"url" => sitemap.pages.push(value.to_owned()),
            _ => {}
        }
    }
}

async fn fetch_sitemap(client: &Client, url: &str) -> Result<Sitemap, FetchError> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(FetchError::Status(response.status()));
    }
    parse_sitemap(&response.text().await?)
}

/// Every page listed under `root`, following nested sitemap indexes.
///
/// The root must load; a nested sitemap that fails is logged and skipped.
/// Each page is tagged with the sitemap that listed it.
pub async fn collect_sitemap_urls(client: &Client, root: &str) -> Result<Vec<LinkTarget>, FetchError> {
    let mut queue = VecDeque::from([(root.to_owned(), 0usize)]);
    let mut visited = HashSet::new();
    let mut seen_pages = HashSet::new();
    let mut targets = Vec::new();

    while let Some((url, depth)) = queue.pop_front() {
        if !visited.insert(url.clone()) {
            continue;
        }
        let sitemap = match fetch_sitemap(client, &url).await {
            Ok(sitemap) => sitemap,
            Err(e) if url == root => return Err(e),
            Err(e) => {
                warn!(sitemap = %url, error = %e, "failed to fetch sitemap, skipping");
                continue;
            }
        };
        debug!(sitemap = %url, children = sitemap.sitemaps.len(), pages = sitemap.pages.len(), "read sitemap");

        for child in sitemap.sitemaps {
            if depth + 1 < MAX_SITEMAP_DEPTH {
                queue.push_back((child, depth + 1));
            } else {
                warn!(sitemap = %child, "sitemap nested too deeply, skipping");
            }
        }
        for page in sitemap.pages {
            if seen_pages.insert(page.clone()) {
                targets.push(LinkTarget {
                    url: page,
                    found_on: Some(url.clone()),
                });
            }
        }
    }

    info!(root, pages = targets.len(), "collected sitemap pages");
    Ok(targets)
}

fn is_internal(url: &Url, domain: &str) -> bool {
    url.host_str()
        .is_some_and(|host| host == domain || host.ends_with(&format!(".{domain}")))
}

/// Absolute http(s) targets of every `<a href>` on a page, without fragments.
pub fn extract_links(html: &str, page: &Url) -> Result<Vec<Url>, FetchError> {
    let anchors = Selector::parse("a[href]").map_err(|e| FetchError::Parse(e.to_string()))?;
    let document = Html::parse_document(html);

    Ok(document
        .select(&anchors)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| page.join(href).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map(|mut url| {
            url.set_fragment(None);
            url
        })
        .collect())
}

/// Breadth-first crawl of `start`'s domain, visiting at most `max_pages` pages.
///
/// Internal pages are fetched and their links followed; external links are
/// only checked. A 403 on the start page itself is tolerated.
pub async fn crawl_site(client: &Client, start: &str, max_pages: usize) -> Result<Vec<BrokenLink>, FetchError> {
    let start = Url::parse(start).map_err(|e| FetchError::Parse(format!("invalid start URL: {e}")))?;
    let domain = start
        .host_str()
        .ok_or_else(|| FetchError::Parse(format!("start URL {start} has no host")))?
        .to_owned();

    let mut queue: VecDeque<(Url, Option<String>)> = VecDeque::from([(start.clone(), None)]);
    let mut visited = HashSet::new();
    let mut checked_external = HashSet::new();
    let mut broken = Vec::new();

    while let Some((page, found_on)) = queue.pop_front() {
        if visited.contains(page.as_str()) {
            continue;
        }
        if visited.len() >= max_pages {
            warn!(max_pages, queued = queue.len() + 1, "page limit reached, stopping crawl");
            break;
        }
        visited.insert(page.to_string());

        let page_broken = |status: LinkStatus| BrokenLink {
            url: page.to_string(),
            status,
            found_on: found_on.clone(),
        };
        let response = match client.get(page.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                broken.push(page_broken(LinkStatus::Error(e.to_string())));
                continue;
            }
        };
        let status = response.status();
        if status.as_u16() >= 400 {
            if page == start && status == StatusCode::FORBIDDEN {
                info!(url = %page, "start page returned 403, crawling it anyway");
            } else {
                broken.push(page_broken(LinkStatus::Http(status.as_u16())));
                continue;
            }
        }
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                broken.push(page_broken(LinkStatus::Error(e.to_string())));
                continue;
            }
        };

        let mut external = Vec::new();
        for link in extract_links(&body, &page)? {
            if is_internal(&link, &domain) {
                if !visited.contains(link.as_str()) {
                    queue.push_back((link, Some(page.to_string())));
                }
            } else if checked_external.insert(link.to_string()) {
                external.push(LinkTarget {
                    url: link.to_string(),
                    found_on: Some(page.to_string()),
                });
            }
        }
        broken.extend(check_links(client, &external).await);
    }

    info!(start = %start, pages = visited.len(), broken = broken.len(), "crawl finished");
    Ok(broken)
}

pub fn link_report(broken: &[BrokenLink]) -> Payload {
    let mut text = String::from("Link check results\n\n");
    if broken.is_empty() {
        text.push_str("No broken links found!");
    } else {
        text.push_str("The following links are broken:\n\n");
        for link in broken {
            text.push_str(&format!("{} [Status: {}]\n", link.url, link.status));
            if let Some(page) = &link.found_on {
                text.push_str(&format!("Found on: {page}\n"));
            }
            text.push('\n');
        }
    }
    Payload::Text { text }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_list_skips_blanks_and_comments() {
        let urls = parse_url_list("# checked nightly\nhttps://a.example\n\n  https://b.example  \n");
        assert_eq!(urls, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn report_lists_status_and_origin_per_link() {
        let payload = link_report(&[
            BrokenLink {
                url: "https://a.example/x".into(),
                status: LinkStatus::Http(404),
                found_on: Some("https://a.example/".into()),
            },
            BrokenLink {
                url: "https://b.example".into(),
                status: LinkStatus::Error("timed out".into()),
                found_on: None,
            },
        ]);
        let Payload::Text { text } = payload else {
            panic!("link report must be text");
        };
        assert!(text.contains("https://a.example/x [Status: 404]\nFound on: https://a.example/\n"));
        assert!(text.contains("https://b.example [Status: Error: timed out]\n\n"));
    }

    #[test]
    fn clean_report_says_so() {
        let Payload::Text { text } = link_report(&[]) else {
            panic!("link report must be text");
        };
        assert!(text.ends_with("No broken links found!"));
    }

    #[test]
    fn sitemap_index_and_url_set_are_told_apart() {
        let index = parse_sitemap(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://site.example/post-sitemap.xml</loc></sitemap>
  <sitemap><loc> https://site.example/page-sitemap.xml </loc><lastmod>2025-01-01</lastmod></sitemap>
</sitemapindex>"#,
        )
        .unwrap();
        assert_eq!(
            index.sitemaps,
            vec!["https://site.example/post-sitemap.xml", "https://site.example/page-sitemap.xml"]
        );
        assert!(index.pages.is_empty());

        let pages = parse_sitemap(
            r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://site.example/a?x=1&amp;y=2</loc></url>
  <url><loc><![CDATA[https://site.example/b]]></loc></url>
</urlset>"#,
        )
        .unwrap();
        assert_eq!(pages.pages, vec!["https://site.example/a?x=1&y=2", "https://site.example/b"]);
        assert!(pages.sitemaps.is_empty());
    }

    #[test]
    fn malformed_sitemap_is_a_parse_error() {
        assert!(matches!(
            parse_sitemap("<urlset><url><loc>x</url></urlset>"),
            Err(FetchError::Parse(_))
        ));
    }

    #[test]
    fn links_are_resolved_and_stripped_of_fragments() {
        let page = Url::parse("https://site.example/blog/post").unwrap();
        let links = extract_links(
            r##"<a href="/about#team">About</a>
                <a href="next">Next</a>
                <a href="mailto:hi@site.example">Mail</a>
                <a href="https://other.example/x">Other</a>"##,
            &page,
        )
        .unwrap();
        let links: Vec<&str> = links.iter().map(Url::as_str).collect();
        assert_eq!(
            links,
            vec![
                "https://site.example/about",
                "https://site.example/blog/next",
                "https://other.example/x"
            ]
        );
    }

    #[test]
    fn subdomains_count_as_internal() {
        let url = |s: &str| Url::parse(s).unwrap();
        assert!(is_internal(&url("https://site.example/x"), "site.example"));
        assert!(is_internal(&url("https://www.site.example/x"), "site.example"));
        assert!(!is_internal(&url("https://notsite.example/x"), "site.example"));
    }
}
