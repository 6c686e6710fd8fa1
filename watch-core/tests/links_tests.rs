use reqwest::Client;
use serde_json::Value;
use watch_core::links::{
    check_links, collect_sitemap_urls, crawl_site, link_report, read_url_list, LinkStatus, LinkTarget,
};
use watch_core::{Notifier, WebhookNotifier};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn check_links_reports_only_broken_urls() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/no-head"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/no-head"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let urls: Vec<LinkTarget> = ["/ok", "/gone", "/no-head"]
        .iter()
        .map(|p| LinkTarget::from(format!("{}{p}", server.uri())))
        .collect();
    let broken = check_links(&Client::new(), &urls).await;

    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0].url, format!("{}/gone", server.uri()));
    assert_eq!(broken[0].status, LinkStatus::Http(404));
    assert_eq!(broken[0].found_on, None);
}

#[tokio::test]
async fn unreachable_link_counts_as_broken() {
    // Port 9 (discard) is closed on test hosts, so the connection is refused.
    let urls = vec![LinkTarget::from("http://127.0.0.1:9/")];
    let broken = check_links(&Client::new(), &urls).await;

    assert_eq!(broken.len(), 1);
    assert!(matches!(broken[0].status, LinkStatus::Error(_)));
}

#[tokio::test]
async fn report_file_is_checked_and_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut file = std::env::temp_dir();
    file.push(format!(
        "feedwatch_links_{}.txt",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    tokio::fs::write(&file, format!("# nightly report\n{}/missing\n", server.uri()))
        .await
        .unwrap();

    let urls = read_url_list(&file).await.expect("read report file");
    let broken = check_links(&Client::new(), &urls).await;
    WebhookNotifier::new(Client::new(), format!("{}/webhook", server.uri()))
        .deliver(&link_report(&broken))
        .await
        .expect("deliver report");

    let requests = server.received_requests().await.unwrap();
    let post = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .expect("webhook was called");
    let body: Value = serde_json::from_slice(&post.body).unwrap();
    assert!(body["text"]
        .as_str()
        .unwrap()
        .contains(&format!("{}/missing [Status: 404]", server.uri())));

    let _ = tokio::fs::remove_file(&file).await;
}

#[tokio::test]
async fn missing_report_file_is_an_error() {
    let path = std::env::temp_dir().join("feedwatch_links_does_not_exist.txt");
    assert!(read_url_list(&path).await.is_err());
}

fn xml(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "application/xml")
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html")
}

#[tokio::test]
async fn sitemap_index_is_walked_down_to_pages() {
    let server = MockServer::start().await;
    let uri = server.uri();
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(xml(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>{uri}/posts.xml</loc></sitemap>
  <sitemap><loc>{uri}/missing.xml</loc></sitemap>
</sitemapindex>"#
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/posts.xml"))
        .respond_with(xml(format!(
            r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{uri}/post/1</loc></url>
  <url><loc>{uri}/post/2</loc></url>
</urlset>"#
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/post/1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/post/2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = Client::new();
    let targets = collect_sitemap_urls(&client, &format!("{uri}/sitemap.xml"))
        .await
        .expect("collect sitemap pages");
    let urls: Vec<&str> = targets.iter().map(|t| t.url.as_str()).collect();
    assert_eq!(urls, vec![format!("{uri}/post/1"), format!("{uri}/post/2")]);

    let broken = check_links(&client, &targets).await;
    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0].url, format!("{uri}/post/2"));
    assert_eq!(broken[0].found_on.as_deref(), Some(format!("{uri}/posts.xml").as_str()));
}

#[tokio::test]
async fn unreachable_sitemap_root_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = collect_sitemap_urls(&Client::new(), &format!("{}/sitemap.xml", server.uri())).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn crawl_reports_broken_links_with_referring_page() {
    let site = MockServer::start().await;
    let elsewhere = MockServer::start().await;
    let external_ok = format!("{}/fine", elsewhere.uri()).replace("127.0.0.1", "localhost");
    let external_gone = format!("{}/gone", elsewhere.uri()).replace("127.0.0.1", "localhost");

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&format!(
            r#"<a href="/about">About</a> <a href="/old-post#top">Old</a> <a href="{external_ok}">Ok</a>"#
        )))
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(html(&format!(
            r#"<a href="/">Home</a> <a href="{external_gone}">Gone</a>"#
        )))
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/old-post"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&site)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/fine"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&elsewhere)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .expect(1)
        .mount(&elsewhere)
        .await;

    let start = format!("{}/", site.uri());
    let broken = crawl_site(&Client::new(), &start, 50).await.expect("crawl site");

    assert_eq!(broken.len(), 2, "{broken:?}");
    let old_post = broken
        .iter()
        .find(|b| b.url == format!("{}/old-post", site.uri()))
        .expect("internal 404 reported");
    assert_eq!(old_post.status, LinkStatus::Http(404));
    assert_eq!(old_post.found_on.as_deref(), Some(start.as_str()));

    let gone = broken.iter().find(|b| b.url == external_gone).expect("external 410 reported");
    assert_eq!(gone.status, LinkStatus::Http(410));
    assert_eq!(gone.found_on.as_deref(), Some(format!("{}/about", site.uri()).as_str()));
}

#[tokio::test]
async fn crawl_stops_at_page_limit() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html(r#"<a href="/a">A</a> <a href="/b">B</a> <a href="/c">C</a>"#))
        .mount(&site)
        .await;

    let broken = crawl_site(&Client::new(), &format!("{}/", site.uri()), 2).await.unwrap();
    assert!(broken.is_empty());
    assert_eq!(site.received_requests().await.unwrap().len(), 2);
}
