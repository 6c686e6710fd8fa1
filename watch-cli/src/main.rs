use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use watch_core::links::{
    check_links, collect_sitemap_urls, crawl_site, link_report, read_url_list, DEFAULT_MAX_PAGES,
};
use watch_core::{
    CardTemplate, FetchError, FileConfig, Item, MessageBuilder, Notifier, RunError, RunReport,
    SourceKind, WatchConfig, Watcher, WebhookNotifier,
};

/// Poll feeds and posts APIs and forward anything new to a chat webhook.
#[derive(Debug, Parser)]
#[command(name = "feedwatch", version)]
struct Cli {
    /// JSON config file (defaults to <config dir>/feedwatch/config.json).
    #[arg(long, global = true, env = "FEEDWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter such as `info` or `watch_core=debug`; overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Check every configured source (default).
    Run,
    /// Report feed items published within the recency window.
    Feeds,
    /// Report the newest post or incident of each marker-backed source if it changed.
    Latest,
    /// Check links and post the broken ones.
    Links {
        #[command(subcommand)]
        input: LinkInput,
    },
    /// Send a sample card to verify the webhook.
    TestCard {
        /// Link the sample card points at.
        #[arg(long, default_value = "https://example.com/")]
        url: String,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum LinkInput {
    /// URLs listed one per line in a file.
    File { path: PathBuf },
    /// Every page listed by a sitemap or sitemap index.
    Sitemap { url: String },
    /// Every link found by crawling one site breadth-first.
    Crawl {
        url: String,
        #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
        max_pages: usize,
    },
}

#[derive(Debug, Clone, Copy)]
enum Scope {
    All,
    Feeds,
    Latest,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> Result<ExitCode, RunError> {
    let file = FileConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => watch(file, Scope::All).await,
        Command::Feeds => watch(file, Scope::Feeds).await,
        Command::Latest => watch(file, Scope::Latest).await,
        Command::Links { input } => links(file, input).await,
        Command::TestCard { url } => test_card(file, &url).await,
    }
}

async fn watch(mut file: FileConfig, scope: Scope) -> Result<ExitCode, RunError> {
    // Only the sources in scope need their secrets.
    match scope {
        Scope::All => {}
        Scope::Feeds => file.sources.retain(|s| s.kind == SourceKind::Feed),
        Scope::Latest => file.sources.retain(|s| s.kind.uses_marker()),
    }
    let config = WatchConfig::from_env(file)?;
    let watcher = Watcher::from_config(&config)?;

    let report = match scope {
        Scope::All => watcher.run_all().await?,
        Scope::Feeds => watcher.run_feeds().await?,
        Scope::Latest => watcher.run_latest().await?,
    };
    Ok(exit_code(&report))
}

fn exit_code(report: &RunReport) -> ExitCode {
    if let Some(e) = &report.store_error {
        warn!(error = %e, "marker was not persisted; the item may be reported again");
    }
    if report.failed_sources.is_empty() {
        info!(selected = report.selected.len(), delivered = report.delivered, "run finished");
        ExitCode::SUCCESS
    } else {
        let names: Vec<&str> = report.failed_sources.iter().map(|(name, _)| name.as_str()).collect();
        error!(failed = ?names, "run finished with failed sources");
        ExitCode::FAILURE
    }
}

/// Webhook-only commands do not need any source secrets.
fn webhook_only(mut file: FileConfig) -> Result<(WatchConfig, Arc<dyn Notifier>, reqwest::Client), RunError> {
    file.sources.clear();
    let config = WatchConfig::from_env(file)?;
    let client = Watcher::build_client(&config)?;
    let notifier: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new(client.clone(), &config.webhook_url));
    Ok((config, notifier, client))
}

async fn links(file: FileConfig, input: LinkInput) -> Result<ExitCode, RunError> {
    let (_, notifier, client) = webhook_only(file)?;
    let broken = match input {
        LinkInput::File { path } => {
            let targets = read_url_list(&path).await?;
            info!(count = targets.len(), file = %path.display(), "checking links");
            check_links(&client, &targets).await
        }
        LinkInput::Sitemap { url } => {
            let targets = collect_sitemap_urls(&client, &url)
                .await
                .map_err(fetch_failed(&url))?;
            info!(count = targets.len(), sitemap = %url, "checking sitemap pages");
            check_links(&client, &targets).await
        }
        LinkInput::Crawl { url, max_pages } => {
            info!(start = %url, max_pages, "crawling site");
            crawl_site(&client, &url, max_pages)
                .await
                .map_err(fetch_failed(&url))?
        }
    };

    notifier.deliver(&link_report(&broken)).await?;
    info!(broken = broken.len(), "link report delivered");
    Ok(ExitCode::SUCCESS)
}

fn fetch_failed(name: &str) -> impl FnOnce(FetchError) -> RunError {
    let name = name.to_string();
    move |error| RunError::Fetch { name, error }
}

async fn test_card(file: FileConfig, url: &str) -> Result<ExitCode, RunError> {
    let (config, notifier, _) = webhook_only(file)?;
    let item = Item {
        id: "test".to_string(),
        title: "Test notification".to_string(),
        text: Some("This is a test notification from feedwatch.".to_string()),
        url: url.to_string(),
        published_at: Some(chrono::Utc::now()),
        media_url: None,
    };
    let payload = MessageBuilder::new(config.webhook_kind).single("feedwatch", &item, &CardTemplate::default());
    notifier.deliver(&payload).await?;
    info!("test notification delivered");
    Ok(ExitCode::SUCCESS)
}
