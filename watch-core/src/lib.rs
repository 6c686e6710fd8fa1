pub mod config;
pub mod detect;
pub mod error;
pub mod fetcher;
pub mod item;
pub mod links;
pub mod marker;
pub mod notify;
pub mod pipeline;
pub mod status;

pub use config::{FileConfig, WatchConfig};
pub use detect::{select_recent, select_unseen, Detector};
pub use error::{ConfigError, DeliveryError, FetchError, RunError, StoreError};
pub use fetcher::{ApiFetcher, FeedFetcher, Fetcher, RetryPolicy};
pub use item::{Item, SourceDescriptor, SourceKind};
pub use marker::{FileMarkerStore, GitMarkerStore, GitSettings, MarkerStore, MemoryMarkerStore};
pub use notify::{CardTemplate, MessageBuilder, Notifier, Payload, SourceItems, WebhookKind, WebhookNotifier};
pub use pipeline::{run_identity, run_window, RunReport, Watcher};
pub use status::{Incident, StatusFetcher};
