use std::path::PathBuf;

use watch_core::{ConfigError, FileConfig, SourceKind, WatchConfig, WebhookKind};

fn temp_file(tag: &str, content: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "feedwatch_config_{tag}_{}.json",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn explicit_config_file_is_loaded() {
    let path = temp_file(
        "valid",
        r#"{
            "webhook_env": "TEAMS_WEBHOOK_URL2",
            "window_hours": 12,
            "retry": { "max_attempts": 2 },
            "git": { "repo_dir": "." },
            "sources": [
                { "name": "Blog", "url": "https://blog.example.com/rss" },
                { "name": "Posts", "url": "https://api.example.com/2/users/1/tweets",
                  "kind": "api", "item_url": "https://x.com/u/status/{id}",
                  "marker_path": "state/latest.json",
                  "card": { "title": "Updated!" } }
            ]
        }"#,
    );

    let file = FileConfig::load(Some(path.as_path())).expect("load config");
    assert_eq!(file.window_hours, 12);
    assert_eq!(file.retry.max_attempts, 2);
    assert_eq!(file.retry.default_wait_seconds, 60);
    let git = file.git.as_ref().expect("git settings");
    assert_eq!(git.user_name, "github-actions[bot]");
    assert_eq!(file.sources[1].kind, SourceKind::Api);
    assert_eq!(file.sources[1].marker_file(), PathBuf::from("state/latest.json"));

    let config = WatchConfig::resolve(file, |name| match name {
        "TEAMS_WEBHOOK_URL2" => Some("https://hooks.example.com/abc".to_string()),
        "TWITTER_BEARER_TOKEN" => Some("secret".to_string()),
        _ => None,
    })
    .expect("resolve config");
    assert_eq!(config.webhook_kind, WebhookKind::Teams);
    assert_eq!(config.window_hours, 12);
    assert_eq!(config.auth_token.as_deref(), Some("secret"));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn unparsable_explicit_config_is_an_error() {
    let path = temp_file("broken", "{ not json");
    assert!(matches!(FileConfig::load(Some(path.as_path())), Err(ConfigError::Parse { .. })));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn missing_explicit_config_is_an_error() {
    let path = std::env::temp_dir().join("feedwatch_config_missing_nowhere.json");
    assert!(matches!(FileConfig::load(Some(path.as_path())), Err(ConfigError::Read { .. })));
}

#[test]
fn invalid_source_url_is_rejected_before_any_request() {
    let path = temp_file(
        "bad_source",
        r#"{ "sources": [ { "name": "Bad", "url": "not a url" } ] }"#,
    );
    let file = FileConfig::load(Some(path.as_path())).unwrap();
    let err = WatchConfig::resolve(file, |_| Some("https://hooks.example.com/abc".to_string())).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { ref name, .. } if name == "Bad"));
    let _ = std::fs::remove_file(&path);
}
