use std::path::{Path, PathBuf};
use std::process::Command;

use watch_core::{FileMarkerStore, GitMarkerStore, GitSettings, MarkerStore, MemoryMarkerStore};

fn temp_dir(tag: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "feedwatch_marker_{tag}_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[tokio::test]
async fn missing_file_reads_as_first_run() {
    let dir = temp_dir("missing");
    let store = FileMarkerStore::new(dir.join("latest_tweet_id.json"));

    assert_eq!(store.read().await, None);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn malformed_file_reads_as_first_run() {
    let dir = temp_dir("malformed");
    let path = dir.join("latest_tweet_id.json");
    tokio::fs::write(&path, b"{ this is not json ").await.unwrap();
    let store = FileMarkerStore::new(&path);
    assert_eq!(store.read().await, None);

    tokio::fs::write(&path, br#"{"other":"field"}"#).await.unwrap();
    assert_eq!(store.read().await, None);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn write_persists_latest_id_record() {
    let dir = temp_dir("write");
    let path = dir.join("latest_tweet_id.json");
    let store = FileMarkerStore::new(&path);

    store.write("123").await.expect("first write");
    store.write("456").await.expect("second write");

    let on_disk = tokio::fs::read_to_string(&path).await.unwrap();
    assert_eq!(on_disk, r#"{"latest_id":"456"}"#);
    assert!(!path.with_extension("json.tmp").exists(), "temp file should be renamed away");

    // A fresh store sees the persisted value.
    let reopened = FileMarkerStore::new(&path);
    assert_eq!(reopened.read().await.as_deref(), Some("456"));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn write_creates_missing_parent_directories() {
    let dir = temp_dir("nested");
    let path = dir.join("state").join("markers").join("latest.json");
    let store = FileMarkerStore::new(&path);

    store.write("7").await.expect("write nested marker");
    assert_eq!(store.read().await.as_deref(), Some("7"));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn write_failure_is_reported() {
    let dir = temp_dir("blocked");
    let blocker = dir.join("blocker");
    tokio::fs::write(&blocker, b"a file, not a directory").await.unwrap();
    let store = FileMarkerStore::new(blocker.join("latest.json"));

    assert!(store.write("1").await.is_err());

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn memory_store_round_trips() {
    let store = MemoryMarkerStore::default();
    assert_eq!(store.read().await, None);
    store.write("abc").await.unwrap();
    assert_eq!(store.read().await.as_deref(), Some("abc"));

    let seeded = MemoryMarkerStore::new(Some("x".into()));
    assert_eq!(seeded.read().await.as_deref(), Some("x"));
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git is installed");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[tokio::test]
async fn git_store_commits_and_pushes_marker_inside_repo() {
    let dir = temp_dir("git");
    let remote = dir.join("remote.git");
    let repo = dir.join("repo");
    std::fs::create_dir_all(&remote).unwrap();
    std::fs::create_dir_all(&repo).unwrap();
    git(&remote, &["init", "--bare", "--quiet"]);
    git(&repo, &["init", "--quiet"]);
    git(&repo, &["remote", "add", "origin", remote.to_str().unwrap()]);

    // Relative marker path, and a working directory that is not the repository.
    let store = GitMarkerStore::new("latest_tweet_id.json", GitSettings::new(&repo));
    assert_eq!(store.path(), repo.join("latest_tweet_id.json"));
    assert_eq!(store.read().await, None);

    store.write("456").await.expect("commit and push marker");

    let on_disk = std::fs::read_to_string(repo.join("latest_tweet_id.json")).unwrap();
    assert_eq!(on_disk, r#"{"latest_id":"456"}"#);
    assert_eq!(
        git(&remote, &["log", "--all", "-1", "--format=%s"]),
        "Update latest_tweet_id.json to 456 [skip ci]"
    );
    assert_eq!(git(&repo, &["log", "-1", "--format=%an"]), "github-actions[bot]");
    assert_eq!(store.read().await.as_deref(), Some("456"));

    store.write("789").await.expect("second marker update");
    assert_eq!(
        git(&remote, &["log", "--all", "-1", "--format=%s"]),
        "Update latest_tweet_id.json to 789 [skip ci]"
    );

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn git_store_reports_push_failure() {
    let dir = temp_dir("git_no_remote");
    git(&dir, &["init", "--quiet"]);

    let store = GitMarkerStore::new("latest.json", GitSettings::new(&dir));
    let err = store.write("1").await.unwrap_err();

    assert!(matches!(err, watch_core::StoreError::Git { ref command, .. } if command == "push"));
    // The file itself was still written and committed locally.
    assert_eq!(store.read().await.as_deref(), Some("1"));
    assert_eq!(git(&dir, &["log", "-1", "--format=%s"]), "Update latest.json to 1 [skip ci]");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
