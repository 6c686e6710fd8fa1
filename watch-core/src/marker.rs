use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Persisted id of the last item that was successfully notified.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// Missing or unreadable state reads as `None`, i.e. a first run.
    async fn read(&self) -> Option<String>;

    async fn write(&self, id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct MarkerRecord {
    latest_id: String,
}

/// `{"latest_id": "..."}` in a single JSON file.
#[derive(Debug, Clone)]
pub struct FileMarkerStore {
    path: PathBuf,
}

impl FileMarkerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MarkerStore for FileMarkerStore {
    async fn read(&self) -> Option<String> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, path = %self.path.display(), "no marker file, treating as first run");
                return None;
            }
        };
        match serde_json::from_slice::<MarkerRecord>(&bytes) {
            Ok(record) => Some(record.latest_id),
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "malformed marker file, treating as first run");
                None
            }
        }
    }

    async fn write(&self, id: &str) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&MarkerRecord {
            latest_id: id.to_owned(),
        })?;
        let io_err = |error| StoreError::Io {
            path: self.path.clone(),
            error,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        // Write-then-rename so a crash never leaves a half-written marker.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;

        info!(path = %self.path.display(), latest_id = id, "marker updated");
        Ok(())
    }
}

/// Process-local marker.
#[derive(Debug, Clone, Default)]
pub struct MemoryMarkerStore {
    inner: Arc<RwLock<Option<String>>>,
}

impl MemoryMarkerStore {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }
}

#[async_trait]
impl MarkerStore for MemoryMarkerStore {
    async fn read(&self) -> Option<String> {
        self.inner.read().await.clone()
    }

    async fn write(&self, id: &str) -> Result<(), StoreError> {
        *self.inner.write().await = Some(id.to_owned());
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitSettings {
    pub repo_dir: PathBuf,
    #[serde(default = "default_git_user")]
    pub user_name: String,
    #[serde(default = "default_git_email")]
    pub user_email: String,
    #[serde(default = "default_git_remote")]
    pub remote: String,
}

impl GitSettings {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            user_name: default_git_user(),
            user_email: default_git_email(),
            remote: default_git_remote(),
        }
    }
}

fn default_git_user() -> String {
    "github-actions[bot]".to_string()
}

fn default_git_email() -> String {
    "github-actions[bot]@users.noreply.github.com".to_string()
}

fn default_git_remote() -> String {
    "origin".to_string()
}

/// File marker that is committed and pushed after every write, for runners
/// whose only durable state is the repository itself.
#[derive(Debug, Clone)]
pub struct GitMarkerStore {
    file: FileMarkerStore,
    git: GitSettings,
}

impl GitMarkerStore {
    /// A relative `marker` path is taken relative to `git.repo_dir`.
    pub fn new(marker: impl Into<PathBuf>, git: GitSettings) -> Self {
        let marker = marker.into();
        let path = if marker.is_absolute() {
            marker
        } else {
            git.repo_dir.join(marker)
        };
        Self {
            file: FileMarkerStore::new(path),
            git,
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Marker path as `git add` sees it from inside the repository.
    fn repo_relative_path(&self) -> PathBuf {
        let path = self.file.path();
        path.strip_prefix(&self.git.repo_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    async fn git(&self, args: &[&str]) -> Result<(), StoreError> {
        let command = args.first().copied().unwrap_or_default().to_string();
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.git.repo_dir)
            .output()
            .await
            .map_err(|e| StoreError::Git {
                command: command.clone(),
                detail: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(StoreError::Git {
                command,
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl MarkerStore for GitMarkerStore {
    async fn read(&self) -> Option<String> {
        self.file.read().await
    }

    async fn write(&self, id: &str) -> Result<(), StoreError> {
        self.file.write(id).await?;

        let path = self.repo_relative_path().to_string_lossy().into_owned();
        let file_name = self
            .file
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        let message = format!("Update {file_name} to {id} [skip ci]");

        self.git(&["config", "user.name", &self.git.user_name]).await?;
        self.git(&["config", "user.email", &self.git.user_email]).await?;
        self.git(&["add", &path]).await?;
        self.git(&["commit", "-m", &message]).await?;
        self.git(&["push", &self.git.remote, "HEAD"]).await?;

        info!(file = %file_name, latest_id = id, "pushed marker update");
        Ok(())
    }
}
