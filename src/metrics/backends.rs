//! Metrics sink implementations

use super::{Action, Metrics, Query};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

fn assign_id(action: &mut Action) {
    if action.id.is_empty() {
        action.id = uuid::Uuid::new_v4().to_string();
    }
}

/// In-memory sink; also used to assert on records in tests.
#[derive(Default)]
pub struct MemoryMetrics {
    actions: RwLock<Vec<Action>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in creation order.
    pub async fn actions(&self) -> Vec<Action> {
        self.actions.read().await.clone()
    }

    pub async fn actions_of_kind(&self, kind: &str) -> Vec<Action> {
        self.actions
            .read()
            .await
            .iter()
            .filter(|a| a.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn clear(&self) {
        self.actions.write().await.clear();
    }
}

#[async_trait]
impl Metrics for MemoryMetrics {
    async fn create(&self, action: &mut Action) -> Result<()> {
        assign_id(action);
        self.actions.write().await.push(action.clone());
        Ok(())
    }

    async fn update(&self, action: &Action) -> Result<()> {
        let mut actions = self.actions.write().await;
        match actions.iter_mut().find(|a| a.id == action.id) {
            Some(existing) => {
                *existing = action.clone();
                Ok(())
            }
            None => Err(anyhow!("metrics: unknown action id {:?}", action.id)),
        }
    }

    async fn search(&self, query: &Query) -> Result<Vec<Action>> {
        let actions = self.actions.read().await.clone();
        Ok(query.apply(actions))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum FileEvent {
    Create { action: Action },
    Update { action: Action },
}

/// Sink that appends create/update events to a JSON lines file.
///
/// Searching replays the file; the last event for an id wins.
pub struct FileMetrics {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileMetrics {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, event: &FileEvent) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create metrics directory")?;
            }
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .context("Failed to open metrics file")?;

        let line = serde_json::to_string(event).context("Failed to serialize metric record")?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .context("Failed to write metric record")?;
        file.flush().await?;
        Ok(())
    }

    async fn replay(&self) -> Result<Vec<Action>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to read metrics file"),
        };

        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, Action> = HashMap::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let action = match serde_json::from_str::<FileEvent>(line) {
                Ok(FileEvent::Create { action }) | Ok(FileEvent::Update { action }) => action,
                Err(e) => {
                    tracing::warn!("Skipping malformed metrics line: {e}");
                    continue;
                }
            };
            if !latest.contains_key(&action.id) {
                order.push(action.id.clone());
            }
            latest.insert(action.id.clone(), action);
        }
        Ok(order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect())
    }
}

#[async_trait]
impl Metrics for FileMetrics {
    async fn create(&self, action: &mut Action) -> Result<()> {
        assign_id(action);
        self.append(&FileEvent::Create {
            action: action.clone(),
        })
        .await
    }

    async fn update(&self, action: &Action) -> Result<()> {
        self.append(&FileEvent::Update {
            action: action.clone(),
        })
        .await
    }

    async fn search(&self, query: &Query) -> Result<Vec<Action>> {
        Ok(query.apply(self.replay().await?))
    }
}

/// Sink that only writes records to the log.
#[derive(Debug, Default)]
pub struct LogMetrics;

impl LogMetrics {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Metrics for LogMetrics {
    async fn create(&self, action: &mut Action) -> Result<()> {
        assign_id(action);
        info!(
            id = %action.id,
            kind = %action.kind,
            hostname = %action.hostname,
            "Metrics: action started"
        );
        Ok(())
    }

    async fn update(&self, action: &Action) -> Result<()> {
        info!(
            id = %action.id,
            kind = %action.kind,
            hostname = %action.hostname,
            status = ?action.status,
            fail_reason = %action.fail_reason,
            "Metrics: action finished"
        );
        Ok(())
    }

    async fn search(&self, _query: &Query) -> Result<Vec<Action>> {
        Ok(Vec::new())
    }
}
