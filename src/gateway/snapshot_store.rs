//! Run 快照存储抽象层
//!
//! 按 run id 保存最新快照并带过期时间；过期快照读取时视为不存在。
//! 内存实现用于单进程，文件实现（`<data_dir>/runs/<id>.json`）可被多个进程共享。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::{AgentError, Run};

/// 快照存储接口
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// 覆盖保存某个 Run 的最新快照，并刷新过期时间
    async fn put(&self, run: &Run) -> Result<(), AgentError>;

    /// 读取最新快照；不存在或已过期返回 None
    async fn get(&self, run_id: &str) -> Result<Option<Run>, AgentError>;

    /// 清理过期快照，返回清理数量
    async fn purge_expired(&self) -> usize;
}

/// run id 只允许字母数字、`-`、`_`（文件存储以 id 作为文件名）
pub fn is_valid_run_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn expiry(ttl: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1))
}

/// 内存快照存储
pub struct MemorySnapshotStore {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Run, DateTime<Utc>)>>,
}

impl MemorySnapshotStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn put(&self, run: &Run) -> Result<(), AgentError> {
        self.entries
            .write()
            .await
            .insert(run.id.clone(), (run.clone(), expiry(self.ttl)));
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<Run>, AgentError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(run_id)
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .map(|(run, _)| run.clone()))
    }

    async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - entries.len()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSnapshot {
    expires_at: DateTime<Utc>,
    run: Run,
}

/// 文件快照存储：每个 Run 一个 JSON 文档，写临时文件后 rename
pub struct FileSnapshotStore {
    dir: PathBuf,
    ttl: Duration,
}

impl FileSnapshotStore {
    pub fn new(data_dir: impl AsRef<Path>, ttl: Duration) -> Result<Self, AgentError> {
        let dir = data_dir.as_ref().join("runs");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, ttl })
    }

    fn path_for(&self, run_id: &str) -> Option<PathBuf> {
        is_valid_run_id(run_id).then(|| self.dir.join(format!("{}.json", run_id)))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn put(&self, run: &Run) -> Result<(), AgentError> {
        let path = self
            .path_for(&run.id)
            .ok_or_else(|| AgentError::Persistence(format!("invalid run id: {}", run.id)))?;
        let doc = StoredSnapshot {
            expires_at: expiry(self.ttl),
            run: run.clone(),
        };
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serde_json::to_vec(&doc)?).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<Run>, AgentError> {
        let Some(path) = self.path_for(run_id) else {
            return Ok(None);
        };
        let data = match tokio::fs::read(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let doc: StoredSnapshot = serde_json::from_slice(&data)?;
        if doc.expires_at <= Utc::now() {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(doc.run))
    }

    async fn purge_expired(&self) -> usize {
        let mut removed = 0;
        let Ok(mut dir) = tokio::fs::read_dir(&self.dir).await else {
            return 0;
        };
        let now = Utc::now();
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let expired = match tokio::fs::read(&path).await {
                Ok(data) => serde_json::from_slice::<StoredSnapshot>(&data)
                    .map(|doc| doc.expires_at <= now)
                    .unwrap_or(true),
                Err(_) => false,
            };
            if expired && tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "purged expired run snapshots");
        }
        removed
    }
}
