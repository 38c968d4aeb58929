//! 记忆账本：跨 Run 共享的追加式记忆日志 + 目标状态表
//!
//! 持久化为单个 JSON 文档 `{entries, goals, lastUpdated}`。每次变更都在独占文件锁（fs2）下
//! 重新读取磁盘文档、修改、FIFO 裁剪，再写临时文件并 rename 原子替换，
//! 多个 worker 进程并发追加时互不覆盖，读者永远看不到半写的文件。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::AgentError;

/// 账本容量上限，超出时丢弃最旧的条目
pub const MAX_ENTRIES: usize = 1000;

const LEDGER_FILE: &str = "memory.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Goal,
    Task,
    Decision,
    Result,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Goal => "goal",
            MemoryKind::Task => "task",
            MemoryKind::Decision => "decision",
            MemoryKind::Result => "result",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<String>,
}

impl MemoryEntry {
    pub fn new(kind: MemoryKind, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            context: None,
            timestamp: Utc::now(),
            goal_id: None,
        }
    }

    pub fn with_goal(mut self, goal_id: &str) -> Self {
        self.goal_id = Some(goal_id.to_string());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    InProgress,
    Completed,
    Failed,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::InProgress => "in_progress",
            GoalStatus::Completed => "completed",
            GoalStatus::Failed => "failed",
        }
    }
}

/// 每个 Run 一条，比内存中的 Run 活得久，用于进程重启后发现可恢复的目标
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoalRecord {
    pub id: String,
    pub goal: String,
    pub status: GoalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// 磁盘上的账本文档
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDocument {
    #[serde(default)]
    pub entries: Vec<MemoryEntry>,
    #[serde(default)]
    pub goals: Vec<GoalRecord>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub total_entries: usize,
    pub entries_by_type: BTreeMap<String, usize>,
    pub total_goals: usize,
    pub goals_by_status: BTreeMap<String, usize>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// 记忆账本：进程内以 tokio Mutex 串行化，跨进程以文件锁串行化
pub struct MemoryLedger {
    path: Option<PathBuf>,
    doc: Mutex<LedgerDocument>,
    max_entries: usize,
}

impl MemoryLedger {
    /// 打开 `<data_dir>/memory.json`（不存在则从空账本开始）
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, AgentError> {
        let dir = data_dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LEDGER_FILE);
        let doc = read_document(&path)?;
        tracing::info!(
            path = %path.display(),
            entries = doc.entries.len(),
            goals = doc.goals.len(),
            "memory ledger opened"
        );
        Ok(Self {
            path: Some(path),
            doc: Mutex::new(doc),
            max_entries: MAX_ENTRIES,
        })
    }

    /// 纯内存账本（测试用）
    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: Mutex::new(LedgerDocument::default()),
            max_entries: MAX_ENTRIES,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 在锁内执行一次变更：有路径时先从磁盘重读，变更后裁剪并原子写回
    async fn mutate<F, R>(&self, f: F) -> Result<R, AgentError>
    where
        F: FnOnce(&mut LedgerDocument) -> R + Send + 'static,
        R: Send + 'static,
    {
        let mut guard = self.doc.lock().await;
        let max_entries = self.max_entries;

        let Some(path) = self.path.clone() else {
            let out = f(&mut *guard);
            finish(&mut *guard, max_entries);
            return Ok(out);
        };

        let (doc, out) = tokio::task::spawn_blocking(move || -> Result<_, AgentError> {
            let lock = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(lock_path(&path))?;
            lock.lock_exclusive()?;

            let mut doc = read_document(&path)?;
            let out = f(&mut doc);
            finish(&mut doc, max_entries);
            write_document(&path, &doc)?;
            Ok((doc, out))
        })
        .await
        .map_err(|e| AgentError::Persistence(format!("ledger write task failed: {}", e)))??;

        *guard = doc;
        Ok(out)
    }

    pub async fn append(&self, entry: MemoryEntry) -> Result<MemoryEntry, AgentError> {
        let stored = entry.clone();
        self.mutate(move |doc| doc.entries.push(entry)).await?;
        Ok(stored)
    }

    /// 最近 limit 条（可按 goalId 过滤），按时间正序
    pub async fn recent(&self, limit: usize, goal_id: Option<&str>) -> Vec<MemoryEntry> {
        let doc = self.doc.lock().await;
        let filtered: Vec<&MemoryEntry> = doc
            .entries
            .iter()
            .filter(|e| goal_id.map_or(true, |g| e.goal_id.as_deref() == Some(g)))
            .collect();
        let skip = filtered.len().saturating_sub(limit);
        filtered.into_iter().skip(skip).cloned().collect()
    }

    /// 供 prompt 使用：最近的在前，每行 `[timestamp] [TYPE] content`
    pub async fn format_recent(&self, limit: usize, goal_id: Option<&str>) -> String {
        self.recent(limit, goal_id)
            .await
            .iter()
            .rev()
            .map(|e| {
                format!(
                    "[{}] [{}] {}",
                    e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    e.kind.as_str().to_uppercase(),
                    e.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 新建或重置目标记录为 in_progress（保留原 createdAt）
    pub async fn upsert_goal(&self, id: &str, goal: &str) -> Result<(), AgentError> {
        let (id, goal) = (id.to_string(), goal.to_string());
        self.mutate(move |doc| {
            if let Some(record) = doc.goals.iter_mut().find(|g| g.id == id) {
                record.goal = goal;
                record.status = GoalStatus::InProgress;
                record.completed_at = None;
            } else {
                doc.goals.push(GoalRecord {
                    id,
                    goal,
                    status: GoalStatus::InProgress,
                    created_at: Utc::now(),
                    completed_at: None,
                });
            }
        })
        .await
    }

    /// 更新目标状态；目标不存在时返回 false
    pub async fn set_goal_status(&self, id: &str, status: GoalStatus) -> Result<bool, AgentError> {
        let id = id.to_string();
        self.mutate(move |doc| match doc.goals.iter_mut().find(|g| g.id == id) {
            Some(record) => {
                record.status = status;
                record.completed_at = match status {
                    GoalStatus::InProgress => None,
                    _ => Some(Utc::now()),
                };
                true
            }
            None => false,
        })
        .await
    }

    pub async fn unfinished_goals(&self) -> Vec<GoalRecord> {
        self.doc
            .lock()
            .await
            .goals
            .iter()
            .filter(|g| g.status == GoalStatus::InProgress)
            .cloned()
            .collect()
    }

    pub async fn goals(&self) -> Vec<GoalRecord> {
        self.doc.lock().await.goals.clone()
    }

    pub async fn stats(&self) -> LedgerStats {
        let doc = self.doc.lock().await;
        let mut entries_by_type = BTreeMap::new();
        for e in &doc.entries {
            *entries_by_type.entry(e.kind.as_str().to_string()).or_insert(0) += 1;
        }
        let mut goals_by_status = BTreeMap::new();
        for g in &doc.goals {
            *goals_by_status.entry(g.status.as_str().to_string()).or_insert(0) += 1;
        }
        LedgerStats {
            total_entries: doc.entries.len(),
            entries_by_type,
            total_goals: doc.goals.len(),
            goals_by_status,
            last_updated: doc.last_updated,
        }
    }

    /// 清空记忆与目标表
    pub async fn clear(&self) -> Result<(), AgentError> {
        self.mutate(|doc| {
            doc.entries.clear();
            doc.goals.clear();
        })
        .await?;
        tracing::info!("memory ledger cleared");
        Ok(())
    }
}

fn finish(doc: &mut LedgerDocument, max_entries: usize) {
    if doc.entries.len() > max_entries {
        let excess = doc.entries.len() - max_entries;
        doc.entries.drain(..excess);
    }
    doc.last_updated = Some(Utc::now());
}

fn lock_path(path: &Path) -> PathBuf {
    path.with_extension("json.lock")
}

fn read_document(path: &Path) -> Result<LedgerDocument, AgentError> {
    match std::fs::read_to_string(path) {
        Ok(data) if data.trim().is_empty() => Ok(LedgerDocument::default()),
        Ok(data) => serde_json::from_str(&data).map_err(|e| {
            AgentError::Persistence(format!("corrupt ledger {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LedgerDocument::default()),
        Err(e) => Err(e.into()),
    }
}

/// 写临时文件后 rename 原子替换
fn write_document(path: &Path, doc: &LedgerDocument) -> Result<(), AgentError> {
    let tmp_path = path.with_extension("json.tmp");
    let mut buf = serde_json::to_string_pretty(doc)?;
    buf.push('\n');
    std::fs::write(&tmp_path, buf)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
