//! 运行状态定义：Run / Task / Reflection / LogEntry
//!
//! Run 是单个目标的一次执行单元，序列化后即为推送给观察者的「快照」。
//! 字段名（camelCase）是对外契约，调用方依赖快照结构，不可随意改名。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Run 状态：idle → planning → executing ⇄ reflecting → completed / failed / paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Planning,
    Executing,
    Reflecting,
    Completed,
    Failed,
    Paused,
}

impl RunStatus {
    /// 循环停止后的状态（含 paused）
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Paused)
    }
}

/// Task 状态：pending → running → done / failed，或 skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

/// Reflector 给出的结构化评估
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reflection {
    pub success: bool,
    pub analysis: String,
    pub should_retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjustments: Option<String>,
    /// 0-100
    pub confidence: u8,
}

impl Reflection {
    /// 反思失败时的安全默认值：视为成功、不重试、置信度 50
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            analysis: reason.into(),
            should_retry: false,
            adjustments: None,
            confidence: 50,
        }
    }
}

/// Planner 生成的单个任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Run 内的序号（从 1 开始）
    pub id: u32,
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub reflection: Option<Reflection>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: u32, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            status: TaskStatus::Pending,
            result: None,
            reflection: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// 日志类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Info,
    Task,
    Tool,
    Reflection,
    Error,
    Warning,
}

/// Run 内的追加式日志条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// 一次目标执行（快照）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub goal: String,
    pub tasks: Vec<Task>,
    /// 当前执行任务的 1-based 下标；0 表示尚未开始
    pub current_task_index: usize,
    pub log: Vec<LogEntry>,
    pub status: RunStatus,
    pub steps_executed: u32,
    pub max_steps: u32,
    pub autonomous: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(id: impl Into<String>, goal: impl Into<String>, max_steps: u32, autonomous: bool) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            goal: goal.into(),
            tasks: Vec::new(),
            current_task_index: 0,
            log: Vec::new(),
            status: RunStatus::Idle,
            steps_executed: 0,
            max_steps,
            autonomous,
            created_at: now,
            updated_at: now,
        }
    }

    /// 追加日志并刷新 updatedAt；同时输出到 tracing
    pub fn log(&mut self, kind: LogKind, message: impl Into<String>, data: Option<Value>) {
        let message = message.into();
        match kind {
            LogKind::Error => tracing::error!(run_id = %self.id, "{}", message),
            LogKind::Warning => tracing::warn!(run_id = %self.id, "{}", message),
            _ => tracing::info!(run_id = %self.id, kind = ?kind, "{}", message),
        }
        let now = Utc::now();
        self.log.push(LogEntry {
            timestamp: now,
            kind,
            message,
            data,
        });
        self.updated_at = now;
    }

    pub fn all_tasks_done(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Done)
    }
}
