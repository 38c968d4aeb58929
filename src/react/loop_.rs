//! 编排主循环
//!
//! idle -> planning -> executing <-> reflecting -> (completed | failed | paused)。
//! 每次状态变化通过可选的快照通道推送一份 Run 克隆（严格按因果顺序）；
//! run() 从不向外返回错误，总是给出终态或 paused 的 Run。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;

use crate::config::AgentSection;
use crate::core::{AgentError, LogKind, Run, RunStatus, TaskStatus};
use crate::llm::ReasoningGateway;
use crate::memory::{GoalStatus, MemoryEntry, MemoryKind, MemoryLedger};
use crate::react::{Planner, Reflector, TaskExecutor};
use crate::tools::ToolExecutor;

/// 快照通道：编排循环每次状态变化发送一份 Run 克隆
pub type SnapshotSender = mpsc::UnboundedSender<Run>;

/// 任务记忆条目中结果摘要的上限（字符）
const TASK_SUMMARY_CHARS: usize = 300;

/// 单次运行的策略参数
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub max_steps: u32,
    /// 单个任务的最大尝试次数（含首次）
    pub max_retries: u32,
    pub reflection: bool,
    pub autonomous: bool,
    pub retry_backoff_ms: u64,
    /// 0 表示关闭
    pub min_confidence: u8,
}

impl From<&AgentSection> for RunConfig {
    fn from(agent: &AgentSection) -> Self {
        Self {
            max_steps: agent.max_steps,
            max_retries: agent.max_retries,
            reflection: agent.reflection,
            autonomous: agent.autonomous,
            retry_backoff_ms: agent.retry_backoff_ms,
            min_confidence: agent.min_confidence,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from(&AgentSection::default())
    }
}

impl RunConfig {
    pub fn with_autonomous(mut self, autonomous: bool) -> Self {
        self.autonomous = autonomous;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }
}

/// 第 attempt 次尝试失败后的退避时长：base * 2^(attempt-1)
pub fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

fn send_snapshot(tx: Option<&SnapshotSender>, run: &Run) {
    if let Some(t) = tx {
        let _ = t.send(run.clone());
    }
}

fn clip_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 编排器：Planner / Executor / Reflector 与记忆账本的组合，一个进程构造一次
pub struct Orchestrator {
    planner: Planner,
    executor: TaskExecutor,
    reflector: Reflector,
    ledger: Arc<MemoryLedger>,
    memory_entries: usize,
}

impl Orchestrator {
    pub fn new(
        gateway: ReasoningGateway,
        tools: Arc<ToolExecutor>,
        ledger: Arc<MemoryLedger>,
        memory_entries: usize,
    ) -> Self {
        let planner = Planner::new(gateway.clone(), tools.registry().prompt_section());
        let executor = TaskExecutor::new(gateway.clone(), tools, ledger.clone(), memory_entries);
        let reflector = Reflector::new(gateway, ledger.clone());
        Self {
            planner,
            executor,
            reflector,
            ledger,
            memory_entries,
        }
    }

    pub fn ledger(&self) -> &Arc<MemoryLedger> {
        &self.ledger
    }

    /// 执行一个目标直到终态或 paused；任何内部错误都被转为 failed 状态
    pub async fn run(
        &self,
        id: impl Into<String>,
        goal: &str,
        cfg: &RunConfig,
        tx: Option<&SnapshotSender>,
    ) -> Run {
        let mut run = Run::new(id, goal, cfg.max_steps, cfg.autonomous);
        tracing::info!(run_id = %run.id, autonomous = cfg.autonomous, max_steps = cfg.max_steps, "run started");

        if let Err(e) = self.drive(&mut run, cfg, tx).await {
            run.status = RunStatus::Failed;
            run.log(LogKind::Error, format!("Run failed: {}", e), None);
            if let Err(e) = self.ledger.set_goal_status(&run.id, GoalStatus::Failed).await {
                tracing::error!(run_id = %run.id, error = %e, "failed to mark goal as failed");
            }
            send_snapshot(tx, &run);
        }

        tracing::info!(
            run_id = %run.id,
            status = ?run.status,
            steps = run.steps_executed,
            "run finished"
        );
        run
    }

    /// 以 autonomous=true 重新执行所有 in_progress 目标，沿用原 Run id
    pub async fn resume_unfinished(&self, cfg: &RunConfig, tx: Option<&SnapshotSender>) -> Vec<Run> {
        let cfg = cfg.clone().with_autonomous(true);
        let mut runs = Vec::new();
        for record in self.ledger.unfinished_goals().await {
            tracing::info!(run_id = %record.id, "resuming unfinished goal");
            runs.push(self.run(record.id, &record.goal, &cfg, tx).await);
        }
        runs
    }

    async fn drive(
        &self,
        run: &mut Run,
        cfg: &RunConfig,
        tx: Option<&SnapshotSender>,
    ) -> Result<(), AgentError> {
        self.ledger.upsert_goal(&run.id, &run.goal).await?;
        self.ledger
            .append(MemoryEntry::new(MemoryKind::Goal, run.goal.clone()).with_goal(&run.id))
            .await?;

        run.status = RunStatus::Planning;
        run.log(LogKind::Info, format!("Planning goal: {}", run.goal), None);
        send_snapshot(tx, run);

        let memory = self.ledger.format_recent(self.memory_entries, None).await;
        let tasks = self.planner.plan(&run.goal, &memory).await;
        if tasks.is_empty() {
            return Err(AgentError::EmptyPlan);
        }
        let descriptions: Vec<&str> = tasks.iter().map(|t| t.description.as_str()).collect();
        let data = json!({ "tasks": descriptions });
        run.tasks = tasks;
        run.log(
            LogKind::Info,
            format!("Planned {} tasks", run.tasks.len()),
            Some(data),
        );
        send_snapshot(tx, run);

        for idx in 0..run.tasks.len() {
            if run.steps_executed >= run.max_steps {
                run.status = RunStatus::Paused;
                run.log(
                    LogKind::Warning,
                    format!(
                        "Step budget exhausted ({}/{}), pausing before task {}",
                        run.steps_executed,
                        run.max_steps,
                        idx + 1
                    ),
                    None,
                );
                send_snapshot(tx, run);
                return Ok(());
            }

            let status = self.run_task(run, idx, cfg, tx).await?;

            if status == TaskStatus::Failed && !run.autonomous {
                run.status = RunStatus::Failed;
                run.log(
                    LogKind::Error,
                    format!("Task {} failed, halting (run is not autonomous)", idx + 1),
                    None,
                );
                self.ledger
                    .set_goal_status(&run.id, GoalStatus::Failed)
                    .await?;
                send_snapshot(tx, run);
                return Ok(());
            }
        }

        if run.all_tasks_done() {
            run.status = RunStatus::Completed;
            run.log(LogKind::Info, "All tasks completed", None);
            self.ledger
                .set_goal_status(&run.id, GoalStatus::Completed)
                .await?;
        } else {
            run.status = RunStatus::Failed;
            let failed = run
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Failed)
                .count();
            run.log(
                LogKind::Error,
                format!("Run finished with {} failed task(s)", failed),
                None,
            );
            self.ledger
                .set_goal_status(&run.id, GoalStatus::Failed)
                .await?;
        }
        send_snapshot(tx, run);
        Ok(())
    }

    /// 执行单个任务（含重试）并返回最终任务状态
    async fn run_task(
        &self,
        run: &mut Run,
        idx: usize,
        cfg: &RunConfig,
        tx: Option<&SnapshotSender>,
    ) -> Result<TaskStatus, AgentError> {
        let task_id = run.tasks[idx].id;
        run.current_task_index = idx + 1;
        run.tasks[idx].status = TaskStatus::Running;
        run.tasks[idx].started_at = Some(Utc::now());
        run.status = RunStatus::Executing;
        let message = format!("Starting task {}: {}", task_id, run.tasks[idx].description);
        run.log(LogKind::Task, message, None);
        send_snapshot(tx, run);

        let max_attempts = cfg.max_retries.max(1);
        let mut attempts = 0u32;
        let final_status = loop {
            attempts += 1;
            let outcome = self.executor.execute(run, idx).await;
            run.steps_executed += 1;
            let text = match outcome {
                Ok(text) => text,
                Err(e) => {
                    run.log(
                        LogKind::Error,
                        format!("Task {} attempt {} errored: {}", task_id, attempts, e),
                        None,
                    );
                    if attempts >= max_attempts || run.steps_executed >= run.max_steps {
                        run.tasks[idx].result = Some(format!(
                            "Task failed after {} attempt(s): {}",
                            attempts, e
                        ));
                        break TaskStatus::Failed;
                    }
                    self.backoff(cfg, attempts).await;
                    continue;
                }
            };

            run.tasks[idx].result = Some(text.clone());
            run.updated_at = Utc::now();
            send_snapshot(tx, run);

            if !cfg.reflection {
                break TaskStatus::Done;
            }

            run.status = RunStatus::Reflecting;
            let task = run.tasks[idx].clone();
            let reflection = self
                .reflector
                .reflect(&run.id, &run.goal, &task, &text)
                .await?;
            let low_confidence = cfg.min_confidence > 0 && reflection.confidence < cfg.min_confidence;
            let wants_retry = reflection.should_retry || low_confidence;
            let success = reflection.success;
            run.log(
                LogKind::Reflection,
                format!(
                    "Task {} reviewed: success={} confidence={}",
                    task_id, reflection.success, reflection.confidence
                ),
                serde_json::to_value(&reflection).ok(),
            );
            run.tasks[idx].reflection = Some(reflection);
            send_snapshot(tx, run);

            if wants_retry && attempts < max_attempts && run.steps_executed < run.max_steps {
                run.log(
                    LogKind::Warning,
                    format!(
                        "Retrying task {} (attempt {}/{})",
                        task_id,
                        attempts + 1,
                        max_attempts
                    ),
                    None,
                );
                self.backoff(cfg, attempts).await;
                run.status = RunStatus::Executing;
                send_snapshot(tx, run);
                continue;
            }
            break if success {
                TaskStatus::Done
            } else {
                TaskStatus::Failed
            };
        };

        let task = &mut run.tasks[idx];
        task.status = final_status;
        task.completed_at = Some(Utc::now());
        let verdict = if final_status == TaskStatus::Done { "done" } else { "failed" };
        let summary = format!(
            "Task {} {}: {} => {}",
            task.id,
            verdict,
            task.description,
            clip_chars(task.result.as_deref().unwrap_or(""), TASK_SUMMARY_CHARS)
        );
        run.log(
            LogKind::Task,
            format!("Task {} {} after {} attempt(s)", task_id, verdict, attempts),
            None,
        );
        self.ledger
            .append(MemoryEntry::new(MemoryKind::Task, summary).with_goal(&run.id))
            .await?;
        send_snapshot(tx, run);
        Ok(final_status)
    }

    async fn backoff(&self, cfg: &RunConfig, attempt: u32) {
        let delay = retry_delay(cfg.retry_backoff_ms, attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
