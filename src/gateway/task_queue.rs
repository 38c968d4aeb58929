//! 后台作业队列
//!
//! HTTP 层只负责入队并立即返回 run id；worker 从待执行通道取作业，
//! 在独立 tokio 任务中驱动编排循环，并把每份快照按顺序经事件网关发布。
//! 编排任务 panic 时由 worker 合成一份 failed 快照并发布 error 事件。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, LogKind, Run, RunStatus};
use crate::gateway::EventGateway;
use crate::memory::GoalStatus;
use crate::react::{Orchestrator, RunConfig};

/// 作业状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// 等待 worker
    Queued,
    Running,
    /// 编排循环已返回（Run 本身可能是 completed / failed / paused）
    Finished,
    /// worker 级失败（编排任务 panic）
    Failed,
}

/// 作业记录
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub goal: String,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub run_status: Option<RunStatus>,
    pub error: Option<String>,
}

struct Job {
    id: String,
    goal: String,
    config: RunConfig,
}

/// 已结束作业记录的默认保留时间，与快照 TTL 一致
const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(3600);

/// 作业队列（内存版）
pub struct JobQueue {
    jobs: RwLock<HashMap<String, JobRecord>>,
    record_ttl: Duration,
    pending_tx: mpsc::UnboundedSender<Job>,
    pending_rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    orchestrator: Arc<Orchestrator>,
    events: Arc<EventGateway>,
    default_config: RunConfig,
}

impl JobQueue {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        events: Arc<EventGateway>,
        default_config: RunConfig,
    ) -> Self {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        Self {
            jobs: RwLock::new(HashMap::new()),
            record_ttl: DEFAULT_RECORD_TTL,
            pending_tx,
            pending_rx: Arc::new(Mutex::new(pending_rx)),
            orchestrator,
            events,
            default_config,
        }
    }

    /// 已结束作业记录保留多久（通常取 queue.snapshot_ttl_secs）
    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }

    pub fn default_config(&self) -> &RunConfig {
        &self.default_config
    }

    pub fn events(&self) -> &Arc<EventGateway> {
        &self.events
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    async fn register(&self, id: &str, goal: &str, config: &RunConfig) {
        let record = JobRecord {
            id: id.to_string(),
            goal: goal.to_string(),
            status: JobStatus::Queued,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            run_status: None,
            error: None,
        };
        {
            let mut jobs = self.jobs.write().await;
            prune_finished(&mut jobs, self.record_ttl);
            jobs.insert(id.to_string(), record);
        }

        // 入队即发布 idle 快照，状态查询和订阅不必等 worker
        let run = Run::new(id, goal, config.max_steps, config.autonomous);
        if let Err(e) = self.events.publish(&run).await {
            tracing::warn!(run_id = %id, error = %e, "initial snapshot not persisted");
        }
    }

    /// 入队一个目标，返回 run id；id 为空时生成 uuid
    pub async fn enqueue(
        &self,
        goal: &str,
        config: Option<RunConfig>,
        id: Option<String>,
    ) -> Result<String, AgentError> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let config = config.unwrap_or_else(|| self.default_config.clone());
        self.register(&id, goal, &config).await;
        self.pending_tx
            .send(Job {
                id: id.clone(),
                goal: goal.to_string(),
                config,
            })
            .map_err(|_| AgentError::Queue("job channel closed".to_string()))?;
        tracing::info!(run_id = %id, "job enqueued");
        Ok(id)
    }

    /// 在当前任务中直接执行并返回最终 Run（同步 HTTP 模式）
    pub async fn run_now(&self, goal: &str, config: Option<RunConfig>) -> Run {
        let id = uuid::Uuid::new_v4().to_string();
        let config = config.unwrap_or_else(|| self.default_config.clone());
        self.register(&id, goal, &config).await;
        self.process(Job {
            id,
            goal: goal.to_string(),
            config,
        })
        .await
    }

    pub async fn get(&self, id: &str) -> Option<JobRecord> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<_> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.enqueued_at);
        jobs
    }

    async fn is_active(&self, id: &str) -> bool {
        self.jobs
            .read()
            .await
            .get(id)
            .is_some_and(|j| matches!(j.status, JobStatus::Queued | JobStatus::Running))
    }

    /// 把账本中所有 in_progress 目标以 autonomous=true 重新入队（沿用原 id）
    pub async fn resume_unfinished(&self) -> Result<Vec<String>, AgentError> {
        let config = self.default_config.clone().with_autonomous(true);
        let mut ids = Vec::new();
        for record in self.orchestrator.ledger().unfinished_goals().await {
            if self.is_active(&record.id).await {
                continue;
            }
            tracing::info!(run_id = %record.id, "resuming unfinished goal");
            ids.push(
                self.enqueue(&record.goal, Some(config.clone()), Some(record.id))
                    .await?,
            );
        }
        Ok(ids)
    }

    async fn update<F: FnOnce(&mut JobRecord)>(&self, id: &str, f: F) {
        if let Some(record) = self.jobs.write().await.get_mut(id) {
            f(record);
        }
    }

    /// 启动 n 个 worker；取消令牌触发后 worker 在当前作业结束后退出
    pub fn spawn_workers(self: &Arc<Self>, n: usize, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..n.max(1))
            .map(|worker| {
                let queue = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tracing::info!(worker, "job worker started");
                    loop {
                        let job = tokio::select! {
                            _ = cancel.cancelled() => break,
                            job = async { queue.pending_rx.lock().await.recv().await } => job,
                        };
                        let Some(job) = job else { break };
                        queue.process(job).await;
                    }
                    tracing::info!(worker, "job worker stopped");
                })
            })
            .collect()
    }

    async fn process(&self, job: Job) -> Run {
        let Job { id, goal, config } = job;
        self.update(&id, |r| {
            r.status = JobStatus::Running;
            r.started_at = Some(Utc::now());
        })
        .await;

        let (tx, mut rx) = mpsc::unbounded_channel::<Run>();
        let orchestrator = self.orchestrator.clone();
        let task_id = id.clone();
        let task_goal = goal.clone();
        let task_config = config.clone();
        let handle = tokio::spawn(async move {
            orchestrator
                .run(task_id, &task_goal, &task_config, Some(&tx))
                .await
        });

        // 快照按编排循环的发送顺序逐个发布；发送端随任务结束（或 panic）被丢弃
        let mut last: Option<Run> = None;
        while let Some(run) = rx.recv().await {
            if let Err(e) = self.events.publish(&run).await {
                tracing::warn!(run_id = %run.id, error = %e, "snapshot publish failed");
            }
            last = Some(run);
        }

        match handle.await {
            Ok(run) => {
                let status = run.status;
                self.update(&id, |r| {
                    r.status = JobStatus::Finished;
                    r.finished_at = Some(Utc::now());
                    r.run_status = Some(status);
                })
                .await;
                run
            }
            Err(join_err) => {
                let message = format!("Worker crashed: {}", join_err);
                tracing::error!(run_id = %id, error = %join_err, "orchestration task aborted");
                let mut run =
                    last.unwrap_or_else(|| Run::new(&id, &goal, config.max_steps, config.autonomous));
                run.status = RunStatus::Failed;
                run.log(LogKind::Error, message.clone(), None);
                // error 事件先于 failed 快照，SSE 流在终态快照后关闭
                self.events.publish_error(&id, message.clone()).await;
                if let Err(e) = self.events.publish(&run).await {
                    tracing::warn!(run_id = %id, error = %e, "snapshot publish failed");
                }
                if let Err(e) = self
                    .orchestrator
                    .ledger()
                    .set_goal_status(&id, GoalStatus::Failed)
                    .await
                {
                    tracing::error!(run_id = %id, error = %e, "failed to mark goal as failed");
                }
                self.update(&id, |r| {
                    r.status = JobStatus::Failed;
                    r.finished_at = Some(Utc::now());
                    r.run_status = Some(RunStatus::Failed);
                    r.error = Some(message);
                })
                .await;
                run
            }
        }
    }
}

/// 移除结束时间早于 ttl 的记录；排队中和运行中的作业始终保留
fn prune_finished(jobs: &mut HashMap<String, JobRecord>, ttl: Duration) {
    let now = Utc::now();
    let before = jobs.len();
    jobs.retain(|_, job| {
        job.finished_at
            .and_then(|at| (now - at).to_std().ok())
            .map_or(true, |age| age < ttl)
    });
    let pruned = before - jobs.len();
    if pruned > 0 {
        tracing::debug!(pruned, "expired job records removed");
    }
}
