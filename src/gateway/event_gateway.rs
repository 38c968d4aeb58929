//! 事件网关：按 run id 的发布 / 订阅
//!
//! publish 先持久化快照再扇出给当前订阅者；subscribe 立即回放最近一次快照后接收后续事件。
//! publish 与 subscribe 由同一把锁串行化，回放与实时事件不会乱序；Subscription 被丢弃时自动注销。
//! 这是单进程形态，多进程部署需要共享的消息总线，快照存储可用文件实现共享。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::core::{AgentError, Run};
use crate::gateway::SnapshotStore;

/// 推送给订阅者的事件
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Snapshot(Box<Run>),
    /// worker 级失败（SSE 中以 `event: error` 发送）
    Error { message: String },
}

type SinkMap = HashMap<String, HashMap<u64, mpsc::UnboundedSender<RunEvent>>>;

pub struct EventGateway {
    store: Arc<dyn SnapshotStore>,
    sinks: Arc<Mutex<SinkMap>>,
    order: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
}

impl EventGateway {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            sinks: Arc::new(Mutex::new(HashMap::new())),
            order: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    fn fan_out(&self, run_id: &str, event: RunEvent) {
        let Ok(mut sinks) = self.sinks.lock() else {
            return;
        };
        if let Some(run_sinks) = sinks.get_mut(run_id) {
            run_sinks.retain(|_, tx| tx.send(event.clone()).is_ok());
            if run_sinks.is_empty() {
                sinks.remove(run_id);
            }
        }
    }

    /// 持久化快照后推送给该 run 的所有订阅者；持久化失败仍会推送，并返回错误
    pub async fn publish(&self, run: &Run) -> Result<(), AgentError> {
        let _order = self.order.lock().await;
        let stored = self.store.put(run).await;
        if let Err(e) = &stored {
            tracing::warn!(run_id = %run.id, error = %e, "snapshot persist failed");
        }
        self.fan_out(&run.id, RunEvent::Snapshot(Box::new(run.clone())));
        stored
    }

    /// 推送错误事件（不持久化）
    pub async fn publish_error(&self, run_id: &str, message: impl Into<String>) {
        let _order = self.order.lock().await;
        self.fan_out(
            run_id,
            RunEvent::Error {
                message: message.into(),
            },
        );
    }

    /// 最近一次持久化的快照
    pub async fn latest(&self, run_id: &str) -> Option<Run> {
        match self.store.get(run_id).await {
            Ok(run) => run,
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "snapshot read failed");
                None
            }
        }
    }

    /// 订阅某个 run：若有已保存的快照则先回放它
    pub async fn subscribe(&self, run_id: &str) -> Subscription {
        let _order = self.order.lock().await;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(run) = self.latest(run_id).await {
            let _ = tx.send(RunEvent::Snapshot(Box::new(run)));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.entry(run_id.to_string()).or_default().insert(id, tx);
        }
        tracing::debug!(run_id = %run_id, sink = id, "subscriber attached");
        Subscription {
            run_id: run_id.to_string(),
            id,
            rx,
            sinks: self.sinks.clone(),
        }
    }

    pub fn subscriber_count(&self, run_id: &str) -> usize {
        self.sinks
            .lock()
            .map(|s| s.get(run_id).map_or(0, |m| m.len()))
            .unwrap_or(0)
    }
}

/// 一个订阅者的接收端；drop 时从网关注销，不影响其他订阅者
pub struct Subscription {
    run_id: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<RunEvent>,
    sinks: Arc<Mutex<SinkMap>>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<RunEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RunEvent> {
        self.rx.try_recv().ok()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut sinks) = self.sinks.lock() {
            if let Some(run_sinks) = sinks.get_mut(&self.run_id) {
                run_sinks.remove(&self.id);
                if run_sinks.is_empty() {
                    sinks.remove(&self.run_id);
                }
            }
        }
        tracing::debug!(run_id = %self.run_id, sink = self.id, "subscriber detached");
    }
}
