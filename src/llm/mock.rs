//! Mock LLM 客户端（用于测试与无 API Key 部署）
//!
//! 默认行为：规划请求回一条编号任务、执行请求回显任务、反思请求回成功 JSON；
//! 测试可用 `with_responder` 注入按 (system, prompt) 决定回复的闭包。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

type Responder = dyn Fn(&str, &str) -> String + Send + Sync;

/// Mock 客户端：可注入应答闭包，并统计调用次数
#[derive(Clone, Default)]
pub struct MockLlmClient {
    responder: Option<Arc<Responder>>,
    calls: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MockLlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLlmClient")
            .field("calls", &self.calls.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注入应答闭包：参数为 (system prompt, user prompt)
    pub fn with_responder(f: impl Fn(&str, &str) -> String + Send + Sync + 'static) -> Self {
        Self {
            responder: Some(Arc::new(f)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn stub_reply(system: &str, prompt: &str) -> String {
        if prompt.contains("numbered list") {
            let goal = prompt
                .lines()
                .find_map(|l| l.strip_prefix("Goal: "))
                .unwrap_or("(no goal)");
            format!("1. {}", goal.trim())
        } else if system.contains("reviewer") {
            r#"{"success": true, "analysis": "Stub review", "shouldRetry": false, "confidence": 80}"#
                .to_string()
        } else {
            let task = prompt
                .lines()
                .find_map(|l| l.strip_prefix("Current task: "))
                .unwrap_or("(no task)");
            format!("(Stub reply) Completed: {}", task.trim())
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");

        Ok(match &self.responder {
            Some(f) => f(system, prompt),
            None => Self::stub_reply(system, prompt),
        })
    }
}
