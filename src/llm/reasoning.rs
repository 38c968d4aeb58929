//! 推理网关：对外部文本补全能力的薄封装
//!
//! complete(prompt, system?) 永不返回错误：后端失败时记录 warn 并返回空字符串，
//! 由调用方（如 Reflector 的 JSON 回退）自行降级。

use std::sync::Arc;
use std::time::Instant;

use crate::llm::{LlmClient, Message};

/// Planner / Executor / Reflector 共享的推理入口
#[derive(Clone)]
pub struct ReasoningGateway {
    llm: Arc<dyn LlmClient>,
}

impl ReasoningGateway {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn complete(&self, prompt: &str, system_prompt: Option<&str>) -> String {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        let start = Instant::now();
        match self.llm.complete(&messages).await {
            Ok(text) => {
                tracing::debug!(
                    duration_ms = start.elapsed().as_millis() as u64,
                    chars = text.len(),
                    "reasoning ok"
                );
                text
            }
            Err(e) => {
                tracing::warn!(error = %e, "reasoning call failed, returning empty completion");
                String::new()
            }
        }
    }
}
