//! Reflector：对任务结果做结构化自评，驱动重试决策
//!
//! 要求模型只返回 JSON `{success, analysis, shouldRetry, adjustments, confidence}`；
//! 解析失败时回退为默认结论，反思失败永远不阻塞运行。每次自评写一条 decision 记忆。

use std::sync::Arc;

use crate::core::{AgentError, Reflection, Task};
use crate::llm::ReasoningGateway;
use crate::memory::{MemoryEntry, MemoryKind, MemoryLedger};
use crate::react::parse::parse_reflection;

pub const REFLECTOR_SYSTEM_PROMPT: &str = "You are a strict reviewer of an autonomous assistant's work. \
Judge whether the result accomplishes the task. Respond with a single JSON object and nothing else.";

/// 提示中附带的任务结果上限（字符）
const RESULT_CHARS: usize = 6000;

pub struct Reflector {
    gateway: ReasoningGateway,
    ledger: Arc<MemoryLedger>,
}

impl Reflector {
    pub fn new(gateway: ReasoningGateway, ledger: Arc<MemoryLedger>) -> Self {
        Self { gateway, ledger }
    }

    fn build_prompt(goal: &str, task: &Task, result: &str) -> String {
        let result: String = result.chars().take(RESULT_CHARS).collect();
        format!(
            "Goal: {}\nTask: {}\n\nResult:\n{}\n\n\
             Return JSON with exactly these fields:\n\
             {{\"success\": boolean, \"analysis\": string, \"shouldRetry\": boolean, \
             \"adjustments\": string or null, \"confidence\": integer 0-100}}",
            goal, task.description, result
        )
    }

    /// 自评任务结果；Err 仅来自记忆账本持久化
    pub async fn reflect(
        &self,
        run_id: &str,
        goal: &str,
        task: &Task,
        result: &str,
    ) -> Result<Reflection, AgentError> {
        let prompt = Self::build_prompt(goal, task, result);
        let output = self
            .gateway
            .complete(&prompt, Some(REFLECTOR_SYSTEM_PROMPT))
            .await;
        let reflection = parse_reflection(&output);

        let verdict = if reflection.success { "succeeded" } else { "failed" };
        let retry = if reflection.should_retry { ", retry requested" } else { "" };
        self.ledger
            .append(
                MemoryEntry::new(
                    MemoryKind::Decision,
                    format!(
                        "Task {} {} (confidence {}{}): {}",
                        task.id, verdict, reflection.confidence, retry, reflection.analysis
                    ),
                )
                .with_goal(run_id)
                .with_context(task.description.clone()),
            )
            .await?;
        Ok(reflection)
    }
}
