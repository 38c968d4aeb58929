//! Executor：执行单个任务，必要时调用一次工具
//!
//! 模型若要调用工具须输出 `TOOL: <name>` 与 `PARAMS: <json>` 两行，否则整段回复即任务结果。
//! 工具结果（成功或失败）折叠进返回文本，并写一条 tool 日志与一条 result 记忆。

use std::sync::Arc;

use serde_json::json;

use crate::core::{AgentError, LogKind, Run};
use crate::llm::ReasoningGateway;
use crate::memory::{MemoryEntry, MemoryKind, MemoryLedger};
use crate::react::parse::{parse_tool_invocation, ToolInvocation};
use crate::tools::ToolExecutor;

pub const EXECUTOR_SYSTEM_PROMPT: &str = "You are the execution module of an autonomous assistant. \
Complete the current task. To use a tool, reply with exactly two lines:\n\
TOOL: <tool_name>\n\
PARAMS: {\"arg\": \"value\"}\n\
Otherwise answer directly with the result of the task.";

/// 折叠进任务结果的工具输出上限（字符）
const TOOL_OUTPUT_CHARS: usize = 4000;
/// result 记忆条目的内容上限（字符）
const MEMORY_SUMMARY_CHARS: usize = 300;

fn clip_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 任务执行器
pub struct TaskExecutor {
    gateway: ReasoningGateway,
    tools: Arc<ToolExecutor>,
    ledger: Arc<MemoryLedger>,
    memory_entries: usize,
}

impl TaskExecutor {
    pub fn new(
        gateway: ReasoningGateway,
        tools: Arc<ToolExecutor>,
        ledger: Arc<MemoryLedger>,
        memory_entries: usize,
    ) -> Self {
        Self {
            gateway,
            tools,
            ledger,
            memory_entries,
        }
    }

    fn build_prompt(&self, goal: &str, task: &str, memory: &str) -> String {
        let memory = if memory.trim().is_empty() {
            "(none)"
        } else {
            memory
        };
        format!(
            "Available tools:\n{}\n\nRecent memory (most recent first):\n{}\n\nGoal: {}\nCurrent task: {}\n",
            self.tools.registry().prompt_section(),
            memory,
            goal,
            task
        )
    }

    /// 执行 run.tasks[task_idx]；返回任务结果文本。Err 仅来自记忆账本持久化
    pub async fn execute(&self, run: &mut Run, task_idx: usize) -> Result<String, AgentError> {
        let description = run
            .tasks
            .get(task_idx)
            .map(|t| t.description.clone())
            .unwrap_or_default();
        let memory = self
            .ledger
            .format_recent(self.memory_entries, None)
            .await;
        let prompt = self.build_prompt(&run.goal, &description, &memory);
        let response = self
            .gateway
            .complete(&prompt, Some(EXECUTOR_SYSTEM_PROMPT))
            .await;

        let (name, params) = match parse_tool_invocation(&response) {
            None => return Ok(response.trim().to_string()),
            Some(ToolInvocation::Malformed { name, error }) => {
                run.log(
                    LogKind::Warning,
                    format!("Malformed PARAMS for tool {}", name),
                    Some(json!({ "tool": name, "error": error })),
                );
                return Ok(format!(
                    "Tool {} was not executed: PARAMS is not valid JSON ({})",
                    name, error
                ));
            }
            Some(ToolInvocation::Call { name, params }) => (name, params),
        };

        let result = self.tools.execute(&name, params.clone()).await;
        let text = match (&result.data, &result.error) {
            (_, Some(err)) => format!("Tool {} failed [{}]: {}", name, err.code.as_str(), err.message),
            (data, None) => {
                let body = data
                    .as_ref()
                    .map(|d| serde_json::to_string_pretty(d).unwrap_or_else(|_| d.to_string()))
                    .unwrap_or_default();
                format!("Tool {} succeeded:\n{}", name, clip_chars(&body, TOOL_OUTPUT_CHARS))
            }
        };

        run.log(
            LogKind::Tool,
            format!(
                "Tool {} {}",
                name,
                if result.ok { "succeeded" } else { "failed" }
            ),
            Some(json!({ "tool": name, "params": params, "ok": result.ok, "error": result.error })),
        );
        self.ledger
            .append(
                MemoryEntry::new(MemoryKind::Result, clip_chars(&text, MEMORY_SUMMARY_CHARS))
                    .with_goal(&run.id)
                    .with_context(description),
            )
            .await?;

        Ok(text)
    }
}
