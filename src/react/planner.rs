//! Planner：把目标拆成有序任务
//!
//! 提示词列出可用工具与最近记忆，要求模型返回编号列表；解析交给 parse::parse_numbered_list。
//! 本层不重试，空输出即零任务，由编排循环当作运行级失败处理。

use crate::core::Task;
use crate::llm::ReasoningGateway;
use crate::react::parse::parse_numbered_list;

pub const PLANNER_SYSTEM_PROMPT: &str = "You are the planning module of an autonomous assistant. \
Break the user's goal into a short sequence of concrete steps that can each be completed on their own, \
using the listed tools where they help. Reply with the list only.";

/// Planner：持有推理网关与工具清单文本
pub struct Planner {
    gateway: ReasoningGateway,
    tools_prompt: String,
}

impl Planner {
    pub fn new(gateway: ReasoningGateway, tools_prompt: impl Into<String>) -> Self {
        Self {
            gateway,
            tools_prompt: tools_prompt.into(),
        }
    }

    pub fn build_prompt(&self, goal: &str, memory: &str) -> String {
        let memory = if memory.trim().is_empty() {
            "(none)"
        } else {
            memory
        };
        format!(
            "Available tools:\n{}\n\nRecent memory (most recent first):\n{}\n\nGoal: {}\n\n\
             Return a numbered list of ordered, actionable tasks, one per line (\"1. ...\"). \
             Do not add any other text.",
            self.tools_prompt, memory, goal
        )
    }

    /// 生成任务列表（id 从 1 开始，状态 pending）；解析不出任何编号行时返回空 Vec
    pub async fn plan(&self, goal: &str, memory: &str) -> Vec<Task> {
        let prompt = self.build_prompt(goal, memory);
        let output = self
            .gateway
            .complete(&prompt, Some(PLANNER_SYSTEM_PROMPT))
            .await;
        let tasks: Vec<Task> = parse_numbered_list(&output)
            .into_iter()
            .enumerate()
            .map(|(i, desc)| Task::new(i as u32 + 1, desc))
            .collect();
        tracing::debug!(tasks = tasks.len(), "plan parsed");
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskStatus;
    use crate::llm::MockLlmClient;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_plan_parses_numbered_output() {
        let mock = MockLlmClient::with_responder(|system, prompt| {
            assert!(system.contains("planning module"));
            assert!(prompt.contains("Goal: tidy the repo"));
            assert!(prompt.contains("- read_file"));
            "Plan:\n1. List files\n2. Delete junk\n".to_string()
        });
        let planner = Planner::new(ReasoningGateway::new(Arc::new(mock)), "- read_file: read");
        let tasks = planner.plan("tidy the repo", "").await;
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, 1);
        assert_eq!(tasks[1].description, "Delete junk");
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[tokio::test]
    async fn test_unparsable_output_yields_no_tasks() {
        let mock = MockLlmClient::with_responder(|_, _| "I cannot help with that.".to_string());
        let planner = Planner::new(ReasoningGateway::new(Arc::new(mock)), "");
        assert!(planner.plan("anything", "").await.is_empty());
    }

    #[test]
    fn test_prompt_includes_memory() {
        let planner = Planner::new(ReasoningGateway::new(Arc::new(MockLlmClient::new())), "tools");
        let prompt = planner.build_prompt("g", "[2024-01-01 00:00:00] [TASK] done x");
        assert!(prompt.contains("[TASK] done x"));
        assert!(prompt.contains("numbered list"));
        assert!(planner.build_prompt("g", "").contains("(none)"));
    }
}
