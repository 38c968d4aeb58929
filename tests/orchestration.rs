//! 编排循环集成测试：脚本化 Mock LLM 驱动 Planner / Executor / Reflector

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use assistloop::config::ToolsSection;
    use assistloop::core::{LogKind, Run, RunStatus, TaskStatus};
    use assistloop::llm::{MockLlmClient, ReasoningGateway};
    use assistloop::memory::{GoalStatus, MemoryKind, MemoryLedger};
    use assistloop::react::{Orchestrator, RunConfig};
    use assistloop::tools::{default_registry, SafeFs, ToolExecutor};
    use tokio::sync::mpsc;

    const OK_REVIEW: &str =
        r#"{"success": true, "analysis": "looks good", "shouldRetry": false, "confidence": 90}"#;
    const BAD_REVIEW: &str =
        r#"{"success": false, "analysis": "wrong output", "shouldRetry": false, "confidence": 30}"#;
    const RETRY_REVIEW: &str =
        r#"{"success": false, "analysis": "incomplete", "shouldRetry": true, "confidence": 20}"#;

    fn line_after<'a>(prompt: &'a str, prefix: &str) -> &'a str {
        prompt
            .lines()
            .find_map(|l| l.strip_prefix(prefix))
            .unwrap_or("")
            .trim()
    }

    /// 规划固定输出；执行回显任务；审查由闭包按任务描述决定
    fn scripted(
        plan: &'static str,
        review: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> MockLlmClient {
        MockLlmClient::with_responder(move |system, prompt| {
            if system.contains("planning module") {
                plan.to_string()
            } else if system.contains("strict reviewer") {
                review(line_after(prompt, "Task: "))
            } else {
                format!("done: {}", line_after(prompt, "Current task: "))
            }
        })
    }

    fn orchestrator(llm: MockLlmClient, ledger: Arc<MemoryLedger>, workspace: &Path) -> Orchestrator {
        let tools = Arc::new(ToolExecutor::new(default_registry(
            SafeFs::new(workspace),
            &ToolsSection::default(),
        )));
        Orchestrator::new(ReasoningGateway::new(Arc::new(llm)), tools, ledger, 10)
    }

    fn config() -> RunConfig {
        RunConfig {
            retry_backoff_ms: 0,
            ..RunConfig::default()
        }
    }

    fn statuses(run: &Run) -> Vec<TaskStatus> {
        run.tasks.iter().map(|t| t.status).collect()
    }

    async fn goal_status(ledger: &MemoryLedger, id: &str) -> Option<GoalStatus> {
        ledger
            .goals()
            .await
            .into_iter()
            .find(|g| g.id == id)
            .map(|g| g.status)
    }

    #[tokio::test]
    async fn test_all_tasks_succeed_completes_run() {
        let ws = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::in_memory());
        let orch = orchestrator(
            scripted("1. gather\n2. summarise", |_| OK_REVIEW.to_string()),
            ledger.clone(),
            ws.path(),
        );

        let run = orch.run("r-ok", "write a summary", &config(), None).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(statuses(&run), vec![TaskStatus::Done, TaskStatus::Done]);
        assert_eq!(run.steps_executed, 2);
        assert_eq!(run.tasks[1].result.as_deref(), Some("done: summarise"));
        assert!(run.tasks.iter().all(|t| t.reflection.is_some()));
        assert_eq!(goal_status(&ledger, "r-ok").await, Some(GoalStatus::Completed));

        let entries = ledger.recent(100, Some("r-ok")).await;
        let count = |kind: MemoryKind| entries.iter().filter(|e| e.kind == kind).count();
        assert_eq!(count(MemoryKind::Goal), 1);
        assert_eq!(count(MemoryKind::Task), 2);
        assert_eq!(count(MemoryKind::Decision), 2);
    }

    #[tokio::test]
    async fn test_failed_task_halts_non_autonomous_run() {
        let ws = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::in_memory());
        let orch = orchestrator(
            scripted("1. first\n2. second\n3. third", |task| {
                let review = if task == "second" { BAD_REVIEW } else { OK_REVIEW };
                review.to_string()
            }),
            ledger.clone(),
            ws.path(),
        );

        let run = orch.run("r-halt", "three steps", &config(), None).await;
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            statuses(&run),
            vec![TaskStatus::Done, TaskStatus::Failed, TaskStatus::Pending]
        );
        assert_eq!(run.steps_executed, 2);
        assert_eq!(goal_status(&ledger, "r-halt").await, Some(GoalStatus::Failed));
    }

    #[tokio::test]
    async fn test_autonomous_run_continues_past_failure() {
        let ws = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::in_memory());
        let orch = orchestrator(
            scripted("1. first\n2. second\n3. third", |task| {
                let review = if task == "second" { BAD_REVIEW } else { OK_REVIEW };
                review.to_string()
            }),
            ledger.clone(),
            ws.path(),
        );

        let cfg = config().with_autonomous(true);
        let run = orch.run("r-auto", "three steps", &cfg, None).await;
        assert_eq!(
            statuses(&run),
            vec![TaskStatus::Done, TaskStatus::Failed, TaskStatus::Done]
        );
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.steps_executed, 3);
    }

    #[tokio::test]
    async fn test_step_budget_pauses_run() {
        let ws = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::in_memory());
        let orch = orchestrator(
            scripted("1. a\n2. b\n3. c\n4. d\n5. e", |_| OK_REVIEW.to_string()),
            ledger.clone(),
            ws.path(),
        );

        let cfg = config().with_max_steps(2);
        let run = orch.run("r-budget", "five steps", &cfg, None).await;
        assert_eq!(run.status, RunStatus::Paused);
        assert!(run.steps_executed <= run.max_steps);
        assert_eq!(run.steps_executed, 2);
        assert_eq!(run.tasks[2].status, TaskStatus::Pending);
        assert_eq!(run.tasks[4].status, TaskStatus::Pending);
        // paused 的目标保持 in_progress，可被恢复
        let unfinished = ledger.unfinished_goals().await;
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, "r-budget");
    }

    #[tokio::test]
    async fn test_empty_plan_fails_run() {
        let ws = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::in_memory());
        let orch = orchestrator(
            scripted("I am not able to plan this.", |_| OK_REVIEW.to_string()),
            ledger.clone(),
            ws.path(),
        );

        let run = orch.run("r-empty", "???", &config(), None).await;
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.tasks.is_empty());
        assert_eq!(run.steps_executed, 0);
        assert!(run.log.iter().any(|l| l.kind == LogKind::Error));
        assert_eq!(goal_status(&ledger, "r-empty").await, Some(GoalStatus::Failed));
    }

    #[tokio::test]
    async fn test_should_retry_reinvokes_executor() {
        let ws = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::in_memory());
        let reviews = Arc::new(AtomicUsize::new(0));
        let counter = reviews.clone();
        let llm = scripted("1. flaky", move |_| {
            let review = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                RETRY_REVIEW
            } else {
                OK_REVIEW
            };
            review.to_string()
        });
        let orch = orchestrator(llm.clone(), ledger.clone(), ws.path());

        let run = orch.run("r-retry", "retry once", &config(), None).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.tasks[0].status, TaskStatus::Done);
        assert_eq!(run.steps_executed, 2);
        assert_eq!(reviews.load(Ordering::SeqCst), 2);
        // plan + 2 次执行 + 2 次审查
        assert_eq!(llm.call_count(), 5);
        assert!(run
            .log
            .iter()
            .any(|l| l.kind == LogKind::Warning && l.message.contains("Retrying task 1")));
    }

    #[tokio::test]
    async fn test_retry_stops_at_step_budget() {
        let ws = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::in_memory());
        let orch = orchestrator(
            scripted("1. never good enough\n2. next", |_| RETRY_REVIEW.to_string()),
            ledger.clone(),
            ws.path(),
        );

        let cfg = config().with_max_steps(1).with_autonomous(true);
        let run = orch.run("r-retry-budget", "budget", &cfg, None).await;
        assert_eq!(run.steps_executed, 1);
        assert_eq!(run.tasks[0].status, TaskStatus::Failed);
        assert_eq!(run.tasks[1].status, TaskStatus::Pending);
        assert_eq!(run.status, RunStatus::Paused);
    }

    #[tokio::test]
    async fn test_retries_exhausted_marks_task_failed() {
        let ws = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::in_memory());
        let reviews = Arc::new(AtomicUsize::new(0));
        let counter = reviews.clone();
        let orch = orchestrator(
            scripted("1. stubborn", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                RETRY_REVIEW.to_string()
            }),
            ledger.clone(),
            ws.path(),
        );

        let run = orch.run("r-exhaust", "stubborn", &config(), None).await;
        assert_eq!(reviews.load(Ordering::SeqCst), 3);
        assert_eq!(run.steps_executed, 3);
        assert_eq!(run.tasks[0].status, TaskStatus::Failed);
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_executor_errors_consume_steps() {
        // 工作区与账本目录相同：工具把账本的临时文件路径占成目录，之后每次落盘都失败
        let data = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::open(data.path()).unwrap());
        let llm = MockLlmClient::with_responder(|system, _prompt| {
            if system.contains("planning module") {
                "1. poison the ledger\n2. never reached".to_string()
            } else if system.contains("strict reviewer") {
                OK_REVIEW.to_string()
            } else {
                "TOOL: write_file\nPARAMS: {\"path\": \"memory.json.tmp/blocker\", \"content\": \"x\"}"
                    .to_string()
            }
        });
        let orch = orchestrator(llm.clone(), ledger.clone(), data.path());

        let run = orch.run("r-exec-err", "break persistence", &config(), None).await;
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.steps_executed, 3);
        assert_eq!(run.tasks[0].status, TaskStatus::Failed);
        assert_eq!(run.tasks[1].status, TaskStatus::Pending);
        // plan + 3 次执行，出错的尝试不进入审查
        assert_eq!(llm.call_count(), 4);
        let errored = run
            .log
            .iter()
            .filter(|l| l.kind == LogKind::Error && l.message.contains("errored"))
            .count();
        assert_eq!(errored, 3);
    }

    #[tokio::test]
    async fn test_executor_error_retry_respects_step_budget() {
        let data = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::open(data.path()).unwrap());
        let llm = MockLlmClient::with_responder(|system, _prompt| {
            if system.contains("planning module") {
                "1. poison the ledger".to_string()
            } else {
                "TOOL: write_file\nPARAMS: {\"path\": \"memory.json.tmp/blocker\", \"content\": \"x\"}"
                    .to_string()
            }
        });
        let orch = orchestrator(llm, ledger, data.path());

        let cfg = config().with_max_steps(2);
        let run = orch.run("r-exec-budget", "break persistence", &cfg, None).await;
        assert_eq!(run.steps_executed, 2);
        assert!(run.steps_executed <= run.max_steps);
        assert_eq!(run.tasks[0].status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_unparseable_reflection_falls_back_to_success() {
        let ws = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::in_memory());
        let orch = orchestrator(
            scripted("1. only task", |_| "Looks fine to me!".to_string()),
            ledger.clone(),
            ws.path(),
        );

        let run = orch.run("r-fallback", "lenient", &config(), None).await;
        assert_eq!(run.status, RunStatus::Completed);
        let reflection = run.tasks[0].reflection.as_ref().unwrap();
        assert!(reflection.success);
        assert!(!reflection.should_retry);
        assert_eq!(reflection.confidence, 50);
    }

    #[tokio::test]
    async fn test_reflection_disabled_skips_reviewer() {
        let ws = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::in_memory());
        let reviews = Arc::new(AtomicUsize::new(0));
        let counter = reviews.clone();
        let orch = orchestrator(
            scripted("1. a\n2. b", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                BAD_REVIEW.to_string()
            }),
            ledger.clone(),
            ws.path(),
        );

        let cfg = RunConfig {
            reflection: false,
            ..config()
        };
        let run = orch.run("r-noreflect", "no review", &cfg, None).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(reviews.load(Ordering::SeqCst), 0);
        assert!(run.tasks.iter().all(|t| t.reflection.is_none()));
    }

    #[tokio::test]
    async fn test_tool_call_writes_into_workspace() {
        let ws = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::in_memory());
        let llm = MockLlmClient::with_responder(|system, _prompt| {
            if system.contains("planning module") {
                "1. save the notes".to_string()
            } else if system.contains("strict reviewer") {
                OK_REVIEW.to_string()
            } else {
                "TOOL: write_file\nPARAMS: {\"path\": \"notes/today.md\", \"content\": \"hello\"}"
                    .to_string()
            }
        });
        let orch = orchestrator(llm, ledger.clone(), ws.path());

        let run = orch.run("r-tool", "save notes", &config(), None).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(
            std::fs::read_to_string(ws.path().join("notes/today.md")).unwrap(),
            "hello"
        );
        let result = run.tasks[0].result.as_deref().unwrap();
        assert!(result.starts_with("Tool write_file succeeded"), "{}", result);
        assert!(run.log.iter().any(|l| l.kind == LogKind::Tool));
        let results = ledger.recent(100, Some("r-tool")).await;
        assert!(results.iter().any(|e| e.kind == MemoryKind::Result));
    }

    #[tokio::test]
    async fn test_tool_error_becomes_task_text() {
        let ws = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::in_memory());
        let llm = MockLlmClient::with_responder(|system, _prompt| {
            if system.contains("planning module") {
                "1. peek outside".to_string()
            } else if system.contains("strict reviewer") {
                BAD_REVIEW.to_string()
            } else {
                "TOOL: read_file\nPARAMS: {\"path\": \"../../etc/passwd\"}".to_string()
            }
        });
        let orch = orchestrator(llm, ledger, ws.path());

        let run = orch.run("r-denied", "escape", &config(), None).await;
        let result = run.tasks[0].result.as_deref().unwrap();
        assert!(result.contains("ACCESS_DENIED"), "{}", result);
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_snapshots_arrive_in_causal_order() {
        let ws = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::in_memory());
        let orch = orchestrator(
            scripted("1. a\n2. b", |_| OK_REVIEW.to_string()),
            ledger,
            ws.path(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = orch.run("r-snap", "ordered", &config(), Some(&tx)).await;
        drop(tx);

        let mut snapshots = Vec::new();
        while let Some(s) = rx.recv().await {
            snapshots.push(s);
        }
        assert!(snapshots.len() >= 6);
        assert_eq!(snapshots[0].status, RunStatus::Planning);
        assert_eq!(snapshots.last(), Some(&run));
        for pair in snapshots.windows(2) {
            assert!(pair[0].updated_at <= pair[1].updated_at);
            assert!(pair[0].steps_executed <= pair[1].steps_executed);
            assert!(pair[0].log.len() <= pair[1].log.len());
        }
        assert!(snapshots.iter().any(|s| s.status == RunStatus::Reflecting));
    }

    #[tokio::test]
    async fn test_resume_unfinished_reuses_goal_id() {
        let ws = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::open(data.path()).unwrap());
        ledger.upsert_goal("g-left", "finish the report").await.unwrap();
        ledger.upsert_goal("g-done", "already done").await.unwrap();
        ledger
            .set_goal_status("g-done", GoalStatus::Completed)
            .await
            .unwrap();

        let orch = orchestrator(
            scripted("1. write it", |_| OK_REVIEW.to_string()),
            ledger.clone(),
            ws.path(),
        );
        let runs = orch.resume_unfinished(&config(), None).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, "g-left");
        assert!(runs[0].autonomous);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert!(ledger.unfinished_goals().await.is_empty());

        // 重新打开账本文件，状态已持久化
        let reopened = MemoryLedger::open(data.path()).unwrap();
        assert_eq!(goal_status(&reopened, "g-left").await, Some(GoalStatus::Completed));
    }
}
