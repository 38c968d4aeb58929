//! HTTP 接口集成测试：通过 tower oneshot 直接驱动 axum Router

#[cfg(all(test, feature = "web"))]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use assistloop::config::ToolsSection;
    use assistloop::gateway::{EventGateway, JobQueue, MemorySnapshotStore};
    use assistloop::llm::{MockLlmClient, ReasoningGateway};
    use assistloop::memory::MemoryLedger;
    use assistloop::react::{Orchestrator, RunConfig};
    use assistloop::tools::{default_registry, SafeFs, ToolExecutor};
    use assistloop::web::{router, AppState};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use futures_util::StreamExt;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        ledger: Arc<MemoryLedger>,
        shutdown: CancellationToken,
        _workspace: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let workspace = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::in_memory());
        let tools = Arc::new(ToolExecutor::new(default_registry(
            SafeFs::new(workspace.path()),
            &ToolsSection::default(),
        )));
        let orchestrator = Arc::new(Orchestrator::new(
            ReasoningGateway::new(Arc::new(MockLlmClient::new())),
            tools.clone(),
            ledger.clone(),
            10,
        ));
        let events = Arc::new(EventGateway::new(Arc::new(MemorySnapshotStore::new(
            Duration::from_secs(60),
        ))));
        let config = RunConfig {
            retry_backoff_ms: 0,
            ..RunConfig::default()
        };
        // 不启动 worker：入队的作业保持 queued，便于断言
        let queue = Arc::new(JobQueue::new(orchestrator, events, config));
        let shutdown = CancellationToken::new();
        let state = Arc::new(AppState {
            queue,
            ledger: ledger.clone(),
            tools,
            shutdown: shutdown.clone(),
        });
        Harness {
            app: router(state),
            ledger,
            shutdown,
            _workspace: workspace,
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, req).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let (status, body) = send(&h.app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test]
    async fn test_submit_rejects_missing_or_blank_goal() {
        let h = harness();
        let (status, body) = send_json(&h.app, post_json("/agent", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = send_json(&h.app, post_json("/agent", json!({ "goal": "   " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let malformed = Request::post("/agent")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = send(&h.app, malformed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_submit_queues_and_status_is_visible() {
        let h = harness();
        let (status, body) = send_json(
            &h.app,
            post_json("/agent", json!({ "goal": "tidy the docs", "maxSteps": 4, "autonomous": true })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["agentId"].as_str().unwrap().to_string();

        let (status, run) = send_json(&h.app, get(&format!("/agent/status/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(run["id"], id.as_str());
        assert_eq!(run["status"], "idle");
        assert_eq!(run["maxSteps"], 4);
        assert_eq!(run["autonomous"], true);

        let (status, jobs) = send_json(&h.app, get("/agent/jobs")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(jobs[0]["status"], "queued");
    }

    #[tokio::test]
    async fn test_status_unknown_run_is_404() {
        let h = harness();
        let (status, body) = send_json(&h.app, get("/agent/status/does-not-exist")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_wait_mode_returns_final_run_and_fills_memory() {
        let h = harness();
        let (status, run) = send_json(
            &h.app,
            post_json("/agent", json!({ "goal": "say hello", "wait": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(run["status"], "completed");
        assert_eq!(run["tasks"][0]["status"], "done");
        let id = run["id"].as_str().unwrap().to_string();

        let (_, entries) =
            send_json(&h.app, get(&format!("/agent/memory?limit=50&goalId={}", id))).await;
        let entries = entries.as_array().unwrap();
        assert!(!entries.is_empty());
        assert!(entries.iter().all(|e| e["goalId"] == id.as_str()));

        let (_, stats) = send_json(&h.app, get("/agent/memory/stats")).await;
        assert_eq!(stats["totalGoals"], 1);
        assert_eq!(stats["goalsByStatus"]["completed"], 1);

        let (_, run_status) = send_json(&h.app, get(&format!("/agent/status/{}", id))).await;
        assert_eq!(run_status["status"], "completed");

        let clear = Request::delete("/agent/memory").body(Body::empty()).unwrap();
        let (status, _) = send_json(&h.app, clear).await;
        assert_eq!(status, StatusCode::OK);
        let (_, stats) = send_json(&h.app, get("/agent/memory/stats")).await;
        assert_eq!(stats["totalEntries"], 0);
        assert_eq!(stats["totalGoals"], 0);
    }

    #[tokio::test]
    async fn test_tools_list_has_schemas() {
        let h = harness();
        let (status, tools) = send_json(&h.app, get("/agent/tools")).await;
        assert_eq!(status, StatusCode::OK);
        let tools = tools.as_array().unwrap();
        assert_eq!(tools.len(), 7);
        let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
        for expected in [
            "get_file_tree",
            "read_file",
            "write_file",
            "apply_patch",
            "search_in_files",
            "fetch_url",
            "run_command",
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
        assert!(tools.iter().all(|t| t["description"].is_string()));
        assert!(tools.iter().all(|t| t["parameters"]["type"] == "object"));
    }

    #[tokio::test]
    async fn test_unfinished_and_resume() {
        let h = harness();
        h.ledger.upsert_goal("g-old", "left over work").await.unwrap();

        let (status, goals) = send_json(&h.app, get("/agent/unfinished")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(goals[0]["id"], "g-old");
        assert_eq!(goals[0]["status"], "in_progress");

        let resume = Request::post("/agent/resume").body(Body::empty()).unwrap();
        let (status, body) = send_json(&h.app, resume).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["resumed"], json!(["g-old"]));

        let (_, run) = send_json(&h.app, get("/agent/status/g-old")).await;
        assert_eq!(run["autonomous"], true);
    }

    #[tokio::test]
    async fn test_stream_replays_latest_snapshot() {
        let h = harness();
        let (_, run) = send_json(
            &h.app,
            post_json("/agent", json!({ "goal": "stream me", "wait": true })),
        )
        .await;
        let id = run["id"].as_str().unwrap().to_string();

        let resp = h
            .app
            .clone()
            .oneshot(get(&format!("/agent/stream/{}", id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let mut body = resp.into_body().into_data_stream();
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        let payload = text
            .lines()
            .find_map(|l| l.strip_prefix("data: "))
            .unwrap();
        let snapshot: Value = serde_json::from_str(payload).unwrap();
        assert_eq!(snapshot["id"], id.as_str());
        assert_eq!(snapshot["status"], "completed");
    }

    #[tokio::test]
    async fn test_stream_ends_after_terminal_snapshot() {
        let h = harness();
        let (_, run) = send_json(
            &h.app,
            post_json("/agent", json!({ "goal": "finish quickly", "wait": true })),
        )
        .await;
        let id = run["id"].as_str().unwrap().to_string();

        let resp = h
            .app
            .clone()
            .oneshot(get(&format!("/agent/stream/{}", id)))
            .await
            .unwrap();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX);
        let body = tokio::time::timeout(Duration::from_secs(5), body)
            .await
            .expect("stream should close after a completed snapshot")
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(text.matches("data: ").count(), 1);
        assert!(text.contains("\"completed\""));
    }

    #[tokio::test]
    async fn test_stream_ends_on_shutdown() {
        let h = harness();
        let resp = h
            .app
            .clone()
            .oneshot(get("/agent/stream/never-started"))
            .await
            .unwrap();
        let mut body = resp.into_body().into_data_stream();

        // 未知 run 没有快照可回放，流保持打开
        assert!(
            tokio::time::timeout(Duration::from_millis(200), body.next())
                .await
                .is_err()
        );

        h.shutdown.cancel();
        let end = tokio::time::timeout(Duration::from_secs(3), body.next())
            .await
            .expect("stream should close once shutdown is signalled");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_graceful_shutdown_with_open_stream() {
        let h = harness();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let signal = h.shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, h.app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        let resp = reqwest::get(format!("http://{}/agent/stream/some-run", addr))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        h.shutdown.cancel();
        let stopped = tokio::time::timeout(Duration::from_secs(3), server).await;
        assert!(stopped.is_ok(), "server kept running with an open stream");
        drop(resp);
    }
}
