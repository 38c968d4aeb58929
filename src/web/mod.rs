//! HTTP 接口：目标提交、SSE 快照流、状态查询、记忆账本与工具列表
//!
//! - POST   /agent               提交目标（202 {agentId}；wait=true 时同步返回最终 Run）
//! - GET    /agent/stream/:id    text/event-stream，连接时先回放最近快照
//! - GET    /agent/status/:id    最近快照，未知 id 返回 404
//! - GET    /agent/memory        ?limit=&goalId=
//! - GET    /agent/memory/stats
//! - DELETE /agent/memory
//! - GET    /agent/tools
//! - GET    /agent/jobs
//! - GET    /agent/unfinished
//! - POST   /agent/resume
//! - GET    /health

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::core::RunStatus;
use crate::gateway::{JobQueue, JobRecord, RunEvent};
use crate::memory::{GoalRecord, LedgerStats, MemoryEntry, MemoryLedger};
use crate::tools::ToolExecutor;

/// GET /agent/memory 默认返回条数
const DEFAULT_MEMORY_LIMIT: usize = 50;

/// 路由共享状态
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub ledger: Arc<MemoryLedger>,
    pub tools: Arc<ToolExecutor>,
    /// 进程关闭信号：取消后所有 SSE 流结束，graceful shutdown 才能返回
    pub shutdown: CancellationToken,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/agent", post(api_agent_submit))
        .route("/agent/stream/:id", get(api_agent_stream))
        .route("/agent/status/:id", get(api_agent_status))
        .route(
            "/agent/memory",
            get(api_memory_list).delete(api_memory_clear),
        )
        .route("/agent/memory/stats", get(api_memory_stats))
        .route("/agent/tools", get(api_tools_list))
        .route("/agent/jobs", get(api_jobs_list))
        .route("/agent/unfinished", get(api_unfinished))
        .route("/agent/resume", post(api_resume))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    #[serde(default)]
    goal: Option<String>,
    #[serde(default)]
    autonomous: Option<bool>,
    #[serde(default)]
    max_steps: Option<u32>,
    #[serde(default)]
    wait: bool,
}

/// POST /agent
async fn api_agent_submit(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;
    let goal = req
        .goal
        .as_deref()
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "goal is required"))?
        .to_string();

    let mut config = state.queue.default_config().clone();
    if let Some(autonomous) = req.autonomous {
        config = config.with_autonomous(autonomous);
    }
    if let Some(max_steps) = req.max_steps {
        config = config.with_max_steps(max_steps);
    }

    if req.wait {
        // 放到独立任务中执行，客户端断开不会中断编排
        let queue = state.queue.clone();
        let run = tokio::spawn(async move { queue.run_now(&goal, Some(config)).await })
            .await
            .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
        return Ok((StatusCode::OK, Json(run)).into_response());
    }

    let id = state
        .queue
        .enqueue(&goal, Some(config), None)
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e))?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "agentId": id }))).into_response())
}

/// GET /agent/stream/:id：run 到达 completed / failed 或服务关闭时结束
async fn api_agent_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let subscription = state.queue.events().subscribe(&id).await;
    let event_stream = stream::unfold((subscription, false), |(mut sub, finished)| async move {
        if finished {
            return None;
        }
        let (event, finished) = match sub.recv().await? {
            RunEvent::Snapshot(run) => (
                Event::default().json_data(&*run),
                matches!(run.status, RunStatus::Completed | RunStatus::Failed),
            ),
            RunEvent::Error { message } => (
                Event::default()
                    .event("error")
                    .json_data(json!({ "error": message })),
                false,
            ),
        };
        let event = event.unwrap_or_else(|e| {
            tracing::warn!(run_id = %sub.run_id(), error = %e, "sse event encode failed");
            Event::default().comment("encode failed")
        });
        Some((Ok(event), (sub, finished)))
    })
    .take_until(state.shutdown.clone().cancelled_owned());
    Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// GET /agent/status/:id
async fn api_agent_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.queue.events().latest(&id).await {
        Some(run) => Ok(Json(run).into_response()),
        None => Err(api_error(StatusCode::NOT_FOUND, "Run not found")),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemoryQuery {
    limit: Option<usize>,
    goal_id: Option<String>,
}

/// GET /agent/memory：按时间顺序返回最近的条目
async fn api_memory_list(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MemoryQuery>,
) -> Json<Vec<MemoryEntry>> {
    let limit = q.limit.unwrap_or(DEFAULT_MEMORY_LIMIT);
    Json(state.ledger.recent(limit, q.goal_id.as_deref()).await)
}

/// GET /agent/memory/stats
async fn api_memory_stats(State(state): State<Arc<AppState>>) -> Json<LedgerStats> {
    Json(state.ledger.stats().await)
}

/// DELETE /agent/memory
async fn api_memory_clear(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .ledger
        .clear()
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(json!({ "cleared": true })))
}

/// GET /agent/tools：[{name, description, parameters}]
async fn api_tools_list(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.tools.registry().to_schema_json())
}

/// GET /agent/jobs
async fn api_jobs_list(State(state): State<Arc<AppState>>) -> Json<Vec<JobRecord>> {
    Json(state.queue.list().await)
}

/// GET /agent/unfinished
async fn api_unfinished(State(state): State<Arc<AppState>>) -> Json<Vec<GoalRecord>> {
    Json(state.ledger.unfinished_goals().await)
}

/// POST /agent/resume：把未完成目标重新入队
async fn api_resume(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let ids = state
        .queue
        .resume_unfinished()
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e))?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "resumed": ids }))))
}
