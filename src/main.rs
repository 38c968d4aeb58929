//! AssistLoop 服务入口
//!
//! 加载配置、装配组件、启动后台 worker，并在 HTTP 上暴露目标提交与 SSE 快照流。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use assistloop::{
    config::load_config,
    core::create_agent_components,
    gateway::{EventGateway, FileSnapshotStore, JobQueue, SnapshotStore},
    observability,
    web::{router, AppState},
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::var("ASSISTLOOP_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    let components = create_agent_components(&cfg).context("Failed to create agent components")?;

    let store: Arc<dyn SnapshotStore> = Arc::new(
        FileSnapshotStore::new(&cfg.app.data_dir, Duration::from_secs(cfg.queue.snapshot_ttl_secs))
            .context("Failed to open snapshot store")?,
    );
    let purged = store.purge_expired().await;
    if purged > 0 {
        tracing::info!(purged, "expired snapshots removed at startup");
    }
    let events = Arc::new(EventGateway::new(store));

    let queue = Arc::new(
        JobQueue::new(
            components.orchestrator.clone(),
            events,
            components.run_config.clone(),
        )
        .with_record_ttl(Duration::from_secs(cfg.queue.snapshot_ttl_secs)),
    );
    let cancel = CancellationToken::new();
    let workers = queue.spawn_workers(cfg.queue.workers, cancel.clone());
    tracing::info!(workers = workers.len(), "job workers running");

    let state = Arc::new(AppState {
        queue,
        ledger: components.ledger.clone(),
        tools: components.tools.clone(),
        shutdown: cancel.clone(),
    });
    let app = router(state);

    let port = std::env::var("ASSISTLOOP_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(cfg.web.port);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("AssistLoop API: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        })
        .await
        .context("HTTP server error")?;

    // 进行中的作业最多再等 10 秒；未完成的目标保持 in_progress，下次可 resume
    let drain = futures_util::future::join_all(workers);
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        tracing::warn!("workers still busy at shutdown, leaving unfinished goals for resume");
    }
    tracing::info!("AssistLoop stopped");
    Ok(())
}
