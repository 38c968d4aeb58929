//! 网关层：Run 快照存储、事件发布 / 订阅、后台作业队列
//!
//! ```text
//! HTTP ──enqueue──▶ JobQueue ──worker──▶ Orchestrator::run
//!                                            │ snapshots (mpsc)
//!                                            ▼
//!  SSE ◀──subscribe── EventGateway ──put──▶ SnapshotStore
//! ```

mod event_gateway;
mod snapshot_store;
mod task_queue;

pub use event_gateway::{EventGateway, RunEvent, Subscription};
pub use snapshot_store::{is_valid_run_id, FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use task_queue::{JobQueue, JobRecord, JobStatus};
