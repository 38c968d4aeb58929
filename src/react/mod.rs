//! 认知层：Planner、Executor、Reflector、宽松解析适配层与编排主循环

pub mod executor;
pub mod loop_;
pub mod parse;
pub mod planner;
pub mod reflector;

pub use executor::{TaskExecutor, EXECUTOR_SYSTEM_PROMPT};
pub use loop_::{retry_delay, Orchestrator, RunConfig, SnapshotSender};
pub use planner::{Planner, PLANNER_SYSTEM_PROMPT};
pub use reflector::{Reflector, REFLECTOR_SYSTEM_PROMPT};
