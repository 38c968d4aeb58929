//! AssistLoop - 目标驱动的自主 Agent 核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、Run 状态模型、组件装配
//! - **gateway**: 作业队列、worker、Run 快照存储与事件网关
//! - **llm**: 推理网关与 LLM 客户端（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 记忆账本（跨 Run 的 JSON 持久化记忆与目标状态）
//! - **observability**: tracing 初始化
//! - **react**: Planner、Executor、Reflector 与编排主循环
//! - **tools**: 工具沙箱（文件、补丁、搜索、抓取、受限 shell）与执行器
//! - **web**: HTTP / SSE 接口（feature `web`）

pub mod config;
pub mod core;
pub mod gateway;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
#[cfg(feature = "web")]
pub mod web;
