//! 核心层：错误类型、Run 状态模型、组件装配

pub mod error;
pub mod orchestrator;
pub mod state;

pub use error::{AgentError, ToolError, ToolErrorCode, ToolResult};
pub use orchestrator::{
    create_agent_components, create_agent_components_with_llm, create_llm_from_config,
    AgentComponents,
};
pub use state::{LogEntry, LogKind, Reflection, Run, RunStatus, Task, TaskStatus};
