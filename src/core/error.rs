//! Agent 错误类型与工具错误码
//!
//! AgentError 用于组件内部传播（持久化、配置、LLM 等）；ToolError / ToolResult 是工具沙箱对外的
//! 带标签结果（`{ok:true,data}` / `{ok:false,error:{code,message,details?}}`），由 Executor 折叠进任务结果文本。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    /// Planner 未返回任何任务（运行级失败）
    #[error("Planner returned no tasks")]
    EmptyPlan,

    #[error("Queue error: {0}")]
    Queue(String),
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::JsonParse(e.to_string())
    }
}

/// 工具错误码（封闭集合，序列化为 SCREAMING_SNAKE_CASE）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorCode {
    /// 参数缺失、多余字段或越界（执行前拒绝）
    ValidationError,
    UnknownTool,
    /// 路径逃逸出工作区
    AccessDenied,
    /// 命令不在白名单
    CmdNotAllowed,
    NotFound,
    IoError,
    Timeout,
    PatchOutOfRange,
    InvalidRegex,
    FetchFailed,
    SpawnFailed,
}

impl ToolErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorCode::ValidationError => "VALIDATION_ERROR",
            ToolErrorCode::UnknownTool => "UNKNOWN_TOOL",
            ToolErrorCode::AccessDenied => "ACCESS_DENIED",
            ToolErrorCode::CmdNotAllowed => "CMD_NOT_ALLOWED",
            ToolErrorCode::NotFound => "NOT_FOUND",
            ToolErrorCode::IoError => "IO_ERROR",
            ToolErrorCode::Timeout => "TIMEOUT",
            ToolErrorCode::PatchOutOfRange => "PATCH_OUT_OF_RANGE",
            ToolErrorCode::InvalidRegex => "INVALID_REGEX",
            ToolErrorCode::FetchFailed => "FETCH_FAILED",
            ToolErrorCode::SpawnFailed => "SPAWN_FAILED",
        }
    }
}

/// 工具错误：错误码 + 可读信息 + 可选细节
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("[{}] {message}", code.as_str())]
pub struct ToolError {
    pub code: ToolErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolError {
    pub fn new(code: ToolErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ToolErrorCode::ValidationError, message)
    }

    pub fn access_denied(path: &str) -> Self {
        Self::new(
            ToolErrorCode::AccessDenied,
            format!("Access denied: path '{}' is outside the workspace", path),
        )
    }

    /// 将 std::io::Error 映射为 NOT_FOUND / ACCESS_DENIED / IO_ERROR
    pub fn from_io(context: &str, e: &std::io::Error) -> Self {
        let code = match e.kind() {
            std::io::ErrorKind::NotFound => ToolErrorCode::NotFound,
            std::io::ErrorKind::PermissionDenied => ToolErrorCode::AccessDenied,
            _ => ToolErrorCode::IoError,
        };
        Self::new(code, format!("{}: {}", context, e))
    }
}

/// 工具调用结果：`{ok: true, data}` 或 `{ok: false, error}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolResult {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: ToolError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error),
        }
    }

    pub fn error_code(&self) -> Option<ToolErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

impl From<Result<Value, ToolError>> for ToolResult {
    fn from(r: Result<Value, ToolError>) -> Self {
        match r {
            Ok(data) => ToolResult::success(data),
            Err(e) => ToolResult::failure(e),
        }
    }
}
