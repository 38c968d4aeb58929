//! 工具注册表
//!
//! 工具集合是封闭的（ToolName 枚举）；所有工具实现 Tool trait（name / description / schema / execute），
//! 由 ToolRegistry 按名注册与查找，ToolExecutor 负责统一分发与审计日志。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ToolError;

/// 封闭的工具名集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    GetFileTree,
    ReadFile,
    WriteFile,
    ApplyPatch,
    SearchInFiles,
    FetchUrl,
    RunCommand,
}

impl ToolName {
    pub const ALL: [ToolName; 7] = [
        ToolName::GetFileTree,
        ToolName::ReadFile,
        ToolName::WriteFile,
        ToolName::ApplyPatch,
        ToolName::SearchInFiles,
        ToolName::FetchUrl,
        ToolName::RunCommand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::GetFileTree => "get_file_tree",
            ToolName::ReadFile => "read_file",
            ToolName::WriteFile => "write_file",
            ToolName::ApplyPatch => "apply_patch",
            ToolName::SearchInFiles => "search_in_files",
            ToolName::FetchUrl => "fetch_url",
            ToolName::RunCommand => "run_command",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| {
                ToolError::new(
                    crate::core::ToolErrorCode::UnknownTool,
                    format!("Unknown tool: {}", s),
                )
            })
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolName;

    fn description(&self) -> &str;

    /// 参数 JSON Schema（由 schemars 从参数结构体生成）
    fn parameters_schema(&self) -> Value;

    /// 执行工具；参数校验失败须在任何 I/O 之前返回 VALIDATION_ERROR
    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// 将 JSON 参数解析为强类型结构体（结构体需 deny_unknown_fields），失败映射为 VALIDATION_ERROR
pub fn parse_args<T: DeserializeOwned>(tool: ToolName, args: Value) -> Result<T, ToolError> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args)
        .map_err(|e| ToolError::validation(format!("Invalid arguments for {}: {}", tool, e)))
}

/// 生成参数 schema 的 JSON 值
pub fn schema_value<T: schemars::JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

/// 工具注册表：按 ToolName 存储 Arc<dyn Tool>（有序，便于生成稳定的 prompt 与 API 输出）
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<ToolName, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Arc::new(tool));
    }

    pub fn get(&self, name: ToolName) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name).cloned()
    }

    pub fn tool_names(&self) -> Vec<ToolName> {
        self.tools.keys().copied().collect()
    }

    /// 返回 (name, description) 列表，用于 GET /agent/tools 与 prompt
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tools
            .iter()
            .map(|(name, tool)| (name.to_string(), tool.description().to_string()))
            .collect()
    }

    /// 生成 prompt 中的 Available tools 段落（名称、描述、参数 schema）
    pub fn prompt_section(&self) -> String {
        self.tools
            .iter()
            .map(|(name, tool)| {
                format!(
                    "- {}: {}\n  params schema: {}",
                    name,
                    tool.description(),
                    tool.parameters_schema()
                        .get("properties")
                        .cloned()
                        .unwrap_or(Value::Null)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_schema_json(&self) -> Value {
        Value::Array(
            self.tools
                .iter()
                .map(|(name, tool)| {
                    serde_json::json!({
                        "name": name.as_str(),
                        "description": tool.description(),
                        "parameters": tool.parameters_schema()
                    })
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_name_round_trip() {
        for name in ToolName::ALL {
            assert_eq!(name.as_str().parse::<ToolName>().unwrap(), name);
        }
        let err = "rm_rf".parse::<ToolName>().unwrap_err();
        assert_eq!(err.code, crate::core::ToolErrorCode::UnknownTool);
    }

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    #[allow(dead_code)]
    struct Args {
        path: String,
    }

    #[test]
    fn test_parse_args_rejects_unknown_and_missing() {
        let err = parse_args::<Args>(ToolName::ReadFile, serde_json::json!({"path": "a", "x": 1}))
            .unwrap_err();
        assert_eq!(err.code, crate::core::ToolErrorCode::ValidationError);
        let err = parse_args::<Args>(ToolName::ReadFile, serde_json::json!({})).unwrap_err();
        assert_eq!(err.code, crate::core::ToolErrorCode::ValidationError);
        assert!(parse_args::<Args>(ToolName::ReadFile, serde_json::json!({"path": "a"})).is_ok());
    }
}
