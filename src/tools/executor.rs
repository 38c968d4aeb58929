//! 工具执行器
//!
//! 持有 ToolRegistry，execute(tool_name, args) 解析工具名、分发并把结果统一为 ToolResult；
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::core::{ToolError, ToolErrorCode, ToolResult};
use crate::tools::{Tool, ToolName, ToolRegistry};

/// 工具执行器：工具沙箱的唯一入口
pub struct ToolExecutor {
    registry: ToolRegistry,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// 执行指定工具；未知工具返回 UNKNOWN_TOOL，工具错误原样包装；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: Value) -> ToolResult {
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let result = match self.resolve(tool_name) {
            Ok(tool) => tool.execute(args).await,
            Err(e) => Err(e),
        };

        let code = result.as_ref().err().map(|e| e.code.as_str());
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "code": code,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        ToolResult::from(result)
    }

    fn resolve(&self, tool_name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        let name: ToolName = tool_name.parse()?;
        self.registry.get(name).ok_or_else(|| {
            ToolError::new(
                ToolErrorCode::UnknownTool,
                format!("Tool not registered: {}", tool_name),
            )
        })
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<ToolName> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ReadFileTool, SafeFs};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_unknown_tool_and_wire_shape() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hi.txt"), "hello").unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(ReadFileTool::new(SafeFs::new(dir.path()), 1000));
        let executor = ToolExecutor::new(registry);

        let res = executor.execute("format_disk", serde_json::json!({})).await;
        assert!(!res.ok);
        assert_eq!(res.error_code(), Some(ToolErrorCode::UnknownTool));

        // 合法名称但未注册
        let res = executor.execute("run_command", serde_json::json!({})).await;
        assert_eq!(res.error_code(), Some(ToolErrorCode::UnknownTool));

        let res = executor
            .execute("read_file", serde_json::json!({"path": "hi.txt"}))
            .await;
        assert!(res.ok);
        let wire = serde_json::to_value(&res).unwrap();
        assert_eq!(wire["ok"], true);
        assert_eq!(wire["data"]["content"], "hello");
        assert!(wire.get("error").is_none());

        let res = executor
            .execute("read_file", serde_json::json!({"path": "../../etc/passwd"}))
            .await;
        let wire = serde_json::to_value(&res).unwrap();
        assert_eq!(wire["ok"], false);
        assert_eq!(wire["error"]["code"], "ACCESS_DENIED");
    }

    #[test]
    fn test_args_preview_is_bounded() {
        let long = serde_json::json!({"content": "x".repeat(500)});
        assert_eq!(args_preview(&long).chars().count(), 203);
    }
}
