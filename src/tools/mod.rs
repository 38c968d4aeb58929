//! 工具沙箱：封闭工具集合、参数 schema 校验、工作区路径约束与统一执行入口

pub mod executor;
pub mod fetch;
pub mod filesystem;
pub mod patch;
pub mod registry;
pub mod search;
pub mod shell;

pub use executor::ToolExecutor;
pub use fetch::FetchTool;
pub use filesystem::{FileTreeTool, ReadFileTool, SafeFs, WriteFileTool};
pub use patch::ApplyPatchTool;
pub use registry::{Tool, ToolName, ToolRegistry};
pub use search::SearchTool;
pub use shell::ShellTool;

use crate::config::ToolsSection;

/// 按配置注册全部七个工具
pub fn default_registry(fs: SafeFs, cfg: &ToolsSection) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(FileTreeTool::new(fs.clone()));
    registry.register(ReadFileTool::new(fs.clone(), cfg.read_max_bytes));
    registry.register(WriteFileTool::new(fs.clone()));
    registry.register(ApplyPatchTool::new(fs.clone()));
    registry.register(SearchTool::new(fs.clone(), cfg.max_matches));
    registry.register(FetchTool::new(cfg.fetch_max_bytes, cfg.fetch_timeout_secs));
    registry.register(ShellTool::new(
        fs,
        cfg.shell.allowed_commands.clone(),
        cfg.command_timeout_ms,
        cfg.output_max_bytes,
    ));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_covers_closed_set() {
        let dir = tempfile::tempdir().unwrap();
        let registry = default_registry(SafeFs::new(dir.path()), &ToolsSection::default());
        assert_eq!(registry.tool_names(), ToolName::ALL.to_vec());
        for tool in registry.to_schema_json().as_array().unwrap() {
            assert_eq!(tool["parameters"]["type"], "object", "{}", tool["name"]);
        }
    }
}
