//! 沙箱文件系统工具
//!
//! SafeFs 绑定工作区根目录，所有路径经 resolve 校验必须在根下（禁止 ../ 逃逸与符号链接逃逸）；
//! FileTreeTool / ReadFileTool / WriteFileTool 基于 SafeFs 提供 get_file_tree / read_file / write_file。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;

use crate::core::{ToolError, ToolErrorCode};
use crate::tools::registry::{parse_args, schema_value};
use crate::tools::{Tool, ToolName};

/// 遍历时跳过的目录（版本控制、依赖、构建产物）
pub(crate) const IGNORED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    ".next",
    "__pycache__",
    ".venv",
];

pub(crate) fn is_ignored(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|n| IGNORED_DIRS.contains(&n))
            .unwrap_or(false)
}

const MAX_TREE_ENTRIES: usize = 2000;

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&root))
                .unwrap_or(root)
        };
        let root_dir = root.canonicalize().unwrap_or_else(|_| normalize(&root));
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析并校验路径：先做词法归一化与前缀检查（逃逸时不做任何 I/O），
    /// 再对最深的已存在祖先取真实路径复查，拒绝指向根外的符号链接
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let raw = Path::new(path);
        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root_dir.join(raw)
        };
        let normalized = normalize(&joined);
        if !normalized.starts_with(&self.root_dir) {
            return Err(ToolError::access_denied(path));
        }

        // symlink_metadata 不跟随链接：悬空链接也算"已存在"，必须能解析到根内
        let mut ancestor = normalized.as_path();
        loop {
            if ancestor == self.root_dir || std::fs::symlink_metadata(ancestor).is_ok() {
                break;
            }
            match ancestor.parent() {
                Some(p) => ancestor = p,
                None => break,
            }
        }
        match ancestor.canonicalize() {
            Ok(real) if real.starts_with(&self.root_dir) => Ok(normalized),
            // 工作区根尚未创建
            Err(_) if ancestor == self.root_dir => Ok(normalized),
            _ => Err(ToolError::access_denied(path)),
        }
    }

    /// 工作区相对路径（用于输出）
    pub fn display(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root_dir).unwrap_or(path);
        let s = rel.to_string_lossy().replace('\\', "/");
        if s.is_empty() {
            ".".to_string()
        } else {
            s
        }
    }
}

/// 词法归一化：去掉 `.`，`..` 弹出上一级（不访问文件系统）
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(_) | Component::RootDir => out.push(comp.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(c) => out.push(c),
        }
    }
    out
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct FileTreeArgs {
    /// 起始目录（工作区相对），默认 "."
    #[serde(default = "default_dot")]
    root: String,
    /// 最大深度 1..=10，默认 3
    #[serde(default = "default_depth")]
    max_depth: usize,
}

fn default_dot() -> String {
    ".".to_string()
}

fn default_depth() -> usize {
    3
}

/// get_file_tree：深度受限的递归列表，跳过忽略目录
pub struct FileTreeTool {
    fs: SafeFs,
}

impl FileTreeTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for FileTreeTool {
    fn name(&self) -> ToolName {
        ToolName::GetFileTree
    }

    fn description(&self) -> &str {
        "List files and directories under a workspace directory (skips .git, node_modules, target, build output)."
    }

    fn parameters_schema(&self) -> Value {
        schema_value::<FileTreeArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: FileTreeArgs = parse_args(self.name(), args)?;
        if !(1..=10).contains(&args.max_depth) {
            return Err(ToolError::validation("maxDepth must be between 1 and 10"));
        }
        let base = self.fs.resolve(&args.root)?;
        if !base.is_dir() {
            return Err(ToolError::new(
                ToolErrorCode::NotFound,
                format!("Directory not found: {}", args.root),
            ));
        }

        let fs = self.fs.clone();
        let max_depth = args.max_depth;
        let (entries, truncated) = tokio::task::spawn_blocking(move || {
            let mut entries = Vec::new();
            let mut truncated = false;
            let walker = walkdir::WalkDir::new(&base)
                .min_depth(1)
                .max_depth(max_depth)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !is_ignored(e));
            for entry in walker.filter_map(|e| e.ok()) {
                if entries.len() >= MAX_TREE_ENTRIES {
                    truncated = true;
                    break;
                }
                let kind = if entry.file_type().is_dir() { "dir" } else { "file" };
                entries.push(json!({
                    "path": fs.display(entry.path()),
                    "type": kind,
                }));
            }
            (entries, truncated)
        })
        .await
        .map_err(|e| ToolError::new(ToolErrorCode::IoError, e.to_string()))?;

        Ok(json!({
            "root": args.root,
            "entries": entries,
            "truncated": truncated,
        }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ReadFileArgs {
    path: String,
    /// 1-based 起始行（含）
    start_line: Option<usize>,
    /// 1-based 结束行（含）
    end_line: Option<usize>,
    max_bytes: Option<usize>,
}

/// read_file：最多读取 maxBytes 字节，可按行区间投影
pub struct ReadFileTool {
    fs: SafeFs,
    max_bytes: usize,
}

impl ReadFileTool {
    pub fn new(fs: SafeFs, max_bytes: usize) -> Self {
        Self { fs, max_bytes }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> ToolName {
        ToolName::ReadFile
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace, optionally restricted to a 1-based inclusive line range."
    }

    fn parameters_schema(&self) -> Value {
        schema_value::<ReadFileArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: ReadFileArgs = parse_args(self.name(), args)?;
        let max_bytes = args.max_bytes.unwrap_or(self.max_bytes);
        if max_bytes == 0 || max_bytes > self.max_bytes {
            return Err(ToolError::validation(format!(
                "maxBytes must be between 1 and {}",
                self.max_bytes
            )));
        }
        if let Some(start) = args.start_line {
            if start == 0 {
                return Err(ToolError::validation("startLine is 1-based"));
            }
        }
        if let (Some(start), Some(end)) = (args.start_line, args.end_line) {
            if end < start {
                return Err(ToolError::validation("endLine must be >= startLine"));
            }
        }

        let resolved = self.fs.resolve(&args.path)?;
        tracing::debug!(path = %args.path, "read_file");
        let file = tokio::fs::File::open(&resolved)
            .await
            .map_err(|e| ToolError::from_io(&format!("Read {}", args.path), &e))?;
        let total_bytes = file
            .metadata()
            .await
            .map_err(|e| ToolError::from_io(&format!("Stat {}", args.path), &e))?
            .len();
        let mut buf = Vec::with_capacity(max_bytes.min(total_bytes as usize));
        file.take(max_bytes as u64)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| ToolError::from_io(&format!("Read {}", args.path), &e))?;
        let truncated = total_bytes > max_bytes as u64;
        let text = String::from_utf8_lossy(&buf).into_owned();

        let content = match (args.start_line, args.end_line) {
            (None, None) => text,
            (start, end) => {
                let start = start.unwrap_or(1);
                let end = end.unwrap_or(usize::MAX);
                text.lines()
                    .skip(start - 1)
                    .take(end.saturating_sub(start).saturating_add(1))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };

        Ok(json!({
            "path": self.fs.display(&resolved),
            "content": content,
            "truncated": truncated,
            "totalBytes": total_bytes,
        }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct WriteFileArgs {
    path: String,
    content: String,
    /// 父目录不存在时是否创建，默认 true
    #[serde(default = "default_true")]
    create_dirs: bool,
}

fn default_true() -> bool {
    true
}

/// write_file：覆盖写入，按需创建父目录
pub struct WriteFileTool {
    fs: SafeFs,
}

impl WriteFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> ToolName {
        ToolName::WriteFile
    }

    fn description(&self) -> &str {
        "Write (overwrite) a text file in the workspace, creating parent directories when createDirs is true."
    }

    fn parameters_schema(&self) -> Value {
        schema_value::<WriteFileArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: WriteFileArgs = parse_args(self.name(), args)?;
        let resolved = self.fs.resolve(&args.path)?;
        if resolved == self.fs.root() {
            return Err(ToolError::validation("path must name a file"));
        }

        if let Some(parent) = resolved.parent() {
            if !parent.exists() {
                if !args.create_dirs {
                    return Err(ToolError::new(
                        ToolErrorCode::NotFound,
                        format!("Parent directory does not exist: {}", self.fs.display(parent)),
                    ));
                }
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ToolError::from_io("Create directories", &e))?;
            }
        }

        tokio::fs::write(&resolved, args.content.as_bytes())
            .await
            .map_err(|e| ToolError::from_io(&format!("Write {}", args.path), &e))?;
        tracing::info!(path = %args.path, bytes = args.content.len(), "write_file");

        Ok(json!({
            "path": self.fs.display(&resolved),
            "bytesWritten": args.content.len(),
        }))
    }
}
