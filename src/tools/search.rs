//! search_in_files：在工作区文本文件中按字面量或正则搜索
//!
//! 深度受限遍历，仅扫描白名单扩展名，命中 maxMatches 后立即停止。

use std::path::PathBuf;

use async_trait::async_trait;
use regex::RegexBuilder;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::{ToolError, ToolErrorCode};
use crate::tools::filesystem::is_ignored;
use crate::tools::registry::{parse_args, schema_value};
use crate::tools::{SafeFs, Tool, ToolName};

const TEXT_EXTENSIONS: &[&str] = &[
    "rs", "toml", "md", "txt", "json", "yaml", "yml", "ts", "tsx", "js", "jsx", "mjs", "py",
    "go", "java", "kt", "c", "h", "cpp", "hpp", "cs", "rb", "php", "swift", "html", "css",
    "scss", "sh", "sql", "xml", "csv", "ini", "cfg", "env",
];

const MAX_DEPTH: usize = 8;
const MAX_FILE_BYTES: u64 = 1024 * 1024;
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct SearchArgs {
    query: String,
    /// 搜索起点（工作区相对），默认 ["."]
    #[serde(default)]
    paths: Vec<String>,
    /// query 是否为正则，默认按字面量
    #[serde(default)]
    regex: bool,
    #[serde(default)]
    case_sensitive: bool,
    max_matches: Option<usize>,
}

/// search_in_files 工具
pub struct SearchTool {
    fs: SafeFs,
    max_matches: usize,
}

impl SearchTool {
    pub fn new(fs: SafeFs, max_matches: usize) -> Self {
        Self { fs, max_matches }
    }
}

fn has_text_extension(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TEXT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> ToolName {
        ToolName::SearchInFiles
    }

    fn description(&self) -> &str {
        "Search text files in the workspace for a literal string or regex; returns {path, line, preview} matches."
    }

    fn parameters_schema(&self) -> Value {
        schema_value::<SearchArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: SearchArgs = parse_args(self.name(), args)?;
        if args.query.is_empty() {
            return Err(ToolError::validation("query must not be empty"));
        }
        let max_matches = args.max_matches.unwrap_or(self.max_matches);
        if max_matches == 0 || max_matches > 1000 {
            return Err(ToolError::validation("maxMatches must be between 1 and 1000"));
        }

        let pattern = if args.regex {
            args.query.clone()
        } else {
            regex::escape(&args.query)
        };
        let re = RegexBuilder::new(&pattern)
            .case_insensitive(!args.case_sensitive)
            .build()
            .map_err(|e| ToolError::new(ToolErrorCode::InvalidRegex, e.to_string()))?;

        let roots = if args.paths.is_empty() {
            vec![".".to_string()]
        } else {
            args.paths
        };
        let bases = roots
            .iter()
            .map(|p| self.fs.resolve(p))
            .collect::<Result<Vec<PathBuf>, _>>()?;

        let fs = self.fs.clone();
        let (matches, files_scanned, truncated) = tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            let mut files_scanned = 0usize;
            'outer: for base in bases {
                let walker = walkdir::WalkDir::new(&base)
                    .max_depth(MAX_DEPTH)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_entry(|e| !is_ignored(e));
                for entry in walker.filter_map(|e| e.ok()) {
                    if !entry.file_type().is_file() || !has_text_extension(entry.path()) {
                        continue;
                    }
                    let too_big = entry
                        .metadata()
                        .map(|m| m.len() > MAX_FILE_BYTES)
                        .unwrap_or(true);
                    if too_big {
                        continue;
                    }
                    let Ok(content) = std::fs::read_to_string(entry.path()) else {
                        continue;
                    };
                    files_scanned += 1;
                    for (idx, line) in content.lines().enumerate() {
                        if re.is_match(line) {
                            matches.push(json!({
                                "path": fs.display(entry.path()),
                                "line": idx + 1,
                                "preview": line.trim().chars().take(PREVIEW_CHARS).collect::<String>(),
                            }));
                            if matches.len() >= max_matches {
                                break 'outer;
                            }
                        }
                    }
                }
            }
            let truncated = matches.len() >= max_matches;
            (matches, files_scanned, truncated)
        })
        .await
        .map_err(|e| ToolError::new(ToolErrorCode::IoError, e.to_string()))?;

        tracing::debug!(query = %args.query, hits = matches.len(), files_scanned, "search_in_files");
        Ok(json!({
            "matches": matches,
            "filesScanned": files_scanned,
            "truncated": truncated,
        }))
    }
}
