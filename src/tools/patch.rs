//! apply_patch：按行区间替换文件内容
//!
//! 整个文件读入内存，编辑按起始行从高到低依次应用（先改后面的行，前面编辑的行号不失效），
//! 最后一次性写回；任一编辑越界则整体失败，不写盘。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::{ToolError, ToolErrorCode};
use crate::tools::registry::{parse_args, schema_value};
use crate::tools::{SafeFs, Tool, ToolName};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct LineEdit {
    /// 1-based，含
    pub start_line: usize,
    /// 1-based，含
    pub end_line: usize,
    /// 替换文本；空串表示删除该区间
    pub new_text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct PatchArgs {
    path: String,
    edits: Vec<LineEdit>,
}

/// 校验并按 startLine 降序排列编辑；区间非法或相互重叠返回 VALIDATION_ERROR
fn order_edits(mut edits: Vec<LineEdit>) -> Result<Vec<LineEdit>, ToolError> {
    if edits.is_empty() {
        return Err(ToolError::validation("edits must not be empty"));
    }
    for e in &edits {
        if e.start_line == 0 || e.end_line < e.start_line {
            return Err(ToolError::validation(format!(
                "invalid line range {}..{}",
                e.start_line, e.end_line
            )));
        }
    }
    edits.sort_by(|a, b| b.start_line.cmp(&a.start_line));
    for pair in edits.windows(2) {
        let (higher, lower) = (&pair[0], &pair[1]);
        if lower.end_line >= higher.start_line {
            return Err(ToolError::validation(format!(
                "edits {}..{} and {}..{} overlap",
                lower.start_line, lower.end_line, higher.start_line, higher.end_line
            )));
        }
    }
    Ok(edits)
}

/// 在内存中应用已排序的编辑；保留原文件末尾换行的有无
pub fn apply_edits(original: &str, edits: Vec<LineEdit>) -> Result<String, ToolError> {
    let edits = order_edits(edits)?;
    let trailing_newline = original.ends_with('\n');
    let body = original.strip_suffix('\n').unwrap_or(original);
    let mut lines: Vec<&str> = if body.is_empty() && !trailing_newline {
        Vec::new()
    } else {
        body.split('\n').collect()
    };

    let line_count = lines.len();
    if let Some(bad) = edits.iter().find(|e| e.end_line > line_count) {
        return Err(ToolError::new(
            ToolErrorCode::PatchOutOfRange,
            format!(
                "edit {}..{} is out of range (file has {} lines)",
                bad.start_line, bad.end_line, line_count
            ),
        )
        .with_details(json!({ "lineCount": line_count })));
    }

    for edit in &edits {
        let replacement: Vec<&str> = if edit.new_text.is_empty() {
            Vec::new()
        } else {
            edit.new_text
                .strip_suffix('\n')
                .unwrap_or(&edit.new_text)
                .split('\n')
                .collect()
        };
        lines.splice(edit.start_line - 1..edit.end_line, replacement);
    }

    let mut out = lines.join("\n");
    if trailing_newline && !lines.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

/// apply_patch 工具
pub struct ApplyPatchTool {
    fs: SafeFs,
}

impl ApplyPatchTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ApplyPatchTool {
    fn name(&self) -> ToolName {
        ToolName::ApplyPatch
    }

    fn description(&self) -> &str {
        "Replace 1-based inclusive line ranges of a workspace file. Edits must not overlap; empty newText deletes the range."
    }

    fn parameters_schema(&self) -> Value {
        schema_value::<PatchArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: PatchArgs = parse_args(self.name(), args)?;
        // 先校验编辑再碰文件
        let edits = order_edits(args.edits)?;
        let resolved = self.fs.resolve(&args.path)?;

        let original = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::from_io(&format!("Read {}", args.path), &e))?;
        let edit_count = edits.len();
        let patched = apply_edits(&original, edits)?;
        tokio::fs::write(&resolved, patched.as_bytes())
            .await
            .map_err(|e| ToolError::from_io(&format!("Write {}", args.path), &e))?;
        tracing::info!(path = %args.path, edits = edit_count, "apply_patch");

        Ok(json!({
            "path": self.fs.display(&resolved),
            "editsApplied": edit_count,
            "lineCount": patched.lines().count(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn edit(start: usize, end: usize, text: &str) -> LineEdit {
        LineEdit {
            start_line: start,
            end_line: end,
            new_text: text.to_string(),
        }
    }

    fn ten_lines() -> String {
        (1..=10).map(|i| format!("line{}\n", i)).collect()
    }

    const EXPECTED: &str = "line1\nY\nline4\nX\nline6\nline7\nline8\nline9\nline10\n";

    #[test]
    fn test_edits_applied_high_to_low_regardless_of_order() {
        let out = apply_edits(&ten_lines(), vec![edit(5, 5, "X"), edit(2, 3, "Y")]).unwrap();
        assert_eq!(out, EXPECTED);
        let out = apply_edits(&ten_lines(), vec![edit(2, 3, "Y"), edit(5, 5, "X")]).unwrap();
        assert_eq!(out, EXPECTED);
    }

    #[test]
    fn test_delete_and_multiline_replace() {
        let out = apply_edits("a\nb\nc", vec![edit(2, 2, "")]).unwrap();
        assert_eq!(out, "a\nc");
        let out = apply_edits("a\nb\nc\n", vec![edit(1, 1, "x\ny\n")]).unwrap();
        assert_eq!(out, "x\ny\nb\nc\n");
    }

    #[test]
    fn test_overlap_and_out_of_range_rejected() {
        let err = apply_edits(&ten_lines(), vec![edit(2, 4, "a"), edit(4, 6, "b")]).unwrap_err();
        assert_eq!(err.code, ToolErrorCode::ValidationError);
        let err = apply_edits(&ten_lines(), vec![edit(9, 11, "a")]).unwrap_err();
        assert_eq!(err.code, ToolErrorCode::PatchOutOfRange);
    }

    #[tokio::test]
    async fn test_out_of_range_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, ten_lines()).unwrap();
        let tool = ApplyPatchTool::new(SafeFs::new(dir.path()));

        let err = tool
            .execute(json!({
                "path": "f.txt",
                "edits": [
                    {"startLine": 1, "endLine": 1, "newText": "changed"},
                    {"startLine": 20, "endLine": 20, "newText": "boom"}
                ]
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ToolErrorCode::PatchOutOfRange);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), ten_lines());
    }

    #[tokio::test]
    async fn test_patch_fixture_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, ten_lines()).unwrap();
        let tool = ApplyPatchTool::new(SafeFs::new(dir.path()));
        let out = tool
            .execute(json!({
                "path": "f.txt",
                "edits": [
                    {"startLine": 5, "endLine": 5, "newText": "X"},
                    {"startLine": 2, "endLine": 3, "newText": "Y"}
                ]
            }))
            .await
            .unwrap();
        assert_eq!(out["editsApplied"], 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), EXPECTED);
    }
}
