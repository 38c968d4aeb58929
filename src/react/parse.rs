//! 模型输出的宽松解析适配层
//!
//! 编号任务列表、`TOOL:` / `PARAMS:` 工具调用、反思 JSON 都在这里被转换为强类型值；
//! 任何解析失败都产出安全的默认值，不向外抛错。

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::core::Reflection;

/// 提取第一个配平的 `{...}` 子串（感知字符串与转义，字符串内的大括号不计数）
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn numbered_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\d+\s*[.)]?\s*(.*)$").unwrap())
}

/// 编号列表：只保留以整数开头的行，去掉 `N.` / `N)` 前缀；空描述丢弃
pub fn parse_numbered_list(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| numbered_line_re().captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// 从模型回复中解析出的工具调用
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    /// 名称与参数对象
    Call { name: String, params: Value },
    /// 找到了 TOOL 行但 PARAMS 不是合法 JSON 对象
    Malformed { name: String, error: String },
}

fn tool_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"TOOL:\s*(\w+)\s*\r?\n\s*PARAMS:").unwrap()
    })
}

/// 查找第一处 `TOOL: <name>\nPARAMS: {...}`；没有则返回 None（整段回复即任务结果）
pub fn parse_tool_invocation(text: &str) -> Option<ToolInvocation> {
    let caps = tool_call_re().captures(text)?;
    let name = caps.get(1)?.as_str().to_string();
    let rest = &text[caps.get(0)?.end()..];

    let Some(raw) = extract_first_json_object(rest) else {
        return Some(ToolInvocation::Malformed {
            name,
            error: "PARAMS is not a JSON object".to_string(),
        });
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(params @ Value::Object(_)) => Some(ToolInvocation::Call { name, params }),
        Ok(_) => Some(ToolInvocation::Malformed {
            name,
            error: "PARAMS is not a JSON object".to_string(),
        }),
        Err(e) => Some(ToolInvocation::Malformed {
            name,
            error: e.to_string(),
        }),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReflection {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    analysis: String,
    #[serde(default)]
    should_retry: bool,
    #[serde(default)]
    adjustments: Option<Value>,
    #[serde(default)]
    confidence: Option<f64>,
}

fn default_true() -> bool {
    true
}

/// 解析反思 JSON；无法解析时回退为 `{success:true, shouldRetry:false, confidence:50}`
pub fn parse_reflection(text: &str) -> Reflection {
    let Some(raw) = extract_first_json_object(text) else {
        return Reflection::fallback("Reflection output contained no JSON object");
    };
    match serde_json::from_str::<RawReflection>(raw) {
        Ok(r) => Reflection {
            success: r.success,
            analysis: r.analysis,
            should_retry: r.should_retry,
            adjustments: match r.adjustments {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
                Some(Value::Null) | None | Some(Value::String(_)) => None,
                Some(other) => Some(other.to_string()),
            },
            confidence: r
                .confidence
                .map(|c| c.round().clamp(0.0, 100.0) as u8)
                .unwrap_or(50),
        },
        Err(e) => Reflection::fallback(format!("Unparseable reflection: {}", e)),
    }
}
