//! fetch_url：发起 HTTP(S) GET，按块读取响应体并在 maxBytes 处截断

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::{ToolError, ToolErrorCode};
use crate::tools::registry::{parse_args, schema_value};
use crate::tools::{Tool, ToolName};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct FetchArgs {
    url: String,
    max_bytes: Option<usize>,
}

/// fetch_url 工具
pub struct FetchTool {
    client: reqwest::Client,
    max_bytes: usize,
}

impl FetchTool {
    pub fn new(max_bytes: usize, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("assistloop/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client, max_bytes }
    }

    pub fn with_client(client: reqwest::Client, max_bytes: usize) -> Self {
        Self { client, max_bytes }
    }
}

fn fetch_failed(e: impl std::fmt::Display) -> ToolError {
    ToolError::new(ToolErrorCode::FetchFailed, e.to_string())
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> ToolName {
        ToolName::FetchUrl
    }

    fn description(&self) -> &str {
        "Fetch an http(s) URL and return the response body (clipped to maxBytes)."
    }

    fn parameters_schema(&self) -> Value {
        schema_value::<FetchArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: FetchArgs = parse_args(self.name(), args)?;
        let max_bytes = args.max_bytes.unwrap_or(self.max_bytes);
        if max_bytes == 0 || max_bytes > self.max_bytes {
            return Err(ToolError::validation(format!(
                "maxBytes must be between 1 and {}",
                self.max_bytes
            )));
        }
        let url = reqwest::Url::parse(&args.url)
            .map_err(|e| ToolError::validation(format!("Invalid url '{}': {}", args.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::validation(format!(
                "Unsupported url scheme: {}",
                url.scheme()
            )));
        }

        tracing::info!(url = %url, "fetch_url");
        let mut response = self.client.get(url.clone()).send().await.map_err(fetch_failed)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let mut body: Vec<u8> = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await.map_err(fetch_failed)? {
            let room = max_bytes - body.len();
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
            if body.len() == max_bytes {
                // 恰好读满时再看一眼是否还有剩余
                truncated = response.chunk().await.map_err(fetch_failed)?.is_some();
                break;
            }
        }

        Ok(json!({
            "url": url.as_str(),
            "status": status,
            "contentType": content_type,
            "body": String::from_utf8_lossy(&body),
            "bytes": body.len(),
            "truncated": truncated,
        }))
    }
}
