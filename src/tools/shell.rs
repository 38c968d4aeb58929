//! run_command：白名单命令执行器
//!
//! 仅允许配置中的命令名（argv[0]）；参数以 argv 数组直接传给进程，从不经过 shell；
//! stdout / stderr 各自截断，超时由 watchdog 杀掉子进程（kill_on_drop）并返回 TIMEOUT。

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::core::{ToolError, ToolErrorCode};
use crate::tools::registry::{parse_args, schema_value};
use crate::tools::{SafeFs, Tool, ToolName};

const MAX_TIMEOUT_MS: u64 = 600_000;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RunCommandArgs {
    /// 命令名（必须在白名单内，不含路径分隔符）
    cmd: String,
    #[serde(default)]
    args: Vec<String>,
    /// 工作目录（工作区相对），默认工作区根
    cwd: Option<String>,
    timeout_ms: Option<u64>,
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Shell 工具：仅允许白名单内命令
pub struct ShellTool {
    fs: SafeFs,
    allowed_commands: HashSet<String>,
    timeout_ms: u64,
    output_max_bytes: usize,
}

impl ShellTool {
    pub fn new(
        fs: SafeFs,
        allowed_commands: Vec<String>,
        timeout_ms: u64,
        output_max_bytes: usize,
    ) -> Self {
        Self {
            fs,
            allowed_commands: allowed_commands.into_iter().collect(),
            timeout_ms,
            output_max_bytes,
        }
    }

    fn check_allowed(&self, cmd: &str) -> Result<(), ToolError> {
        if cmd.contains('/') || cmd.contains('\\') {
            return Err(ToolError::new(
                ToolErrorCode::CmdNotAllowed,
                format!("Command '{}' must be a bare name, not a path", cmd),
            ));
        }
        if self.allowed_commands.contains(cmd) {
            return Ok(());
        }
        Err(ToolError::new(
            ToolErrorCode::CmdNotAllowed,
            format!("Command '{}' not in allowlist", cmd),
        ))
    }
}

/// 会改变命令解析或动态加载行为的环境变量
fn check_env(env: &HashMap<String, String>) -> Result<(), ToolError> {
    for key in env.keys() {
        let upper = key.to_ascii_uppercase();
        if upper == "PATH" || upper.starts_with("LD_") || upper.starts_with("DYLD_") {
            return Err(ToolError::validation(format!(
                "env variable '{}' may not be overridden",
                key
            )));
        }
    }
    Ok(())
}

/// 最多保留 max 字节，其余读出丢弃，避免子进程阻塞在写满的管道上
async fn read_capped<R: AsyncRead + Unpin>(
    reader: Option<R>,
    max: usize,
) -> std::io::Result<(String, bool)> {
    let Some(mut reader) = reader else {
        return Ok((String::new(), false));
    };
    let mut buf = Vec::with_capacity(max.min(8192) + 1);
    (&mut reader).take(max as u64 + 1).read_to_end(&mut buf).await?;
    let truncated = buf.len() > max;
    if truncated {
        buf.truncate(max);
        tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    }
    Ok((String::from_utf8_lossy(&buf).into_owned(), truncated))
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> ToolName {
        ToolName::RunCommand
    }

    fn description(&self) -> &str {
        "Run an allow-listed program with an argv array (no shell). Returns exitCode, stdout, stderr."
    }

    fn parameters_schema(&self) -> Value {
        schema_value::<RunCommandArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: RunCommandArgs = parse_args(self.name(), args)?;
        let cmd = args.cmd.trim();
        if cmd.is_empty() {
            return Err(ToolError::validation("cmd must not be empty"));
        }
        let timeout_ms = args.timeout_ms.unwrap_or(self.timeout_ms);
        if timeout_ms == 0 || timeout_ms > MAX_TIMEOUT_MS {
            return Err(ToolError::validation(format!(
                "timeoutMs must be between 1 and {}",
                MAX_TIMEOUT_MS
            )));
        }
        self.check_allowed(cmd)?;
        check_env(&args.env)?;
        let cwd = match &args.cwd {
            Some(dir) => self.fs.resolve(dir)?,
            None => self.fs.root().to_path_buf(),
        };

        tracing::info!(cmd = %cmd, args = ?args.args, "run_command");
        let start = Instant::now();
        let mut child = Command::new(cmd)
            .args(&args.args)
            .current_dir(&cwd)
            .envs(&args.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ToolError::new(
                    ToolErrorCode::SpawnFailed,
                    format!("Failed to spawn '{}': {}", cmd, e),
                )
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let max = self.output_max_bytes;
        let collect = async {
            tokio::try_join!(
                read_capped(stdout, max),
                read_capped(stderr, max),
                child.wait()
            )
        };

        // 超时后 future 被丢弃，返回时 child 随之被 kill
        let ((stdout, stdout_truncated), (stderr, stderr_truncated), status) =
            match tokio::time::timeout(Duration::from_millis(timeout_ms), collect).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return Err(ToolError::from_io(&format!("Wait for '{}'", cmd), &e)),
                Err(_) => {
                    return Err(ToolError::new(
                        ToolErrorCode::Timeout,
                        format!("Command '{}' timed out after {}ms", cmd, timeout_ms),
                    )
                    .with_details(json!({ "timeoutMs": timeout_ms })))
                }
            };

        Ok(json!({
            "exitCode": status.code(),
            "stdout": stdout,
            "stderr": stderr,
            "stdoutTruncated": stdout_truncated,
            "stderrTruncated": stderr_truncated,
            "durationMs": start.elapsed().as_millis() as u64,
        }))
    }
}
