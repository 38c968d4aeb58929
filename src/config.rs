//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ASSISTLOOP__*` 覆盖（双下划线表示嵌套，如 `ASSISTLOOP__AGENT__MAX_STEPS=30`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub web: WebSection,
}

/// [app] 段：工作区（沙箱根）与数据目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// 沙箱根目录，所有工具路径必须落在其下
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// 记忆账本与 Run 快照的存放目录
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("workspace")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            data_dir: default_data_dir(),
        }
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock；无 API Key 时回退 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
        }
    }
}

/// [agent] 段：编排循环的步数 / 重试 / 反思策略
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// 单个任务的最大尝试次数（含首次）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub reflection: bool,
    #[serde(default)]
    pub autonomous: bool,
    /// 重试退避基数（毫秒），每次重试翻倍
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// 反思置信度低于此值时按 shouldRetry 处理；0 表示关闭
    #[serde(default)]
    pub min_confidence: u8,
    /// 拼入 Planner / Executor prompt 的最近记忆条数
    #[serde(default = "default_memory_context_entries")]
    pub memory_context_entries: usize,
}

fn default_max_steps() -> u32 {
    20
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_memory_context_entries() -> usize {
    15
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_retries: default_max_retries(),
            reflection: true,
            autonomous: false,
            retry_backoff_ms: default_retry_backoff_ms(),
            min_confidence: 0,
            memory_context_entries: default_memory_context_entries(),
        }
    }
}

/// [tools] 段：读写上限、命令超时、抓取限制与 Shell 白名单
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_read_max_bytes")]
    pub read_max_bytes: usize,
    /// run_command 的 stdout / stderr 各自截断上限
    #[serde(default = "default_output_max_bytes")]
    pub output_max_bytes: usize,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_fetch_max_bytes")]
    pub fetch_max_bytes: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_matches")]
    pub max_matches: usize,
    #[serde(default)]
    pub shell: ShellSection,
}

fn default_read_max_bytes() -> usize {
    200_000
}

fn default_output_max_bytes() -> usize {
    50_000
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

fn default_fetch_max_bytes() -> usize {
    100_000
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_max_matches() -> usize {
    100
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            read_max_bytes: default_read_max_bytes(),
            output_max_bytes: default_output_max_bytes(),
            command_timeout_ms: default_command_timeout_ms(),
            fetch_max_bytes: default_fetch_max_bytes(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_matches: default_max_matches(),
            shell: ShellSection::default(),
        }
    }
}

/// [tools.shell] 段：允许执行的命令名（argv[0]，不经过 shell）
#[derive(Debug, Clone, Deserialize)]
pub struct ShellSection {
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
}

fn default_allowed_commands() -> Vec<String> {
    [
        "ls", "cat", "head", "tail", "wc", "grep", "find", "echo", "pwd", "git", "cargo", "rustc",
        "node", "npm", "python3", "diff", "sort",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
        }
    }
}

/// [queue] 段：worker 数量与快照过期时间
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,
}

fn default_workers() -> usize {
    2
}

fn default_snapshot_ttl_secs() -> u64 {
    3600
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            snapshot_ttl_secs: default_snapshot_ttl_secs(),
        }
    }
}

/// [web] 段：HTTP 监听端口
#[derive(Debug, Clone, Deserialize)]
pub struct WebSection {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Default for WebSection {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

/// 从 config 目录加载配置，环境变量 ASSISTLOOP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ASSISTLOOP__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ASSISTLOOP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}
