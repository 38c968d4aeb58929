//! 组件装配：从配置创建 LLM、工具沙箱、记忆账本与编排器
//!
//! 所有共享状态（工具表、账本）在这里构造一次并以 Arc 注入，不使用全局单例。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient, ReasoningGateway};
use crate::memory::MemoryLedger;
use crate::react::{Orchestrator, RunConfig};
use crate::tools::{default_registry, SafeFs, ToolExecutor};

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(MockLlmClient::new());
    }

    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();

    if provider == "deepseek" && (has_deepseek_key || openai_key.is_some()) {
        tracing::info!("Using DeepSeek LLM");
        Arc::new(create_deepseek_client(&cfg.llm))
    } else if let Some(key) = openai_key {
        tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            Some(key.as_str()),
        ))
    } else if has_deepseek_key {
        tracing::info!("Using DeepSeek LLM (only DEEPSEEK_API_KEY set)");
        Arc::new(create_deepseek_client(&cfg.llm))
    } else {
        tracing::warn!("No API key set, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

/// 预构建的 Agent 组件，进程内共享
pub struct AgentComponents {
    pub orchestrator: Arc<Orchestrator>,
    pub tools: Arc<ToolExecutor>,
    pub ledger: Arc<MemoryLedger>,
    /// 由 [agent] 段得到的默认运行策略
    pub run_config: RunConfig,
}

/// 用给定 LLM 装配组件（测试可注入 Mock）
pub fn create_agent_components_with_llm(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
) -> Result<AgentComponents, AgentError> {
    std::fs::create_dir_all(&cfg.app.workspace_root)?;
    let fs = SafeFs::new(&cfg.app.workspace_root);
    tracing::info!(workspace = %fs.root().display(), "tool sandbox root");

    let tools = Arc::new(ToolExecutor::new(default_registry(fs, &cfg.tools)));
    let ledger = Arc::new(MemoryLedger::open(&cfg.app.data_dir)?);
    let orchestrator = Arc::new(Orchestrator::new(
        ReasoningGateway::new(llm),
        tools.clone(),
        ledger.clone(),
        cfg.agent.memory_context_entries,
    ));

    Ok(AgentComponents {
        orchestrator,
        tools,
        ledger,
        run_config: RunConfig::from(&cfg.agent),
    })
}

/// 按配置选择 LLM 并装配组件
pub fn create_agent_components(cfg: &AppConfig) -> Result<AgentComponents, AgentError> {
    create_agent_components_with_llm(cfg, create_llm_from_config(cfg))
}
