//! DeepSeek 后端：走 OpenAI 兼容协议，端点、模型名与密钥变量不同

use crate::config::LlmSection;
use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// 选择模型：`DEEPSEEK_MODEL` 优先；配置里是 OpenAI 系列模型名时改用 deepseek-chat
fn resolve_model(configured: &str, env_override: Option<String>) -> String {
    if let Some(m) = env_override.filter(|m| !m.trim().is_empty()) {
        return m;
    }
    let configured = configured.trim();
    if configured.is_empty() || configured.starts_with("gpt-") || configured.starts_with("o1") {
        DEEPSEEK_CHAT.to_string()
    } else {
        configured.to_string()
    }
}

/// 按 [llm] 段创建 DeepSeek 客户端；密钥取 `DEEPSEEK_API_KEY`，缺失时回落 `OPENAI_API_KEY`
pub fn create_deepseek_client(llm: &LlmSection) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .ok();
    let model = resolve_model(&llm.model, std::env::var("DEEPSEEK_MODEL").ok());
    let base_url = llm.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL);
    tracing::debug!(model = %model, base_url = %base_url, "deepseek client");
    OpenAiClient::new(Some(base_url), &model, api_key.as_deref())
}
